use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use m8b::observations::Separator;
use m8b::{analyze, heatmap, pipeline, query};

#[derive(Parser)]
#[command(name = "m8b")]
#[command(about = "Build and query compact MAC-to-grid-cell spatial indexes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read an observation file, produce an index in one in-memory pass
    Generate {
        /// Observation file (mac|lat|lon rows)
        input: PathBuf,
        /// Output index file
        output: PathBuf,
        /// Key width in bits (1-32)
        slicebits: u32,
        /// Fields are tab-separated instead of pipe-separated
        #[arg(short = 't')]
        tabs: bool,
    },

    /// Partition an observation file into stage buckets, round-robin
    Stage {
        input: PathBuf,
        /// Staging directory
        stage_dir: PathBuf,
        #[arg(short = 't')]
        tabs: bool,
    },

    /// Stage by key nibble and sort+dedup in one combined pass
    Restage {
        input: PathBuf,
        stage_dir: PathBuf,
        #[arg(short = 't')]
        tabs: bool,
    },

    /// Re-slice, re-partition and sort+dedup a staged corpus
    Reduce {
        stage_dir: PathBuf,
        reduce_dir: PathBuf,
        /// Target key width in bits (4-32)
        slicebits: u32,
    },

    /// Sort+dedup a staged corpus in place at full key width
    Compact { stage_dir: PathBuf },

    /// Assemble a reduced corpus into the final index file
    Combine {
        reduce_dir: PathBuf,
        output: PathBuf,
        slicebits: u32,
    },

    /// Dump an intermediate record stream to stdout
    Dumpi { file: PathBuf },

    /// Load the whole index and query it for MACs
    Query {
        index: PathBuf,
        #[arg(required = true)]
        macs: Vec<String>,
    },

    /// Stream just enough of the index to answer for MACs (gzip-aware)
    Scan {
        index: PathBuf,
        #[arg(required = true)]
        macs: Vec<String>,
    },

    /// Density and collision statistics over a staged corpus
    Score {
        stage_dir: PathBuf,
        /// Also render the density grid as a PNG heatmap
        #[arg(long)]
        png: Option<PathBuf>,
    },

    /// Dominance/redundancy statistics over a staged (deduped) corpus
    Score2 { stage_dir: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Commands::Generate {
            input,
            output,
            slicebits,
            tabs,
        } => {
            info!(input = %input.display(), output = %output.display(), slicebits, "generate");
            pipeline::generate(&input, &output, slicebits, Separator::from_tabs_flag(tabs))?;
        }
        Commands::Stage {
            input,
            stage_dir,
            tabs,
        } => {
            info!(input = %input.display(), dir = %stage_dir.display(), "stage");
            pipeline::stage(&input, &stage_dir, Separator::from_tabs_flag(tabs))?;
        }
        Commands::Restage {
            input,
            stage_dir,
            tabs,
        } => {
            info!(input = %input.display(), dir = %stage_dir.display(), "restage");
            pipeline::restage(&input, &stage_dir, Separator::from_tabs_flag(tabs))?;
        }
        Commands::Reduce {
            stage_dir,
            reduce_dir,
            slicebits,
        } => {
            info!(from = %stage_dir.display(), to = %reduce_dir.display(), slicebits, "reduce");
            pipeline::reduce(&stage_dir, &reduce_dir, slicebits)?;
        }
        Commands::Compact { stage_dir } => {
            info!(dir = %stage_dir.display(), "compact");
            pipeline::compact(&stage_dir)?;
        }
        Commands::Combine {
            reduce_dir,
            output,
            slicebits,
        } => {
            info!(from = %reduce_dir.display(), to = %output.display(), slicebits, "combine");
            pipeline::combine(&reduce_dir, &output, slicebits)?;
        }
        Commands::Dumpi { file } => {
            pipeline::dumpi(&file, &mut stdout)?;
        }
        Commands::Query { index, macs } => {
            info!(index = %index.display(), macs = macs.len(), "query");
            for (coord, count) in query::query(&index, &macs)? {
                writeln!(stdout, "{coord} {count}")?;
            }
        }
        Commands::Scan { index, macs } => {
            info!(index = %index.display(), macs = macs.len(), "scan");
            for (coord, count) in query::scan(&index, &macs)? {
                writeln!(stdout, "{coord} {count}")?;
            }
        }
        Commands::Score { stage_dir, png } => {
            let report = analyze::score(&stage_dir)?;
            report.print(&mut stdout)?;
            if let Some(path) = png {
                heatmap::render_png(&report.dense, &path)?;
                info!(path = %path.display(), "density heatmap written");
            }
        }
        Commands::Score2 { stage_dir } => {
            let report = analyze::score2(&stage_dir)?;
            report.print(&mut stdout)?;
        }
    }
    Ok(())
}
