//! Co-occurrence analysis over a staged corpus.
//!
//! Both reports run on deduplicated stage buckets, never on a combined
//! index. `score` measures density and hash collisions; `score2` derives the
//! dominance relation: coordinate c2 dominates c1 when every hash observed
//! at c1 was also observed at c2, i.e. c1 adds no identifying information
//! beyond c2.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::info;

use crate::codec::{self, RECORD_SIZE};
use crate::error::Result;
use crate::record_stream::RecordReader;

/// Coordinates observed at fewer hashes than this are statistically
/// insignificant for dominance.
const MIN_HASHES: usize = 5;

/// Below this many coordinates one sequential worker beats thread setup.
const PARALLEL_THRESHOLD: usize = 100_000;

/// Density/collision report over a staged corpus.
#[derive(Debug)]
pub struct ScoreReport {
    pub records: u64,
    pub hashes: usize,
    pub cmax: usize,
    pub collisions: u64,
    pub coords: usize,
    /// top-10 most frequently observed keys, (key, occurrences)
    pub top: Vec<(u32, u64)>,
    /// observation density per 100 km grid square (zone+band+column.. the
    /// first 3 coordinate bytes)
    pub dense: HashMap<String, u64>,
    pub dmax: u64,
}

/// Redundancy report: the dominance relation plus corpus-shape counters.
#[derive(Debug)]
pub struct DominanceReport {
    pub records: u64,
    pub hashes: usize,
    pub max: usize,
    pub cmax: usize,
    pub coords: usize,
    /// dominating coordinate index → indexes of coordinates it dominates
    pub dominates: HashMap<u32, Vec<u32>>,
}

fn stage_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with("stage_") {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn for_each_stage_record<F>(dir: &Path, mut each: F) -> Result<u64>
where
    F: FnMut(u32, &[u8]) -> Result<()>,
{
    let mut records = 0u64;
    for path in stage_files(dir)? {
        info!(path = %path.display(), "reading");
        let mut reader = RecordReader::new(File::open(&path)?, RECORD_SIZE);
        while let Some(rec) = reader.next_record()? {
            let (key, _) = codec::decode_record(rec);
            each(key, &rec[codec::ID_SIZE..])?;
            records += 1;
        }
    }
    Ok(records)
}

/// Build the density/collision report.
pub fn score(stage_dir: &Path) -> Result<ScoreReport> {
    // per coordinate: [index, observed keys...]; per key: occurrence count
    let mut coordh: HashMap<String, Vec<u32>> = HashMap::new();
    let mut hashb: HashMap<u32, u64> = HashMap::new();
    let mut collisions = 0u64;
    let mut cmax = 0usize;

    let records = for_each_stage_record(stage_dir, |key, coord| {
        let next_idx = coordh.len() as u32;
        let entry = coordh
            .entry(String::from_utf8_lossy(coord).into_owned())
            .or_insert_with(|| vec![next_idx]);
        entry.push(key);
        cmax = cmax.max(entry.len());

        let count = hashb.entry(key).or_insert(0);
        if *count > 0 {
            collisions += 1;
        }
        *count += 1;
        Ok(())
    })?;

    let mut ranked: Vec<(u32, u64)> = hashb.iter().map(|(&k, &c)| (k, c)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(10);

    // 100 km density: hashes observed per zone+band+100k-square cell
    let mut dense: HashMap<String, u64> = HashMap::new();
    let mut dmax = 0u64;
    for (coord, list) in &coordh {
        let cell = dense.entry(coord[..3].to_string()).or_insert(0);
        *cell += (list.len() - 1) as u64;
        dmax = dmax.max(*cell);
    }

    Ok(ScoreReport {
        records,
        hashes: hashb.len(),
        cmax,
        collisions,
        coords: coordh.len(),
        top: ranked,
        dense,
        dmax,
    })
}

/// Latitude band rows of the world heatmap, north to south.
const HEATMAP_BANDS: &[u8] = b"WVUTSRQPONMLKJIHGFEDC";

/// Density fill glyphs, blank through densest.
const HEATMAP_FILL: [char; 11] = [' ', '▫', '▪', '□', '◰', '◳', '◲', '◱', '◫', '▤', '▩'];

impl ScoreReport {
    pub fn print<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(
            out,
            "read:{} hashes:{} cmax:{} collisions:{} coords:{}",
            self.records, self.hashes, self.cmax, self.collisions, self.coords
        )?;
        for (key, count) in &self.top {
            writeln!(out, "{key} = {count}")?;
        }

        write!(out, "world 100k density scale: 0[")?;
        for c in HEATMAP_FILL {
            write!(out, "{c} ")?;
        }
        writeln!(out, "]10 ({})", self.dmax)?;
        writeln!(
            out,
            " 01                                                          60"
        )?;
        writeln!(
            out,
            " +------------------------------------------------------------+"
        )?;
        let step = (self.dmax + 1) as f64 / 10.0;
        for (b, band) in HEATMAP_BANDS.iter().enumerate() {
            let label = if b == 0 || b == HEATMAP_BANDS.len() - 1 {
                *band as char
            } else {
                ' '
            };
            write!(out, "{label}|")?;
            for zone in 1..=60 {
                let key = format!("{zone:02}{}", *band as char);
                match self.dense.get(&key) {
                    None => write!(out, "{}", HEATMAP_FILL[0])?,
                    Some(&d) => {
                        let level = ((d as f64 / step) as usize + 1).min(10);
                        write!(out, "{}", HEATMAP_FILL[level])?;
                    }
                }
            }
            writeln!(out, "|")?;
        }
        writeln!(
            out,
            " +------------------------------------------------------------+"
        )?;
        Ok(())
    }
}

/// Build the redundancy report.
pub fn score2(stage_dir: &Path) -> Result<DominanceReport> {
    // per coordinate: [index, observed keys...]; per key: coordinate indexes
    let mut coordh: HashMap<String, Vec<u32>> = HashMap::new();
    let mut hashc: HashMap<u32, Vec<u32>> = HashMap::new();
    let mut max = 0usize;
    let mut cmax = 0usize;

    let records = for_each_stage_record(stage_dir, |key, coord| {
        let next_idx = coordh.len() as u32;
        let entry = coordh
            .entry(String::from_utf8_lossy(coord).into_owned())
            .or_insert_with(|| vec![next_idx]);
        let idx = entry[0];
        entry.push(key);
        cmax = cmax.max(entry.len());

        let cs = hashc.entry(key).or_default();
        cs.push(idx);
        max = max.max(cs.len());
        Ok(())
    })?;

    let coords = coordh.len();
    let hashes = hashc.len();
    let clist: Vec<Vec<u32>> = coordh.into_values().collect();
    let dominates = compute_dominance(&clist, &hashc);

    Ok(DominanceReport {
        records,
        hashes,
        max,
        cmax,
        coords,
        dominates,
    })
}

/// Compute the dominance relation, in parallel over contiguous coordinate
/// chunks. Workers share only the read-only adjacency map; each owns a
/// private histogram sized to the coordinate count and a private partial
/// result, merged key-wise after the join.
pub fn compute_dominance(
    clist: &[Vec<u32>],
    hashc: &HashMap<u32, Vec<u32>>,
) -> HashMap<u32, Vec<u32>> {
    let csize = clist.len();
    if csize == 0 {
        return HashMap::new();
    }
    let pool = if csize < PARALLEL_THRESHOLD {
        1
    } else {
        rayon::current_num_threads().max(1)
    };
    info!(pool, csize, "dominance workers");
    let chunk = csize / pool + 1;

    let partials: Vec<HashMap<u32, Vec<u32>>> = clist
        .par_chunks(chunk)
        .map(|chunk| dominance_worker(chunk, csize, hashc))
        .collect();

    let mut dominates: HashMap<u32, Vec<u32>> = HashMap::new();
    for partial in partials {
        for (dominator, dominated) in partial {
            dominates.entry(dominator).or_default().extend(dominated);
        }
    }
    dominates
}

fn dominance_worker(
    chunk: &[Vec<u32>],
    csize: usize,
    hashc: &HashMap<u32, Vec<u32>>,
) -> HashMap<u32, Vec<u32>> {
    let mut hist = vec![0u32; csize + 1];
    let mut dominates: HashMap<u32, Vec<u32>> = HashMap::new();

    for hashes in chunk {
        // first element is the coordinate's own index
        let n = hashes.len() - 1;
        if n < MIN_HASHES {
            continue;
        }
        let c1 = hashes[0];
        for h1 in &hashes[1..] {
            let Some(hcoords) = hashc.get(h1) else {
                continue;
            };
            for &c2 in hcoords {
                hist[c2 as usize] += 1;
                // c2 reached c1's full hash count: it has seen every hash
                // c1 has seen
                if hist[c2 as usize] == n as u32 && c2 != c1 {
                    dominates.entry(c2).or_default().push(c1);
                }
            }
        }
        hist.fill(0);
    }
    dominates
}

impl DominanceReport {
    pub fn print<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(
            out,
            "read:{} hashes:{} max:{} cmax:{} coords:{}",
            self.records, self.hashes, self.max, self.cmax, self.coords
        )?;
        if self.dominates.is_empty() {
            writeln!(out, "there were no dominating coordinates")?;
            return Ok(());
        }
        let dmax = self
            .dominates
            .values()
            .map(|d| d.len())
            .max()
            .unwrap_or(0);
        writeln!(
            out,
            "there were {} dominating coordinates, dmax:{dmax}",
            self.dominates.len()
        )?;
        let mut ranked: Vec<(&u32, usize)> = self
            .dominates
            .iter()
            .map(|(k, v)| (k, v.len()))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        for (key, count) in ranked.into_iter().take(10) {
            writeln!(out, "{key} = {count}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build the coordinate and adjacency maps score2 would produce for a
    /// list of (coordinate, hashes) pairs.
    fn corpus(per_coord: &[&[u32]]) -> (Vec<Vec<u32>>, HashMap<u32, Vec<u32>>) {
        let mut clist = Vec::new();
        let mut hashc: HashMap<u32, Vec<u32>> = HashMap::new();
        for (idx, hashes) in per_coord.iter().enumerate() {
            let mut entry = vec![idx as u32];
            for &h in *hashes {
                entry.push(h);
                hashc.entry(h).or_default().push(idx as u32);
            }
            clist.push(entry);
        }
        (clist, hashc)
    }

    #[test]
    fn superset_coordinate_dominates() {
        // coord 1 saw every hash coord 0 saw, plus one more
        let (clist, hashc) = corpus(&[
            &[1, 2, 3, 4, 5],
            &[1, 2, 3, 4, 5, 6],
        ]);
        let dom = compute_dominance(&clist, &hashc);
        assert_eq!(dom.get(&1).map(Vec::as_slice), Some(&[0u32][..]));
        // coord 0 does not dominate coord 1: it never saw hash 6
        assert!(!dom.contains_key(&0));
    }

    #[test]
    fn small_coordinates_are_skipped() {
        // 4 hashes is below the significance threshold
        let (clist, hashc) = corpus(&[&[1, 2, 3, 4], &[1, 2, 3, 4]]);
        assert!(compute_dominance(&clist, &hashc).is_empty());
    }

    #[test]
    fn identical_coordinates_dominate_each_other() {
        let (clist, hashc) = corpus(&[
            &[1, 2, 3, 4, 5],
            &[1, 2, 3, 4, 5],
        ]);
        let dom = compute_dominance(&clist, &hashc);
        assert_eq!(dom.get(&0).map(Vec::as_slice), Some(&[1u32][..]));
        assert_eq!(dom.get(&1).map(Vec::as_slice), Some(&[0u32][..]));
    }

    #[test]
    fn empty_corpus_has_no_dominators() {
        let (clist, hashc) = corpus(&[]);
        assert!(compute_dominance(&clist, &hashc).is_empty());
    }

    #[test]
    fn heatmap_levels_stay_in_range() {
        let mut dense = HashMap::new();
        dense.insert("31N".to_string(), 99u64);
        dense.insert("18T".to_string(), 1u64);
        let report = ScoreReport {
            records: 100,
            hashes: 50,
            cmax: 3,
            collisions: 2,
            coords: 40,
            top: vec![(7, 9)],
            dense,
            dmax: 99,
        };
        let mut out = Vec::new();
        report.print(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("read:100 hashes:50 cmax:3 collisions:2 coords:40"));
        assert!(text.contains("]10 (99)"));
        // 21 band rows between the two border lines
        assert_eq!(text.lines().filter(|l| l.ends_with('|')).count(), 21);
    }
}
