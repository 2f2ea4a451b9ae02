//! The staged build pipeline.
//!
//! Each operation is a one-shot batch transform over file sets:
//!
//! - `generate`: whole dataset in memory, one sorted index file out.
//! - `stage`:    partition unsliced records round-robin into 16 buckets.
//! - `restage`:  partition by key nibble, then sort+dedup each bucket.
//! - `reduce`:   re-slice keys, re-partition, sort+dedup into a new corpus.
//! - `compact`:  reduce at full key width, in place, to sort+dedup a corpus.
//! - `combine`:  concatenate a reduced corpus into the final index file.
//! - `dumpi`:    debug dump of a headerless record stream.
//!
//! Stages replace a previous generation only through a three-rename swap
//! (live to backup, new to live, delete backup), so an interruption leaves
//! either the old or the new generation fully intact.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::codec::{self, IndexHeader, RECORD_SIZE};
use crate::error::{Error, Result};
use crate::geodesy::{self, Mgrs};
use crate::keys::{self, ZERO_KEY};
use crate::observations::{ObservationReader, Separator};
use crate::record_stream::{BucketSet, RecordReader, RecordSink, BUCKETS, BUCKET_BITS, BUCKET_MASK};

/// Live bucket file prefix of a staged corpus.
pub const STAGE_PREFIX: &str = "stage";
/// Partitioned-but-unsorted intermediate of a reduce pass.
pub const REDUCE1_PREFIX: &str = "reduce1";
/// Sorted and deduplicated output of a reduce pass.
pub const REDUCE2_PREFIX: &str = "reduce2";
/// Backup name a live bucket holds during the atomic swap.
pub const OLDSTAGE_PREFIX: &str = "oldstage";

pub fn bucket_path(dir: &Path, prefix: &str, index: usize) -> PathBuf {
    dir.join(format!("{prefix}_{index}"))
}

/// Feed every in-domain observation to `each` as a (key, coordinate) pair,
/// keys sliced to `slicebits`. Returns the out-of-domain row count; those
/// rows are skipped, not fatal.
fn ingest<F>(from: &Path, sep: Separator, slicebits: u32, mut each: F) -> Result<u64>
where
    F: FnMut(u32, Mgrs) -> Result<()>,
{
    let mut out_of_domain = 0u64;
    for obs in ObservationReader::open(from, sep)? {
        let obs = obs?;
        if !geodesy::in_domain(obs.lat) {
            out_of_domain += 1;
            continue;
        }
        let coord = geodesy::encode(obs.lat, obs.lon)?;
        let key = keys::derive_key(&obs.mac, &ZERO_KEY, slicebits)?;
        each(key, coord)?;
    }
    Ok(out_of_domain)
}

fn check_slicebits(slicebits: u32, min: u32) -> Result<()> {
    if slicebits < min || slicebits > 32 {
        return Err(Error::MalformedInput(format!(
            "slicebits {slicebits} outside {min}..=32"
        )));
    }
    Ok(())
}

/// Single-pass build for small datasets: the entire deduplicated mapping is
/// held in memory, ordered by key, then written out as a finished index.
pub fn generate(from: &Path, to: &Path, slicebits: u32, sep: Separator) -> Result<()> {
    check_slicebits(slicebits, 1)?;

    // Signed key order here matches the canonical record comparator, so the
    // body comes out sorted for the streaming scan.
    let mut index: BTreeMap<i32, HashSet<Mgrs>> = BTreeMap::new();
    let mut records = 0u64;

    let out_of_domain = ingest(from, sep, slicebits, |key, coord| {
        if index.entry(key as i32).or_default().insert(coord) {
            records += 1;
        }
        Ok(())
    })?;
    info!(
        records,
        out_of_domain,
        keys = index.len(),
        "generate ingest complete"
    );

    let mut file = File::options().write(true).create_new(true).open(to)?;
    IndexHeader::new(slicebits, records).write_to(&mut file)?;
    let mut sink = RecordSink::from_file(file);
    for (key, coords) in &index {
        for coord in coords {
            sink.write_record(&codec::encode_record(*key as u32, coord.as_bytes()))?;
        }
    }
    sink.finish()
}

/// Partition an observation file into 16 stage buckets, round-robin, keys at
/// full width. No sorting or deduplication happens here.
pub fn stage(from: &Path, stage_dir: &Path, sep: Separator) -> Result<()> {
    let mut buckets = BucketSet::create(stage_dir, STAGE_PREFIX)?;
    let mut records = 0u64;

    let out_of_domain = ingest(from, sep, 32, |key, coord| {
        let idx = (records & u64::from(BUCKET_MASK)) as usize;
        buckets.write_record(idx, &codec::encode_record(key, coord.as_bytes()))?;
        records += 1;
        Ok(())
    })?;

    let counts = buckets.finish()?;
    report_partition(out_of_domain, records, &counts);
    Ok(())
}

/// Stage and compact in one combined pass: partition by the top key nibble so
/// equal keys co-locate, then sort+dedup each bucket and swap it live.
pub fn restage(from: &Path, stage_dir: &Path, sep: Separator) -> Result<()> {
    let mut buckets = BucketSet::create(stage_dir, STAGE_PREFIX)?;
    let mut records = 0u64;

    let out_of_domain = ingest(from, sep, 32, |key, coord| {
        let idx = ((key >> (32 - BUCKET_BITS)) & BUCKET_MASK) as usize;
        buckets.write_record(idx, &codec::encode_record(key, coord.as_bytes()))?;
        records += 1;
        Ok(())
    })?;

    let counts = buckets.finish()?;
    report_partition(out_of_domain, records, &counts);

    let mut dups = vec![0u64; BUCKETS];
    for i in 0..BUCKETS {
        dups[i] = sort_dedup_file(
            &bucket_path(stage_dir, STAGE_PREFIX, i),
            &bucket_path(stage_dir, REDUCE2_PREFIX, i),
        )?;
    }
    info!(?dups, "dups suppressed");

    for i in 0..BUCKETS {
        swap_live(stage_dir, i)?;
    }
    Ok(())
}

/// Re-slice a staged corpus to `slicebits`-wide keys, re-partition by the
/// nibble just above the slice, and sort+dedup each new bucket.
///
/// Writes `reduce1_*` (partitioned) and `reduce2_*` (sorted, deduplicated)
/// under `reduce_dir`; both are left in place for inspection or a following
/// `combine`. `slicebits` below 4 has no partition nibble and is rejected.
pub fn reduce(stage_dir: &Path, reduce_dir: &Path, slicebits: u32) -> Result<()> {
    check_slicebits(slicebits, BUCKET_BITS)?;
    let mask = ((1u64 << slicebits) - 1) as u32;
    let shift = slicebits - BUCKET_BITS;

    let mut buckets = BucketSet::create(reduce_dir, REDUCE1_PREFIX)?;
    for i in 0..BUCKETS {
        let file = File::open(bucket_path(stage_dir, STAGE_PREFIX, i))?;
        let mut reader = RecordReader::new(file, RECORD_SIZE);
        while let Some(rec) = reader.next_record()? {
            let (full_key, coord) = codec::decode_record(rec);
            let key = full_key & mask;
            let idx = ((key >> shift) & BUCKET_MASK) as usize;
            buckets.write_record(idx, &codec::encode_record(key, &coord))?;
        }
    }
    let counts = buckets.finish()?;
    info!(
        max = counts.iter().max().copied().unwrap_or(0),
        "reduce partition complete"
    );

    let mut dups = vec![0u64; BUCKETS];
    for i in 0..BUCKETS {
        dups[i] = sort_dedup_file(
            &bucket_path(reduce_dir, REDUCE1_PREFIX, i),
            &bucket_path(reduce_dir, REDUCE2_PREFIX, i),
        )?;
    }
    info!(?dups, "dups suppressed");
    Ok(())
}

/// Sort and deduplicate a staged corpus in place at full key width, then
/// swap the result live and clean up the intermediates.
pub fn compact(stage_dir: &Path) -> Result<()> {
    reduce(stage_dir, stage_dir, 32)?;
    for i in 0..BUCKETS {
        swap_live(stage_dir, i)?;
        fs::remove_file(bucket_path(stage_dir, REDUCE1_PREFIX, i))?;
    }
    Ok(())
}

/// Assemble a reduced corpus into the final single-file index: header from
/// the summed bucket sizes, then buckets 0..15 concatenated in index order.
/// That order is what gives the file its non-decreasing key sequence.
pub fn combine(reduce_dir: &Path, to: &Path, slicebits: u32) -> Result<()> {
    check_slicebits(slicebits, 1)?;

    let mut total = 0u64;
    for i in 0..BUCKETS {
        total += fs::metadata(bucket_path(reduce_dir, REDUCE2_PREFIX, i))?.len();
    }
    let records = total / RECORD_SIZE as u64;

    let file = File::options().write(true).create_new(true).open(to)?;
    let mut out = std::io::BufWriter::new(file);
    IndexHeader::new(slicebits, records).write_to(&mut out)?;
    for i in 0..BUCKETS {
        let mut input = File::open(bucket_path(reduce_dir, REDUCE2_PREFIX, i))?;
        std::io::copy(&mut input, &mut out)?;
    }
    out.flush()?;
    info!(records, "combine complete");
    Ok(())
}

/// Dump a headerless intermediate record stream as `key-hex : coordinate`.
pub fn dumpi<W: Write>(path: &Path, out: &mut W) -> Result<()> {
    let file = File::open(path)?;
    let mut reader = RecordReader::new(file, RECORD_SIZE);
    while let Some(rec) = reader.next_record()? {
        let (key, coord) = codec::decode_record(rec);
        writeln!(out, "{:x} : {}", key, String::from_utf8_lossy(&coord))?;
    }
    Ok(())
}

/// Load a bucket file, sort by the canonical record ordering, write it back
/// out with adjacent duplicates suppressed. Returns the suppressed count.
fn sort_dedup_file(input: &Path, output: &Path) -> Result<u64> {
    let file = File::open(input)?;
    let mut reader = RecordReader::new(file, RECORD_SIZE);
    let mut entries: Vec<[u8; RECORD_SIZE]> = Vec::new();
    while let Some(rec) = reader.next_record()? {
        let mut entry = [0u8; RECORD_SIZE];
        entry.copy_from_slice(rec);
        entries.push(entry);
    }
    entries.sort_unstable_by(|a, b| codec::compare_records(a, b));

    let mut sink = RecordSink::create(output)?;
    let mut dups = 0u64;
    let mut last: Option<&[u8; RECORD_SIZE]> = None;
    for entry in &entries {
        if let Some(prev) = last {
            if codec::compare_records(prev, entry) == std::cmp::Ordering::Equal {
                dups += 1;
                continue;
            }
        }
        sink.write_record(entry)?;
        last = Some(entry);
    }
    sink.finish()?;
    Ok(dups)
}

/// Replace the live `stage_i` with the freshly written `reduce2_i` through
/// the three-step rename: live to backup, new to live, delete backup. A crash
/// between any two steps leaves a complete generation on disk.
fn swap_live(dir: &Path, index: usize) -> Result<()> {
    let live = bucket_path(dir, STAGE_PREFIX, index);
    let backup = bucket_path(dir, OLDSTAGE_PREFIX, index);
    let fresh = bucket_path(dir, REDUCE2_PREFIX, index);
    fs::rename(&live, &backup)?;
    fs::rename(&fresh, &live)?;
    fs::remove_file(&backup)?;
    Ok(())
}

fn report_partition(out_of_domain: u64, records: u64, counts: &[u64]) {
    info!(
        out_of_domain,
        records,
        bytes = records * RECORD_SIZE as u64,
        "partition complete"
    );
    for (i, count) in counts.iter().enumerate() {
        info!("{i} => {count}");
    }
}
