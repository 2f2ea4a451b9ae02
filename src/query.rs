//! Query execution over a finished index file.
//!
//! Two modes, one header parser. `query` materializes the whole record
//! stream into an ordered map and answers from memory; `scan` streams the
//! body once, keeping only records whose key belongs to the query set, and
//! stops as soon as no further record can match. Both produce the same
//! coordinate histogram; they differ only in resource usage.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::{info, warn};

use crate::codec::{self, IndexHeader, ID_SIZE};
use crate::error::{Error, Result};
use crate::keys::{self, ZERO_KEY};
use crate::record_stream::RecordReader;

/// Coordinate histogram: (coordinate text, hit count), most hits first, ties
/// broken by coordinate so one run's output is deterministic.
pub type Ranking = Vec<(String, u64)>;

fn check_id_size(header: &IndexHeader) -> Result<()> {
    if header.id_size != ID_SIZE {
        return Err(Error::UnsupportedFormat(format!(
            "unsupported id size: {}",
            header.id_size
        )));
    }
    Ok(())
}

/// Full-load query: read the entire body into key → coordinates, then look
/// up each MAC.
pub fn query(index: &Path, macs: &[String]) -> Result<Ranking> {
    let mut file = File::open(index)?;
    let (header, carry) = IndexHeader::read_from(&mut file)?;
    check_id_size(&header)?;

    // signed keys so iteration order matches the canonical record ordering
    let mut mjg: BTreeMap<i32, Vec<Vec<u8>>> = BTreeMap::new();
    let mut reader = RecordReader::with_carry(file, header.record_size(), carry);
    while let Some(rec) = reader.next_record()? {
        let key = codec::record_key_i32(rec);
        mjg.entry(key).or_default().push(rec[ID_SIZE..].to_vec());
    }
    info!(keys = mjg.len(), "index loaded");

    let mut hist: HashMap<String, u64> = HashMap::new();
    for mac in macs {
        let key = keys::derive_key(mac, &ZERO_KEY, header.slicebits)? as i32;
        let Some(coords) = mjg.get(&key) else {
            continue;
        };
        for coord in coords {
            *hist
                .entry(String::from_utf8_lossy(coord).into_owned())
                .or_default() += 1;
        }
    }
    Ok(rank(hist))
}

/// Streaming scan: derive the query key set first (key derivation needs the
/// header's slice width), then read the body sequentially, skipping
/// non-matching coordinate payloads and terminating once the current key
/// exceeds the largest queried key.
///
/// Precondition: early termination is only sound when the file's keys are
/// globally non-decreasing, which holds for every corpus this pipeline
/// combines (per-bucket sort + ordered concatenation by the top key nibble).
/// A decreasing key is reported as a sort-order violation and processing
/// continues.
///
/// Input is transparently gunzipped when the file name ends in `.gz`/`.GZ`.
pub fn scan(index: &Path, macs: &[String]) -> Result<Ranking> {
    let file = File::open(index)?;
    let name = index.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let mut input: Box<dyn Read> = if name.ends_with(".gz") || name.ends_with(".GZ") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let (header, carry) = IndexHeader::read_from(&mut input)?;
    check_id_size(&header)?;

    // key ring preserves query order and multiplicity; the set answers
    // membership during the body pass
    let mut keyring: Vec<u32> = Vec::with_capacity(macs.len());
    let mut keyset: HashSet<u32> = HashSet::new();
    let mut maxid = i32::MIN;
    for mac in macs {
        let key = keys::derive_key(mac, &ZERO_KEY, header.slicebits)?;
        keyring.push(key);
        keyset.insert(key);
        maxid = maxid.max(key as i32);
    }
    info!(maxid, "scanning");

    let mut mjg: HashMap<u32, Vec<String>> = HashMap::new();
    let mut reader = RecordReader::with_carry(input, header.record_size(), carry);
    let mut lastid = i32::MIN;
    while let Some(rec) = reader.next_record()? {
        let id = codec::record_key_i32(rec);
        if id < lastid {
            warn!("disorder! read {id} < {lastid}");
        }
        if id > maxid {
            // no further record can match
            info!("{id} > {maxid}, scan complete");
            break;
        }
        lastid = id;
        let key = id as u32;
        if keyset.contains(&key) {
            mjg.entry(key)
                .or_default()
                .push(String::from_utf8_lossy(&rec[ID_SIZE..]).into_owned());
        }
    }
    info!(keys = mjg.len(), "matched");

    let mut hist: HashMap<String, u64> = HashMap::new();
    for key in &keyring {
        let Some(coords) = mjg.get(key) else {
            continue;
        };
        for coord in coords {
            *hist.entry(coord.clone()).or_default() += 1;
        }
    }
    Ok(rank(hist))
}

fn rank(hist: HashMap<String, u64>) -> Ranking {
    let mut out: Ranking = hist.into_iter().collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}
