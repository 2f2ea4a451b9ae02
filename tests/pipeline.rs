//! End-to-end pipeline tests over temp directories.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use m8b::codec::{self, IndexHeader, RECORD_SIZE};
use m8b::geodesy;
use m8b::keys::{derive_key, ZERO_KEY};
use m8b::observations::Separator;
use m8b::{pipeline, query};

fn write_observations(dir: &Path, name: &str, rows: &[String]) -> PathBuf {
    let path = dir.join(name);
    let mut content = String::from("bssid|bestlat|bestlon\n");
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    fs::write(&path, content).unwrap();
    path
}

fn mac(i: u32) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        i & 0xff,
        (i >> 8) & 0xff,
        0x44,
        0x60,
        0x50,
        0xac
    )
}

fn read_index(path: &Path) -> (IndexHeader, Vec<Vec<u8>>) {
    let bytes = fs::read(path).unwrap();
    let mut cursor = std::io::Cursor::new(&bytes[..]);
    let (header, carry) = IndexHeader::read_from(&mut cursor).unwrap();
    let mut body = carry;
    let pos = cursor.position() as usize;
    body.extend_from_slice(&bytes[pos..]);
    let records = body
        .chunks(header.record_size())
        .filter(|c| c.len() == header.record_size())
        .map(|c| c.to_vec())
        .collect();
    (header, records)
}

#[test]
fn generate_concrete_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_observations(
        dir.path(),
        "obs",
        &["8e:15:44:60:50:ac|40.00900289|-75.21358834".to_string()],
    );
    let output = dir.path().join("index.m8b");
    pipeline::generate(&input, &output, 10, Separator::Pipe).unwrap();

    let bytes = fs::read(&output).unwrap();
    assert!(bytes.starts_with(b"MJG\n2\nSIP-2-4\na\nMGRS-1000\n4\n9\n1\n"));

    let (header, records) = read_index(&output);
    assert_eq!(header.slicebits, 10);
    assert_eq!(header.record_count, 1);
    assert_eq!(records.len(), 1);

    let (key, coord) = codec::decode_record(&records[0]);
    assert_eq!(key, derive_key("8e:15:44:60:50:ac", &ZERO_KEY, 10).unwrap());
    assert_eq!(
        coord,
        *geodesy::encode(40.00900289, -75.21358834).unwrap().as_bytes()
    );
}

#[test]
fn generate_filters_projection_domain() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_observations(
        dir.path(),
        "obs",
        &[
            format!("{}|85.0|10.0", mac(1)), // outside [-80, 84]
            format!("{}|0.0|10.0", mac(2)),
        ],
    );
    let output = dir.path().join("index.m8b");
    pipeline::generate(&input, &output, 12, Separator::Pipe).unwrap();
    let (header, records) = read_index(&output);
    assert_eq!(header.record_count, 1);
    assert_eq!(records.len(), 1);
    let (key, _) = codec::decode_record(&records[0]);
    assert_eq!(key, derive_key(&mac(2), &ZERO_KEY, 12).unwrap());
}

#[test]
fn generate_dedupes_repeated_observations() {
    let dir = tempfile::tempdir().unwrap();
    let rows: Vec<String> = (0..3)
        .map(|_| format!("{}|40.0|-75.0", mac(7)))
        .collect();
    let input = write_observations(dir.path(), "obs", &rows);
    let output = dir.path().join("index.m8b");
    pipeline::generate(&input, &output, 16, Separator::Pipe).unwrap();
    let (header, records) = read_index(&output);
    assert_eq!(header.record_count, 1);
    assert_eq!(records.len(), 1);
}

#[test]
fn stage_round_robins_and_compact_dedupes() {
    let dir = tempfile::tempdir().unwrap();
    // 15 distinct rows + 2 duplicates of the first = 17 valid, 3 out of domain
    let mut rows: Vec<String> = (0..15).map(|i| format!("{}|40.0|-75.{i}", mac(i))).collect();
    rows.push(format!("{}|40.0|-75.0", mac(0)));
    rows.push(format!("{}|40.0|-75.0", mac(0)));
    rows.push(format!("{}|85.0|0.0", mac(90)));
    rows.push(format!("{}|-81.0|0.0", mac(91)));
    rows.push(format!("{}|89.0|0.0", mac(92)));
    let input = write_observations(dir.path(), "obs", &rows);

    let stage_dir = dir.path().join("stage");
    fs::create_dir(&stage_dir).unwrap();
    pipeline::stage(&input, &stage_dir, Separator::Pipe).unwrap();

    // 17 valid records spread round-robin: bucket 0 holds 2, the rest 1
    let mut total = 0u64;
    for i in 0..16 {
        let len = fs::metadata(stage_dir.join(format!("stage_{i}"))).unwrap().len();
        assert_eq!(len % RECORD_SIZE as u64, 0);
        if i == 0 {
            assert_eq!(len, 2 * RECORD_SIZE as u64);
        } else {
            assert_eq!(len, RECORD_SIZE as u64);
        }
        total += len;
    }
    assert_eq!(total, 17 * RECORD_SIZE as u64);

    pipeline::compact(&stage_dir).unwrap();

    // the two duplicate rows collapse, leaving 15 distinct (key, coord) pairs
    let mut after = 0u64;
    for i in 0..16 {
        after += fs::metadata(stage_dir.join(format!("stage_{i}"))).unwrap().len();
        // intermediates cleaned up
        assert!(!stage_dir.join(format!("reduce1_{i}")).exists());
        assert!(!stage_dir.join(format!("reduce2_{i}")).exists());
        assert!(!stage_dir.join(format!("oldstage_{i}")).exists());
    }
    assert_eq!(after, 15 * RECORD_SIZE as u64);
}

#[test]
fn compact_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let rows: Vec<String> = (0..40).map(|i| format!("{}|40.0|-75.{:02}", mac(i), i)).collect();
    let input = write_observations(dir.path(), "obs", &rows);
    let stage_dir = dir.path().join("stage");
    fs::create_dir(&stage_dir).unwrap();
    pipeline::stage(&input, &stage_dir, Separator::Pipe).unwrap();

    pipeline::compact(&stage_dir).unwrap();
    let first: Vec<Vec<u8>> = (0..16)
        .map(|i| fs::read(stage_dir.join(format!("stage_{i}"))).unwrap())
        .collect();

    pipeline::compact(&stage_dir).unwrap();
    let second: Vec<Vec<u8>> = (0..16)
        .map(|i| fs::read(stage_dir.join(format!("stage_{i}"))).unwrap())
        .collect();

    assert_eq!(first, second);
}

#[test]
fn restage_matches_stage_then_compact() {
    let dir = tempfile::tempdir().unwrap();
    let rows: Vec<String> = (0..50)
        .map(|i| format!("{}|{}.0|-75.0", mac(i), (i % 60) as i32 - 30))
        .collect();
    let input = write_observations(dir.path(), "obs", &rows);

    let a = dir.path().join("a");
    let b = dir.path().join("b");
    fs::create_dir(&a).unwrap();
    fs::create_dir(&b).unwrap();

    pipeline::stage(&input, &a, Separator::Pipe).unwrap();
    pipeline::compact(&a).unwrap();
    pipeline::restage(&input, &b, Separator::Pipe).unwrap();

    for i in 0..16 {
        let via_compact = fs::read(a.join(format!("stage_{i}"))).unwrap();
        let via_restage = fs::read(b.join(format!("stage_{i}"))).unwrap();
        assert_eq!(via_compact, via_restage, "bucket {i} differs");
    }
}

fn build_index(dir: &Path, rows: &[String], slicebits: u32) -> PathBuf {
    let input = write_observations(dir, "obs", rows);
    let stage_dir = dir.join("stage");
    let reduce_dir = dir.join("reduce");
    fs::create_dir(&stage_dir).unwrap();
    fs::create_dir(&reduce_dir).unwrap();
    pipeline::restage(&input, &stage_dir, Separator::Pipe).unwrap();
    pipeline::reduce(&stage_dir, &reduce_dir, slicebits).unwrap();
    let output = dir.join("index.m8b");
    pipeline::combine(&reduce_dir, &output, slicebits).unwrap();
    output
}

#[test]
fn combined_index_is_sorted_and_counts_match() {
    let dir = tempfile::tempdir().unwrap();
    let rows: Vec<String> = (0..200)
        .map(|i| format!("{}|{}.5|{}.25", mac(i), (i % 100) as i32 - 50, (i % 300) as i32 - 150))
        .collect();
    let index = build_index(dir.path(), &rows, 20);

    let (header, records) = read_index(&index);
    assert_eq!(header.slicebits, 20);
    assert_eq!(header.record_count as usize, records.len());

    // keys at 20 bits partition by their top nibble, so per-bucket sort plus
    // ordered concatenation yields a globally non-decreasing file
    for pair in records.windows(2) {
        assert_ne!(
            codec::compare_records(&pair[0], &pair[1]),
            std::cmp::Ordering::Greater,
            "combined file out of order"
        );
    }
}

#[test]
fn scan_and_query_agree() {
    let dir = tempfile::tempdir().unwrap();
    let rows: Vec<String> = (0..120)
        .map(|i| format!("{}|{}.0|{}.0", mac(i % 40), (i % 80) as i32 - 40, (i % 120) as i32 - 60))
        .collect();
    let index = build_index(dir.path(), &rows, 18);

    let macs: Vec<String> = (0..45).map(mac).collect(); // incl. absent MACs
    let full = query::query(&index, &macs).unwrap();
    let streamed = query::scan(&index, &macs).unwrap();
    assert!(!full.is_empty());
    assert_eq!(full, streamed);
}

#[test]
fn scan_reads_gzipped_indexes() {
    let dir = tempfile::tempdir().unwrap();
    let rows: Vec<String> = (0..60)
        .map(|i| format!("{}|10.0|{}.0", mac(i), (i % 40) as i32 - 20))
        .collect();
    let index = build_index(dir.path(), &rows, 16);

    let gz_path = dir.path().join("index.m8b.gz");
    let mut encoder = flate2::write::GzEncoder::new(
        fs::File::create(&gz_path).unwrap(),
        flate2::Compression::default(),
    );
    encoder.write_all(&fs::read(&index).unwrap()).unwrap();
    encoder.finish().unwrap();

    let macs: Vec<String> = (0..20).map(mac).collect();
    let plain = query::scan(&index, &macs).unwrap();
    let gzipped = query::scan(&gz_path, &macs).unwrap();
    assert!(!plain.is_empty());
    assert_eq!(plain, gzipped);
}

#[test]
fn scan_tolerates_out_of_order_records() {
    // a hand-written index whose body dips to a lower key mid-stream;
    // the scan must report the violation and keep matching, not abort
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.m8b");

    let key_a = derive_key(&mac(1), &ZERO_KEY, 32).unwrap();
    let key_b = derive_key(&mac(2), &ZERO_KEY, 32).unwrap();
    // signed comparison, same as the record ordering
    let (hi_mac, lo_mac, hi, lo) = if (key_a as i32) > (key_b as i32) {
        (mac(1), mac(2), key_a, key_b)
    } else {
        (mac(2), mac(1), key_b, key_a)
    };

    let mut bytes = Vec::new();
    IndexHeader::new(32, 3).write_to(&mut bytes).unwrap();
    bytes.extend_from_slice(&codec::encode_record(hi, b"18TVK8129"));
    bytes.extend_from_slice(&codec::encode_record(lo, b"31NAA6600"));
    bytes.extend_from_slice(&codec::encode_record(hi, b"18TVK8130"));
    fs::write(&path, &bytes).unwrap();

    let macs = vec![hi_mac, lo_mac];
    let ranked = query::scan(&path, &macs).unwrap();
    assert_eq!(
        ranked,
        vec![
            ("18TVK8129".to_string(), 1),
            ("18TVK8130".to_string(), 1),
            ("31NAA6600".to_string(), 1),
        ]
    );
    // the full-load path agrees on the same file
    assert_eq!(query::query(&path, &macs).unwrap(), ranked);
}

#[test]
fn dumpi_prints_key_and_coordinate() {
    let dir = tempfile::tempdir().unwrap();
    let rows = vec![format!("{}|40.0|-75.0", mac(3))];
    let input = write_observations(dir.path(), "obs", &rows);
    let stage_dir = dir.path().join("stage");
    fs::create_dir(&stage_dir).unwrap();
    pipeline::stage(&input, &stage_dir, Separator::Pipe).unwrap();

    let mut combined = Vec::new();
    for i in 0..16 {
        pipeline::dumpi(&stage_dir.join(format!("stage_{i}")), &mut combined).unwrap();
    }
    let text = String::from_utf8(combined).unwrap();
    let key = derive_key(&mac(3), &ZERO_KEY, 32).unwrap();
    let coord = geodesy::encode(40.0, -75.0).unwrap();
    assert_eq!(text.trim(), format!("{key:x} : {coord}"));
}

#[test]
fn tab_separated_input_is_supported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("obs.tsv");
    fs::write(
        &path,
        format!("bssid\tbestlat\tbestlon\n{}\t40.0\t-75.0\n", mac(5)),
    )
    .unwrap();
    let output = dir.path().join("index.m8b");
    pipeline::generate(&path, &output, 10, Separator::Tab).unwrap();
    let (header, records) = read_index(&output);
    assert_eq!(header.record_count, 1);
    assert_eq!(records.len(), 1);
}
