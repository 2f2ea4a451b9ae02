//! The MJG index file format.
//!
//! An index file is an 8-line UTF-8 text header followed by a packed stream
//! of fixed-size records:
//!
//! ```text
//! MJG                  magic
//! 2                    version (only 2 accepted)
//! SIP-2-4              hash algorithm identifier
//! <slicebits, hex>     key width in bits
//! MGRS-1000            coordinate encoding identifier
//! <id size, hex>       bytes per key (4)
//! <coord size, hex>    bytes per coordinate (9)
//! <record count, hex>
//! ```
//!
//! Each record is a little-endian key followed by the raw coordinate bytes.
//! Intermediate bucket files hold the same records with no header.

use std::cmp::Ordering;
use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::geodesy::MGRS_LEN;

pub const MAGIC: &str = "MJG";
pub const VERSION: u32 = 2;
pub const HASH_ID: &str = "SIP-2-4";
pub const COORD_ID: &str = "MGRS-1000";

pub const ID_SIZE: usize = 4;
pub const COORD_SIZE: usize = MGRS_LEN;
pub const RECORD_SIZE: usize = ID_SIZE + COORD_SIZE;

/// The header, all 8 newline-terminated fields, must fit in this prefix.
pub const HEADER_SCAN_LIMIT: usize = 256;

/// Parsed and validated index file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    pub slicebits: u32,
    pub id_size: usize,
    pub coord_size: usize,
    pub record_count: u64,
}

impl IndexHeader {
    pub fn new(slicebits: u32, record_count: u64) -> Self {
        Self {
            slicebits,
            id_size: ID_SIZE,
            coord_size: COORD_SIZE,
            record_count,
        }
    }

    pub fn record_size(&self) -> usize {
        self.id_size + self.coord_size
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        write!(
            out,
            "{MAGIC}\n{VERSION}\n{HASH_ID}\n{:x}\n{COORD_ID}\n{:x}\n{:x}\n{:x}\n",
            self.slicebits, self.id_size, self.coord_size, self.record_count
        )?;
        Ok(())
    }

    /// Read and validate a header from the front of `input`.
    ///
    /// Scans at most [`HEADER_SCAN_LIMIT`] bytes for the 8th newline. Returns
    /// the header together with any body bytes read past it; streaming
    /// callers must prepend those to the record stream.
    pub fn read_from<R: Read>(input: &mut R) -> Result<(Self, Vec<u8>)> {
        let mut buf = [0u8; HEADER_SCAN_LIMIT];
        let mut filled = 0;
        while filled < buf.len() {
            let n = input.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        let mut offset = None;
        let mut newlines = 0;
        for (i, &b) in buf[..filled].iter().enumerate() {
            if b == b'\n' {
                newlines += 1;
                if newlines == 8 {
                    offset = Some(i);
                    break;
                }
            }
        }
        let offset = offset.ok_or(Error::MalformedHeader)?;

        let text = std::str::from_utf8(&buf[..offset]).map_err(|_| Error::MalformedHeader)?;
        let fields: Vec<&str> = text.split('\n').collect();
        if fields.len() != 8 {
            return Err(Error::MalformedHeader);
        }

        if fields[0] != MAGIC {
            return Err(Error::UnsupportedFormat(format!("bad magic {:?}", fields[0])));
        }
        let version: u32 = fields[1]
            .parse()
            .map_err(|_| Error::UnsupportedFormat(format!("bad version {:?}", fields[1])))?;
        if version != VERSION {
            return Err(Error::UnsupportedFormat(format!(
                "unsupported version: {version}"
            )));
        }
        if fields[2] != HASH_ID {
            return Err(Error::UnsupportedFormat(format!(
                "unsupported hash: {}",
                fields[2]
            )));
        }
        let slicebits = parse_hex(fields[3])?;
        if fields[4] != COORD_ID {
            return Err(Error::UnsupportedFormat(format!(
                "unsupported coords: {}",
                fields[4]
            )));
        }
        let id_size = parse_hex(fields[5])? as usize;
        let coord_size = parse_hex(fields[6])? as usize;
        let record_count = u64::from(parse_hex(fields[7])?);

        let header = Self {
            slicebits,
            id_size,
            coord_size,
            record_count,
        };
        Ok((header, buf[offset + 1..filled].to_vec()))
    }
}

fn parse_hex(field: &str) -> Result<u32> {
    u32::from_str_radix(field, 16)
        .map_err(|_| Error::UnsupportedFormat(format!("bad hex field {field:?}")))
}

/// Encode one record into its fixed 13-byte wire form.
pub fn encode_record(key: u32, coord: &[u8; COORD_SIZE]) -> [u8; RECORD_SIZE] {
    let mut out = [0u8; RECORD_SIZE];
    out[..ID_SIZE].copy_from_slice(&key.to_le_bytes());
    out[ID_SIZE..].copy_from_slice(coord);
    out
}

/// Split a wire record back into key and coordinate bytes.
pub fn decode_record(rec: &[u8]) -> (u32, [u8; COORD_SIZE]) {
    debug_assert_eq!(rec.len(), RECORD_SIZE);
    let key = u32::from_le_bytes([rec[0], rec[1], rec[2], rec[3]]);
    let mut coord = [0u8; COORD_SIZE];
    coord.copy_from_slice(&rec[ID_SIZE..RECORD_SIZE]);
    (key, coord)
}

/// Numeric key from a wire record, as the *signed* value the canonical
/// ordering is defined over. Two's-complement bytes do not sort like byte
/// strings once the sign bit differs, so both the external sort and the
/// scan's disorder check must compare numerically.
pub fn record_key_i32(rec: &[u8]) -> i32 {
    i32::from_le_bytes([rec[0], rec[1], rec[2], rec[3]])
}

/// Canonical record ordering: numeric signed key, then raw coordinate bytes.
pub fn compare_records(a: &[u8], b: &[u8]) -> Ordering {
    record_key_i32(a)
        .cmp(&record_key_i32(b))
        .then_with(|| a[ID_SIZE..RECORD_SIZE].cmp(&b[ID_SIZE..RECORD_SIZE]))
}
