//! MAC address pseudonymization.
//!
//! A MAC like `8e:15:44:60:50:ac` is parsed into its 6 raw bytes, run through
//! keyed SipHash-2-4, and truncated to the low `n` bits. The key is fixed at
//! all-zeroes: the point is pseudonymization and key-space compression, not
//! collision resistance. Multiple MACs mapping to one key is accepted.

use std::hash::Hasher;

use siphasher::sip::SipHasher24;

use crate::error::{Error, Result};

/// Width of the hash key in bytes.
pub const SIP_KEY_LEN: usize = 16;

/// The fixed zero key used for every index.
pub const ZERO_KEY: [u8; SIP_KEY_LEN] = [0u8; SIP_KEY_LEN];

/// A MAC rendered as colon-separated hex pairs occupies exactly 17 characters.
pub const MAC_TEXT_LEN: usize = 17;

/// Parse the leading 17 characters of `mac` into 6 raw bytes.
///
/// Characters at offsets `3i` and `3i+1` are the hex pair for byte `i`; the
/// separator characters in between are not inspected.
pub fn mac_bytes(mac: &str) -> Result<[u8; 6]> {
    let text = mac.as_bytes();
    if text.len() < MAC_TEXT_LEN {
        return Err(Error::MalformedInput(format!("short mac: {mac:?}")));
    }
    let mut out = [0u8; 6];
    for (i, b) in out.iter_mut().enumerate() {
        let hi = nybble(text[i * 3])?;
        let lo = nybble(text[i * 3 + 1])?;
        *b = (hi << 4) | lo;
    }
    Ok(out)
}

fn nybble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::MalformedInput(format!(
            "non hex char '{}'",
            c as char
        ))),
    }
}

/// Derive the sliced index key for a MAC: SipHash-2-4 over its 6 bytes with
/// `key`, masked to the low `n` bits (`0 < n <= 32`).
///
/// `n` may come from an index header, so an out-of-range width is an input
/// error rather than a programming error.
pub fn derive_key(mac: &str, key: &[u8; SIP_KEY_LEN], n: u32) -> Result<u32> {
    if n == 0 || n > 32 {
        return Err(Error::MalformedInput(format!(
            "slice width {n} outside 1..=32"
        )));
    }
    let bytes = mac_bytes(mac)?;
    let mut hasher = SipHasher24::new_with_key(key);
    hasher.write(&bytes);
    let digest = hasher.finish();
    let mask = (1u64 << n) - 1;
    Ok((digest & mask) as u32)
}
