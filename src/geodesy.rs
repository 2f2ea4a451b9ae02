//! WGS84 lat/lon to MGRS grid references at 1 km precision.
//!
//! The index stores coordinates as the fixed 9-byte ASCII form
//! `zone(2) band(1) square(2) easting-km(2) northing-km(2)`, e.g.
//! `31NAA6600` for (0, 0). Only the forward conversion is needed: records are
//! written once and compared as raw bytes afterwards.
//!
//! Valid latitude domain is [-80, 84]; callers filter rows outside it before
//! converting.

use crate::error::{Error, Result};

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Latitude band letters for -80..84, 8 degrees each (band X spans 12).
const BANDS: &[u8; 20] = b"CDEFGHJKLMNPQRSTUVWX";

/// 100 km row letters, repeating every 2000 km.
const ROWS: &[u8; 20] = b"ABCDEFGHJKLMNPQRSTUV";

/// 100 km column letter sets, cycling with the zone.
const COLS: [&[u8; 8]; 3] = [b"STUVWXYZ", b"ABCDEFGH", b"JKLMNPQR"];

/// Number of bytes in the fixed ASCII encoding.
pub const MGRS_LEN: usize = 9;

/// A 1 km MGRS grid square in its fixed 9-byte ASCII encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mgrs(pub [u8; MGRS_LEN]);

impl Mgrs {
    pub fn as_bytes(&self) -> &[u8; MGRS_LEN] {
        &self.0
    }
}

impl std::fmt::Display for Mgrs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(std::str::from_utf8(&self.0).map_err(|_| std::fmt::Error)?)
    }
}

/// A projected UTM position, retained only long enough to derive an [`Mgrs`].
#[derive(Debug, Clone, Copy)]
struct Utm {
    zone: u32,
    band: u8,
    easting: f64,
    northing: f64,
}

/// Whether `lat` falls inside the projection's valid latitude band.
pub fn in_domain(lat: f64) -> bool {
    (-80.0..=84.0).contains(&lat)
}

/// Convert a WGS84 position to its 1 km MGRS grid square.
pub fn encode(lat: f64, lon: f64) -> Result<Mgrs> {
    if !in_domain(lat) {
        return Err(Error::MalformedInput(format!(
            "latitude {lat} outside [-80, 84]"
        )));
    }
    let utm = project(lat, lon);
    Ok(grid_square(&utm))
}

fn zone_for(lat: f64, lon: f64) -> u32 {
    // Norway and Svalbard carve exceptions out of the regular 6-degree grid.
    if (56.0..64.0).contains(&lat) && (3.0..12.0).contains(&lon) {
        return 32;
    }
    if (72.0..84.0).contains(&lat) {
        match lon {
            l if (0.0..9.0).contains(&l) => return 31,
            l if (9.0..21.0).contains(&l) => return 33,
            l if (21.0..33.0).contains(&l) => return 35,
            l if (33.0..42.0).contains(&l) => return 37,
            _ => {}
        }
    }
    ((((lon + 180.0) / 6.0).floor() as i32).rem_euclid(60) as u32) + 1
}

fn band_for(lat: f64) -> u8 {
    let idx = (((lat + 80.0) / 8.0).floor() as isize).clamp(0, 19) as usize;
    BANDS[idx]
}

/// Transverse Mercator projection, standard series expansion.
fn project(lat: f64, lon: f64) -> Utm {
    let zone = zone_for(lat, lon);
    let band = band_for(lat);

    let e2 = WGS84_F * (2.0 - WGS84_F);
    let ep2 = e2 / (1.0 - e2);
    let phi = lat.to_radians();
    let lon0 = f64::from(zone as i32 * 6 - 183).to_radians();

    let sin_phi = phi.sin();
    let cos_phi = phi.cos();
    let tan_phi = phi.tan();

    let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = ep2 * cos_phi * cos_phi;
    let a = cos_phi * (lon.to_radians() - lon0);

    // meridian arc length from the equator
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let m = WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin());

    let a2 = a * a;
    let a3 = a2 * a;
    let a4 = a3 * a;
    let a5 = a4 * a;
    let a6 = a5 * a;

    let easting = K0
        * n
        * (a + (1.0 - t + c) * a3 / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a5 / 120.0)
        + FALSE_EASTING;

    let mut northing = K0
        * (m + n
            * tan_phi
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a6 / 720.0));
    if lat < 0.0 {
        northing += FALSE_NORTHING_SOUTH;
    }

    Utm {
        zone,
        band,
        easting,
        northing,
    }
}

fn grid_square(utm: &Utm) -> Mgrs {
    let e = utm.easting.max(0.0) as u64;
    let n = utm.northing.max(0.0) as u64;

    let col_idx = (e / 100_000) as usize; // 1..=8 inside a zone
    let col = COLS[(utm.zone % 3) as usize][col_idx.saturating_sub(1).min(7)];

    let row_offset = if utm.zone % 2 == 0 { 5 } else { 0 };
    let row = ROWS[(((n / 100_000) + row_offset) % 20) as usize];

    let e_km = (e % 100_000) / 1000;
    let n_km = (n % 100_000) / 1000;

    let mut out = [0u8; MGRS_LEN];
    out[0] = b'0' + (utm.zone / 10) as u8;
    out[1] = b'0' + (utm.zone % 10) as u8;
    out[2] = utm.band;
    out[3] = col;
    out[4] = row;
    out[5] = b'0' + (e_km / 10) as u8;
    out[6] = b'0' + (e_km % 10) as u8;
    out[7] = b'0' + (n_km / 10) as u8;
    out[8] = b'0' + (n_km % 10) as u8;
    Mgrs(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_is_31naa6600() {
        let m = encode(0.0, 0.0).unwrap();
        assert_eq!(m.as_bytes(), b"31NAA6600");
    }

    #[test]
    fn philadelphia_lands_in_18t() {
        let m = encode(40.00900289, -75.21358834).unwrap();
        assert_eq!(&m.as_bytes()[..3], b"18T");
        assert!(m.as_bytes().iter().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn southern_hemisphere_uses_false_northing() {
        let m = encode(-33.8688, 151.2093).unwrap();
        assert_eq!(&m.as_bytes()[..3], b"56H");
    }

    #[test]
    fn norway_exception_applies() {
        let m = encode(60.0, 5.0).unwrap();
        assert_eq!(&m.as_bytes()[..2], b"32");
    }

    #[test]
    fn domain_filter() {
        assert!(encode(85.0, 0.0).is_err());
        assert!(encode(-84.0, 0.0).is_err());
        assert!(encode(84.0, 0.0).is_ok());
        assert!(encode(-80.0, 0.0).is_ok());
    }
}
