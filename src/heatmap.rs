//! PNG rendering of the 100 km density grid.
//!
//! Companion to the ASCII heatmap in the score report: the same
//! zone-by-band cells, drawn as filled rectangles with a log-scaled viridis
//! ramp so sparse regions stay visible next to dense urban cells.

use std::collections::HashMap;
use std::path::Path;

use plotters::prelude::*;

use crate::error::Result;

const ZONES: usize = 60;
const BANDS: &[u8] = b"WVUTSRQPONMLKJIHGFEDC";
const CELL_PX: u32 = 12;

/// Simplified 5-point viridis interpolation over a normalized value.
fn viridis(value: f64) -> RGBColor {
    let points = [
        (0.267004, 0.004874, 0.329415),
        (0.282623, 0.140926, 0.457517),
        (0.163625, 0.471133, 0.558148),
        (0.477504, 0.821444, 0.318195),
        (0.993248, 0.906157, 0.143936),
    ];
    let idx = value.clamp(0.0, 1.0) * (points.len() - 1) as f64;
    let i = (idx.floor() as usize).min(points.len() - 2);
    let t = idx - i as f64;
    let (r0, g0, b0) = points[i];
    let (r1, g1, b1) = points[i + 1];
    RGBColor(
        ((r0 + t * (r1 - r0)) * 255.0) as u8,
        ((g0 + t * (g1 - g0)) * 255.0) as u8,
        ((b0 + t * (b1 - b0)) * 255.0) as u8,
    )
}

/// Render the density cells (`"01W"`-style keys) to a PNG at `path`.
pub fn render_png(dense: &HashMap<String, u64>, path: &Path) -> Result<()> {
    let width = ZONES as u32 * CELL_PX;
    let height = BANDS.len() as u32 * CELL_PX;
    let max = dense.values().copied().max().unwrap_or(1).max(1);
    let denom = (max as f64).ln_1p();

    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&BLACK).map_err(to_io)?;

    for (row, band) in BANDS.iter().enumerate() {
        for zone in 1..=ZONES {
            let key = format!("{zone:02}{}", *band as char);
            let Some(&count) = dense.get(&key) else {
                continue;
            };
            if count == 0 {
                continue;
            }
            let intensity = ((count as f64).ln_1p() / denom).clamp(0.0, 1.0);
            let color = viridis(intensity);
            let x0 = (zone as i32 - 1) * CELL_PX as i32;
            let y0 = row as i32 * CELL_PX as i32;
            root.draw(&Rectangle::new(
                [(x0, y0), (x0 + CELL_PX as i32, y0 + CELL_PX as i32)],
                color.filled(),
            ))
            .map_err(to_io)?;
        }
    }
    root.present().map_err(to_io)?;
    Ok(())
}

fn to_io<E: std::fmt::Display>(e: E) -> crate::error::Error {
    crate::error::Error::Io(std::io::Error::other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viridis_endpoints() {
        let low = viridis(0.0);
        let high = viridis(1.0);
        assert!(low.2 > low.1); // dark purple: more blue than green
        assert!(high.0 > 200 && high.1 > 200); // yellow
    }

    #[test]
    fn renders_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("density.png");
        let mut dense = HashMap::new();
        dense.insert("31N".to_string(), 10u64);
        dense.insert("18T".to_string(), 1000u64);
        render_png(&dense, &path).unwrap();
        assert!(path.metadata().unwrap().len() > 0);
    }
}
