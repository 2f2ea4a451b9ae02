//! Compact, privacy-preserving spatial index from MAC observation datasets.
//!
//! Maps truncated SipHash keys of MAC addresses to the 1 km MGRS grid cells
//! they were observed at, built through a staged external-sort pipeline and
//! queried either fully in memory or as a bounded streaming scan.

pub mod analyze;
pub mod codec;
pub mod error;
pub mod geodesy;
pub mod heatmap;
pub mod keys;
pub mod observations;
pub mod pipeline;
pub mod query;
pub mod record_stream;

pub use error::{Error, Result};
