//! Line-oriented observation ingest.
//!
//! Input is a text file whose first line is a header, with one observation
//! per following line: `MAC<sep>LAT<sep>LON`, `<sep>` being `|` or tab.
//! The MAC occupies the first 17 characters of the line; latitude and
//! longitude are parsed as floats. An unparsable line aborts the whole run.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use crate::error::{Error, Result};
use crate::keys::MAC_TEXT_LEN;

/// Field separator selection. Pipe is the default export format; some dumps
/// use tabs instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Pipe,
    Tab,
}

impl Separator {
    pub fn from_tabs_flag(tabs: bool) -> Self {
        if tabs {
            Separator::Tab
        } else {
            Separator::Pipe
        }
    }

    fn byte(self) -> u8 {
        match self {
            Separator::Pipe => b'|',
            Separator::Tab => b'\t',
        }
    }
}

/// One parsed observation row. The MAC is kept as text; key derivation
/// re-parses it against whatever slice width the operation needs.
#[derive(Debug, Clone)]
pub struct Observation {
    pub mac: String,
    pub lat: f64,
    pub lon: f64,
}

/// Streaming reader over an observation file, header line already skipped.
pub struct ObservationReader {
    lines: Lines<BufReader<File>>,
    sep: Separator,
    line_no: u64,
}

impl ObservationReader {
    pub fn open(path: &Path, sep: Separator) -> Result<Self> {
        let file = File::open(path)?;
        let mut lines = BufReader::new(file).lines();
        // first line is a column header, e.g. "bssid|bestlat|bestlon"
        if let Some(header) = lines.next() {
            header?;
        }
        Ok(Self {
            lines,
            sep,
            line_no: 1,
        })
    }

    fn parse(&self, line: &str) -> Result<Observation> {
        let sep = self.sep.byte();
        let bytes = line.as_bytes();
        let b1 = bytes
            .iter()
            .position(|&b| b == sep)
            .ok_or_else(|| self.bad(line, "missing first separator"))?;
        let b2 = bytes[b1 + 1..]
            .iter()
            .position(|&b| b == sep)
            .map(|p| p + b1 + 1)
            .ok_or_else(|| self.bad(line, "missing second separator"))?;

        if b1 < MAC_TEXT_LEN {
            return Err(self.bad(line, "mac field shorter than 17 characters"));
        }
        // slicing by byte offset, so a multibyte char straddling the
        // boundary is an input error
        let mac = line
            .get(..MAC_TEXT_LEN)
            .ok_or_else(|| self.bad(line, "mac field is not plain ascii"))?;

        let lat: f64 = line[b1 + 1..b2]
            .trim()
            .parse()
            .map_err(|_| self.bad(line, "unparsable latitude"))?;
        let lon: f64 = line[b2 + 1..]
            .trim()
            .parse()
            .map_err(|_| self.bad(line, "unparsable longitude"))?;

        Ok(Observation {
            mac: mac.to_string(),
            lat,
            lon,
        })
    }

    fn bad(&self, line: &str, what: &str) -> Error {
        Error::MalformedInput(format!("line {}: {what}: {line:?}", self.line_no))
    }
}

impl Iterator for ObservationReader {
    type Item = Result<Observation>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            if line.is_empty() {
                continue;
            }
            return Some(self.parse(&line));
        }
    }
}
