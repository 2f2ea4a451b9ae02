//! Buffered record channels over bucket files.
//!
//! Every pipeline stage moves 13-byte records through fixed-capacity byte
//! buffers. Writers flush whenever fewer than one record of space remains,
//! so a record never straddles a flush boundary. The reader refills in
//! chunks and carries any partial trailing record across refills, the same
//! compaction discipline a `ByteBuffer`-style channel loop needs.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::Result;

/// Buffer capacity for both directions. A tuning knob, not a correctness
/// constraint; any capacity of at least one record works.
pub const BUFFER_CAPACITY: usize = 4096;

/// Number of bucket files every pipeline stage shards into. The bucket
/// selector is always a 4-bit nibble (or a round-robin counter masked to one),
/// so this must stay a power of two with `BUCKET_BITS` kept in sync.
pub const BUCKETS: usize = 16;
pub const BUCKET_BITS: u32 = 4;
pub const BUCKET_MASK: u32 = (BUCKETS as u32) - 1;

/// A single append-only record sink with a fixed-capacity buffer.
pub struct RecordSink {
    file: File,
    buf: Vec<u8>,
}

impl RecordSink {
    /// Create the file at `path`, failing if it already exists. Stages never
    /// overwrite a previous generation in place.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::options().write(true).create_new(true).open(path)?;
        Ok(Self::from_file(file))
    }

    /// Wrap an already-open file, e.g. one that just had a header written.
    pub fn from_file(file: File) -> Self {
        Self {
            file,
            buf: Vec::with_capacity(BUFFER_CAPACITY),
        }
    }

    /// Append one record. Flushes first if the record would not fit whole.
    pub fn write_record(&mut self, rec: &[u8]) -> Result<()> {
        if BUFFER_CAPACITY - self.buf.len() < rec.len() {
            self.flush()?;
        }
        self.buf.extend_from_slice(rec);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.file.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }

    /// Flush the tail and close. Every exit path of a stage must land here;
    /// records still buffered are lost otherwise.
    pub fn finish(mut self) -> Result<()> {
        self.flush()?;
        Ok(())
    }
}

/// A set of [`BUCKETS`] sinks plus per-bucket record counters.
pub struct BucketSet {
    sinks: Vec<RecordSink>,
    counts: Vec<u64>,
}

impl BucketSet {
    /// Create `prefix_0..prefix_15` under `dir`.
    pub fn create(dir: &Path, prefix: &str) -> Result<Self> {
        let mut sinks = Vec::with_capacity(BUCKETS);
        for i in 0..BUCKETS {
            sinks.push(RecordSink::create(&dir.join(format!("{prefix}_{i}")))?);
        }
        Ok(Self {
            sinks,
            counts: vec![0; BUCKETS],
        })
    }

    pub fn write_record(&mut self, bucket: usize, rec: &[u8]) -> Result<()> {
        self.sinks[bucket].write_record(rec)?;
        self.counts[bucket] += 1;
        Ok(())
    }

    /// Flush and close every bucket, returning the per-bucket record counts.
    pub fn finish(self) -> Result<Vec<u64>> {
        for sink in self.sinks {
            sink.finish()?;
        }
        Ok(self.counts)
    }
}

/// Streaming reader yielding whole records from a byte source.
///
/// Refills keep whatever partial record the previous chunk ended with: the
/// unconsumed tail is moved to the front of the buffer before reading more.
pub struct RecordReader<R: Read> {
    inner: R,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    record_size: usize,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R, record_size: usize) -> Self {
        Self::with_carry(inner, record_size, Vec::new())
    }

    /// Start with `carry` already in the buffer: bytes a header parse read
    /// past the end of the header.
    pub fn with_carry(inner: R, record_size: usize, carry: Vec<u8>) -> Self {
        debug_assert!(record_size > 0 && record_size <= BUFFER_CAPACITY);
        let mut buf = vec![0u8; BUFFER_CAPACITY + carry.len()];
        buf[..carry.len()].copy_from_slice(&carry);
        Self {
            inner,
            end: carry.len(),
            buf,
            start: 0,
            record_size,
        }
    }

    /// Next whole record, or `None` at end of stream. Trailing bytes shorter
    /// than one record are ignored.
    pub fn next_record(&mut self) -> Result<Option<&[u8]>> {
        while self.end - self.start < self.record_size {
            // compact: retain the partial tail, reclaim consumed space
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
            let n = self.inner.read(&mut self.buf[self.end..])?;
            if n == 0 {
                return Ok(None);
            }
            self.end += n;
        }
        let rec = &self.buf[self.start..self.start + self.record_size];
        self.start += self.record_size;
        Ok(Some(rec))
    }
}
