//! Content-defined chunking
//!
//! Splits the input stream on content-derived boundaries with the FastCDC
//! (2020) rolling-hash algorithm, so an insertion early in a stream shifts
//! chunk boundaries only locally and identical regions keep producing
//! identical chunks. Chunks are numbered in stream order; everything
//! downstream relies on that numbering to restore the original byte order.

use std::io::Read;

use bytes::Bytes;
use fastcdc::v2020::{self, StreamCDC};

use crate::chunk::Chunk;
use crate::error::{Error, Result};

/// Default minimum chunk size (512 KiB)
pub const DEFAULT_MIN_SIZE: u32 = 512 * 1024;
/// Default average chunk size (1 MiB)
pub const DEFAULT_AVG_SIZE: u32 = 1024 * 1024;
/// Default maximum chunk size (8 MiB)
pub const DEFAULT_MAX_SIZE: u32 = 8 * 1024 * 1024;

// =============================================================================
// Bounds
// =============================================================================

/// Chunk size bounds for the splitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitBounds {
    pub min_size: u32,
    pub avg_size: u32,
    pub max_size: u32,
}

impl Default for SplitBounds {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            avg_size: DEFAULT_AVG_SIZE,
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

impl SplitBounds {
    pub fn validate(&self) -> Result<()> {
        if self.min_size < v2020::MINIMUM_MIN || self.min_size > v2020::MINIMUM_MAX {
            return Err(Error::Config(format!(
                "minimum chunk size {} outside [{}, {}]",
                self.min_size,
                v2020::MINIMUM_MIN,
                v2020::MINIMUM_MAX
            )));
        }
        if self.avg_size < v2020::AVERAGE_MIN || self.avg_size > v2020::AVERAGE_MAX {
            return Err(Error::Config(format!(
                "average chunk size {} outside [{}, {}]",
                self.avg_size,
                v2020::AVERAGE_MIN,
                v2020::AVERAGE_MAX
            )));
        }
        if self.max_size < v2020::MAXIMUM_MIN || self.max_size > v2020::MAXIMUM_MAX {
            return Err(Error::Config(format!(
                "maximum chunk size {} outside [{}, {}]",
                self.max_size,
                v2020::MAXIMUM_MIN,
                v2020::MAXIMUM_MAX
            )));
        }
        if self.min_size > self.avg_size || self.avg_size > self.max_size {
            return Err(Error::Config(format!(
                "chunk size bounds must be ordered: min {} <= avg {} <= max {}",
                self.min_size, self.avg_size, self.max_size
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Splitter
// =============================================================================

/// Iterator producing sequenced chunks from a byte source
pub struct Splitter<R: Read> {
    inner: StreamCDC<R>,
    num: u64,
}

impl<R: Read> Splitter<R> {
    pub fn new(source: R, bounds: SplitBounds) -> Result<Self> {
        bounds.validate()?;
        Ok(Self {
            inner: StreamCDC::new(source, bounds.min_size, bounds.avg_size, bounds.max_size),
            num: 0,
        })
    }

    /// Continue a numbering sequence instead of starting at zero, for
    /// appending to an already-split stream
    pub fn starting_at(mut self, num: u64) -> Self {
        self.num = num;
        self
    }
}

impl<R: Read> Iterator for Splitter<R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let cut = match self.inner.next()? {
            Ok(cut) => cut,
            Err(e) => return Some(Err(Error::Split(e.to_string()))),
        };
        let size = cut.data.len();
        let chunk = Chunk::new(self.num, Bytes::from(cut.data)).with_target_size(size);
        self.num += 1;
        Some(Ok(chunk))
    }
}

// =============================================================================
// Tests
// =============================================================================
