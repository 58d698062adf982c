//! Per-shard compression stages
//!
//! Shards are compressed after the parity split and before checksumming, so
//! the stored digest covers the bytes actually at rest. LZ4 block mode with a
//! prepended size header keeps decompression allocation-exact. A `None`
//! algorithm turns both stages into pass-throughs, letting the same pipeline
//! shape serve compressed and uncompressed configurations.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, Res};
use crate::error::{Error, Result};
use crate::pipeline::{single, Processor, ResStream};

// =============================================================================
// Algorithm
// =============================================================================

/// Supported shard compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression
    None,
    /// LZ4 block mode
    #[default]
    Lz4,
}

impl CompressionAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    fn compress(&self, data: &[u8]) -> Result<Bytes> {
        match self {
            CompressionAlgorithm::None => Ok(Bytes::copy_from_slice(data)),
            CompressionAlgorithm::Lz4 => lz4::block::compress(data, None, true)
                .map(Bytes::from)
                .map_err(|e| Error::CompressionFailed(e.to_string())),
        }
    }

    fn decompress(&self, data: &[u8]) -> Result<Bytes> {
        match self {
            CompressionAlgorithm::None => Ok(Bytes::copy_from_slice(data)),
            CompressionAlgorithm::Lz4 => lz4::block::decompress(data, None)
                .map(Bytes::from)
                .map_err(|e| Error::DecompressionFailed(e.to_string())),
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Stages
// =============================================================================

/// Replaces each chunk's payload with its compressed form
pub struct CompressProc {
    algorithm: CompressionAlgorithm,
}

impl CompressProc {
    pub fn new(algorithm: CompressionAlgorithm) -> Self {
        Self { algorithm }
    }
}

#[async_trait]
impl Processor for CompressProc {
    async fn process(&self, chunk: Chunk) -> ResStream {
        match self.algorithm.compress(chunk.data()) {
            Ok(data) => single(Res::ok(chunk.with_data(data))),
            Err(e) => single(Res::err(chunk, e)),
        }
    }
}

/// Replaces each chunk's payload with its decompressed form
pub struct DecompressProc {
    algorithm: CompressionAlgorithm,
}

impl DecompressProc {
    pub fn new(algorithm: CompressionAlgorithm) -> Self {
        Self { algorithm }
    }
}

#[async_trait]
impl Processor for DecompressProc {
    async fn process(&self, chunk: Chunk) -> ResStream {
        match self.algorithm.decompress(chunk.data()) {
            Ok(data) => single(Res::ok(chunk.with_data(data))),
            Err(e) => single(Res::err(chunk, e)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
