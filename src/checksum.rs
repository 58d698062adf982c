//! Content digests and the checksum pipeline stages
//!
//! A [`Digest`] is the storage key for a stored chunk and doubles as its
//! integrity check on read: the digest recorded at write time must equal the
//! digest recomputed from the fetched bytes.

use async_trait::async_trait;
use sha2::{Digest as _, Sha256};

use crate::chunk::{Chunk, Res};
use crate::error::{Error, Result};
use crate::pipeline::{single, Processor, ResStream};

/// Size of a content digest in bytes
pub const DIGEST_SIZE: usize = 32;

// =============================================================================
// Digest
// =============================================================================

/// Fixed-size content digest used as storage key and integrity check
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_SIZE]);

impl Digest {
    /// Compute the digest of a byte slice
    pub fn sum(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Parse a digest from its hex representation
    pub fn from_hex(s: &str) -> Result<Self> {
        let raw = hex::decode(s).map_err(|e| Error::Config(format!("invalid digest: {}", e)))?;
        Self::from_slice(&raw)
    }

    /// Load a digest from a raw byte slice of exactly [`DIGEST_SIZE`] bytes
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        if raw.len() != DIGEST_SIZE {
            return Err(Error::Config(format!(
                "invalid digest length: {} (expected {})",
                raw.len(),
                DIGEST_SIZE
            )));
        }
        let mut out = [0u8; DIGEST_SIZE];
        out.copy_from_slice(raw);
        Ok(Self(out))
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Hex representation, used for file names and index lines
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

// =============================================================================
// Pipeline stages
// =============================================================================

/// Stage that computes and attaches the digest of a chunk's payload
pub struct ChecksumProc;

#[async_trait]
impl Processor for ChecksumProc {
    async fn process(&self, chunk: Chunk) -> ResStream {
        let digest = Digest::sum(chunk.data());
        single(Res::ok(chunk.with_hash(digest)))
    }
}

/// Stage that recomputes a chunk's digest and compares it against the digest
/// attached upstream (e.g. from an index line).
///
/// A mismatch is the recoverable integrity fault: it rides forward to the
/// group stage so erasure reconstruction can absorb it.
pub struct ChecksumVerify;

#[async_trait]
impl Processor for ChecksumVerify {
    async fn process(&self, chunk: Chunk) -> ResStream {
        let expected = match chunk.hash() {
            Some(h) => h,
            None => {
                let err = Error::Internal("chunk without digest at verify stage".into());
                return single(Res::err(chunk, err));
            }
        };
        let actual = Digest::sum(chunk.data());
        if actual != expected {
            let err = Error::IntegrityCheckFailed {
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            };
            return single(Res::err(chunk, err));
        }
        single(Res::ok(chunk))
    }
}

// =============================================================================
// Tests
// =============================================================================
