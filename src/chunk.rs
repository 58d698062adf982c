//! Chunk, result envelope and shard group types
//!
//! A [`Chunk`] is the unit of work flowing through the pipeline: a sequenced
//! payload with an optional content digest, an optional declared target size
//! (set by the splitter, consulted by erasure join to trim padding), an
//! optional sibling [`Group`] and an optional tagged recoverable fault.
//!
//! Chunks are immutable once emitted; the `with_*` builders return a new
//! chunk sharing the same sequence number. Payloads are [`Bytes`], so cloning
//! a chunk across fan-out stages is cheap.

use bytes::Bytes;

use crate::checksum::Digest;
use crate::error::Error;

// =============================================================================
// Shard faults
// =============================================================================

/// The recoverable failure reasons a shard can carry into the join stage.
///
/// Only these two kinds ride along a chunk; anything else is terminal for the
/// chunk's path and never enters a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardFault {
    /// Content was not found at any owner
    Missing(String),
    /// Stored digest did not match the recomputed digest
    Integrity(String),
}

impl ShardFault {
    /// Classify an error as a recoverable shard fault, if it is one
    pub fn from_error(err: &Error) -> Option<Self> {
        match err {
            Error::MissingData(detail) => Some(ShardFault::Missing(detail.clone())),
            Error::IntegrityCheckFailed { expected, actual } => Some(ShardFault::Integrity(
                format!("expected {}, got {}", expected, actual),
            )),
            _ => None,
        }
    }

    /// Convert back into the error it was derived from
    pub fn into_error(self) -> Error {
        match self {
            ShardFault::Missing(detail) => Error::MissingData(detail),
            ShardFault::Integrity(detail) => Error::Internal(format!(
                "unabsorbed integrity fault: {}",
                detail
            )),
        }
    }
}

impl std::fmt::Display for ShardFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShardFault::Missing(detail) => write!(f, "missing: {}", detail),
            ShardFault::Integrity(detail) => write!(f, "integrity: {}", detail),
        }
    }
}

// =============================================================================
// Group
// =============================================================================

/// An ordered, fixed-size set of sibling shards belonging to one erasure-coded
/// chunk. Each member is either intact or carries a recoverable fault.
#[derive(Debug, Clone)]
pub struct Group {
    members: Vec<Chunk>,
}

impl Group {
    pub fn new(members: Vec<Chunk>) -> Self {
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[Chunk] {
        &self.members
    }
}

// =============================================================================
// Chunk
// =============================================================================

/// A sequenced unit of the stream
#[derive(Debug, Clone)]
pub struct Chunk {
    num: u64,
    data: Bytes,
    hash: Option<Digest>,
    target_size: Option<usize>,
    group: Option<Group>,
    fault: Option<ShardFault>,
}

impl Chunk {
    /// Create a chunk with a sequence number and payload
    pub fn new(num: u64, data: Bytes) -> Self {
        Self {
            num,
            data,
            hash: None,
            target_size: None,
            group: None,
            fault: None,
        }
    }

    /// Sequence number, unique within a stream. Shards derived from chunk
    /// `base` carry `base * nshards + i`.
    pub fn num(&self) -> u64 {
        self.num
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn hash(&self) -> Option<Digest> {
        self.hash
    }

    pub fn target_size(&self) -> Option<usize> {
        self.target_size
    }

    pub fn group(&self) -> Option<&Group> {
        self.group.as_ref()
    }

    pub fn fault(&self) -> Option<&ShardFault> {
        self.fault.as_ref()
    }

    /// The "with new data" transformation: a new chunk sharing the sequence
    /// number, digest and target size. The group and any fault are consumed
    /// by the stage performing the transformation and do not carry over.
    pub fn with_data(&self, data: Bytes) -> Self {
        Self {
            num: self.num,
            data,
            hash: self.hash,
            target_size: self.target_size,
            group: None,
            fault: None,
        }
    }

    pub fn with_hash(mut self, hash: Digest) -> Self {
        self.hash = Some(hash);
        self
    }

    pub fn with_target_size(mut self, size: usize) -> Self {
        self.target_size = Some(size);
        self
    }

    pub fn with_group(mut self, group: Group) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with_fault(mut self, fault: ShardFault) -> Self {
        self.fault = Some(fault);
        self
    }
}

// =============================================================================
// Res
// =============================================================================

/// The result envelope for one processing step: a (possibly new) chunk and an
/// optional error. A set error is terminal for that chunk on that path unless
/// a downstream stage tolerates tagged recoverable faults.
#[derive(Debug)]
pub struct Res {
    pub chunk: Chunk,
    pub err: Option<Error>,
}

impl Res {
    pub fn ok(chunk: Chunk) -> Self {
        Self { chunk, err: None }
    }

    pub fn err(chunk: Chunk, err: Error) -> Self {
        Self {
            chunk,
            err: Some(err),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_data_keeps_identity() {
        let chunk = Chunk::new(7, Bytes::from_static(b"abc"))
            .with_hash(Digest::sum(b"abc"))
            .with_target_size(3)
            .with_fault(ShardFault::Missing("gone".into()));

        let new = chunk.with_data(Bytes::from_static(b"xyz"));
        assert_eq!(new.num(), 7);
        assert_eq!(new.hash(), Some(Digest::sum(b"abc")));
        assert_eq!(new.target_size(), Some(3));
        assert_eq!(new.data().as_ref(), b"xyz");
        assert!(new.fault().is_none());
        assert!(new.group().is_none());
    }

    #[test]
    fn test_fault_classification() {
        let missing = Error::MissingData("nowhere".into());
        assert!(matches!(
            ShardFault::from_error(&missing),
            Some(ShardFault::Missing(_))
        ));

        let fatal = Error::ShortStream;
        assert!(ShardFault::from_error(&fatal).is_none());
    }
}
