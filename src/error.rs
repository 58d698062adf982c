//! Error types for shardstream

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while splitting, storing or reassembling a stream
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Chunk boundary detection failed
    #[error("Chunk splitting failed: {0}")]
    Split(String),

    // =========================================================================
    // Recoverable-by-redundancy errors
    // =========================================================================
    /// Content missing at every queried location. Absorbed by erasure
    /// reconstruction when it reaches the join stage inside a shard group.
    #[error("Missing data: {0}")]
    MissingData(String),

    /// Stored digest did not match the recomputed digest
    #[error("Integrity check failed: expected {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    // =========================================================================
    // Erasure Coding Errors
    // =========================================================================
    /// Invalid EC configuration
    #[error("Invalid EC configuration: {0}")]
    InvalidEcConfig(String),

    /// EC encoding failed
    #[error("EC encoding failed: {0}")]
    EcEncodingFailed(String),

    /// EC reconstruction failed
    #[error("EC reconstruction failed for chunk {chunk}: {reason}")]
    EcReconstructionFailed { chunk: u64, reason: String },

    /// Insufficient shards for reconstruction
    #[error("Insufficient shards for reconstruction: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    /// Shard set failed the Reed-Solomon consistency check with no shard
    /// reported missing
    #[error("Shard verification failed for chunk {chunk}")]
    VerificationFailed { chunk: u64 },

    // =========================================================================
    // Structural errors
    // =========================================================================
    /// A chunk reached the join stage without its sibling group attached
    #[error("Missing shard group on chunk {chunk}")]
    MissingGroup { chunk: u64 },

    /// A group arrived with the wrong number of siblings
    #[error("Invalid group size: have {have}, need {need}")]
    InvalidGroupSize { have: usize, need: usize },

    /// Fewer than the expected number of siblings arrived before Finish
    #[error("Incomplete shard group {group}: {have} of {need} shards arrived")]
    IncompleteGroup { group: u64, have: usize, need: usize },

    /// A sequence number never arrived before Finish
    #[error("Short stream: missing chunks at finish")]
    ShortStream,

    // =========================================================================
    // Invariant violations
    // =========================================================================
    /// A concurrency token was never returned to its pool
    #[error("Unreturned concurrency slots: {missing}")]
    UnreturnedSlots { missing: usize },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Store / placement errors
    // =========================================================================
    /// Not enough quota-eligible backends to satisfy the minimum-copies policy
    #[error("Not enough eligible destinations: {eligible} available, {required} required")]
    NotEnoughDestinations { eligible: usize, required: usize },

    /// An external store command exited unsuccessfully
    #[error("Store command `{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    /// Decompression failed
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),
}

impl Error {
    /// True for the two error kinds that redundancy can absorb: content
    /// missing at one location and a single-copy integrity mismatch. All
    /// other errors are terminal for the path they occur on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MissingData(_) | Error::IntegrityCheckFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::MissingData("gone".into()).is_recoverable());
        assert!(Error::IntegrityCheckFailed {
            expected: "aa".into(),
            actual: "bb".into(),
        }
        .is_recoverable());

        assert!(!Error::ShortStream.is_recoverable());
        assert!(!Error::VerificationFailed { chunk: 0 }.is_recoverable());
        assert!(!Error::UnreturnedSlots { missing: 1 }.is_recoverable());
    }
}
