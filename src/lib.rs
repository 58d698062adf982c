//! Shardstream - Erasure-Coded Stream Distribution
//!
//! Splits a byte stream into content-defined chunks, expands each chunk into
//! Reed-Solomon data and parity shards, and spreads the shards over a fleet
//! of storage backends with a minimum-copies placement policy. The write
//! produces a small text index; given that index, the read path fetches
//! shards from surviving backends, reconstructs anything missing or corrupt
//! within parity tolerance, and reproduces the original stream byte for
//! byte.
//!
//! # Architecture
//!
//! Everything flows through composable pipeline stages:
//!
//! ```text
//! split ──▶ parity split ──▶ compress ──▶ checksum ──▶ index ──▶ min-copies put
//!
//! index scan ──▶ fetch ──▶ verify ──▶ decompress ──▶ group ──▶ join ──▶ sort ──▶ write
//! ```
//!
//! Stages run concurrently and hand results downstream out of order; the
//! index stage and the final sort stage restore sequence where it matters.
//!
//! # Modules
//!
//! - [`checksum`] - Content digests and integrity stages
//! - [`chunk`] - The chunk, group and result types flowing through pipelines
//! - [`compress`] - Per-shard compression stages
//! - [`config`] - YAML configuration loading and validation
//! - [`error`] - Error types
//! - [`index`] - The stream index format, writer stage and scanner
//! - [`parity`] - Reed-Solomon split and join stages
//! - [`pipeline`] - The processor contract and its combinators
//! - [`run`] - Top-level store and fetch operations
//! - [`slots`] - Bounded-concurrency token pool
//! - [`split`] - Content-defined chunking
//! - [`stores`] - Storage backends, ownership registry and placement

pub mod checksum;
pub mod chunk;
pub mod compress;
pub mod config;
pub mod error;
pub mod index;
pub mod parity;
pub mod pipeline;
pub mod run;
pub mod slots;
pub mod split;
pub mod stores;

// Re-export commonly used types
pub use checksum::Digest;
pub use chunk::{Chunk, Group, Res, ShardFault};
pub use compress::CompressionAlgorithm;
pub use config::Config;
pub use error::{Error, Result};
pub use parity::Parity;
pub use run::{fetch_stream, store_stream, StreamOpts};
