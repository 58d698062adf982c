//! Reed-Solomon parity split and join stages
//!
//! The write path splits each content-defined chunk into `ndata` equal-size
//! data shards (zero-padded) and appends `nparity` parity shards computed
//! with the `reed-solomon-erasure` codec. The read path reverses this per
//! accumulated shard group, reconstructing up to `nparity` damaged members
//! before concatenating the data shards and trimming the padding back off.

use async_trait::async_trait;
use bytes::Bytes;
use reed_solomon_erasure::galois_8::ReedSolomon;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chunk::{Chunk, Res};
use crate::error::{Error, Result};
use crate::pipeline::{from_iter, single, Processor, ResStream};

// =============================================================================
// Codec
// =============================================================================

/// Reed-Solomon codec configuration shared by the split and join stages
#[derive(Clone)]
pub struct Parity {
    rs: Arc<ReedSolomon>,
    ndata: usize,
    nparity: usize,
}

impl Parity {
    /// # Arguments
    ///
    /// * `ndata` - Number of data shards per chunk
    /// * `nparity` - Number of parity shards per chunk
    pub fn new(ndata: usize, nparity: usize) -> Result<Self> {
        if ndata == 0 {
            return Err(Error::InvalidEcConfig(
                "data shard count must be greater than 0".to_string(),
            ));
        }
        if nparity == 0 {
            return Err(Error::InvalidEcConfig(
                "parity shard count must be greater than 0".to_string(),
            ));
        }

        let rs = ReedSolomon::new(ndata, nparity).map_err(|e| {
            Error::InvalidEcConfig(format!("failed to create Reed-Solomon codec: {}", e))
        })?;

        Ok(Self {
            rs: Arc::new(rs),
            ndata,
            nparity,
        })
    }

    pub fn ndata(&self) -> usize {
        self.ndata
    }

    pub fn nparity(&self) -> usize {
        self.nparity
    }

    /// Total shards per chunk (data + parity)
    pub fn nshards(&self) -> usize {
        self.ndata + self.nparity
    }

    /// Split data into equal-size shards and compute parity.
    ///
    /// The last data shard is zero-padded; callers trim with the original
    /// length after a join.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let shard_size = data.len().div_ceil(self.ndata);
        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(self.nshards());

        for i in 0..self.ndata {
            let start = std::cmp::min(i * shard_size, data.len());
            let end = std::cmp::min(start + shard_size, data.len());
            let mut shard = data[start..end].to_vec();
            shard.resize(shard_size, 0);
            shards.push(shard);
        }
        for _ in 0..self.nparity {
            shards.push(vec![0u8; shard_size]);
        }

        self.rs
            .encode(&mut shards)
            .map_err(|e| Error::EcEncodingFailed(format!("Reed-Solomon encoding failed: {}", e)))?;

        Ok(shards)
    }

    /// Reconstruct missing shards in place. At least `ndata` members must be
    /// present.
    pub fn reconstruct(&self, chunk: u64, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < self.ndata {
            return Err(Error::InsufficientShards {
                available,
                required: self.ndata,
            });
        }

        self.rs
            .reconstruct(shards)
            .map_err(|e| Error::EcReconstructionFailed {
                chunk,
                reason: format!("Reed-Solomon reconstruction failed: {}", e),
            })
    }

    /// Check parity consistency over a complete shard set
    pub fn verify(&self, shards: &[Vec<u8>]) -> Result<bool> {
        self.rs
            .verify(shards)
            .map_err(|e| Error::EcEncodingFailed(format!("verification failed: {}", e)))
    }
}

// =============================================================================
// Split stage
// =============================================================================

/// Expands each chunk into its data and parity shards.
///
/// Shard `i` of chunk `base` is numbered `base * nshards + i`, so the group
/// stage on the read path can re-derive membership from the sequence number
/// alone. Every shard carries the pre-split length as its target size.
pub struct ParitySplit {
    parity: Parity,
}

impl ParitySplit {
    pub fn new(parity: Parity) -> Self {
        Self { parity }
    }
}

#[async_trait]
impl Processor for ParitySplit {
    async fn process(&self, chunk: Chunk) -> ResStream {
        let shards = match self.parity.encode(chunk.data()) {
            Ok(shards) => shards,
            Err(e) => return single(Res::err(chunk, e)),
        };

        let nshards = self.parity.nshards() as u64;
        let base = chunk.num() * nshards;
        let size = chunk.data().len();

        debug!(chunk = chunk.num(), size, nshards, "split chunk into shards");

        let results: Vec<Res> = shards
            .into_iter()
            .enumerate()
            .map(|(i, shard)| {
                Res::ok(Chunk::new(base + i as u64, Bytes::from(shard)).with_target_size(size))
            })
            .collect();
        from_iter(results)
    }
}

// =============================================================================
// Join stage
// =============================================================================

/// Rebuilds one chunk from its accumulated shard group.
///
/// Members carrying a tagged fault count as erased; up to `nparity` of them
/// are reconstructed from the survivors. The complete set is then checked
/// for parity consistency before the data shards are concatenated and
/// trimmed to the chunk's declared target size.
pub struct ParityJoin {
    parity: Parity,
    reconstructions: AtomicU64,
}

impl ParityJoin {
    pub fn new(parity: Parity) -> Self {
        Self {
            parity,
            reconstructions: AtomicU64::new(0),
        }
    }

    /// Number of groups that needed shard reconstruction so far
    pub fn reconstructions(&self) -> u64 {
        self.reconstructions.load(Ordering::Relaxed)
    }

    fn join(&self, chunk: &Chunk) -> Result<Bytes> {
        let group = chunk
            .group()
            .ok_or(Error::MissingGroup { chunk: chunk.num() })?;
        if group.len() != self.parity.nshards() {
            return Err(Error::InvalidGroupSize {
                have: group.len(),
                need: self.parity.nshards(),
            });
        }

        let mut damaged = 0usize;
        let mut shards: Vec<Option<Vec<u8>>> = group
            .members()
            .iter()
            .map(|member| match member.fault() {
                None => Some(member.data().to_vec()),
                Some(fault) => {
                    warn!(
                        chunk = chunk.num(),
                        shard = member.num(),
                        %fault,
                        "shard damaged, reconstructing from siblings"
                    );
                    damaged += 1;
                    None
                }
            })
            .collect();

        if damaged > 0 {
            self.parity.reconstruct(chunk.num(), &mut shards)?;
            self.reconstructions.fetch_add(1, Ordering::Relaxed);
        }

        let shards: Vec<Vec<u8>> = shards.into_iter().flatten().collect();
        if !self.parity.verify(&shards)? {
            return Err(Error::VerificationFailed { chunk: chunk.num() });
        }

        let target_size = chunk
            .target_size()
            .ok_or_else(|| Error::Internal(format!("no target size on chunk {}", chunk.num())))?;
        let mut data = Vec::with_capacity(target_size);
        for shard in shards.iter().take(self.parity.ndata()) {
            data.extend_from_slice(shard);
        }
        data.truncate(target_size);
        Ok(Bytes::from(data))
    }
}

#[async_trait]
impl Processor for ParityJoin {
    async fn process(&self, chunk: Chunk) -> ResStream {
        match self.join(&chunk) {
            Ok(data) => single(Res::ok(chunk.with_data(data))),
            Err(e) => single(Res::err(chunk, e)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================


// =============================================================================
// Property tests
// =============================================================================

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn config_strategy() -> impl Strategy<Value = (usize, usize)> {
        (2usize..=6, 1usize..=3)
    }

    fn data_strategy() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), 1..2000)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Splitting then joining without loss returns the original data.
        #[test]
        fn prop_roundtrip_no_loss(
            (ndata, nparity) in config_strategy(),
            data in data_strategy(),
        ) {
            let parity = Parity::new(ndata, nparity)?;
            let shards = parity.encode(&data)?;
            prop_assert_eq!(shards.len(), ndata + nparity);
            prop_assert!(parity.verify(&shards)?);

            let mut concatenated = Vec::new();
            for shard in shards.iter().take(ndata) {
                concatenated.extend_from_slice(shard);
            }
            concatenated.truncate(data.len());
            prop_assert_eq!(concatenated, data);
        }

        /// Any erasure pattern of up to `nparity` shards is recoverable.
        #[test]
        fn prop_recovers_any_erasure_pattern(
            (ndata, nparity) in config_strategy(),
            data in data_strategy(),
            erasure_seed in prop::collection::vec(0usize..9, 0..=3),
        ) {
            let parity = Parity::new(ndata, nparity)?;
            let total = ndata + nparity;

            let mut erasures: Vec<usize> = erasure_seed
                .into_iter()
                .filter(|&i| i < total)
                .collect();
            erasures.sort_unstable();
            erasures.dedup();
            erasures.truncate(nparity);

            let mut shards: Vec<Option<Vec<u8>>> =
                parity.encode(&data)?.into_iter().map(Some).collect();
            for &i in &erasures {
                shards[i] = None;
            }

            parity.reconstruct(0, &mut shards)?;

            let mut concatenated = Vec::new();
            for shard in shards.iter().take(ndata).flatten() {
                concatenated.extend_from_slice(shard);
            }
            concatenated.truncate(data.len());
            prop_assert_eq!(concatenated, data);
        }

        /// Losing more shards than parity covers is always rejected.
        #[test]
        fn prop_too_many_erasures_fails(
            (ndata, nparity) in config_strategy(),
            data in prop::collection::vec(any::<u8>(), 100..500),
        ) {
            let parity = Parity::new(ndata, nparity)?;
            let mut shards: Vec<Option<Vec<u8>>> =
                parity.encode(&data)?.into_iter().map(Some).collect();
            for shard in shards.iter_mut().take(nparity + 1) {
                *shard = None;
            }
            prop_assert!(
                matches!(
                    parity.reconstruct(0, &mut shards),
                    Err(Error::InsufficientShards { .. })
                ),
                "expected Err(Error::InsufficientShards)"
            );
        }

        /// Encoding is deterministic across codec instances.
        #[test]
        fn prop_encoding_deterministic(
            (ndata, nparity) in config_strategy(),
            data in data_strategy(),
        ) {
            let a = Parity::new(ndata, nparity)?;
            let b = Parity::new(ndata, nparity)?;
            prop_assert_eq!(a.encode(&data)?, b.encode(&data)?);
        }
    }
}
