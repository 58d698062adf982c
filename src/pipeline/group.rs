//! Sibling-shard accumulation
//!
//! Collects the `size` shards of each erasure-coded chunk, arriving in any
//! order and possibly carrying recoverable faults, and emits one group chunk
//! per completed set for the join stage. Shards of chunk `base` carry
//! sequence numbers `base * size + i`, so the group key and member slot fall
//! out of integer division.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::chunk::{Chunk, Group, Res};
use crate::error::{Error, Result};

use super::{none, single, Processor, ResStream};

/// Accumulates sibling shards into complete groups
pub struct GroupProc {
    size: u64,
    pending: Mutex<HashMap<u64, Vec<Option<Chunk>>>>,
}

impl GroupProc {
    /// # Arguments
    ///
    /// * `size` - Number of sibling shards per group (data + parity)
    pub fn new(size: usize) -> Self {
        Self {
            size: size as u64,
            pending: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Processor for GroupProc {
    async fn process(&self, chunk: Chunk) -> ResStream {
        let key = chunk.num() / self.size;
        let slot = (chunk.num() % self.size) as usize;

        let mut pending = self.pending.lock();
        let members = pending
            .entry(key)
            .or_insert_with(|| vec![None; self.size as usize]);

        if members[slot].is_some() {
            drop(pending);
            let err = Error::Internal(format!(
                "duplicate shard {} for group {}",
                chunk.num(),
                key
            ));
            return single(Res::err(chunk, err));
        }
        members[slot] = Some(chunk);

        if members.iter().any(|m| m.is_none()) {
            return none();
        }

        let members: Vec<Chunk> = pending
            .remove(&key)
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .collect();
        drop(pending);

        // The declared size of the original chunk rides on every intact
        // member; the join stage needs it to trim padding.
        let target_size = members.iter().find_map(|m| m.target_size());
        let mut out = Chunk::new(key, Bytes::new()).with_group(Group::new(members));
        if let Some(size) = target_size {
            out = out.with_target_size(size);
        }
        single(Res::ok(out))
    }

    async fn finish(&self) -> Result<()> {
        let pending = self.pending.lock();
        if let Some((key, members)) = pending.iter().next() {
            return Err(Error::IncompleteGroup {
                group: *key,
                have: members.iter().filter(|m| m.is_some()).count(),
                need: self.size as usize,
            });
        }
        Ok(())
    }

    fn tolerates_faults(&self) -> bool {
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
