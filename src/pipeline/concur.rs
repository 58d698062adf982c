//! Slot-bounded fan-out over a dynamic processor set
//!
//! Given a chunk, asks a [`DynProcs`] provider for the set of sub-processors
//! to run over that same chunk (one per redundant destination, on the write
//! path), runs up to `max` of them concurrently via the slot pool and merges
//! their result streams into one. Finish fails if any slot was never
//! returned, which signals a leaked sub-task.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use std::sync::Arc;

use crate::chunk::{Chunk, Res};
use crate::error::Result;
use crate::slots::Slots;

use super::{single, Processor, ResStream};

/// Provider of the per-chunk processor set
#[async_trait]
pub trait DynProcs: Send + Sync + 'static {
    /// The processors to run over this chunk. An empty set is valid and
    /// produces no output for the chunk.
    async fn procs(&self, chunk: &Chunk) -> Result<Vec<Arc<dyn Processor>>>;

    async fn finish(&self) -> Result<()> {
        Ok(())
    }
}

/// Concurrent fan-out stage
pub struct Concur {
    slots: Slots,
    provider: Arc<dyn DynProcs>,
}

impl Concur {
    pub fn new(max: usize, provider: Arc<dyn DynProcs>) -> Self {
        Self {
            slots: Slots::new(max),
            provider,
        }
    }
}

#[async_trait]
impl Processor for Concur {
    async fn process(&self, chunk: Chunk) -> ResStream {
        let procs = match self.provider.procs(&chunk).await {
            Ok(procs) => procs,
            Err(e) => return single(Res::err(chunk, e)),
        };

        let (tx, rx) = mpsc::unbounded();
        for proc in procs {
            // Suspends here once `max` sub-tasks are in flight.
            let slot = match self.slots.take().await {
                Ok(slot) => slot,
                Err(e) => return single(Res::err(chunk, e)),
            };
            let chunk = chunk.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut stream = proc.process(chunk).await;
                while let Some(res) = stream.next().await {
                    if tx.unbounded_send(res).is_err() {
                        break;
                    }
                }
                drop(slot);
            });
        }
        drop(tx);
        Box::pin(rx)
    }

    async fn finish(&self) -> Result<()> {
        self.provider.finish().await?;
        self.slots.ensure_all_returned()
    }
}

// =============================================================================
// Tests
// =============================================================================
