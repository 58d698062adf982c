//! Bounded admission
//!
//! Admits at most `n` chunks concurrently into the wrapped processor. The
//! admission token is attached to the output stream and returned once that
//! chunk's results have been fully consumed, so producer rate is decoupled
//! from consumer rate without unbounded buffering.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::chunk::{Chunk, Res};
use crate::error::{Error, Result};

use super::{single, Processor, ResStream};

/// Bounded-admission wrapper around a processor
pub struct Backlog {
    sem: Arc<Semaphore>,
    inner: Arc<dyn Processor>,
}

impl Backlog {
    pub fn new(limit: usize, inner: Arc<dyn Processor>) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(limit)),
            inner,
        }
    }
}

#[async_trait]
impl Processor for Backlog {
    async fn process(&self, chunk: Chunk) -> ResStream {
        let permit = match self.sem.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let err = Error::Internal("backlog semaphore closed".into());
                return single(Res::err(chunk, err));
            }
        };
        let inner = self.inner.process(chunk).await;
        // The permit lives as long as the stream: admission frees up only
        // once this chunk's results are fully consumed.
        Box::pin(inner.map(move |res| {
            let _ = &permit;
            res
        }))
    }

    async fn finish(&self) -> Result<()> {
        self.inner.finish().await
    }

    fn tolerates_faults(&self) -> bool {
        self.inner.tolerates_faults()
    }
}
