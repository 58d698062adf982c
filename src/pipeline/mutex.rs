//! Full serialization boundary
//!
//! Wraps a processor so that only one chunk's result stream is live at a
//! time: the lock is taken before the inner stage runs and rides on the
//! output stream, releasing only once that stream has been fully consumed.
//! The final sort-and-write stage sits behind this so that reordering state
//! and the output writer see one chunk's results at a time.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::chunk::Chunk;
use crate::error::Result;

use super::{Processor, ResStream};

/// Mutual-exclusion wrapper around a processor
pub struct MutexProc {
    lock: Arc<Mutex<()>>,
    inner: Arc<dyn Processor>,
}

impl MutexProc {
    pub fn new(inner: Arc<dyn Processor>) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            inner,
        }
    }
}

#[async_trait]
impl Processor for MutexProc {
    async fn process(&self, chunk: Chunk) -> ResStream {
        let guard = self.lock.clone().lock_owned().await;
        let inner = self.inner.process(chunk).await;
        // The guard lives as long as the stream; the next chunk enters the
        // inner stage only after this one's results are fully consumed.
        Box::pin(inner.map(move |res| {
            let _ = &guard;
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
