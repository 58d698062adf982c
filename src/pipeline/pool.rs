//! N-way concurrent execution of one wrapped stage
//!
//! Runs up to `n` chunks through the wrapped processor concurrently on
//! spawned tasks, for CPU-bound stages (checksum, compression, erasure
//! math). Makes no ordering promise on output; a consumer that needs the
//! original order must pass through the sort stage before the final sink.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::chunk::{Chunk, Res};
use crate::error::{Error, Result};

use super::{single, Processor, ResStream};

/// Concurrent-execution wrapper around a processor
pub struct Pool {
    sem: Arc<Semaphore>,
    inner: Arc<dyn Processor>,
}

impl Pool {
    pub fn new(n: usize, inner: Arc<dyn Processor>) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(n)),
            inner,
        }
    }
}

#[async_trait]
impl Processor for Pool {
    async fn process(&self, chunk: Chunk) -> ResStream {
        let permit = match self.sem.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let err = Error::Internal("pool semaphore closed".into());
                return single(Res::err(chunk, err));
            }
        };
        let inner = self.inner.clone();
        let (tx, rx) = mpsc::unbounded();
        tokio::spawn(async move {
            let mut stream = inner.process(chunk).await;
            while let Some(res) = stream.next().await {
                if tx.unbounded_send(res).is_err() {
                    break;
                }
            }
            drop(permit);
        });
        Box::pin(rx)
    }

    async fn finish(&self) -> Result<()> {
        self.inner.finish().await
    }

    fn tolerates_faults(&self) -> bool {
        self.inner.tolerates_faults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testutil::Collect;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_all_chunks_pass_through() {
        let sink = Arc::new(Collect::new());
        let pool = Pool::new(3, sink.clone());

        let mut streams = Vec::new();
        for n in 0..9u64 {
            streams.push(pool.process(Chunk::new(n, Bytes::from_static(b"z"))).await);
        }
        for stream in streams {
            let out: Vec<Res> = stream.collect().await;
            assert_eq!(out.len(), 1);
        }

        let mut nums = sink.nums();
        nums.sort_unstable();
        assert_eq!(nums, (0..9u64).collect::<Vec<_>>());
        assert!(pool.finish().await.is_ok());
    }
}
