//! Chunk pipeline core
//!
//! A [`Processor`] consumes one chunk and produces an ordered, possibly
//! concurrently-filled stream of [`Res`] values. Processors compose without
//! knowledge of each other's internals through the combinators in this
//! module:
//!
//! - [`Chain`] - feeds each stage's output into the next stage
//! - [`Backlog`] - bounded admission into a wrapped processor
//! - [`Concur`] - dynamic per-chunk processor set, slot-bounded fan-out
//! - [`Pool`] - n-way concurrent execution of one wrapped stage
//! - [`MutexProc`] - full serialization boundary around a stage
//! - [`GroupProc`] - sibling-shard accumulation for erasure join
//! - [`SortProc`] / [`WriterTo`] - sequence restoration and the ordered sink
//!
//! `finish` is invoked once no more chunks will be submitted; it flushes
//! buffered state and surfaces latent errors (incomplete groups, sequence
//! gaps, leaked concurrency slots) that only become detectable at end of
//! input.

use async_trait::async_trait;
use futures::select;
use futures::stream::{self, BoxStream, FuturesUnordered, StreamExt};
use futures::Stream;
use std::sync::Arc;

use crate::chunk::{Chunk, Res};
use crate::error::{Error, Result};

mod backlog;
mod chain;
mod concur;
mod group;
mod mutex;
mod pool;
mod sort;

pub use backlog::Backlog;
pub use chain::Chain;
pub use concur::{Concur, DynProcs};
pub use group::GroupProc;
pub use mutex::MutexProc;
pub use pool::Pool;
pub use sort::{SortProc, WriterTo};

/// Output stream of one processing step
pub type ResStream = BoxStream<'static, Res>;

// =============================================================================
// Processor contract
// =============================================================================

/// A pipeline stage: one chunk in, a stream of zero or more results out
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    /// Process one chunk. The returned stream may be filled concurrently but
    /// its items are consumed in order by the caller.
    async fn process(&self, chunk: Chunk) -> ResStream;

    /// Flush buffered state and surface latent errors once no more chunks
    /// will be submitted.
    async fn finish(&self) -> Result<()> {
        Ok(())
    }

    /// Whether this stage accepts chunks carrying tagged recoverable faults.
    /// Stages that do not are skipped when such a chunk rides past them.
    fn tolerates_faults(&self) -> bool {
        false
    }
}

// =============================================================================
// Stream helpers
// =============================================================================

/// A one-item result stream
pub fn single(res: Res) -> ResStream {
    Box::pin(stream::once(async move { res }))
}

/// An empty result stream
pub fn none() -> ResStream {
    Box::pin(stream::empty())
}

/// A result stream over already-materialized results
pub fn from_iter<I>(results: I) -> ResStream
where
    I: IntoIterator<Item = Res>,
    I::IntoIter: Send + 'static,
{
    Box::pin(stream::iter(results))
}

// =============================================================================
// Driver
// =============================================================================

/// Feed every chunk from `chunks` through `proc`, draining result streams
/// concurrently.
///
/// On error the driver stops submitting new chunks but drains in-flight work
/// rather than killing it, then reports the first error encountered. The
/// caller still owns the final `finish` call on the processor.
pub async fn process_all<S>(proc: &dyn Processor, chunks: S) -> Result<()>
where
    S: Stream<Item = Result<Chunk>> + Unpin,
{
    let mut chunks = chunks.fuse();
    let mut inflight = FuturesUnordered::new();
    let mut first_err: Option<Error> = None;

    // Watch in-flight drains while submitting, so a fatal result cuts the
    // run short instead of surfacing only after the producer runs dry.
    loop {
        select! {
            next = chunks.next() => match next {
                Some(Ok(chunk)) => {
                    let stream = proc.process(chunk).await;
                    inflight.push(tokio::spawn(drain(stream)));
                }
                Some(Err(e)) => {
                    first_err = Some(e);
                    break;
                }
                None => break,
            },
            done = inflight.select_next_some() => {
                if let Some(e) = settle(done) {
                    first_err = Some(e);
                    break;
                }
            },
        }
    }

    while let Some(done) = inflight.next().await {
        if let Some(e) = settle(done) {
            first_err.get_or_insert(e);
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn settle(done: std::result::Result<Option<Error>, tokio::task::JoinError>) -> Option<Error> {
    match done {
        Ok(first) => first,
        Err(e) => Some(Error::Internal(format!("pipeline task failed: {}", e))),
    }
}

/// Consume a result stream to completion, returning the first error seen
async fn drain(mut stream: ResStream) -> Option<Error> {
    let mut first: Option<Error> = None;
    while let Some(res) = stream.next().await {
        if let Some(e) = res.err {
            first.get_or_insert(e);
        }
    }
    first
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use parking_lot::Mutex;

    /// Collects every chunk it sees, in arrival order
    pub struct Collect {
        pub seen: Mutex<Vec<Chunk>>,
    }

    impl Collect {
        pub fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn nums(&self) -> Vec<u64> {
            self.seen.lock().iter().map(|c| c.num()).collect()
        }
    }

    #[async_trait]
    impl Processor for Collect {
        async fn process(&self, chunk: Chunk) -> ResStream {
            self.seen.lock().push(chunk.clone());
            single(Res::ok(chunk))
        }
    }

    /// Fails every chunk with the supplied error constructor
    pub struct FailWith(pub fn() -> Error);

    #[async_trait]
    impl Processor for FailWith {
        async fn process(&self, chunk: Chunk) -> ResStream {
            single(Res::err(chunk, (self.0)()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every chunk, counting how many were ever submitted
    struct FailCounting {
        submitted: AtomicUsize,
    }

    #[async_trait]
    impl Processor for FailCounting {
        async fn process(&self, chunk: Chunk) -> ResStream {
            self.submitted.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            single(Res::err(chunk, Error::Split("unreadable".into())))
        }
    }

    #[tokio::test]
    async fn test_process_all_reports_first_error() {
        let collect = Arc::new(testutil::Collect::new());
        let chunks = vec![
            Ok(Chunk::new(0, Bytes::from_static(b"a"))),
            Err(Error::Split("boom".into())),
            Ok(Chunk::new(1, Bytes::from_static(b"b"))),
        ];
        let result = process_all(collect.as_ref(), stream::iter(chunks)).await;
        assert!(matches!(result, Err(Error::Split(_))));
        // submission stopped at the error
        assert_eq!(collect.nums(), vec![0]);
    }

    #[tokio::test]
    async fn test_fatal_result_stops_submission() {
        let failer = Arc::new(FailCounting {
            submitted: AtomicUsize::new(0),
        });
        let chunks: Vec<_> = (0..1000u64)
            .map(|n| Ok(Chunk::new(n, Bytes::from_static(b"x"))))
            .collect();

        let result = process_all(failer.as_ref(), stream::iter(chunks)).await;
        assert!(matches!(result, Err(Error::Split(_))));
        // the first chunk already failed; the stream must not be pushed
        // through to the end
        assert!(failer.submitted.load(Ordering::SeqCst) < 1000);
    }

    #[tokio::test]
    async fn test_process_all_drains_everything() {
        let collect = Arc::new(testutil::Collect::new());
        let chunks: Vec<_> = (0..16u64)
            .map(|n| Ok(Chunk::new(n, Bytes::from_static(b"x"))))
            .collect();
        process_all(collect.as_ref(), stream::iter(chunks))
            .await
            .unwrap();
        let mut nums = collect.nums();
        nums.sort_unstable();
        assert_eq!(nums, (0..16u64).collect::<Vec<_>>());
    }
}
