//! Sequence restoration and the ordered sink
//!
//! Concurrency upstream hands chunks over in completion order. [`SortProc`]
//! buffers out-of-order arrivals and releases the longest contiguous run
//! starting at the next expected sequence number; [`WriterTo`] then appends
//! each released payload to the output writer. Both sit behind a
//! serialization boundary, so neither needs to defend against interleaved
//! result streams.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::chunk::{Chunk, Res};
use crate::error::{Error, Result};

use super::{from_iter, none, single, Processor, ResStream};

// =============================================================================
// Sequence buffer
// =============================================================================

/// Reorders an unordered series of sequence numbers into contiguous runs
struct SeriesBuffer {
    next: u64,
    pending: BTreeMap<u64, Chunk>,
}

impl SeriesBuffer {
    fn new() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Add one chunk; returns the run of chunks now ready in sequence order
    fn add(&mut self, chunk: Chunk) -> Vec<Chunk> {
        self.pending.insert(chunk.num(), chunk);
        let mut ready = Vec::new();
        while let Some(chunk) = self.pending.remove(&self.next) {
            ready.push(chunk);
            self.next += 1;
        }
        ready
    }

    fn is_drained(&self) -> bool {
        self.pending.is_empty()
    }
}

// =============================================================================
// Sort stage
// =============================================================================

/// Restores original sequence order
pub struct SortProc {
    buffer: Mutex<SeriesBuffer>,
}

impl SortProc {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(SeriesBuffer::new()),
        }
    }
}

impl Default for SortProc {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for SortProc {
    async fn process(&self, chunk: Chunk) -> ResStream {
        let ready = self.buffer.lock().add(chunk);
        if ready.is_empty() {
            return none();
        }
        from_iter(ready.into_iter().map(Res::ok))
    }

    async fn finish(&self) -> Result<()> {
        if !self.buffer.lock().is_drained() {
            return Err(Error::ShortStream);
        }
        Ok(())
    }
}

// =============================================================================
// Ordered sink
// =============================================================================

/// Appends each chunk's payload to the output writer, in arrival order
pub struct WriterTo<W> {
    out: tokio::sync::Mutex<W>,
}

impl<W> WriterTo<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(out: W) -> Self {
        Self {
            out: tokio::sync::Mutex::new(out),
        }
    }

    /// Consume the sink, returning the writer
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W> Processor for WriterTo<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn process(&self, chunk: Chunk) -> ResStream {
        let mut out = self.out.lock().await;
        if let Err(e) = out.write_all(chunk.data()).await {
            drop(out);
            return single(Res::err(chunk, e.into()));
        }
        drop(out);
        single(Res::ok(chunk))
    }

    async fn finish(&self) -> Result<()> {
        self.out.lock().await.flush().await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;
    use std::io::Cursor;

    async fn run(proc: &dyn Processor, chunk: Chunk) -> Vec<Res> {
        proc.process(chunk).await.collect::<Vec<_>>().await
    }

    #[test]
    fn test_series_buffer_releases_runs() {
        let mut buf = SeriesBuffer::new();
        assert!(buf.add(Chunk::new(2, Bytes::new())).is_empty());
        assert!(buf.add(Chunk::new(1, Bytes::new())).is_empty());

        let run = buf.add(Chunk::new(0, Bytes::new()));
        assert_eq!(run.iter().map(|c| c.num()).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(buf.is_drained());
    }

    #[tokio::test]
    async fn test_sort_restores_order() {
        let sort = SortProc::new();

        assert!(run(&sort, Chunk::new(1, Bytes::from_static(b"b"))).await.is_empty());
        let out = run(&sort, Chunk::new(0, Bytes::from_static(b"a"))).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk.num(), 0);
        assert_eq!(out[1].chunk.num(), 1);
        assert!(sort.finish().await.is_ok());
    }

    #[tokio::test]
    async fn test_sequence_gap_detected_at_finish() {
        let sort = SortProc::new();
        let _ = run(&sort, Chunk::new(0, Bytes::new())).await;
        let _ = run(&sort, Chunk::new(2, Bytes::new())).await;
        assert!(matches!(sort.finish().await, Err(Error::ShortStream)));
    }

    #[tokio::test]
    async fn test_writer_appends_in_arrival_order() {
        let sink = WriterTo::new(Cursor::new(Vec::new()));
        let _ = run(&sink, Chunk::new(0, Bytes::from_static(b"hello "))).await;
        let _ = run(&sink, Chunk::new(1, Bytes::from_static(b"world"))).await;
        sink.finish().await.unwrap();
        assert_eq!(sink.into_inner().into_inner(), b"hello world");
    }
}
