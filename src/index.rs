//! Stream index
//!
//! The index is the small text artifact a write produces and a read starts
//! from: one line per stored shard, in shard sequence order, holding the
//! shard's stored digest and the pre-split size of the chunk it belongs to.
//!
//! ```text
//! <hex digest> <decimal size>\n
//! ```
//!
//! [`IndexProc`] emits lines in sequence order even though shards complete
//! out of order, buffering early arrivals until the run before them is
//! written. [`IndexScanner`] is the read-path producer: it turns each line
//! back into a data-less chunk carrying the digest to fetch and the size to
//! trim to.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::BufRead;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::checksum::Digest;
use crate::chunk::{Chunk, Res};
use crate::error::{Error, Result};
use crate::pipeline::{single, Processor, ResStream};

// =============================================================================
// Index writer stage
// =============================================================================

struct Line {
    hash: Digest,
    target_size: usize,
}

struct IndexState {
    next: u64,
    pending: BTreeMap<u64, Line>,
}

impl IndexState {
    /// Add one line; returns the run of lines now ready in sequence order
    fn add(&mut self, num: u64, line: Line) -> Vec<Line> {
        self.pending.insert(num, line);
        let mut ready = Vec::new();
        while let Some(line) = self.pending.remove(&self.next) {
            ready.push(line);
            self.next += 1;
        }
        ready
    }
}

/// Records each shard's digest and size as an ordered index line, passing
/// the shard itself through unchanged
pub struct IndexProc<W> {
    out: tokio::sync::Mutex<W>,
    state: parking_lot::Mutex<IndexState>,
}

impl<W> IndexProc<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(out: W) -> Self {
        Self {
            out: tokio::sync::Mutex::new(out),
            state: parking_lot::Mutex::new(IndexState {
                next: 0,
                pending: BTreeMap::new(),
            }),
        }
    }

    /// Consume the stage, returning the index writer
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W> Processor for IndexProc<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn process(&self, chunk: Chunk) -> ResStream {
        let hash = match chunk.hash() {
            Some(hash) => hash,
            None => {
                let err = Error::Internal("chunk without digest at index stage".into());
                return single(Res::err(chunk, err));
            }
        };
        let target_size = match chunk.target_size() {
            Some(size) => size,
            None => {
                let err = Error::Internal("chunk without target size at index stage".into());
                return single(Res::err(chunk, err));
            }
        };

        // Writer lock first: extraction and writing of a ready run must not
        // interleave with another shard's, or lines would reorder.
        let mut out = self.out.lock().await;
        let ready = self.state.lock().add(chunk.num(), Line { hash, target_size });
        for line in ready {
            let text = format!("{} {}\n", line.hash, line.target_size);
            if let Err(e) = out.write_all(text.as_bytes()).await {
                drop(out);
                return single(Res::err(chunk, e.into()));
            }
        }
        drop(out);
        single(Res::ok(chunk))
    }

    async fn finish(&self) -> Result<()> {
        self.out.lock().await.flush().await?;
        if !self.state.lock().pending.is_empty() {
            return Err(Error::ShortStream);
        }
        Ok(())
    }
}

// =============================================================================
// Index scanner
// =============================================================================

/// Iterates the chunks described by an index, in sequence order
pub struct IndexScanner<R> {
    input: std::io::Lines<R>,
    num: u64,
}

impl<R: BufRead> IndexScanner<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: input.lines(),
            num: 0,
        }
    }

    fn parse(&self, line: &str) -> Result<Chunk> {
        let mut fields = line.split_whitespace();
        let hash = fields
            .next()
            .ok_or_else(|| Error::Config(format!("index line {}: missing digest", self.num)))?;
        let size = fields
            .next()
            .ok_or_else(|| Error::Config(format!("index line {}: missing size", self.num)))?;
        if fields.next().is_some() {
            return Err(Error::Config(format!(
                "index line {}: trailing fields",
                self.num
            )));
        }

        let hash = Digest::from_hex(hash)?;
        let size: usize = size
            .parse()
            .map_err(|e| Error::Config(format!("index line {}: bad size: {}", self.num, e)))?;

        Ok(Chunk::new(self.num, Bytes::new())
            .with_hash(hash)
            .with_target_size(size))
    }
}

impl<R: BufRead> Iterator for IndexScanner<R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.input.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            if line.trim().is_empty() {
                continue;
            }
            let chunk = self.parse(line.trim());
            if chunk.is_ok() {
                self.num += 1;
            }
            return Some(chunk);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Cursor;

    fn shard(num: u64, data: &'static [u8], target_size: usize) -> Chunk {
        Chunk::new(num, Bytes::from_static(data))
            .with_hash(Digest::sum(data))
            .with_target_size(target_size)
    }

    async fn run<W>(proc: &IndexProc<W>, chunk: Chunk) -> Res
    where
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let mut out: Vec<Res> = proc.process(chunk).await.collect().await;
        assert_eq!(out.len(), 1);
        out.remove(0)
    }

    #[tokio::test]
    async fn test_lines_come_out_in_sequence_order() {
        let index = IndexProc::new(Cursor::new(Vec::new()));

        // arrival order 1, 2, 0
        assert!(run(&index, shard(1, b"b", 9)).await.err.is_none());
        assert!(run(&index, shard(2, b"c", 9)).await.err.is_none());
        assert!(run(&index, shard(0, b"a", 9)).await.err.is_none());
        index.finish().await.unwrap();

        let text = String::from_utf8(index.into_inner().into_inner()).unwrap();
        let expected = format!(
            "{} 9\n{} 9\n{} 9\n",
            Digest::sum(b"a"),
            Digest::sum(b"b"),
            Digest::sum(b"c"),
        );
        assert_eq!(text, expected);
    }

    #[tokio::test]
    async fn test_gap_detected_at_finish() {
        let index = IndexProc::new(Cursor::new(Vec::new()));
        let _ = run(&index, shard(1, b"b", 4)).await;
        assert!(matches!(index.finish().await, Err(Error::ShortStream)));
    }

    #[tokio::test]
    async fn test_chunk_passes_through_unchanged() {
        let index = IndexProc::new(Cursor::new(Vec::new()));
        let res = run(&index, shard(0, b"payload", 7)).await;
        assert_eq!(res.chunk.data().as_ref(), b"payload");
        assert_eq!(res.chunk.hash(), Some(Digest::sum(b"payload")));
    }

    #[test]
    fn test_scanner_roundtrip() {
        let text = format!("{} 123\n{} 456\n", Digest::sum(b"x"), Digest::sum(b"y"));
        let chunks: Vec<Chunk> = IndexScanner::new(Cursor::new(text))
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].num(), 0);
        assert_eq!(chunks[0].hash(), Some(Digest::sum(b"x")));
        assert_eq!(chunks[0].target_size(), Some(123));
        assert_eq!(chunks[1].num(), 1);
        assert_eq!(chunks[1].target_size(), Some(456));
    }

    #[test]
    fn test_scanner_rejects_malformed_lines() {
        assert!(IndexScanner::new(Cursor::new("nothex 12\n"))
            .next()
            .unwrap()
            .is_err());
        assert!(
            IndexScanner::new(Cursor::new(format!("{}\n", Digest::sum(b"x"))))
                .next()
                .unwrap()
                .is_err()
        );
        assert!(
            IndexScanner::new(Cursor::new(format!("{} notasize\n", Digest::sum(b"x"))))
                .next()
                .unwrap()
                .is_err()
        );
    }

    #[test]
    fn test_scanner_skips_blank_lines() {
        let text = format!("\n{} 5\n\n", Digest::sum(b"z"));
        let chunks: Vec<Chunk> = IndexScanner::new(Cursor::new(text))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(chunks.len(), 1);
    }
}
