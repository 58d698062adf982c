//! Top-level store and fetch operations
//!
//! Assembles the pipeline stages into the two operations the binary exposes.
//!
//! Storing splits the input on content-defined boundaries, expands each
//! chunk into erasure-coded shards, compresses and digests them, records an
//! index line per shard and uploads every shard to enough backends to meet
//! the copy minimum:
//!
//! ```text
//! split -> parity split -> compress -> checksum -> index -> min-copies put
//! ```
//!
//! Fetching reads the index back, pulls each shard from a surviving owner,
//! verifies and decompresses it, regroups siblings, reconstructs whatever is
//! damaged, and writes the chunks back out in their original order:
//!
//! ```text
//! index scan -> fetch -> [verify -> decompress -> group -> join] -> sort -> write
//! ```

use std::io::{BufRead, Read};
use std::sync::Arc;

use futures::channel::mpsc;
use futures::SinkExt;
use tokio::io::AsyncWrite;
use tracing::info;

use crate::checksum::{ChecksumProc, ChecksumVerify};
use crate::chunk::Chunk;
use crate::compress::{CompressProc, CompressionAlgorithm, DecompressProc};
use crate::config::ConcurrencyConfig;
use crate::error::{Error, Result};
use crate::index::{IndexProc, IndexScanner};
use crate::parity::{Parity, ParityJoin, ParitySplit};
use crate::pipeline::{
    process_all, Backlog, Chain, Concur, GroupProc, MutexProc, Pool, Processor, SortProc, WriterTo,
};
use crate::split::{SplitBounds, Splitter};
use crate::stores::{Copier, CopiesReg, MinCopies, MultiReader, QuotaMan};

// =============================================================================
// Options
// =============================================================================

/// Everything both operations need besides their endpoints
#[derive(Clone)]
pub struct StreamOpts {
    pub parity: Parity,
    pub compression: CompressionAlgorithm,
    pub min_copies: usize,
    pub concurrency: ConcurrencyConfig,
}

// =============================================================================
// Store
// =============================================================================

/// Split, encode and distribute one input stream, writing its index
///
/// Returns the index writer once every shard has been placed and the index
/// flushed.
pub async fn store_stream<R, W>(
    input: R,
    index_out: W,
    bounds: SplitBounds,
    copiers: Vec<Copier>,
    reg: Arc<CopiesReg>,
    quota: Arc<QuotaMan>,
    opts: &StreamOpts,
) -> Result<W>
where
    R: Read + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let index = Arc::new(IndexProc::new(index_out));
    let placement = MinCopies::new(opts.min_copies, copiers, reg, quota);

    let pipeline = Backlog::new(
        opts.concurrency.backlog,
        Arc::new(Chain::new(vec![
            Arc::new(ParitySplit::new(opts.parity.clone())),
            Arc::new(CompressProc::new(opts.compression)),
            Arc::new(ChecksumProc),
            index.clone(),
            Arc::new(Concur::new(
                opts.concurrency.store_slots,
                Arc::new(placement),
            )),
        ])),
    );

    let chunks = spawn_producer(move |tx| {
        let splitter = Splitter::new(input, bounds)?;
        feed(splitter, tx);
        Ok(())
    });

    process_all(&pipeline, chunks).await?;
    pipeline.finish().await?;
    drop(pipeline);

    info!("stream stored");
    let index = Arc::try_unwrap(index)
        .map_err(|_| Error::Internal("index stage still referenced after finish".into()))?;
    Ok(index.into_inner())
}

// =============================================================================
// Fetch
// =============================================================================

/// Reassemble one stream from its index, writing the original bytes
///
/// Returns the output writer and the number of shard groups that needed
/// erasure reconstruction.
pub async fn fetch_stream<R, W>(
    index_in: R,
    output: W,
    copiers: Vec<Copier>,
    reg: Arc<CopiesReg>,
    opts: &StreamOpts,
) -> Result<(W, u64)>
where
    R: BufRead + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let join = Arc::new(ParityJoin::new(opts.parity.clone()));
    let sink = Arc::new(WriterTo::new(output));

    let pipeline = Backlog::new(
        opts.concurrency.backlog,
        Arc::new(Chain::new(vec![
            Arc::new(MultiReader::new(copiers, reg)),
            Arc::new(Pool::new(
                opts.concurrency.pool,
                Arc::new(Chain::new(vec![
                    Arc::new(ChecksumVerify),
                    Arc::new(DecompressProc::new(opts.compression)),
                    Arc::new(GroupProc::new(opts.parity.nshards())),
                    join.clone(),
                ])),
            )),
            Arc::new(MutexProc::new(Arc::new(Chain::new(vec![
                Arc::new(SortProc::new()),
                sink.clone(),
            ])))),
        ])),
    );

    let chunks = spawn_producer(move |tx| {
        feed(IndexScanner::new(index_in), tx);
        Ok(())
    });

    process_all(&pipeline, chunks).await?;
    pipeline.finish().await?;
    drop(pipeline);

    let reconstructed = join.reconstructions();
    if reconstructed > 0 {
        info!(groups = reconstructed, "stream fetched with reconstruction");
    } else {
        info!("stream fetched");
    }

    let sink = Arc::try_unwrap(sink)
        .map_err(|_| Error::Internal("output stage still referenced after finish".into()))?;
    Ok((sink.into_inner(), reconstructed))
}

// =============================================================================
// Producers
// =============================================================================

type ChunkSender = mpsc::Sender<Result<Chunk>>;

/// Run a blocking chunk producer on its own thread, bridged through a
/// bounded channel so it cannot outrun pipeline admission.
fn spawn_producer<F>(producer: F) -> mpsc::Receiver<Result<Chunk>>
where
    F: FnOnce(&mut ChunkSender) -> Result<()> + Send + 'static,
{
    let (mut tx, rx) = mpsc::channel(1);
    std::thread::spawn(move || {
        if let Err(e) = producer(&mut tx) {
            let _ = futures::executor::block_on(tx.send(Err(e)));
        }
    });
    rx
}

fn feed<I>(chunks: I, tx: &mut ChunkSender)
where
    I: Iterator<Item = Result<Chunk>>,
{
    for chunk in chunks {
        // A closed channel means the consumer gave up; stop producing.
        if futures::executor::block_on(tx.send(chunk)).is_err() {
            return;
        }
    }
}
