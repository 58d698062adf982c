//! Stage composition
//!
//! Feeds each result of stage *i* into stage *i+1*. A result carrying a
//! recoverable error is not dropped: it is converted into a tagged fault on
//! the chunk and skips forward to the next fault-tolerant stage (the group
//! stage, on the read path). If no later stage tolerates faults, or the
//! error is not recoverable, the error surfaces and that item's path ends;
//! other in-flight items are unaffected.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;

use crate::chunk::{Chunk, Res, ShardFault};
use crate::error::Result;

use super::{single, Processor, ResStream};

/// A linear chain of processors
pub struct Chain {
    stages: Arc<Vec<Arc<dyn Processor>>>,
}

impl Chain {
    pub fn new(stages: Vec<Arc<dyn Processor>>) -> Self {
        Self {
            stages: Arc::new(stages),
        }
    }
}

#[async_trait]
impl Processor for Chain {
    async fn process(&self, chunk: Chunk) -> ResStream {
        // A chunk already carrying a fault goes straight to the first stage
        // that can consume it.
        if chunk.fault().is_some() {
            let idx = match self.stages.iter().position(|s| s.tolerates_faults()) {
                Some(idx) => idx,
                None => {
                    let fault = chunk.fault().cloned().unwrap_or(ShardFault::Missing(
                        "fault lost in transit".into(),
                    ));
                    return single(Res::err(chunk, fault.into_error()));
                }
            };
            return run_stage(self.stages.clone(), idx, chunk);
        }
        feed(self.stages.clone(), 0, Res::ok(chunk))
    }

    async fn finish(&self) -> Result<()> {
        let mut first = None;
        for stage in self.stages.iter() {
            if let Err(e) = stage.finish().await {
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn tolerates_faults(&self) -> bool {
        self.stages.iter().any(|s| s.tolerates_faults())
    }
}

/// Feed one result into the chain starting at stage `idx`
fn feed(stages: Arc<Vec<Arc<dyn Processor>>>, idx: usize, res: Res) -> ResStream {
    if idx >= stages.len() {
        return single(res);
    }
    match res.err {
        None => run_stage(stages, idx, res.chunk),
        Some(err) => {
            let fault = match ShardFault::from_error(&err) {
                Some(fault) => fault,
                // Not recoverable: surface and end this item's path.
                None => return single(Res::err(res.chunk, err)),
            };
            match stages[idx..].iter().position(|s| s.tolerates_faults()) {
                Some(offset) => {
                    let chunk = res.chunk.with_fault(fault);
                    run_stage(stages, idx + offset, chunk)
                }
                None => single(Res::err(res.chunk, err)),
            }
        }
    }
}

/// Run stage `idx` on a chunk and feed its results into the rest of the chain
fn run_stage(stages: Arc<Vec<Arc<dyn Processor>>>, idx: usize, chunk: Chunk) -> ResStream {
    let stage = stages[idx].clone();
    let stream = stream::once(async move { stage.process(chunk).await })
        .flatten()
        .map(move |res| feed(stages.clone(), idx + 1, res))
        .flatten();
    Box::pin(stream)
}

// =============================================================================
// Tests
// =============================================================================
