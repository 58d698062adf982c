//! Read-path failover
//!
//! Fetches each shard from one of its registered owners, trying them in
//! random order. A failed attempt demotes that owner in the registry and
//! moves on to the next; only when every owner has failed does the shard
//! come back as missing, which the erasure join downstream can still absorb.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::chunk::{Chunk, Res};
use crate::error::Error;
use crate::pipeline::{single, Processor, ResStream};

use super::{shuffle_copiers, Copier, CopiesReg};

/// Owner-cascading fetch stage
pub struct MultiReader {
    copiers: Vec<Copier>,
    reg: Arc<CopiesReg>,
}

impl MultiReader {
    pub fn new(copiers: Vec<Copier>, reg: Arc<CopiesReg>) -> Self {
        Self { copiers, reg }
    }
}

#[async_trait]
impl Processor for MultiReader {
    async fn process(&self, chunk: Chunk) -> ResStream {
        let Some(hash) = chunk.hash() else {
            let err = Error::Internal("chunk without digest at fetch stage".into());
            return single(Res::err(chunk, err));
        };

        let owners = self.reg.owners(&hash);
        for copier in shuffle_copiers(&self.copiers) {
            if !owners.contains(copier.id()) {
                continue;
            }
            match copier.store().get(&hash).await {
                Ok(data) => return single(Res::ok(chunk.with_data(data))),
                Err(e) => {
                    warn!(
                        copier = copier.id(),
                        shard = %hash,
                        error = %e,
                        "fetch failed, demoting owner"
                    );
                    self.reg.remove_owner(&hash, copier.id());
                }
            }
        }

        let err = Error::MissingData(format!("no readers available for {}", hash));
        single(Res::err(chunk, err))
    }
}
