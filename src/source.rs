//! Batches of canonical blocks served from a node.

use crate::error::Result;
use crate::filter::ItemFilter;
use crate::mapping::map_block;
use crate::model::{Block, MappingRequest};
use crate::relations::wire;
use crate::rpc::{RawBlock, Rpc};
use std::ops::RangeInclusive;
use tracing::debug;

/// Blocks of one fetch, ready for the consumer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockBatch {
    pub blocks: Vec<Block>,
    /// The last block of the batch is the chain head as seen by the node.
    pub is_head: bool,
}

/// Serves filtered, wired blocks out of an [`Rpc`] engine.
#[derive(Clone)]
pub struct RpcDataSource {
    rpc: Rpc,
}

impl RpcDataSource {
    pub fn new(rpc: Rpc) -> Self {
        Self { rpc }
    }

    pub fn rpc(&self) -> &Rpc {
        &self.rpc
    }

    pub async fn get_finalized_height(&self) -> Result<u64> {
        self.rpc.get_height().await
    }

    /// Finalized blocks at `heights`, in the given order.
    pub async fn finalized_batch(
        &self,
        heights: &[u64],
        request: &MappingRequest,
    ) -> Result<BlockBatch> {
        let raw = self.rpc.get_cold_split(heights, request).await?;
        let blocks = self.process(&raw, request)?;
        Ok(BlockBatch {
            blocks,
            is_head: false,
        })
    }

    /// The consistent, hash-linked prefix of `range`. May be shorter than the range
    /// (or empty) when the node is behind or a reorg is in progress.
    pub async fn hot_batch(
        &self,
        range: RangeInclusive<u64>,
        finalized_height: u64,
        request: &MappingRequest,
    ) -> Result<BlockBatch> {
        let raw = self
            .rpc
            .get_hot_split(range, request, finalized_height)
            .await?;
        let blocks = self.process(&raw, request)?;
        let is_head = match blocks.last() {
            Some(last) => last.header.height >= self.rpc.get_height().await?,
            None => false,
        };
        debug!(blocks = blocks.len(), is_head, "hot batch");
        Ok(BlockBatch { blocks, is_head })
    }

    fn process(&self, raw: &[RawBlock], request: &MappingRequest) -> Result<Vec<Block>> {
        let filter = ItemFilter::new(&request.data_request);
        raw.iter()
            .map(|raw| {
                let mut block = map_block(raw, request)?;
                wire(&mut block);
                filter.apply(&mut block);
                Ok(block)
            })
            .collect()
    }
}
