use super::data::{
    decode, DebugFrameResult, DebugStateDiffResult, GetBlock, RawLog, RawReceipt,
    TraceTransactionReplay,
};
use super::props::RpcProps;
use super::{capture_unfinalized, CallOptions, RpcClient, RpcRequest};
use crate::config::IngestConfig;
use crate::error::{BlockRef, Error, Result};
use crate::model::MappingRequest;
use alloy_primitives::{B256, U64};
use alloy_rpc_types::BlockNumberOrTag;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{debug, warn};

/// A block as fetched from the node, plus whatever enrichment was requested.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    pub height: u64,
    pub hash: B256,
    pub block: GetBlock,
    pub logs: Option<Vec<RawLog>>,
    pub receipts: Option<Vec<RawReceipt>>,
    pub trace_replays: Option<Vec<TraceTransactionReplay>>,
    /// Call trees by transaction position. Holes are transactions the node had no trace for.
    pub debug_frames: Option<Vec<Option<DebugFrameResult>>>,
    pub debug_state_diffs: Option<Vec<Option<DebugStateDiffResult>>>,
    /// Why the enrichment of this block can't be trusted.
    pub invalid: Option<String>,
}

impl RawBlock {
    pub fn new(block: GetBlock) -> Self {
        Self {
            height: block.number,
            hash: block.hash,
            block,
            logs: None,
            receipts: None,
            trace_replays: None,
            debug_frames: None,
            debug_state_diffs: None,
            invalid: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.invalid.is_none()
    }

    pub fn block_ref(&self) -> BlockRef {
        BlockRef::Both {
            height: self.height,
            hash: self.hash,
        }
    }

    pub(crate) fn apply(&mut self, patch: BlockPatch) {
        extend(&mut self.logs, patch.logs);
        extend(&mut self.receipts, patch.receipts);
        extend(&mut self.trace_replays, patch.trace_replays);
        extend(&mut self.debug_frames, patch.debug_frames);
        extend(&mut self.debug_state_diffs, patch.debug_state_diffs);
        if self.invalid.is_none() {
            self.invalid = patch.invalid;
        }
    }
}

/// Result of one enrichment sub-task for one block. Sub-tasks run concurrently
/// against a shared view of the batch; patches are applied after they all finish.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct BlockPatch {
    pub logs: Option<Vec<RawLog>>,
    pub receipts: Option<Vec<RawReceipt>>,
    pub trace_replays: Option<Vec<TraceTransactionReplay>>,
    pub debug_frames: Option<Vec<Option<DebugFrameResult>>>,
    pub debug_state_diffs: Option<Vec<Option<DebugStateDiffResult>>>,
    pub invalid: Option<String>,
}

impl BlockPatch {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            invalid: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn merge(&mut self, other: BlockPatch) {
        extend(&mut self.logs, other.logs);
        extend(&mut self.receipts, other.receipts);
        extend(&mut self.trace_replays, other.trace_replays);
        extend(&mut self.debug_frames, other.debug_frames);
        extend(&mut self.debug_state_diffs, other.debug_state_diffs);
        if self.invalid.is_none() {
            self.invalid = other.invalid;
        }
    }
}

fn extend<T>(target: &mut Option<Vec<T>>, items: Option<Vec<T>>) {
    match (target.as_mut(), items) {
        (Some(existing), Some(items)) => existing.extend(items),
        (None, Some(items)) => *target = Some(items),
        (_, None) => {}
    }
}

/// Merge per-sub-task patch sets into one patch per block.
pub(crate) fn merge_patches(
    len: usize,
    sets: impl IntoIterator<Item = Option<Vec<BlockPatch>>>,
) -> Vec<BlockPatch> {
    let mut merged = vec![BlockPatch::default(); len];
    for set in sets.into_iter().flatten() {
        for (target, patch) in merged.iter_mut().zip(set) {
            target.merge(patch);
        }
    }
    merged
}

/// RPC ingestion and consistency engine for one endpoint.
#[derive(Clone)]
pub struct Rpc {
    pub(crate) client: Arc<dyn RpcClient>,
    pub(crate) config: Arc<IngestConfig>,
    pub(crate) props: Arc<RpcProps>,
    priority: u32,
}

impl Rpc {
    pub fn new(client: Arc<dyn RpcClient>, config: IngestConfig) -> Self {
        let flags = &config.validation;
        if flags.disable_logs_bloom_check {
            warn!(url = client.url(), "Log bloom check is disabled");
        }
        if flags.disable_missing_traces_check {
            warn!(url = client.url(), "Missing traces check is disabled");
        }
        if flags.disable_tx_receipts_number_check {
            warn!(url = client.url(), "Tx receipt number check is disabled");
        }
        if flags.disable_tx_receipt_block_hash_check {
            warn!(url = client.url(), "Tx receipt block hash check is disabled");
        }
        if flags.disable_trace_block_hash_check {
            warn!(url = client.url(), "trace_block block hash check is disabled");
        }
        let props = Arc::new(RpcProps::new(client.clone(), config.genesis_height));
        Self {
            client,
            priority: config.priority,
            config: Arc::new(config),
            props,
        }
    }

    /// Same endpoint and capability memos, different priority hint.
    pub fn with_priority(&self, priority: u32) -> Self {
        Self {
            priority,
            ..self.clone()
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn props(&self) -> &RpcProps {
        &self.props
    }

    pub(crate) fn options(&self) -> CallOptions {
        CallOptions::with_priority(self.priority)
    }

    pub(crate) async fn call<T: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: Value,
        options: CallOptions,
    ) -> Result<T> {
        let value = self.client.call(method, params, options).await?;
        decode(method, value)
    }

    pub(crate) async fn batch_call_raw(
        &self,
        requests: Vec<RpcRequest>,
        options: CallOptions,
    ) -> Result<Vec<Value>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let expected = requests.len();
        let method = requests[0].method.clone();
        let values = self.client.batch_call(requests, options).await?;
        if values.len() != expected {
            return Err(Error::DataValidation {
                method,
                message: format!("expected {expected} batch results, got {}", values.len()),
            });
        }
        Ok(values)
    }

    pub(crate) async fn batch_call<T: DeserializeOwned + Send>(
        &self,
        requests: Vec<RpcRequest>,
        options: CallOptions,
    ) -> Result<Vec<T>> {
        let methods: Vec<String> = requests.iter().map(|r| r.method.clone()).collect();
        let values = self.batch_call_raw(requests, options).await?;
        values
            .into_iter()
            .zip(methods)
            .map(|(value, method)| decode(&method, value))
            .collect()
    }

    pub async fn get_height(&self) -> Result<u64> {
        let height: U64 = self.call("eth_blockNumber", json!([]), self.options()).await?;
        Ok(height.to::<u64>())
    }

    pub async fn get_block_by_number(
        &self,
        height: u64,
        with_transactions: bool,
    ) -> Result<Option<GetBlock>> {
        self.call(
            "eth_getBlockByNumber",
            json!([BlockNumberOrTag::Number(height), with_transactions]),
            self.options(),
        )
        .await
    }

    pub async fn get_block_by_hash(
        &self,
        hash: B256,
        with_transactions: bool,
    ) -> Result<Option<GetBlock>> {
        self.call(
            "eth_getBlockByHash",
            json!([hash, with_transactions]),
            self.options(),
        )
        .await
    }

    pub async fn get_block_hash(&self, height: u64) -> Result<Option<B256>> {
        let block = self.get_block_by_number(height, false).await?;
        Ok(block.map(|b| b.hash))
    }

    /// Fetch and enrich a single finalized block by hash.
    pub async fn get_cold_block(
        &self,
        hash: B256,
        req: Option<&MappingRequest>,
        finalized_height: Option<u64>,
    ) -> Result<RawBlock> {
        let with_transactions = req.is_some_and(|r| r.transactions);
        let block = self
            .get_block_by_hash(hash, with_transactions)
            .await?
            .ok_or_else(|| Error::consistency(BlockRef::Hash(hash), "block not found"))?;
        let mut blocks = vec![RawBlock::new(block)];
        if let Some(req) = req {
            self.add_requested_data(&mut blocks, req, finalized_height)
                .await?;
        }
        let block = blocks.remove(0);
        match &block.invalid {
            Some(reason) => Err(Error::consistency(block.block_ref(), reason.clone())),
            None => Ok(block),
        }
    }

    /// Fetch and enrich finalized blocks. Output preserves the order of `heights`.
    pub async fn get_cold_split(
        &self,
        heights: &[u64],
        req: &MappingRequest,
    ) -> Result<Vec<RawBlock>> {
        let blocks = self.get_cold_block_batch(heights, req.transactions).await?;
        self.add_cold_requested_data(blocks, req).await
    }

    /// Batch fetch finalized blocks, re-requesting heights the node returned `null` for.
    pub async fn get_cold_block_batch(
        &self,
        heights: &[u64],
        with_transactions: bool,
    ) -> Result<Vec<RawBlock>> {
        let mut result = self.get_block_batch(heights, with_transactions).await?;
        let mut depth = 1;
        loop {
            let missing: Vec<usize> = result
                .iter()
                .enumerate()
                .filter(|(_, block)| block.is_none())
                .map(|(i, _)| i)
                .collect();
            if missing.is_empty() {
                break;
            }
            if depth > self.config.max_retry_depth {
                return Err(Error::consistency(
                    BlockRef::Height(heights[missing[0]]),
                    format!("failed to get finalized block after {depth} attempts"),
                ));
            }
            depth += 1;
            debug!(
                missing = missing.len(),
                first = heights[missing[0]],
                depth,
                "re-requesting finalized blocks"
            );
            let retry: Vec<u64> = missing.iter().map(|&i| heights[i]).collect();
            let fetched = self.get_block_batch(&retry, with_transactions).await?;
            for (i, block) in missing.into_iter().zip(fetched) {
                result[i] = block;
            }
        }
        Ok(result.into_iter().flatten().collect())
    }

    /// Enrich finalized blocks, re-enriching from scratch the ones found inconsistent.
    pub async fn add_cold_requested_data(
        &self,
        blocks: Vec<RawBlock>,
        req: &MappingRequest,
    ) -> Result<Vec<RawBlock>> {
        let mut result = blocks.clone();
        self.add_requested_data(&mut result, req, None).await?;
        let mut depth = 1;
        loop {
            let invalid: Vec<usize> = result
                .iter()
                .enumerate()
                .filter(|(_, block)| !block.is_valid())
                .map(|(i, _)| i)
                .collect();
            let Some(&first) = invalid.first() else {
                return Ok(result);
            };
            if depth > self.config.max_retry_depth {
                let block = &result[first];
                return Err(Error::consistency(
                    block.block_ref(),
                    block.invalid.clone().unwrap_or_default(),
                ));
            }
            depth += 1;
            debug!(
                invalid = invalid.len(),
                height = result[first].height,
                reason = result[first].invalid.as_deref(),
                depth,
                "re-enriching inconsistent blocks"
            );
            let mut retry: Vec<RawBlock> = invalid.iter().map(|&i| blocks[i].clone()).collect();
            self.add_requested_data(&mut retry, req, None).await?;
            for (i, block) in invalid.into_iter().zip(retry) {
                result[i] = block;
            }
        }
    }

    /// Fetch a head-following window and keep its hash-linked, consistent prefix.
    pub async fn get_hot_split(
        &self,
        range: RangeInclusive<u64>,
        req: &MappingRequest,
        finalized_height: u64,
    ) -> Result<Vec<RawBlock>> {
        let heights: Vec<u64> = range.collect();
        let blocks = self.get_block_batch(&heights, req.transactions).await?;

        let mut chain: Vec<RawBlock> = Vec::with_capacity(blocks.len());
        for block in blocks {
            let Some(block) = block else { break };
            if chain
                .last()
                .is_some_and(|prev| prev.hash != block.block.parent_hash)
            {
                break;
            }
            chain.push(block);
        }

        self.add_requested_data(&mut chain, req, Some(finalized_height))
            .await?;

        if let Some(pos) = chain.iter().position(|block| !block.is_valid()) {
            debug!(
                height = chain[pos].height,
                reason = chain[pos].invalid.as_deref(),
                "trimming hot chain at inconsistent block"
            );
            chain.truncate(pos);
        }
        Ok(chain)
    }

    pub async fn get_block_batch(
        &self,
        heights: &[u64],
        with_transactions: bool,
    ) -> Result<Vec<Option<RawBlock>>> {
        let requests = heights
            .iter()
            .map(|&height| {
                RpcRequest::new(
                    "eth_getBlockByNumber",
                    json!([BlockNumberOrTag::Number(height), with_transactions]),
                )
            })
            .collect();
        let blocks: Vec<Option<GetBlock>> = self
            .batch_call(requests, self.options().classify(capture_unfinalized))
            .await?;
        Ok(blocks.into_iter().map(|b| b.map(RawBlock::new)).collect())
    }

    /// Run the requested enrichment sub-tasks concurrently and apply their results.
    pub async fn add_requested_data(
        &self,
        blocks: &mut [RawBlock],
        req: &MappingRequest,
        finalized_height: Option<u64>,
    ) -> Result<()> {
        if blocks.is_empty() {
            return Ok(());
        }

        let (logs, receipts, traces) = {
            let view: Vec<&RawBlock> = blocks.iter().collect();
            let view = view.as_slice();

            let logs = async {
                if req.logs {
                    self.fetch_logs(view).await.map(Some)
                } else {
                    Ok(None)
                }
            };
            let receipts = async {
                if req.receipts {
                    self.fetch_receipts(view).await.map(Some)
                } else {
                    Ok(None)
                }
            };
            let traces = async {
                if req.traces || req.state_diffs {
                    self.fetch_traces(view, req, finalized_height)
                        .await
                        .map(Some)
                } else {
                    Ok(None)
                }
            };
            futures::try_join!(logs, receipts, traces)?
        };

        let patches = merge_patches(blocks.len(), [logs, receipts, traces]);
        for (block, patch) in blocks.iter_mut().zip(patches) {
            block.apply(patch);
        }
        Ok(())
    }
}
