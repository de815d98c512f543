//! Traces and state diffs: replay, `trace_block` and geth debug tracers.

use super::data::{
    decode, wrap_debug_results, DebugFrameResult, DebugStateDiffResult, TraceFrame,
    TraceTransactionReplay,
};
use super::engine::{merge_patches, BlockPatch, RawBlock, Rpc};
use super::quirks::{ChainQuirk, TraceMethod, TraceStrategy};
use super::{capture_not_found, RpcRequest};
use crate::error::{Error, Result};
use crate::model::MappingRequest;
use alloy_primitives::B256;
use alloy_rpc_types::BlockNumberOrTag;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::warn;

const DEBUG_TRACE_METHOD: &str = "debug_traceBlockByHash";
const REPLAY_METHOD: &str = "trace_replayBlockTransactions";

/// Which outputs a replay call should produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayTracers {
    pub trace: bool,
    pub state_diff: bool,
}

impl ReplayTracers {
    pub fn is_empty(&self) -> bool {
        !self.trace && !self.state_diff
    }

    fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(2);
        if self.trace {
            names.push("trace");
        }
        if self.state_diff {
            names.push("stateDiff");
        }
        names
    }
}

/// Sources chosen for one enrichment round on a standard chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TracePlan {
    pub replay: ReplayTracers,
    pub trace_block: bool,
    pub debug_frames: bool,
    pub debug_state_diffs: bool,
}

impl TracePlan {
    pub fn new(
        req: &MappingRequest,
        prefer_trace_api: bool,
        use_debug_api_for_state_diffs: bool,
        unfinalized: bool,
    ) -> Self {
        let mut plan = TracePlan::default();
        if req.state_diffs {
            if unfinalized || use_debug_api_for_state_diffs {
                plan.debug_state_diffs = true;
            } else {
                plan.replay.state_diff = true;
            }
        }
        if req.traces {
            if !prefer_trace_api {
                plan.debug_frames = true;
            } else if unfinalized || plan.replay.is_empty() {
                plan.trace_block = true;
            } else {
                plan.replay.trace = true;
            }
        }
        plan
    }
}

impl Rpc {
    pub(crate) async fn fetch_traces(
        &self,
        blocks: &[&RawBlock],
        req: &MappingRequest,
        finalized_height: Option<u64>,
    ) -> Result<Vec<BlockPatch>> {
        let genesis = self.props.genesis_hash().await?;
        match TraceStrategy::for_genesis(&genesis) {
            TraceStrategy::Standard => {
                self.fetch_standard_traces(blocks, req, finalized_height.unwrap_or(u64::MAX))
                    .await
            }
            TraceStrategy::Quirk(quirk) => self.fetch_quirk_traces(blocks, req, quirk).await,
        }
    }

    async fn fetch_standard_traces(
        &self,
        blocks: &[&RawBlock],
        req: &MappingRequest,
        finalized_height: u64,
    ) -> Result<Vec<BlockPatch>> {
        let last_height = blocks.iter().map(|b| b.height).max().unwrap_or(0);
        let plan = TracePlan::new(
            req,
            self.config.prefer_trace_api,
            self.config.use_debug_api_for_state_diffs,
            finalized_height < last_height,
        );

        let state_diffs = async {
            if plan.debug_state_diffs {
                self.fetch_debug_state_diffs(blocks).await.map(Some)
            } else {
                Ok(None)
            }
        };
        let trace_block = async {
            if plan.trace_block {
                self.fetch_trace_block_traces(blocks).await.map(Some)
            } else {
                Ok(None)
            }
        };
        let debug_frames = async {
            if plan.debug_frames {
                self.fetch_debug_frames(blocks).await.map(Some)
            } else {
                Ok(None)
            }
        };
        let replays = async {
            if plan.replay.is_empty() {
                Ok(None)
            } else {
                self.fetch_trace_replays(blocks, plan.replay, REPLAY_METHOD)
                    .await
                    .map(Some)
            }
        };
        let (a, b, c, d) = futures::try_join!(state_diffs, trace_block, debug_frames, replays)?;
        Ok(merge_patches(blocks.len(), [a, b, c, d]))
    }

    async fn fetch_quirk_traces(
        &self,
        blocks: &[&RawBlock],
        req: &MappingRequest,
        quirk: &'static ChainQuirk,
    ) -> Result<Vec<BlockPatch>> {
        if req.state_diffs && !quirk.state_diffs_supported {
            return Err(Error::Unsupported(format!(
                "state diffs are not supported on {}",
                quirk.name
            )));
        }
        let mut patches = vec![BlockPatch::default(); blocks.len()];
        if !req.traces {
            return Ok(patches);
        }

        let mut replay = Vec::new();
        let mut debug = Vec::new();
        for (pos, block) in blocks.iter().enumerate() {
            match quirk.trace_method(block.height) {
                TraceMethod::Replay(_) => replay.push(pos),
                TraceMethod::DebugCallTracer => debug.push(pos),
                TraceMethod::Unavailable => {}
            }
        }
        let replay_blocks: Vec<&RawBlock> = replay.iter().map(|&i| blocks[i]).collect();
        let debug_blocks: Vec<&RawBlock> = debug.iter().map(|&i| blocks[i]).collect();

        let tracers = ReplayTracers {
            trace: true,
            state_diff: false,
        };
        let (replayed, traced) = futures::try_join!(
            self.fetch_trace_replays(&replay_blocks, tracers, quirk.legacy_trace_method),
            self.fetch_debug_frames(&debug_blocks)
        )?;
        for (pos, patch) in replay.into_iter().zip(replayed) {
            patches[pos].merge(patch);
        }
        for (pos, patch) in debug.into_iter().zip(traced) {
            patches[pos].merge(patch);
        }
        Ok(patches)
    }

    pub(crate) async fn fetch_trace_replays(
        &self,
        blocks: &[&RawBlock],
        tracers: ReplayTracers,
        method: &str,
    ) -> Result<Vec<BlockPatch>> {
        if blocks.is_empty() || tracers.is_empty() {
            return Ok(vec![BlockPatch::default(); blocks.len()]);
        }
        let names = tracers.names();
        let requests = blocks
            .iter()
            .map(|block| {
                RpcRequest::new(method, json!([BlockNumberOrTag::Number(block.height), names]))
            })
            .collect();
        let results: Vec<Vec<TraceTransactionReplay>> =
            self.batch_call(requests, self.options()).await?;

        let mut patches = Vec::with_capacity(blocks.len());
        for (block, mut replays) in blocks.iter().zip(results) {
            let txs: HashSet<B256> = block.block.transactions.hashes().into_iter().collect();
            let mut patch = BlockPatch::default();
            for replay in replays.iter_mut() {
                let tx_hash = match replay.transaction_hash {
                    Some(hash) => hash,
                    None => {
                        let hash = replay_transaction_hash(method, replay)?;
                        replay.transaction_hash = Some(hash);
                        hash
                    }
                };
                if !txs.contains(&tx_hash) && patch.invalid.is_none() {
                    patch.invalid = Some(format!("{method} returned a trace of a different block"));
                }
            }
            patch.trace_replays = Some(replays);
            patches.push(patch);
        }
        Ok(patches)
    }

    pub(crate) async fn fetch_trace_block_traces(
        &self,
        blocks: &[&RawBlock],
    ) -> Result<Vec<BlockPatch>> {
        let requests = blocks
            .iter()
            .map(|block| RpcRequest::new("trace_block", json!([BlockNumberOrTag::Number(block.height)])))
            .collect();
        let results: Vec<Vec<TraceFrame>> = self.batch_call(requests, self.options()).await?;

        let flags = &self.config.validation;
        Ok(blocks
            .iter()
            .zip(results)
            .map(|(block, frames)| {
                if frames.is_empty() {
                    if !flags.disable_missing_traces_check && !block.block.transactions.is_empty() {
                        return BlockPatch::invalid("missing traces for some transactions");
                    }
                    return BlockPatch::default();
                }
                if !flags.disable_trace_block_hash_check
                    && frames.iter().any(|f| f.block_hash != Some(block.hash))
                {
                    return BlockPatch::invalid("trace_block returned a trace of a different block");
                }
                BlockPatch {
                    trace_replays: Some(group_frames_by_transaction(frames)),
                    ..Default::default()
                }
            })
            .collect())
    }

    pub(crate) async fn fetch_debug_frames(&self, blocks: &[&RawBlock]) -> Result<Vec<BlockPatch>> {
        let config = self.debug_trace_config(json!({
            "tracer": "callTracer",
            "tracerConfig": { "onlyTopCall": false, "withLog": false },
        }));
        let mut values = self.debug_trace_blocks(blocks, config).await?;

        let mut patches = Vec::with_capacity(blocks.len());
        for (block, value) in blocks.iter().zip(values.iter_mut()) {
            wrap_debug_results(value);
            let frames: Option<Vec<DebugFrameResult>> = decode(DEBUG_TRACE_METHOD, value.take())?;
            patches.push(match frames {
                None => block_not_found(),
                Some(frames) => BlockPatch {
                    debug_frames: Some(self.match_debug_trace("debug call frame", block, frames, |f| {
                        f.tx_hash
                    })),
                    ..Default::default()
                },
            });
        }
        Ok(patches)
    }

    pub(crate) async fn fetch_debug_state_diffs(
        &self,
        blocks: &[&RawBlock],
    ) -> Result<Vec<BlockPatch>> {
        let config = self.debug_trace_config(json!({
            "tracer": "prestateTracer",
            "tracerConfig": { "onlyTopCall": false, "diffMode": true },
        }));
        let values = self.debug_trace_blocks(blocks, config).await?;

        let mut patches = Vec::with_capacity(blocks.len());
        for (block, value) in blocks.iter().zip(values) {
            let diffs: Option<Vec<DebugStateDiffResult>> = decode(DEBUG_TRACE_METHOD, value)?;
            patches.push(match diffs {
                None => block_not_found(),
                Some(diffs) => BlockPatch {
                    debug_state_diffs: Some(self.match_debug_trace(
                        "debug state diff",
                        block,
                        diffs,
                        |d| d.tx_hash,
                    )),
                    ..Default::default()
                },
            });
        }
        Ok(patches)
    }

    fn debug_trace_config(&self, mut config: Value) -> Value {
        if let (Some(timeout), Value::Object(obj)) =
            (self.config.debug_trace_timeout.as_ref(), &mut config)
        {
            obj.insert("timeout".into(), Value::String(timeout.clone()));
        }
        config
    }

    async fn debug_trace_blocks(&self, blocks: &[&RawBlock], config: Value) -> Result<Vec<Value>> {
        let requests = blocks
            .iter()
            .map(|block| RpcRequest::new(DEBUG_TRACE_METHOD, json!([block.hash, config])))
            .collect();
        self.batch_call_raw(requests, self.options().classify(capture_not_found))
            .await
    }

    /// Align per-transaction debug results with the block's transactions. When the
    /// counts agree results are taken positionally, otherwise by transaction hash.
    fn match_debug_trace<T>(
        &self,
        kind: &str,
        block: &RawBlock,
        items: Vec<T>,
        tx_hash: fn(&T) -> Option<B256>,
    ) -> Vec<Option<T>> {
        let count = block.block.transactions.len();
        if items.len() == count {
            return items.into_iter().map(Some).collect();
        }
        let mut by_hash: HashMap<B256, T> = items
            .into_iter()
            .filter_map(|item| tx_hash(&item).map(|hash| (hash, item)))
            .collect();
        (0..count)
            .map(|i| {
                let hash = block.block.transactions.hash(i);
                let item = hash.and_then(|hash| by_hash.remove(&hash));
                if item.is_none() {
                    warn!(
                        block_height = block.height,
                        block_hash = %block.hash,
                        transaction_index = i,
                        transaction_hash = ?hash,
                        "no {kind} for transaction"
                    );
                }
                item
            })
            .collect()
    }
}

fn block_not_found() -> BlockPatch {
    BlockPatch::invalid(format!("got \"block not found\" from {DEBUG_TRACE_METHOD}"))
}

/// Transaction hash of a replay that came without one, taken from its frames.
fn replay_transaction_hash(method: &str, replay: &TraceTransactionReplay) -> Result<B256> {
    let mut tx_hash = None;
    for hash in replay.trace.iter().flatten().filter_map(|f| f.transaction_hash) {
        match tx_hash {
            None => tx_hash = Some(hash),
            Some(prev) if prev != hash => {
                return Err(Error::DataValidation {
                    method: method.to_string(),
                    message: "frames of one transaction replay name different transactions".into(),
                })
            }
            Some(_) => {}
        }
    }
    tx_hash.ok_or_else(|| Error::DataValidation {
        method: method.to_string(),
        message: "can't match transaction replay with its transaction".into(),
    })
}

/// Group `trace_block` frames into per-transaction replays, in first-seen order.
/// Frames without a transaction (block rewards) are dropped.
pub fn group_frames_by_transaction(frames: Vec<TraceFrame>) -> Vec<TraceTransactionReplay> {
    let mut replays: Vec<TraceTransactionReplay> = Vec::new();
    let mut positions: HashMap<B256, usize> = HashMap::new();
    for frame in frames {
        let Some(hash) = frame.transaction_hash else {
            continue;
        };
        let pos = *positions.entry(hash).or_insert_with(|| {
            replays.push(TraceTransactionReplay {
                transaction_hash: Some(hash),
                trace: Some(Vec::new()),
                state_diff: None,
            });
            replays.len() - 1
        });
        if let Some(trace) = replays[pos].trace.as_mut() {
            trace.push(frame);
        }
    }
    replays
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataRequest, FieldSelection, TraceRequest};

    fn request(traces: bool, state_diffs: bool) -> MappingRequest {
        let mut data = DataRequest::default();
        if traces {
            data.traces.push(TraceRequest::default());
        }
        let mut req = MappingRequest::new(data, FieldSelection::defaults());
        req.state_diffs = state_diffs;
        req
    }

    #[test]
    fn test_plan_cold_prefer_trace_api() {
        let plan = TracePlan::new(&request(true, true), true, false, false);
        assert_eq!(
            plan.replay,
            ReplayTracers {
                trace: true,
                state_diff: true
            }
        );
        assert!(!plan.trace_block && !plan.debug_frames && !plan.debug_state_diffs);
    }

    #[test]
    fn test_plan_hot_prefer_trace_api() {
        let plan = TracePlan::new(&request(true, true), true, false, true);
        assert!(plan.replay.is_empty());
        assert!(plan.trace_block);
        assert!(plan.debug_state_diffs);
    }

    #[test]
    fn test_plan_traces_only() {
        let plan = TracePlan::new(&request(true, false), true, false, false);
        assert!(plan.trace_block);
        assert!(plan.replay.is_empty());

        let plan = TracePlan::new(&request(true, false), false, false, false);
        assert!(plan.debug_frames);
        assert!(!plan.trace_block);
    }

    #[test]
    fn test_plan_forced_debug_state_diffs() {
        let plan = TracePlan::new(&request(false, true), true, true, false);
        assert!(plan.debug_state_diffs);
        assert!(plan.replay.is_empty());
    }

    #[test]
    fn test_group_frames_by_transaction() {
        let frame = |tx: Option<u8>, address: Vec<u32>| TraceFrame {
            block_hash: None,
            transaction_hash: tx.map(|b| B256::repeat_byte(b)),
            trace_address: address,
            subtraces: None,
            frame_type: "call".into(),
            action: Default::default(),
            result: None,
            error: None,
            revert_reason: None,
        };
        let replays = group_frames_by_transaction(vec![
            frame(Some(2), vec![]),
            frame(Some(1), vec![]),
            frame(Some(2), vec![0]),
            frame(None, vec![]),
        ]);

        assert_eq!(replays.len(), 2);
        assert_eq!(replays[0].transaction_hash, Some(B256::repeat_byte(2)));
        assert_eq!(replays[0].trace.as_ref().map(Vec::len), Some(2));
        assert_eq!(replays[1].transaction_hash, Some(B256::repeat_byte(1)));
    }
}
