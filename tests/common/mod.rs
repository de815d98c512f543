#![allow(dead_code)]

use alloy_primitives::{B256, U256};
use async_trait::async_trait;
use evm_ingest::rpc::{CallOptions, RpcClient, RpcError, RpcErrorInfo, RpcRequest};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

pub type Reply = Result<Value, RpcErrorInfo>;
type Handler = Box<dyn Fn(&str, &Value) -> Reply + Send + Sync>;

/// Scripted node: every call, batched or not, goes through one handler.
pub struct MockClient {
    handler: Handler,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockClient {
    pub fn new(handler: impl Fn(&str, &Value) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, method: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params)
            .collect()
    }

    fn reply(&self, method: &str, params: &Value, options: &CallOptions) -> Result<Value, RpcError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));
        match (self.handler)(method, params) {
            Ok(value) => Ok(value),
            Err(info) => options.resolve_error(info),
        }
    }
}

#[async_trait]
impl RpcClient for MockClient {
    fn url(&self) -> &str {
        "mock://node"
    }

    async fn call(
        &self,
        method: &str,
        params: Value,
        options: CallOptions,
    ) -> Result<Value, RpcError> {
        self.reply(method, &params, &options)
    }

    async fn batch_call(
        &self,
        requests: Vec<RpcRequest>,
        options: CallOptions,
    ) -> Result<Vec<Value>, RpcError> {
        requests
            .iter()
            .map(|r| self.reply(&r.method, &r.params, &options))
            .collect()
    }
}

pub fn server_error(message: &str) -> RpcErrorInfo {
    RpcErrorInfo {
        code: -32000,
        message: message.to_string(),
        data: None,
    }
}

pub fn quantity(value: &Value) -> u64 {
    let s = value.as_str().unwrap();
    u64::from_str_radix(s.trim_start_matches("0x"), 16).unwrap()
}

/// Block hash of `height` on the canonical test chain.
pub fn block_hash(height: u64) -> B256 {
    B256::from(U256::from(height + 1_000))
}

pub fn tx_hash(height: u64, index: u64) -> B256 {
    B256::from(U256::from(height * 1_000 + index + 1_000_000))
}

pub fn zero_bloom() -> String {
    format!("0x{}", "00".repeat(256))
}

pub fn full_bloom() -> String {
    format!("0x{}", "ff".repeat(256))
}

/// `eth_getBlockByNumber` result with transaction hashes.
pub fn block_json(height: u64, parent_hash: B256, tx_count: u64, bloom: &str) -> Value {
    let txs: Vec<B256> = (0..tx_count).map(|i| tx_hash(height, i)).collect();
    json!({
        "number": format!("0x{height:x}"),
        "hash": block_hash(height),
        "parentHash": parent_hash,
        "logsBloom": bloom,
        "timestamp": format!("0x{:x}", 1_700_000_000 + height),
        "transactions": txs,
    })
}

pub fn chain_block(height: u64) -> Value {
    let parent = height.checked_sub(1).map_or(B256::ZERO, block_hash);
    block_json(height, parent, 0, &zero_bloom())
}

pub fn log_json(height: u64, log_index: u64, tx_index: u64) -> Value {
    json!({
        "blockNumber": format!("0x{height:x}"),
        "blockHash": block_hash(height),
        "logIndex": format!("0x{log_index:x}"),
        "transactionIndex": format!("0x{tx_index:x}"),
        "transactionHash": tx_hash(height, tx_index),
        "address": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        "data": "0x",
        "topics": [],
    })
}

pub fn receipt_json(height: u64, tx_index: u64, logs: Vec<Value>) -> Value {
    json!({
        "blockNumber": format!("0x{height:x}"),
        "blockHash": block_hash(height),
        "transactionIndex": format!("0x{tx_index:x}"),
        "transactionHash": tx_hash(height, tx_index),
        "logs": logs,
        "gasUsed": "0x5208",
        "status": "0x1",
    })
}

pub fn tx_json(height: u64, index: u64) -> Value {
    json!({
        "blockNumber": format!("0x{height:x}"),
        "blockHash": block_hash(height),
        "transactionIndex": format!("0x{index:x}"),
        "hash": tx_hash(height, index),
        "input": "0xa9059cbb0000",
        "from": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
        "to": "0xcccccccccccccccccccccccccccccccccccccccc",
        "nonce": format!("0x{index:x}"),
        "type": "0x2",
    })
}

/// `eth_getBlockByNumber` result with full transaction objects.
pub fn full_block_json(height: u64, tx_count: u64, bloom: &str) -> Value {
    let mut block = block_json(height, block_hash(height.saturating_sub(1)), tx_count, bloom);
    block["transactions"] = (0..tx_count).map(|i| tx_json(height, i)).collect();
    block
}
