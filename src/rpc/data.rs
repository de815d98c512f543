//! Typed shapes of node responses.
//!
//! Decoding a `serde_json::Value` into one of these types is the validation step: a
//! response that doesn't fit is a [`Error::DataValidation`] and never reaches the mapper.
//! Optional node-specific fields are `Option`s; which of them end up in canonical
//! entities is decided by the field selection at mapping time.

use crate::error::{Error, Result};
use alloy_primitives::{Address, Bloom, Bytes, B256, U256, U64};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

pub fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::DataValidation {
        method: method.to_string(),
        message: e.to_string(),
    })
}

/// Hex quantities (`"0x1b4"`) as `u64`.
pub(crate) mod qty {
    use super::*;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
        U64::deserialize(d).map(|v| v.to::<u64>())
    }

    pub mod opt {
        use super::*;

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> std::result::Result<Option<u64>, D::Error> {
            Option::<U64>::deserialize(d).map(|v| v.map(|v| v.to::<u64>()))
        }
    }
}

/// Hex data that some nodes encode without padding to whole bytes (`"0x0"`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HexValue(pub Bytes);

impl<'de> Deserialize<'de> for HexValue {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        let digits = s
            .strip_prefix("0x")
            .ok_or_else(|| D::Error::custom(format!("expected 0x-prefixed hex, got {s:?}")))?;
        let padded = if digits.len() % 2 == 1 {
            format!("0{digits}")
        } else {
            digits.to_string()
        };
        alloy_primitives::hex::decode(&padded)
            .map(|bytes| HexValue(bytes.into()))
            .map_err(D::Error::custom)
    }
}

/// Quantity encoded the way [`HexValue`] decodes `"0x{value:x}"`.
pub fn quantity_bytes(value: U256) -> Bytes {
    let be = value.to_be_bytes::<32>();
    let start = be.iter().position(|b| *b != 0).unwrap_or(31);
    Bytes::copy_from_slice(&be[start..])
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAuthorization {
    #[serde(with = "qty")]
    pub chain_id: u64,
    #[serde(with = "qty")]
    pub nonce: u64,
    pub address: Address,
    #[serde(with = "qty")]
    pub y_parity: u64,
    pub r: U256,
    pub s: U256,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    #[serde(with = "qty")]
    pub block_number: u64,
    pub block_hash: B256,
    #[serde(with = "qty")]
    pub transaction_index: u64,
    pub hash: B256,
    #[serde(default)]
    pub input: Bytes,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub gas: Option<U256>,
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    #[serde(default, with = "qty::opt")]
    pub nonce: Option<u64>,
    pub value: Option<U256>,
    pub v: Option<U256>,
    pub r: Option<U256>,
    pub s: Option<U256>,
    #[serde(default, with = "qty::opt")]
    pub y_parity: Option<u64>,
    #[serde(default, with = "qty::opt")]
    pub chain_id: Option<u64>,
    #[serde(default, rename = "type", with = "qty::opt")]
    pub tx_type: Option<u64>,
    pub authorization_list: Option<Vec<RawAuthorization>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTransactions {
    Hashes(Vec<B256>),
    Full(Vec<RawTransaction>),
}

impl RawTransactions {
    pub fn len(&self) -> usize {
        match self {
            RawTransactions::Hashes(hashes) => hashes.len(),
            RawTransactions::Full(txs) => txs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hash(&self, i: usize) -> Option<B256> {
        match self {
            RawTransactions::Hashes(hashes) => hashes.get(i).copied(),
            RawTransactions::Full(txs) => txs.get(i).map(|tx| tx.hash),
        }
    }

    pub fn hashes(&self) -> Vec<B256> {
        match self {
            RawTransactions::Hashes(hashes) => hashes.clone(),
            RawTransactions::Full(txs) => txs.iter().map(|tx| tx.hash).collect(),
        }
    }
}

/// Result of `eth_getBlockByNumber` / `eth_getBlockByHash`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBlock {
    #[serde(with = "qty")]
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub logs_bloom: Bloom,
    pub transactions: RawTransactions,
    #[serde(default, with = "qty::opt")]
    pub timestamp: Option<u64>,
    pub nonce: Option<Bytes>,
    pub sha3_uncles: Option<B256>,
    pub transactions_root: Option<B256>,
    pub state_root: Option<B256>,
    pub receipts_root: Option<B256>,
    pub mix_hash: Option<B256>,
    pub miner: Option<Address>,
    pub difficulty: Option<U256>,
    pub total_difficulty: Option<U256>,
    pub extra_data: Option<Bytes>,
    #[serde(default, with = "qty::opt")]
    pub size: Option<u64>,
    pub gas_limit: Option<U256>,
    pub gas_used: Option<U256>,
    pub base_fee_per_gas: Option<U256>,
    #[serde(default, with = "qty::opt")]
    pub l1_block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    #[serde(with = "qty")]
    pub block_number: u64,
    pub block_hash: B256,
    #[serde(with = "qty")]
    pub log_index: u64,
    #[serde(with = "qty")]
    pub transaction_index: u64,
    pub transaction_hash: Option<B256>,
    pub address: Option<Address>,
    pub data: Option<Bytes>,
    pub topics: Option<Vec<B256>>,
}

fn string_float<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<f64>, D::Error> {
    match Option::<String>::deserialize(d)? {
        None => Ok(None),
        Some(s) => s.parse::<f64>().map(Some).map_err(D::Error::custom),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReceipt {
    #[serde(with = "qty")]
    pub block_number: u64,
    pub block_hash: B256,
    #[serde(with = "qty")]
    pub transaction_index: u64,
    pub transaction_hash: B256,
    pub logs: Option<Vec<RawLog>>,
    pub gas_used: Option<U256>,
    pub cumulative_gas_used: Option<U256>,
    pub effective_gas_price: Option<U256>,
    pub contract_address: Option<Address>,
    #[serde(default, rename = "type", with = "qty::opt")]
    pub tx_type: Option<u64>,
    #[serde(default, with = "qty::opt")]
    pub status: Option<u64>,
    pub l1_fee: Option<U256>,
    #[serde(default, deserialize_with = "string_float")]
    pub l1_fee_scalar: Option<f64>,
    pub l1_gas_price: Option<U256>,
    pub l1_gas_used: Option<U256>,
    #[serde(default, with = "qty::opt")]
    pub l1_base_fee_scalar: Option<u64>,
    pub l1_blob_base_fee: Option<U256>,
    #[serde(default, with = "qty::opt")]
    pub l1_blob_base_fee_scalar: Option<u64>,
}

/// One frame of the geth `callTracer` output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Option<U256>,
    pub gas: Option<U256>,
    pub gas_used: Option<U256>,
    #[serde(default)]
    pub input: Bytes,
    pub output: Option<Bytes>,
    pub error: Option<String>,
    pub revert_reason: Option<String>,
    #[serde(default)]
    pub calls: Vec<DebugFrame>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugFrameResult {
    pub result: DebugFrame,
    pub tx_hash: Option<B256>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DebugStateMap {
    pub balance: Option<U256>,
    pub code: Option<Bytes>,
    pub nonce: Option<u64>,
    pub storage: Option<BTreeMap<B256, B256>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DebugStateDiff {
    pub pre: BTreeMap<Address, DebugStateMap>,
    pub post: BTreeMap<Address, DebugStateMap>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugStateDiffResult {
    pub result: DebugStateDiff,
    pub tx_hash: Option<B256>,
}

/// Wrap bare per-transaction results into `{ "result": .. }` (Moonbeam returns them unwrapped).
pub fn wrap_debug_results(value: &mut Value) {
    if let Value::Array(items) = value {
        for item in items.iter_mut() {
            let wrapped = matches!(item, Value::Object(obj) if !obj.contains_key("result"));
            if wrapped {
                let inner = item.take();
                *item = serde_json::json!({ "result": inner });
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceAction {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Option<U256>,
    pub gas: Option<U256>,
    pub input: Option<Bytes>,
    pub init: Option<Bytes>,
    pub call_type: Option<String>,
    pub address: Option<Address>,
    pub refund_address: Option<Address>,
    pub balance: Option<U256>,
    pub author: Option<Address>,
    pub reward_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceResult {
    pub gas_used: Option<U256>,
    pub output: Option<Bytes>,
    pub code: Option<Bytes>,
    pub address: Option<Address>,
}

/// Frame of the parity style trace APIs (`trace_block`, `trace_replayBlockTransactions`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceFrame {
    pub block_hash: Option<B256>,
    pub transaction_hash: Option<B256>,
    pub trace_address: Vec<u32>,
    pub subtraces: Option<u32>,
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub action: TraceAction,
    pub result: Option<TraceResult>,
    pub error: Option<String>,
    pub revert_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Unchanged {
    #[serde(rename = "=")]
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Changed {
    pub from: HexValue,
    pub to: HexValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum DiffObject {
    #[serde(rename = "+")]
    Add(HexValue),
    #[serde(rename = "*")]
    Change(Changed),
    #[serde(rename = "-")]
    Delete(HexValue),
}

/// Tri-state replay diff: `"="`, `{"+": v}`, `{"*": {"from", "to"}}` or `{"-": v}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TraceDiff {
    Same(Unchanged),
    Diff(DiffObject),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TraceStateDiff {
    pub balance: TraceDiff,
    pub code: TraceDiff,
    pub nonce: TraceDiff,
    pub storage: BTreeMap<B256, TraceDiff>,
}

/// One entry of `trace_replayBlockTransactions`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceTransactionReplay {
    pub transaction_hash: Option<B256>,
    pub trace: Option<Vec<TraceFrame>>,
    pub state_diff: Option<BTreeMap<Address, TraceStateDiff>>,
}
