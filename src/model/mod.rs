//! Canonical block graph.
//!
//! A [`Block`] owns every entity of one block in flat collections. Cross references
//! (`transaction`, `parent`, `children`, per-transaction `logs`/`traces`/`state_diffs`)
//! are positions into those collections, filled in by [`crate::relations::wire`] and
//! rewritten by [`crate::filter::filter_block`] when items are dropped.

pub mod request;
pub mod selection;

use alloy_primitives::{Address, Bloom, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use request::{
    DataRequest, LogRelations, LogRequest, MappingRequest, StateDiffRelations, StateDiffRequest,
    TraceRelations, TraceRequest, TransactionRelations, TransactionRequest,
};
pub use selection::FieldSelection;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: B256,
    pub parent_hash: B256,
    /// Milliseconds since epoch.
    pub timestamp: Option<u64>,
    pub nonce: Option<Bytes>,
    pub sha3_uncles: Option<B256>,
    pub logs_bloom: Option<Bloom>,
    pub transactions_root: Option<B256>,
    pub state_root: Option<B256>,
    pub receipts_root: Option<B256>,
    pub mix_hash: Option<B256>,
    pub miner: Option<Address>,
    pub difficulty: Option<U256>,
    pub total_difficulty: Option<U256>,
    pub extra_data: Option<Bytes>,
    pub size: Option<u64>,
    pub gas_limit: Option<U256>,
    pub gas_used: Option<U256>,
    pub base_fee_per_gas: Option<U256>,
    pub l1_block_number: Option<u64>,
}

impl BlockHeader {
    pub fn new(height: u64, hash: B256, parent_hash: B256) -> Self {
        Self {
            height,
            hash,
            parent_hash,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub chain_id: u64,
    pub nonce: u64,
    pub address: Address,
    pub y_parity: u64,
    pub r: U256,
    pub s: U256,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    pub transaction_index: u32,
    pub hash: Option<B256>,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub gas: Option<U256>,
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub input: Option<Bytes>,
    /// First four bytes of `input`.
    pub sighash: Option<Bytes>,
    pub nonce: Option<u64>,
    pub value: Option<U256>,
    pub v: Option<U256>,
    pub r: Option<U256>,
    pub s: Option<U256>,
    pub y_parity: Option<u64>,
    pub chain_id: Option<u64>,
    pub authorization_list: Option<Vec<Authorization>>,

    // receipt
    pub gas_used: Option<U256>,
    pub cumulative_gas_used: Option<U256>,
    pub effective_gas_price: Option<U256>,
    pub contract_address: Option<Address>,
    pub tx_type: Option<u64>,
    pub status: Option<u64>,
    pub l1_fee: Option<U256>,
    pub l1_fee_scalar: Option<f64>,
    pub l1_gas_price: Option<U256>,
    pub l1_gas_used: Option<U256>,
    pub l1_base_fee_scalar: Option<u64>,
    pub l1_blob_base_fee: Option<U256>,
    pub l1_blob_base_fee_scalar: Option<u64>,

    /// Positions in [`Block::logs`].
    pub logs: Vec<usize>,
    /// Positions in [`Block::traces`].
    pub traces: Vec<usize>,
    /// Positions in [`Block::state_diffs`].
    pub state_diffs: Vec<usize>,
}

impl Transaction {
    pub fn new(transaction_index: u32) -> Self {
        Self {
            transaction_index,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Log {
    pub log_index: u32,
    pub transaction_index: u32,
    pub transaction_hash: Option<B256>,
    pub address: Option<Address>,
    pub data: Option<Bytes>,
    pub topics: Option<Vec<B256>>,
    /// Position of the owning transaction in [`Block::transactions`].
    pub transaction: Option<usize>,
}

impl Log {
    pub fn new(log_index: u32, transaction_index: u32) -> Self {
        Self {
            log_index,
            transaction_index,
            ..Default::default()
        }
    }

    pub fn topic(&self, i: usize) -> Option<&B256> {
        self.topics.as_ref().and_then(|topics| topics.get(i))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    Create,
    Call,
    Suicide,
    Reward,
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TraceKind::Create => "create",
            TraceKind::Call => "call",
            TraceKind::Suicide => "suicide",
            TraceKind::Reward => "reward",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceCreateAction {
    pub from: Option<Address>,
    pub value: Option<U256>,
    pub gas: Option<U256>,
    pub init: Option<Bytes>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceCreateResult {
    pub gas_used: Option<U256>,
    pub code: Option<Bytes>,
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceCallAction {
    pub call_type: Option<String>,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Option<U256>,
    pub gas: Option<U256>,
    pub input: Option<Bytes>,
    pub sighash: Option<Bytes>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceCallResult {
    pub gas_used: Option<U256>,
    pub output: Option<Bytes>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceSuicideAction {
    pub address: Option<Address>,
    pub refund_address: Option<Address>,
    pub balance: Option<U256>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceRewardAction {
    pub author: Option<Address>,
    pub value: Option<U256>,
    pub reward_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceData {
    Create {
        action: TraceCreateAction,
        result: Option<TraceCreateResult>,
    },
    Call {
        action: TraceCallAction,
        result: Option<TraceCallResult>,
    },
    Suicide {
        action: TraceSuicideAction,
    },
    Reward {
        action: TraceRewardAction,
    },
}

impl TraceData {
    pub fn kind(&self) -> TraceKind {
        match self {
            TraceData::Create { .. } => TraceKind::Create,
            TraceData::Call { .. } => TraceKind::Call,
            TraceData::Suicide { .. } => TraceKind::Suicide,
            TraceData::Reward { .. } => TraceKind::Reward,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub transaction_index: u32,
    pub trace_address: Vec<u32>,
    pub subtraces: Option<u32>,
    pub error: Option<String>,
    pub revert_reason: Option<String>,
    pub data: TraceData,
    /// Position of the owning transaction in [`Block::transactions`].
    pub transaction: Option<usize>,
    /// Position of the direct parent in [`Block::traces`].
    pub parent: Option<usize>,
    /// Positions of every descendant (the whole subtree) in [`Block::traces`].
    pub children: Vec<usize>,
}

impl Trace {
    pub fn new(transaction_index: u32, trace_address: Vec<u32>, data: TraceData) -> Self {
        Self {
            transaction_index,
            trace_address,
            subtraces: None,
            error: None,
            revert_reason: None,
            data,
            transaction: None,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn kind(&self) -> TraceKind {
        self.data.kind()
    }

    /// Whether `other` sits strictly below `self` in the same transaction's call tree.
    pub fn is_ancestor_of(&self, other: &Trace) -> bool {
        self.transaction_index == other.transaction_index
            && self.trace_address.len() < other.trace_address.len()
            && other.trace_address.starts_with(&self.trace_address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateDiffKind {
    #[serde(rename = "=")]
    NoChange,
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "*")]
    Change,
    #[serde(rename = "-")]
    Delete,
}

/// What a state diff is about: an account field or one storage slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DiffKey {
    Balance,
    Code,
    Nonce,
    Storage(B256),
}

impl fmt::Display for DiffKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffKey::Balance => f.write_str("balance"),
            DiffKey::Code => f.write_str("code"),
            DiffKey::Nonce => f.write_str("nonce"),
            DiffKey::Storage(slot) => write!(f, "{slot}"),
        }
    }
}

impl FromStr for DiffKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balance" => Ok(DiffKey::Balance),
            "code" => Ok(DiffKey::Code),
            "nonce" => Ok(DiffKey::Nonce),
            slot => B256::from_str(slot)
                .map(DiffKey::Storage)
                .map_err(|e| format!("invalid state diff key {slot:?}: {e}")),
        }
    }
}

impl TryFrom<String> for DiffKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DiffKey> for String {
    fn from(key: DiffKey) -> Self {
        key.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDiff {
    pub transaction_index: u32,
    pub address: Address,
    pub key: DiffKey,
    pub kind: StateDiffKind,
    pub prev: Option<Bytes>,
    pub next: Option<Bytes>,
    /// Position of the owning transaction in [`Block::transactions`].
    pub transaction: Option<usize>,
}

impl StateDiff {
    pub fn new(transaction_index: u32, address: Address, key: DiffKey, kind: StateDiffKind) -> Self {
        Self {
            transaction_index,
            address,
            key,
            kind,
            prev: None,
            next: None,
            transaction: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub logs: Vec<Log>,
    pub traces: Vec<Trace>,
    pub state_diffs: Vec<StateDiff>,
}

impl Block {
    pub fn new(header: BlockHeader) -> Self {
        Self {
            header,
            ..Default::default()
        }
    }

    pub fn log_transaction(&self, log: &Log) -> Option<&Transaction> {
        log.transaction.and_then(|i| self.transactions.get(i))
    }

    pub fn trace_transaction(&self, trace: &Trace) -> Option<&Transaction> {
        trace.transaction.and_then(|i| self.transactions.get(i))
    }

    pub fn state_diff_transaction(&self, diff: &StateDiff) -> Option<&Transaction> {
        diff.transaction.and_then(|i| self.transactions.get(i))
    }

    pub fn trace_parent(&self, trace: &Trace) -> Option<&Trace> {
        trace.parent.and_then(|i| self.traces.get(i))
    }

    pub fn trace_children<'a>(&'a self, trace: &'a Trace) -> impl Iterator<Item = &'a Trace> + 'a {
        trace.children.iter().filter_map(move |&i| self.traces.get(i))
    }

    pub fn transaction_logs<'a>(&'a self, tx: &'a Transaction) -> impl Iterator<Item = &'a Log> + 'a {
        tx.logs.iter().filter_map(move |&i| self.logs.get(i))
    }

    pub fn transaction_traces<'a>(
        &'a self,
        tx: &'a Transaction,
    ) -> impl Iterator<Item = &'a Trace> + 'a {
        tx.traces.iter().filter_map(move |&i| self.traces.get(i))
    }

    pub fn transaction_state_diffs<'a>(
        &'a self,
        tx: &'a Transaction,
    ) -> impl Iterator<Item = &'a StateDiff> + 'a {
        tx.state_diffs.iter().filter_map(move |&i| self.state_diffs.get(i))
    }
}
