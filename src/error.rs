use crate::rpc::RpcError;
use alloy_primitives::B256;
use std::fmt;
use thiserror::Error;

/// Identifies the block a consistency error is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Height(u64),
    Hash(B256),
    Both { height: u64, hash: B256 },
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockRef::Height(height) => write!(f, "block {height}"),
            BlockRef::Hash(hash) => write!(f, "block {hash}"),
            BlockRef::Both { height, hash } => write!(f, "block {height}#{hash}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("{block}: {message}")]
    BlockConsistency { block: BlockRef, message: String },

    #[error("failed to map block {height}#{hash}: {source}")]
    Mapping {
        height: u64,
        hash: B256,
        #[source]
        source: MappingError,
    },

    #[error("{method}: server returned unexpected result: {message}")]
    DataValidation { method: String, message: String },

    #[error("{0}")]
    Unsupported(String),

    #[error("block {height} is not known to {url}")]
    GenesisNotFound { height: u64, url: String },
}

impl Error {
    pub fn consistency(block: BlockRef, message: impl Into<String>) -> Self {
        Error::BlockConsistency {
            block,
            message: message.into(),
        }
    }
}

/// Structural violations found while turning raw node data into canonical entities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("transaction at position {position} has transactionIndex {index}")]
    TransactionIndexMismatch { position: usize, index: u64 },

    #[error("receipts were requested but not fetched")]
    MissingReceipts,

    #[error("receipt {position} has no matching transaction")]
    ReceiptWithoutTransaction { position: usize },

    #[error("receipt {position} belongs to transaction {receipt_tx}, expected {block_tx}")]
    ReceiptTransactionMismatch {
        position: usize,
        receipt_tx: B256,
        block_tx: B256,
    },

    #[error("receipt {position} carries no logs")]
    MissingReceiptLogs { position: usize },

    #[error("logs were supplied by both receipts and eth_getLogs")]
    DuplicateLogSource,

    #[error("traces were supplied by both replay and debug tracers")]
    DuplicateTraceSource,

    #[error("state diffs were supplied by both replay and debug tracers")]
    DuplicateStateDiffSource,

    #[error("trace replay refers to unknown transaction {0}")]
    UnknownReplayTransaction(B256),

    #[error("unexpected trace type {0:?}")]
    UnexpectedTraceType(String),

    #[error("top level STOP frame has sub-calls")]
    StopFrameWithCalls,

    #[error("{field} {value} does not fit in 32 bits")]
    IndexOverflow { field: &'static str, value: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
