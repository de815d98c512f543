//! JSON-RPC ingestion.
//!
//! The transport itself (HTTP/WS, rate limits, timeouts, transport-level retries) is
//! supplied by the embedding application through [`RpcClient`]. Everything here is
//! about data consistency on top of it.

pub mod data;
pub mod engine;
pub mod logs;
pub mod props;
pub mod quirks;
pub mod receipts;
pub mod traces;

pub use engine::{RawBlock, Rpc};
pub use props::{ReceiptsMethod, RpcProps};
pub use quirks::{ChainQuirk, TraceMethod, TraceStrategy};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Error object returned by a JSON-RPC server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorInfo {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("server error {}: {}", .0.code, .0.message)]
    Server(RpcErrorInfo),

    #[error("transport error: {0}")]
    Transport(String),
}

impl RpcError {
    pub fn message(&self) -> &str {
        match self {
            RpcError::Server(info) => &info.message,
            RpcError::Transport(msg) => msg,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RpcError::Server(info) if is_not_found(info))
    }
}

/// Turns selected server errors into a regular result. Returning `None` means the
/// error is fatal and must be surfaced as [`RpcError::Server`].
pub type ErrorClassifier = fn(&RpcErrorInfo) -> Option<Value>;

#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub priority: u32,
    pub classify_error: Option<ErrorClassifier>,
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn with_priority(priority: u32) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }

    pub fn classify(mut self, classifier: ErrorClassifier) -> Self {
        self.classify_error = Some(classifier);
        self
    }

    /// Apply the classifier to a server error. Transports call this for every
    /// failed call and for every failed item of a batch.
    pub fn resolve_error(&self, info: RpcErrorInfo) -> Result<Value, RpcError> {
        match self.classify_error.and_then(|classify| classify(&info)) {
            Some(value) => Ok(value),
            None => Err(RpcError::Server(info)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Endpoint identity, used in diagnostics.
    fn url(&self) -> &str;

    async fn call(&self, method: &str, params: Value, options: CallOptions)
        -> Result<Value, RpcError>;

    /// Execute all requests as one batch. Results come back in request order; an
    /// item error either resolves through [`CallOptions::resolve_error`] or fails the batch.
    async fn batch_call(
        &self,
        requests: Vec<RpcRequest>,
        options: CallOptions,
    ) -> Result<Vec<Value>, RpcError>;
}

fn is_not_found(info: &RpcErrorInfo) -> bool {
    info.message.contains("not found")
}

/// `debug_traceBlockByHash` on a block the node doesn't have.
pub fn capture_not_found(info: &RpcErrorInfo) -> Option<Value> {
    is_not_found(info).then_some(Value::Null)
}

/// Avalanche refuses to serve blocks past its accepted head.
pub fn capture_unfinalized(info: &RpcErrorInfo) -> Option<Value> {
    let msg = info.message.to_lowercase();
    msg.contains("cannot query unfinalized data")
        .then_some(Value::Null)
}

/// Avalanche errors instead of returning `[]` for logs past its accepted head.
pub fn capture_logs_out_of_range(info: &RpcErrorInfo) -> Option<Value> {
    info.message
        .contains("after last accepted block")
        .then(|| Value::Array(Vec::new()))
}
