use super::data::{decode, GetBlock};
use super::{CallOptions, RpcClient};
use crate::error::{Error, Result};
use alloy_primitives::B256;
use alloy_rpc_types::BlockNumberOrTag;
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptsMethod {
    /// `alchemy_getTransactionReceipts`, one call per block.
    Alchemy,
    /// `eth_getBlockReceipts`, one call per block.
    BlockReceipts,
    /// `eth_getTransactionReceipt`, one call per transaction.
    TransactionReceipt,
}

impl ReceiptsMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ReceiptsMethod::Alchemy => "alchemy_getTransactionReceipts",
            ReceiptsMethod::BlockReceipts => "eth_getBlockReceipts",
            ReceiptsMethod::TransactionReceipt => "eth_getTransactionReceipt",
        }
    }
}

impl fmt::Display for ReceiptsMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-endpoint capabilities, probed once and kept for the lifetime of the engine.
///
/// Concurrent first callers may both probe; the outcome is the same, so whichever
/// result lands first is kept.
pub struct RpcProps {
    client: Arc<dyn RpcClient>,
    genesis_height: u64,
    genesis_hash: OnceLock<B256>,
    receipts_method: OnceLock<ReceiptsMethod>,
}

impl RpcProps {
    pub fn new(client: Arc<dyn RpcClient>, genesis_height: u64) -> Self {
        Self {
            client,
            genesis_height,
            genesis_hash: OnceLock::new(),
            receipts_method: OnceLock::new(),
        }
    }

    pub async fn genesis_hash(&self) -> Result<B256> {
        if let Some(hash) = self.genesis_hash.get() {
            return Ok(*hash);
        }
        let method = "eth_getBlockByNumber";
        let block = self
            .client
            .call(
                method,
                json!([BlockNumberOrTag::Number(self.genesis_height), false]),
                CallOptions::default(),
            )
            .await?;
        let block: Option<GetBlock> = decode(method, block)?;
        let hash = block
            .map(|b| b.hash)
            .ok_or_else(|| Error::GenesisNotFound {
                height: self.genesis_height,
                url: self.client.url().to_string(),
            })?;
        Ok(*self.genesis_hash.get_or_init(|| hash))
    }

    pub async fn receipts_method(&self) -> ReceiptsMethod {
        if let Some(method) = self.receipts_method.get() {
            return *method;
        }
        let method = self.probe_receipts_method().await;
        debug!(url = self.client.url(), %method, "selected receipts method");
        *self.receipts_method.get_or_init(|| method)
    }

    async fn probe_receipts_method(&self) -> ReceiptsMethod {
        let alchemy = self
            .client
            .call(
                ReceiptsMethod::Alchemy.name(),
                json!([{ "blockNumber": "0x1" }]),
                CallOptions::default(),
            )
            .await;
        if matches!(alchemy, Ok(Value::Array(_))) {
            return ReceiptsMethod::Alchemy;
        }

        let eth = self
            .client
            .call(
                ReceiptsMethod::BlockReceipts.name(),
                json!([BlockNumberOrTag::Latest]),
                CallOptions::default(),
            )
            .await;
        if matches!(eth, Ok(Value::Array(_))) {
            return ReceiptsMethod::BlockReceipts;
        }

        ReceiptsMethod::TransactionReceipt
    }
}
