//! `eth_getLogs` with range bisection for nodes that cap response size.

use super::data::{decode, RawLog, RawReceipt};
use super::engine::{BlockPatch, RawBlock, Rpc};
use super::{capture_logs_out_of_range, RpcError};
use crate::error::Result;
use alloy_primitives::{Bloom, B256};
use alloy_rpc_types::BlockNumberOrTag;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, warn};

lazy_static! {
    static ref RESPONSE_TOO_BIG: Regex =
        Regex::new(r"(?i)query returned more than|response is too big").unwrap();
    static ref TRY_ANOTHER_RANGE: Regex =
        Regex::new(r"(?i)try with this block range \[(0x[0-9a-f]+), (0x[0-9a-f]+)\]").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRange {
    pub from: u64,
    pub to: u64,
}

pub fn is_logs_response_too_big(err: &RpcError) -> bool {
    matches!(err, RpcError::Server(info) if RESPONSE_TOO_BIG.is_match(&info.message))
}

/// Range the node suggests in its "try with this block range" message.
pub fn suggested_range(message: &str) -> Option<LogRange> {
    let caps = TRY_ANOTHER_RANGE.captures(message)?;
    let parse = |i: usize| {
        caps.get(i)
            .and_then(|m| u64::from_str_radix(&m.as_str()[2..], 16).ok())
    };
    let range = LogRange {
        from: parse(1)?,
        to: parse(2)?,
    };
    (range.from <= range.to).then_some(range)
}

impl Rpc {
    pub(crate) async fn fetch_logs(&self, blocks: &[&RawBlock]) -> Result<Vec<BlockPatch>> {
        let (Some(from), Some(to)) = (
            blocks.iter().map(|b| b.height).min(),
            blocks.iter().map(|b| b.height).max(),
        ) else {
            return Ok(Vec::new());
        };

        let mut by_block: HashMap<B256, Vec<RawLog>> = HashMap::new();
        for log in self.get_logs(from, to).await? {
            by_block.entry(log.block_hash).or_default().push(log);
        }

        let check_bloom = !self.config.validation.disable_logs_bloom_check;
        Ok(blocks
            .iter()
            .map(|block| {
                let logs = by_block.remove(&block.hash).unwrap_or_default();
                let mut patch = BlockPatch::default();
                if check_bloom && logs.is_empty() && block.block.logs_bloom != Bloom::ZERO {
                    patch.invalid =
                        Some("got 0 log records from eth_getLogs, but logs bloom is not empty".into());
                }
                patch.logs = Some(logs);
                patch
            })
            .collect())
    }

    /// All logs of `from..=to`, in node order. Splits the range while the node
    /// reports an oversized response, and falls back to receipts when it can't split.
    pub fn get_logs(&self, from: u64, to: u64) -> BoxFuture<'_, Result<Vec<RawLog>>> {
        async move {
            let params = json!([{
                "fromBlock": BlockNumberOrTag::Number(from),
                "toBlock": BlockNumberOrTag::Number(to),
            }]);
            let options = self.options().classify(capture_logs_out_of_range);
            let err = match self.client.call("eth_getLogs", params, options).await {
                Ok(value) => return decode("eth_getLogs", value),
                Err(err) => err,
            };
            if !is_logs_response_too_big(&err) {
                return Err(err.into());
            }

            let range = suggested_range(err.message()).unwrap_or(LogRange {
                from,
                to: from + (to - from) / 2,
            });
            if range.from == from && range.to < to {
                debug!(from, to, split = range.to, "eth_getLogs response too big, splitting");
                let (mut left, right) = futures::try_join!(
                    self.get_logs(range.from, range.to),
                    self.get_logs(range.to + 1, to)
                )?;
                left.extend(right);
                Ok(left)
            } else {
                warn!(
                    from,
                    to, "unable to fetch logs with eth_getLogs, fallback to eth_getTransactionReceipt"
                );
                let per_block = try_join_all((from..=to).map(|h| self.get_logs_by_receipts(h))).await?;
                Ok(per_block.into_iter().flatten().collect())
            }
        }
        .boxed()
    }

    /// Logs of one block collected from its receipts. Returns nothing if the block is
    /// gone or any receipt doesn't belong to it.
    pub async fn get_logs_by_receipts(&self, height: u64) -> Result<Vec<RawLog>> {
        let Some(block) = self.get_block_by_number(height, false).await? else {
            return Ok(Vec::new());
        };
        let receipts: Vec<Option<RawReceipt>> =
            try_join_all(block.transactions.hashes().into_iter().map(|hash| {
                self.call("eth_getTransactionReceipt", json!([hash]), self.options())
            }))
            .await?;

        let mut logs = Vec::new();
        for receipt in receipts {
            match receipt {
                Some(receipt) if receipt.block_hash == block.hash => {
                    logs.extend(receipt.logs.unwrap_or_default())
                }
                _ => return Ok(Vec::new()),
            }
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcErrorInfo;

    fn server_error(message: &str) -> RpcError {
        RpcError::Server(RpcErrorInfo {
            code: -32005,
            message: message.to_string(),
            data: None,
        })
    }

    #[test]
    fn test_too_big_detection() {
        assert!(is_logs_response_too_big(&server_error(
            "query returned more than 10000 results"
        )));
        assert!(is_logs_response_too_big(&server_error("Response is too big")));
        assert!(!is_logs_response_too_big(&server_error("execution reverted")));
        assert!(!is_logs_response_too_big(&RpcError::Transport(
            "response is too big".into()
        )));
    }

    #[test]
    fn test_suggested_range() {
        let msg = "query returned more than 10000 results. Try with this block range [0x64, 0x6e].";
        assert_eq!(suggested_range(msg), Some(LogRange { from: 100, to: 110 }));
        assert_eq!(suggested_range("try with this block range [0x6e, 0x64]"), None);
        assert_eq!(suggested_range("query returned more than 10000 results"), None);
    }
}
