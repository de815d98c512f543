use super::data::RawReceipt;
use super::engine::{BlockPatch, RawBlock, Rpc};
use super::props::ReceiptsMethod;
use super::RpcRequest;
use crate::error::Result;
use alloy_primitives::B256;
use alloy_rpc_types::BlockNumberOrTag;
use serde_json::json;
use std::collections::HashMap;

impl Rpc {
    pub(crate) async fn fetch_receipts(&self, blocks: &[&RawBlock]) -> Result<Vec<BlockPatch>> {
        match self.props.receipts_method().await {
            method @ (ReceiptsMethod::Alchemy | ReceiptsMethod::BlockReceipts) => {
                self.fetch_receipts_by_block(blocks, method).await
            }
            ReceiptsMethod::TransactionReceipt => self.fetch_receipts_by_tx(blocks).await,
        }
    }

    async fn fetch_receipts_by_block(
        &self,
        blocks: &[&RawBlock],
        method: ReceiptsMethod,
    ) -> Result<Vec<BlockPatch>> {
        let requests = blocks
            .iter()
            .map(|block| {
                let params = match method {
                    ReceiptsMethod::Alchemy => json!([{ "blockHash": block.hash }]),
                    _ => json!([BlockNumberOrTag::Number(block.height)]),
                };
                RpcRequest::new(method.name(), params)
            })
            .collect();
        let results: Vec<Option<Vec<RawReceipt>>> =
            self.batch_call(requests, self.options()).await?;

        Ok(blocks
            .iter()
            .zip(results)
            .map(|(block, receipts)| match receipts {
                None => BlockPatch::invalid(format!("{method} returned null")),
                Some(receipts) => self.check_receipts(block, receipts, method),
            })
            .collect())
    }

    async fn fetch_receipts_by_tx(&self, blocks: &[&RawBlock]) -> Result<Vec<BlockPatch>> {
        let method = ReceiptsMethod::TransactionReceipt.name();
        let requests = blocks
            .iter()
            .flat_map(|block| block.block.transactions.hashes())
            .map(|hash| RpcRequest::new(method, json!([hash])))
            .collect();
        let results: Vec<Option<RawReceipt>> = self.batch_call(requests, self.options()).await?;

        let mut by_block: HashMap<B256, Vec<RawReceipt>> = HashMap::new();
        for receipt in results.into_iter().flatten() {
            by_block.entry(receipt.block_hash).or_default().push(receipt);
        }

        Ok(blocks
            .iter()
            .map(|block| {
                let receipts = by_block.remove(&block.hash).unwrap_or_default();
                if !self.config.validation.disable_tx_receipts_number_check
                    && receipts.len() != block.block.transactions.len()
                {
                    return BlockPatch::invalid("failed to get receipts for all transactions");
                }
                BlockPatch {
                    receipts: Some(receipts),
                    ..Default::default()
                }
            })
            .collect())
    }

    fn check_receipts(
        &self,
        block: &RawBlock,
        receipts: Vec<RawReceipt>,
        method: ReceiptsMethod,
    ) -> BlockPatch {
        let flags = &self.config.validation;
        if !flags.disable_tx_receipt_block_hash_check
            && receipts.iter().any(|r| r.block_hash != block.hash)
        {
            return BlockPatch::invalid(format!(
                "{method} returned receipts for a different block"
            ));
        }
        if !flags.disable_tx_receipts_number_check
            && receipts.len() != block.block.transactions.len()
        {
            return BlockPatch::invalid(format!(
                "got invalid number of receipts from {method}: expected {}, got {}",
                block.block.transactions.len(),
                receipts.len()
            ));
        }
        BlockPatch {
            receipts: Some(receipts),
            ..Default::default()
        }
    }
}
