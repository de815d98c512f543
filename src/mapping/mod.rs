//! Raw node data to canonical entities.
//!
//! Mapping is pure: it reads a [`RawBlock`] and the request that produced it and
//! builds an unwired [`Block`]. Optional properties are filled in according to the
//! field selection. Structural violations are [`MappingError`]s, reported with the
//! height and hash of the offending block.

pub mod state_diff;
pub mod trace;

use crate::error::{Error, MappingError, Result};
use crate::model::selection::{BlockFields, LogFields, TransactionFields};
use crate::model::{Authorization, Block, BlockHeader, Log, MappingRequest, Transaction};
use crate::rpc::data::{GetBlock, RawLog, RawReceipt, RawTransaction, RawTransactions};
use crate::rpc::RawBlock;
use alloy_primitives::B256;
use std::collections::HashMap;

pub use state_diff::{map_debug_state_diff, map_replay_state_diff};
pub use trace::{map_debug_frame, map_replay_frame, sighash};

/// `value` if the field is selected.
pub(crate) fn pick<T: Clone>(selected: bool, value: &Option<T>) -> Option<T> {
    if selected {
        value.clone()
    } else {
        None
    }
}

pub fn map_block(raw: &RawBlock, req: &MappingRequest) -> Result<Block> {
    try_map_block(raw, req).map_err(|source| Error::Mapping {
        height: raw.height,
        hash: raw.hash,
        source,
    })
}

fn try_map_block(raw: &RawBlock, req: &MappingRequest) -> std::result::Result<Block, MappingError> {
    let mut block = Block::new(map_header(&raw.block, &req.fields.block));

    if req.transaction_list {
        block.transactions = map_transactions(&raw.block.transactions, &req.fields.transaction)?;
    }

    let mut logs_from_receipts = false;
    if req.receipts {
        let receipts = raw.receipts.as_ref().ok_or(MappingError::MissingReceipts)?;
        for (position, receipt) in receipts.iter().enumerate() {
            let block_tx = raw
                .block
                .transactions
                .hash(position)
                .ok_or(MappingError::ReceiptWithoutTransaction { position })?;
            if receipt.transaction_hash != block_tx {
                return Err(MappingError::ReceiptTransactionMismatch {
                    position,
                    receipt_tx: receipt.transaction_hash,
                    block_tx,
                });
            }
            let tx = block
                .transactions
                .get_mut(position)
                .ok_or(MappingError::ReceiptWithoutTransaction { position })?;
            apply_receipt(tx, receipt, &req.fields.transaction);

            if req.log_list {
                let logs = receipt
                    .logs
                    .as_ref()
                    .ok_or(MappingError::MissingReceiptLogs { position })?;
                for log in logs {
                    block.logs.push(map_log(log, &req.fields.log)?);
                }
                logs_from_receipts = true;
            }
        }
    }

    if let Some(logs) = &raw.logs {
        if logs_from_receipts {
            return Err(MappingError::DuplicateLogSource);
        }
        for log in logs {
            block.logs.push(map_log(log, &req.fields.log)?);
        }
    }

    if let Some(replays) = &raw.trace_replays {
        let tx_index: HashMap<B256, u32> = raw
            .block
            .transactions
            .hashes()
            .into_iter()
            .enumerate()
            .map(|(i, hash)| (hash, i as u32))
            .collect();
        for replay in replays {
            let hash = replay.transaction_hash.unwrap_or_default();
            let transaction_index = *tx_index
                .get(&hash)
                .ok_or(MappingError::UnknownReplayTransaction(hash))?;
            for frame in replay.trace.iter().flatten() {
                block
                    .traces
                    .push(map_replay_frame(transaction_index, frame, &req.fields.trace)?);
            }
            if let Some(diffs) = &replay.state_diff {
                block
                    .state_diffs
                    .extend(map_replay_state_diff(transaction_index, diffs));
            }
        }
    }

    if let Some(frames) = &raw.debug_frames {
        if !block.traces.is_empty() {
            return Err(MappingError::DuplicateTraceSource);
        }
        for (i, frame) in frames.iter().enumerate() {
            if let Some(frame) = frame {
                block
                    .traces
                    .extend(map_debug_frame(i as u32, frame, &req.fields.trace)?);
            }
        }
    }

    if let Some(diffs) = &raw.debug_state_diffs {
        if !block.state_diffs.is_empty() {
            return Err(MappingError::DuplicateStateDiffSource);
        }
        for (i, diff) in diffs.iter().enumerate() {
            if let Some(diff) = diff {
                block
                    .state_diffs
                    .extend(map_debug_state_diff(i as u32, diff));
            }
        }
    }

    Ok(block)
}

fn map_header(src: &GetBlock, fields: &BlockFields) -> BlockHeader {
    let mut header = BlockHeader::new(src.number, src.hash, src.parent_hash);
    header.timestamp = pick(fields.timestamp, &src.timestamp).map(|secs| secs * 1000);
    header.nonce = pick(fields.nonce, &src.nonce);
    header.sha3_uncles = pick(fields.sha3_uncles, &src.sha3_uncles);
    header.logs_bloom = fields.logs_bloom.then_some(src.logs_bloom);
    header.transactions_root = pick(fields.transactions_root, &src.transactions_root);
    header.state_root = pick(fields.state_root, &src.state_root);
    header.receipts_root = pick(fields.receipts_root, &src.receipts_root);
    header.mix_hash = pick(fields.mix_hash, &src.mix_hash);
    header.miner = pick(fields.miner, &src.miner);
    header.difficulty = pick(fields.difficulty, &src.difficulty);
    header.total_difficulty = pick(fields.total_difficulty, &src.total_difficulty);
    header.extra_data = pick(fields.extra_data, &src.extra_data);
    header.size = pick(fields.size, &src.size);
    header.gas_limit = pick(fields.gas_limit, &src.gas_limit);
    header.gas_used = pick(fields.gas_used, &src.gas_used);
    header.base_fee_per_gas = pick(fields.base_fee_per_gas, &src.base_fee_per_gas);
    header.l1_block_number = pick(fields.l1_block_number, &src.l1_block_number);
    header
}

fn map_transactions(
    src: &RawTransactions,
    fields: &TransactionFields,
) -> std::result::Result<Vec<Transaction>, MappingError> {
    match src {
        RawTransactions::Hashes(hashes) => Ok(hashes
            .iter()
            .enumerate()
            .map(|(i, hash)| {
                let mut tx = Transaction::new(i as u32);
                tx.hash = fields.hash.then_some(*hash);
                tx
            })
            .collect()),
        RawTransactions::Full(txs) => txs
            .iter()
            .enumerate()
            .map(|(position, src)| {
                if src.transaction_index != position as u64 {
                    return Err(MappingError::TransactionIndexMismatch {
                        position,
                        index: src.transaction_index,
                    });
                }
                let index = narrow("transactionIndex", src.transaction_index)?;
                Ok(map_transaction(index, src, fields))
            })
            .collect(),
    }
}

fn map_transaction(index: u32, src: &RawTransaction, fields: &TransactionFields) -> Transaction {
    let mut tx = Transaction::new(index);
    tx.hash = fields.hash.then_some(src.hash);
    tx.from = pick(fields.from, &src.from);
    tx.to = pick(fields.to, &src.to);
    tx.gas = pick(fields.gas, &src.gas);
    tx.gas_price = pick(fields.gas_price, &src.gas_price);
    tx.max_fee_per_gas = pick(fields.max_fee_per_gas, &src.max_fee_per_gas);
    tx.max_priority_fee_per_gas = pick(fields.max_priority_fee_per_gas, &src.max_priority_fee_per_gas);
    tx.input = fields.input.then(|| src.input.clone());
    tx.sighash = Some(sighash(&src.input));
    tx.nonce = pick(fields.nonce, &src.nonce);
    tx.value = pick(fields.value, &src.value);
    tx.v = pick(fields.v, &src.v);
    tx.r = pick(fields.r, &src.r);
    tx.s = pick(fields.s, &src.s);
    tx.y_parity = pick(fields.y_parity, &src.y_parity);
    tx.chain_id = pick(fields.chain_id, &src.chain_id);
    tx.tx_type = pick(fields.tx_type, &src.tx_type);
    if fields.authorization_list {
        tx.authorization_list = src.authorization_list.as_ref().map(|list| {
            list.iter()
                .map(|a| Authorization {
                    chain_id: a.chain_id,
                    nonce: a.nonce,
                    address: a.address,
                    y_parity: a.y_parity,
                    r: a.r,
                    s: a.s,
                })
                .collect()
        });
    }
    tx
}

fn apply_receipt(tx: &mut Transaction, src: &RawReceipt, fields: &TransactionFields) {
    tx.gas_used = pick(fields.gas_used, &src.gas_used);
    tx.cumulative_gas_used = pick(fields.cumulative_gas_used, &src.cumulative_gas_used);
    tx.effective_gas_price = pick(fields.effective_gas_price, &src.effective_gas_price);
    tx.contract_address = pick(fields.contract_address, &src.contract_address);
    if src.tx_type.is_some() {
        tx.tx_type = pick(fields.tx_type, &src.tx_type);
    }
    tx.status = pick(fields.status, &src.status);
    tx.l1_fee = pick(fields.l1_fee, &src.l1_fee);
    tx.l1_fee_scalar = pick(fields.l1_fee_scalar, &src.l1_fee_scalar);
    tx.l1_gas_price = pick(fields.l1_gas_price, &src.l1_gas_price);
    tx.l1_gas_used = pick(fields.l1_gas_used, &src.l1_gas_used);
    tx.l1_base_fee_scalar = pick(fields.l1_base_fee_scalar, &src.l1_base_fee_scalar);
    tx.l1_blob_base_fee = pick(fields.l1_blob_base_fee, &src.l1_blob_base_fee);
    tx.l1_blob_base_fee_scalar = pick(fields.l1_blob_base_fee_scalar, &src.l1_blob_base_fee_scalar);
}

fn narrow(field: &'static str, value: u64) -> std::result::Result<u32, MappingError> {
    u32::try_from(value).map_err(|_| MappingError::IndexOverflow { field, value })
}

fn map_log(src: &RawLog, fields: &LogFields) -> std::result::Result<Log, MappingError> {
    let mut log = Log::new(
        narrow("logIndex", src.log_index)?,
        narrow("transactionIndex", src.transaction_index)?,
    );
    log.transaction_hash = pick(fields.transaction_hash, &src.transaction_hash);
    log.address = pick(fields.address, &src.address);
    log.data = pick(fields.data, &src.data);
    log.topics = pick(fields.topics, &src.topics);
    Ok(log)
}
