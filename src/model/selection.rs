//! Per-entity allow-lists of optional properties.
//!
//! A selection both shrinks what is requested from the node and decides which
//! canonical fields the mapper fills in. Unset flags mean "not requested".

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlockFields {
    pub nonce: bool,
    pub sha3_uncles: bool,
    pub logs_bloom: bool,
    pub transactions_root: bool,
    pub state_root: bool,
    pub receipts_root: bool,
    pub mix_hash: bool,
    pub miner: bool,
    pub difficulty: bool,
    pub total_difficulty: bool,
    pub extra_data: bool,
    pub size: bool,
    pub gas_limit: bool,
    pub gas_used: bool,
    pub base_fee_per_gas: bool,
    pub timestamp: bool,
    pub l1_block_number: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransactionFields {
    pub hash: bool,
    pub from: bool,
    pub to: bool,
    pub gas: bool,
    pub gas_price: bool,
    pub max_fee_per_gas: bool,
    pub max_priority_fee_per_gas: bool,
    pub sighash: bool,
    pub input: bool,
    pub nonce: bool,
    pub value: bool,
    pub v: bool,
    pub r: bool,
    pub s: bool,
    pub y_parity: bool,
    pub chain_id: bool,
    pub authorization_list: bool,
    // receipt
    pub gas_used: bool,
    pub cumulative_gas_used: bool,
    pub effective_gas_price: bool,
    pub contract_address: bool,
    #[serde(rename = "type")]
    pub tx_type: bool,
    pub status: bool,
    pub l1_fee: bool,
    pub l1_fee_scalar: bool,
    pub l1_gas_price: bool,
    pub l1_gas_used: bool,
    pub l1_base_fee_scalar: bool,
    pub l1_blob_base_fee: bool,
    pub l1_blob_base_fee_scalar: bool,
}

impl TransactionFields {
    /// Fields only available from the transaction object itself.
    pub fn any_body_field(&self) -> bool {
        self.from
            || self.to
            || self.gas
            || self.gas_price
            || self.max_fee_per_gas
            || self.max_priority_fee_per_gas
            || self.input
            || self.nonce
            || self.value
            || self.v
            || self.r
            || self.s
            || self.y_parity
            || self.chain_id
            || self.authorization_list
    }

    /// Fields only available from the transaction receipt.
    pub fn any_receipt_field(&self) -> bool {
        self.gas_used
            || self.cumulative_gas_used
            || self.effective_gas_price
            || self.contract_address
            || self.tx_type
            || self.status
            || self.l1_fee
            || self.l1_fee_scalar
            || self.l1_gas_price
            || self.l1_gas_used
            || self.l1_base_fee_scalar
            || self.l1_blob_base_fee
            || self.l1_blob_base_fee_scalar
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogFields {
    pub transaction_hash: bool,
    pub address: bool,
    pub data: bool,
    pub topics: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TraceFields {
    pub call_call_type: bool,
    pub call_from: bool,
    pub call_gas: bool,
    pub call_input: bool,
    pub call_result_gas_used: bool,
    pub call_result_output: bool,
    pub call_sighash: bool,
    pub call_to: bool,
    pub call_value: bool,
    pub create_from: bool,
    pub create_gas: bool,
    pub create_init: bool,
    pub create_result_address: bool,
    pub create_result_code: bool,
    pub create_result_gas_used: bool,
    pub create_value: bool,
    pub error: bool,
    pub revert_reason: bool,
    pub reward_author: bool,
    pub reward_type: bool,
    pub reward_value: bool,
    pub subtraces: bool,
    pub suicide_address: bool,
    pub suicide_balance: bool,
    pub suicide_refund_address: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StateDiffFields {
    pub kind: bool,
    pub next: bool,
    pub prev: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldSelection {
    pub block: BlockFields,
    pub transaction: TransactionFields,
    pub log: LogFields,
    pub trace: TraceFields,
    pub state_diff: StateDiffFields,
}

/// A user supplied selection: `false` removes a default, `true` adds a field, `null` is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldSelectionPatch {
    pub block: serde_json::Map<String, serde_json::Value>,
    pub transaction: serde_json::Map<String, serde_json::Value>,
    pub log: serde_json::Map<String, serde_json::Value>,
    pub trace: serde_json::Map<String, serde_json::Value>,
    pub state_diff: serde_json::Map<String, serde_json::Value>,
}

impl FieldSelection {
    /// Fields delivered when the user does not ask otherwise.
    pub fn defaults() -> Self {
        Self {
            block: BlockFields {
                timestamp: true,
                ..Default::default()
            },
            transaction: TransactionFields {
                hash: true,
                from: true,
                to: true,
                ..Default::default()
            },
            log: LogFields {
                transaction_hash: true,
                address: true,
                data: true,
                topics: true,
            },
            trace: TraceFields {
                error: true,
                ..Default::default()
            },
            state_diff: StateDiffFields {
                kind: true,
                next: true,
                prev: true,
            },
        }
    }

    /// Merge a user selection over [`FieldSelection::defaults`]. State diff `kind`
    /// stays selected even when the patch turns it off.
    pub fn with_defaults(patch: &FieldSelectionPatch) -> serde_json::Result<Self> {
        let defaults = Self::defaults();
        let mut fields = Self {
            block: merge(&defaults.block, &patch.block)?,
            transaction: merge(&defaults.transaction, &patch.transaction)?,
            log: merge(&defaults.log, &patch.log)?,
            trace: merge(&defaults.trace, &patch.trace)?,
            state_diff: merge(&defaults.state_diff, &patch.state_diff)?,
        };
        fields.state_diff.kind = true;
        Ok(fields)
    }
}

fn merge<T>(defaults: &T, patch: &serde_json::Map<String, serde_json::Value>) -> serde_json::Result<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    let mut value = serde_json::to_value(defaults)?;
    if let serde_json::Value::Object(fields) = &mut value {
        for (key, flag) in patch {
            if !flag.is_null() {
                fields.insert(key.clone(), flag.clone());
            }
        }
    }
    serde_json::from_value(value)
}
