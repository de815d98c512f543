//! Declarative data requests.
//!
//! Every entry holds value-set predicates (absent or empty = match anything) plus a
//! fixed set of relation flags naming related items to pull in alongside a match.

use super::{DiffKey, FieldSelection, StateDiffKind, TraceKind};
use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogRelations {
    pub transaction: bool,
    pub transaction_logs: bool,
    pub transaction_traces: bool,
    pub transaction_state_diffs: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Vec<Address>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic0: Option<Vec<B256>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic1: Option<Vec<B256>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic2: Option<Vec<B256>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic3: Option<Vec<B256>>,
    #[serde(flatten)]
    pub relations: LogRelations,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransactionRelations {
    pub logs: bool,
    pub traces: bool,
    pub state_diffs: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<Address>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Vec<Address>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sighash: Option<Vec<Bytes>>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub tx_type: Option<Vec<u64>>,
    #[serde(flatten)]
    pub relations: TransactionRelations,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TraceRelations {
    pub transaction: bool,
    pub transaction_logs: bool,
    /// Pull in the whole subtree below the matched trace.
    pub subtraces: bool,
    /// Pull in every ancestor up to the root call.
    pub parents: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TraceRequest {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<Vec<TraceKind>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_from: Option<Vec<Address>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_to: Option<Vec<Address>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_from: Option<Vec<Address>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_sighash: Option<Vec<Bytes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suicide_refund_address: Option<Vec<Address>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward_author: Option<Vec<Address>>,
    #[serde(flatten)]
    pub relations: TraceRelations,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StateDiffRelations {
    pub transaction: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StateDiffRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Vec<Address>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Vec<DiffKey>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<Vec<StateDiffKind>>,
    #[serde(flatten)]
    pub relations: StateDiffRelations,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataRequest {
    pub logs: Vec<LogRequest>,
    pub transactions: Vec<TransactionRequest>,
    pub traces: Vec<TraceRequest>,
    pub state_diffs: Vec<StateDiffRequest>,
}

impl DataRequest {
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
            && self.transactions.is_empty()
            && self.traces.is_empty()
            && self.state_diffs.is_empty()
    }

    /// Whether the transaction list of a block is needed at all.
    pub fn transactions_requested(&self) -> bool {
        !self.transactions.is_empty()
            || self.logs.iter().any(|r| r.relations.transaction)
            || self.traces.iter().any(|r| r.relations.transaction)
            || self.state_diffs.iter().any(|r| r.relations.transaction)
    }

    pub fn logs_requested(&self) -> bool {
        !self.logs.is_empty()
            || self.transactions.iter().any(|r| r.relations.logs)
            || self.traces.iter().any(|r| r.relations.transaction_logs)
    }

    pub fn traces_requested(&self) -> bool {
        !self.traces.is_empty()
            || self.transactions.iter().any(|r| r.relations.traces)
            || self.logs.iter().any(|r| r.relations.transaction_traces)
    }

    pub fn state_diffs_requested(&self) -> bool {
        !self.state_diffs.is_empty()
            || self.transactions.iter().any(|r| r.relations.state_diffs)
            || self.logs.iter().any(|r| r.relations.transaction_state_diffs)
    }
}

/// What has to be fetched and mapped for a `DataRequest` under a `FieldSelection`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingRequest {
    pub fields: FieldSelection,
    pub data_request: DataRequest,
    /// Build one `Transaction` per body entry.
    pub transaction_list: bool,
    /// Build `Log` entities (from receipts or `eth_getLogs`).
    pub log_list: bool,
    /// Fetch full transaction objects rather than hashes.
    pub transactions: bool,
    /// Fetch logs with `eth_getLogs`.
    pub logs: bool,
    pub receipts: bool,
    pub traces: bool,
    pub state_diffs: bool,
}

impl MappingRequest {
    pub fn new(data_request: DataRequest, fields: FieldSelection) -> Self {
        let transaction_list = data_request.transactions_requested();
        let log_list = data_request.logs_requested();
        let receipts = transaction_list && fields.transaction.any_receipt_field();
        let transactions = !data_request.transactions.is_empty()
            || (transaction_list && fields.transaction.any_body_field());
        Self {
            transaction_list,
            log_list,
            transactions,
            logs: log_list && !receipts,
            receipts,
            traces: data_request.traces_requested(),
            state_diffs: data_request.state_diffs_requested(),
            fields,
            data_request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_flags_are_flattened() {
        let req: DataRequest = serde_json::from_str(
            r#"{
                "logs": [{
                    "address": ["0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"],
                    "transaction": true,
                    "transactionTraces": true
                }],
                "stateDiffs": [{ "key": ["balance"], "kind": ["*", "+"] }]
            }"#,
        )
        .unwrap();

        assert!(req.logs[0].relations.transaction);
        assert!(req.logs[0].relations.transaction_traces);
        assert!(!req.logs[0].relations.transaction_logs);
        assert_eq!(req.state_diffs[0].key, Some(vec![DiffKey::Balance]));
        assert_eq!(
            req.state_diffs[0].kind,
            Some(vec![StateDiffKind::Change, StateDiffKind::Add])
        );
    }

    #[test]
    fn test_log_request_uses_eth_get_logs() {
        let req = DataRequest {
            logs: vec![LogRequest {
                relations: LogRelations {
                    transaction: true,
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        };

        let mapping = MappingRequest::new(req, FieldSelection::defaults());

        assert!(mapping.transaction_list);
        assert!(mapping.transactions);
        assert!(mapping.log_list);
        assert!(mapping.logs);
        assert!(!mapping.receipts);
        assert!(!mapping.traces);
    }

    #[test]
    fn test_receipt_fields_switch_logs_to_receipts() {
        let mut fields = FieldSelection::defaults();
        fields.transaction.status = true;
        let req = DataRequest {
            transactions: vec![TransactionRequest {
                relations: TransactionRelations {
                    logs: true,
                    state_diffs: true,
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        };

        let mapping = MappingRequest::new(req, fields);

        assert!(mapping.receipts);
        assert!(mapping.log_list);
        assert!(!mapping.logs);
        assert!(mapping.state_diffs);
        assert!(!mapping.traces);
    }
}
