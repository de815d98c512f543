//! Per-transaction state changes from replay diffs and prestate diffs.

use crate::model::{DiffKey, StateDiff, StateDiffKind};
use crate::rpc::data::{
    quantity_bytes, DebugStateDiffResult, DebugStateMap, DiffObject, TraceDiff, TraceStateDiff,
};
use alloy_primitives::{Address, Bytes, B256, U256};
use std::collections::BTreeMap;

/// Explode a replay diff map into one record per (address, key). `"="` entries are dropped.
pub fn map_replay_state_diff(
    transaction_index: u32,
    diffs: &BTreeMap<Address, TraceStateDiff>,
) -> Vec<StateDiff> {
    let mut out = Vec::new();
    for (address, diff) in diffs {
        let entries = [
            (DiffKey::Code, &diff.code),
            (DiffKey::Balance, &diff.balance),
            (DiffKey::Nonce, &diff.nonce),
        ]
        .into_iter()
        .chain(diff.storage.iter().map(|(slot, d)| (DiffKey::Storage(*slot), d)));

        for (key, diff) in entries {
            if let Some(record) = replay_record(transaction_index, *address, key, diff) {
                out.push(record);
            }
        }
    }
    out
}

fn replay_record(
    transaction_index: u32,
    address: Address,
    key: DiffKey,
    diff: &TraceDiff,
) -> Option<StateDiff> {
    let TraceDiff::Diff(diff) = diff else {
        return None;
    };
    let (kind, prev, next) = match diff {
        DiffObject::Add(next) => (StateDiffKind::Add, None, Some(next.0.clone())),
        DiffObject::Change(change) => (
            StateDiffKind::Change,
            Some(change.from.0.clone()),
            Some(change.to.0.clone()),
        ),
        DiffObject::Delete(prev) => (StateDiffKind::Delete, Some(prev.0.clone()), None),
    };
    let mut record = StateDiff::new(transaction_index, address, key, kind);
    record.prev = prev;
    record.next = next;
    Some(record)
}

/// Compare `pre` and `post` snapshots of the prestate tracer in diff mode.
///
/// `post` only lists what changed, so account fields are diffed only when present
/// there. Storage slots missing from `post` were cleared.
pub fn map_debug_state_diff(
    transaction_index: u32,
    result: &DebugStateDiffResult,
) -> Vec<StateDiff> {
    let empty = DebugStateMap::default();
    let pre = &result.result.pre;
    let post = &result.result.post;

    let mut out = Vec::new();
    for (address, prev) in pre {
        let next = post.get(address).unwrap_or(&empty);
        diff_account(transaction_index, *address, prev, next, &mut out);
    }
    for (address, next) in post {
        if !pre.contains_key(address) {
            diff_account(transaction_index, *address, &empty, next, &mut out);
        }
    }
    out
}

fn diff_account(
    transaction_index: u32,
    address: Address,
    prev: &DebugStateMap,
    next: &DebugStateMap,
    out: &mut Vec<StateDiff>,
) {
    let mut push = |key: DiffKey, prev: Option<Bytes>, next: Option<Bytes>| {
        if let Some(record) = debug_record(transaction_index, address, key, prev, next) {
            out.push(record);
        }
    };

    if let Some(code) = &next.code {
        push(DiffKey::Code, prev.code.clone(), Some(code.clone()));
    }
    if let Some(balance) = next.balance {
        push(
            DiffKey::Balance,
            prev.balance.map(quantity_bytes),
            Some(quantity_bytes(balance)),
        );
    }
    if let Some(nonce) = next.nonce {
        push(
            DiffKey::Nonce,
            prev.nonce.map(|n| quantity_bytes(U256::from(n))),
            Some(quantity_bytes(U256::from(nonce))),
        );
    }

    let no_storage = BTreeMap::new();
    let prev_storage = prev.storage.as_ref().unwrap_or(&no_storage);
    let next_storage = next.storage.as_ref().unwrap_or(&no_storage);
    for (slot, value) in prev_storage {
        push(
            DiffKey::Storage(*slot),
            Some(slot_bytes(value)),
            next_storage.get(slot).map(slot_bytes),
        );
    }
    for (slot, value) in next_storage {
        if !prev_storage.contains_key(slot) {
            push(DiffKey::Storage(*slot), None, Some(slot_bytes(value)));
        }
    }
}

fn slot_bytes(value: &B256) -> Bytes {
    Bytes::copy_from_slice(value.as_slice())
}

fn debug_record(
    transaction_index: u32,
    address: Address,
    key: DiffKey,
    prev: Option<Bytes>,
    next: Option<Bytes>,
) -> Option<StateDiff> {
    let kind = match (&prev, &next) {
        (None, None) => return None,
        (None, Some(_)) => StateDiffKind::Add,
        (Some(_), None) => StateDiffKind::Delete,
        (Some(p), Some(n)) if p == n => return None,
        (Some(_), Some(_)) => StateDiffKind::Change,
    };
    let mut record = StateDiff::new(transaction_index, address, key, kind);
    record.prev = prev;
    record.next = next;
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::data::decode;
    use alloy_primitives::{address, bytes};
    use serde_json::json;

    const SLOT_1: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";
    const SLOT_2: &str = "0x0000000000000000000000000000000000000000000000000000000000000002";

    #[test]
    fn test_replay_diff_drops_unchanged() {
        let diffs: BTreeMap<Address, TraceStateDiff> = decode(
            "trace_replayBlockTransactions",
            json!({
                "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa": {
                    "balance": { "*": { "from": "0x10", "to": "0x8" } },
                    "code": "=",
                    "nonce": "=",
                    "storage": { SLOT_1: { "+": "0x05" } }
                }
            }),
        )
        .unwrap();

        let records = map_replay_state_diff(2, &diffs);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, DiffKey::Balance);
        assert_eq!(records[0].kind, StateDiffKind::Change);
        assert_eq!(records[0].prev, Some(bytes!("10")));
        assert_eq!(records[0].next, Some(bytes!("08")));
        assert_eq!(records[1].kind, StateDiffKind::Add);
        assert_eq!(records[1].prev, None);
        assert!(records.iter().all(|r| r.kind != StateDiffKind::NoChange));
        assert!(records.iter().all(|r| r.transaction_index == 2));
    }

    #[test]
    fn test_debug_prestate_classification() {
        let result: DebugStateDiffResult = decode(
            "debug_traceBlockByHash",
            json!({
                "result": {
                    "pre": {
                        "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa": {
                            "balance": "0x10",
                            "nonce": 1,
                            "storage": {
                                SLOT_1: "0x0000000000000000000000000000000000000000000000000000000000000007",
                                SLOT_2: "0x0000000000000000000000000000000000000000000000000000000000000009"
                            }
                        }
                    },
                    "post": {
                        "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa": {
                            "balance": "0x8",
                            "storage": {
                                SLOT_1: "0x0000000000000000000000000000000000000000000000000000000000000008"
                            }
                        },
                        "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb": {
                            "balance": "0x1",
                            "code": "0x6080"
                        }
                    }
                }
            }),
        )
        .unwrap();

        let records = map_debug_state_diff(0, &result);
        let summary: Vec<(Address, DiffKey, StateDiffKind)> =
            records.iter().map(|r| (r.address, r.key, r.kind)).collect();

        let a = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let b = address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        let slot = |s: &str| DiffKey::Storage(s.parse().unwrap());
        assert_eq!(
            summary,
            vec![
                (a, DiffKey::Balance, StateDiffKind::Change),
                (a, slot(SLOT_1), StateDiffKind::Change),
                (a, slot(SLOT_2), StateDiffKind::Delete),
                (b, DiffKey::Code, StateDiffKind::Add),
                (b, DiffKey::Balance, StateDiffKind::Add),
            ]
        );
        assert_eq!(records[0].prev, Some(bytes!("10")));
        assert_eq!(records[0].next, Some(bytes!("08")));
        assert_eq!(records[4].next, Some(bytes!("01")));
    }

    #[test]
    fn test_equal_values_are_skipped() {
        let result: DebugStateDiffResult = decode(
            "debug_traceBlockByHash",
            json!({
                "result": {
                    "pre": { "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa": { "nonce": 4 } },
                    "post": { "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa": { "nonce": 4 } }
                }
            }),
        )
        .unwrap();
        assert!(map_debug_state_diff(0, &result).is_empty());
    }
}
