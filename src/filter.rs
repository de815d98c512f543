//! Declarative item selection over a wired block.
//!
//! Every request entry compiles to a predicate over one entity kind plus the relation
//! flags it carries. Matching items and everything their flags pull in are collected
//! into an [`IncludeSet`]; pruning then drops the rest and rewrites the positional
//! references of the survivors. A kind the request says nothing about is not pruned.

use crate::model::{
    Block, DataRequest, DiffKey, Log, LogRelations, StateDiff, StateDiffKind, StateDiffRelations,
    Trace, TraceData, TraceKind, TraceRelations, Transaction, TransactionRelations,
};
use alloy_primitives::{Address, Bytes, B256};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Membership test for one property. Absent or empty value lists match anything;
/// otherwise an item without the property never matches.
#[derive(Debug, Clone)]
struct ValueSet<T>(Option<HashSet<T>>);

impl<T: Eq + Hash + Clone> ValueSet<T> {
    fn new(values: &Option<Vec<T>>) -> Self {
        ValueSet(
            values
                .as_ref()
                .filter(|values| !values.is_empty())
                .map(|values| values.iter().cloned().collect()),
        )
    }

    fn test(&self, value: Option<&T>) -> bool {
        match &self.0 {
            None => true,
            Some(set) => value.is_some_and(|v| set.contains(v)),
        }
    }
}

trait Predicate<T> {
    fn test(&self, item: &T) -> bool;
}

trait Relations: Copy {
    fn union(self, other: Self) -> Self;
}

impl Relations for LogRelations {
    fn union(self, other: Self) -> Self {
        LogRelations {
            transaction: self.transaction || other.transaction,
            transaction_logs: self.transaction_logs || other.transaction_logs,
            transaction_traces: self.transaction_traces || other.transaction_traces,
            transaction_state_diffs: self.transaction_state_diffs || other.transaction_state_diffs,
        }
    }
}

impl Relations for TransactionRelations {
    fn union(self, other: Self) -> Self {
        TransactionRelations {
            logs: self.logs || other.logs,
            traces: self.traces || other.traces,
            state_diffs: self.state_diffs || other.state_diffs,
        }
    }
}

impl Relations for TraceRelations {
    fn union(self, other: Self) -> Self {
        TraceRelations {
            transaction: self.transaction || other.transaction,
            transaction_logs: self.transaction_logs || other.transaction_logs,
            subtraces: self.subtraces || other.subtraces,
            parents: self.parents || other.parents,
        }
    }
}

impl Relations for StateDiffRelations {
    fn union(self, other: Self) -> Self {
        StateDiffRelations {
            transaction: self.transaction || other.transaction,
        }
    }
}

/// OR of entries for one entity kind.
#[derive(Debug, Clone)]
struct EntityFilter<P, R> {
    entries: Vec<(P, R)>,
}

impl<P, R: Relations> EntityFilter<P, R> {
    fn present(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Union of the relation flags of every matching entry, `None` if nothing matches.
    fn matches<T>(&self, item: &T) -> Option<R>
    where
        P: Predicate<T>,
    {
        self.entries
            .iter()
            .filter(|(predicate, _)| predicate.test(item))
            .map(|(_, relations)| *relations)
            .reduce(R::union)
    }
}

#[derive(Debug, Clone)]
struct LogPredicate {
    address: ValueSet<Address>,
    topics: [ValueSet<B256>; 4],
}

impl Predicate<Log> for LogPredicate {
    fn test(&self, log: &Log) -> bool {
        self.address.test(log.address.as_ref())
            && self
                .topics
                .iter()
                .enumerate()
                .all(|(i, topic)| topic.test(log.topic(i)))
    }
}

#[derive(Debug, Clone)]
struct TransactionPredicate {
    to: ValueSet<Address>,
    from: ValueSet<Address>,
    sighash: ValueSet<Bytes>,
    tx_type: ValueSet<u64>,
}

impl Predicate<Transaction> for TransactionPredicate {
    fn test(&self, tx: &Transaction) -> bool {
        self.to.test(tx.to.as_ref())
            && self.from.test(tx.from.as_ref())
            && self.sighash.test(tx.sighash.as_ref())
            && self.tx_type.test(tx.tx_type.as_ref())
    }
}

#[derive(Debug, Clone)]
struct TracePredicate {
    kind: ValueSet<TraceKind>,
    create_from: ValueSet<Address>,
    call_to: ValueSet<Address>,
    call_from: ValueSet<Address>,
    call_sighash: ValueSet<Bytes>,
    suicide_refund_address: ValueSet<Address>,
    reward_author: ValueSet<Address>,
}

impl Predicate<Trace> for TracePredicate {
    fn test(&self, trace: &Trace) -> bool {
        let (create_from, call_to, call_from, call_sighash, refund_address, author) =
            match &trace.data {
                TraceData::Create { action, .. } => (action.from.as_ref(), None, None, None, None, None),
                TraceData::Call { action, .. } => (
                    None,
                    action.to.as_ref(),
                    action.from.as_ref(),
                    action.sighash.as_ref(),
                    None,
                    None,
                ),
                TraceData::Suicide { action } => {
                    (None, None, None, None, action.refund_address.as_ref(), None)
                }
                TraceData::Reward { action } => (None, None, None, None, None, action.author.as_ref()),
            };
        self.kind.test(Some(&trace.kind()))
            && self.create_from.test(create_from)
            && self.call_to.test(call_to)
            && self.call_from.test(call_from)
            && self.call_sighash.test(call_sighash)
            && self.suicide_refund_address.test(refund_address)
            && self.reward_author.test(author)
    }
}

#[derive(Debug, Clone)]
struct StateDiffPredicate {
    address: ValueSet<Address>,
    key: ValueSet<DiffKey>,
    kind: ValueSet<StateDiffKind>,
}

impl Predicate<StateDiff> for StateDiffPredicate {
    fn test(&self, diff: &StateDiff) -> bool {
        self.address.test(Some(&diff.address))
            && self.key.test(Some(&diff.key))
            && self.kind.test(Some(&diff.kind))
    }
}

/// Positions (into the block's collections) of the items to keep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludeSet {
    pub logs: HashSet<usize>,
    pub transactions: HashSet<usize>,
    pub traces: HashSet<usize>,
    pub state_diffs: HashSet<usize>,
}

impl IncludeSet {
    fn add_transaction(&mut self, tx: Option<usize>) {
        if let Some(tx) = tx {
            self.transactions.insert(tx);
        }
    }

    /// A trace and all its ancestors.
    fn add_trace_stack(&mut self, block: &Block, mut trace: Option<usize>) {
        while let Some(i) = trace {
            self.traces.insert(i);
            trace = block.traces.get(i).and_then(|t| t.parent);
        }
    }
}

/// Compiled form of a [`DataRequest`].
#[derive(Debug, Clone)]
pub struct ItemFilter {
    logs: EntityFilter<LogPredicate, LogRelations>,
    transactions: EntityFilter<TransactionPredicate, TransactionRelations>,
    traces: EntityFilter<TracePredicate, TraceRelations>,
    state_diffs: EntityFilter<StateDiffPredicate, StateDiffRelations>,
}

impl ItemFilter {
    pub fn new(request: &DataRequest) -> Self {
        let logs = request
            .logs
            .iter()
            .map(|r| {
                let predicate = LogPredicate {
                    address: ValueSet::new(&r.address),
                    topics: [
                        ValueSet::new(&r.topic0),
                        ValueSet::new(&r.topic1),
                        ValueSet::new(&r.topic2),
                        ValueSet::new(&r.topic3),
                    ],
                };
                (predicate, r.relations)
            })
            .collect();
        let transactions = request
            .transactions
            .iter()
            .map(|r| {
                let predicate = TransactionPredicate {
                    to: ValueSet::new(&r.to),
                    from: ValueSet::new(&r.from),
                    sighash: ValueSet::new(&r.sighash),
                    tx_type: ValueSet::new(&r.tx_type),
                };
                (predicate, r.relations)
            })
            .collect();
        let traces = request
            .traces
            .iter()
            .map(|r| {
                let predicate = TracePredicate {
                    kind: ValueSet::new(&r.kind),
                    create_from: ValueSet::new(&r.create_from),
                    call_to: ValueSet::new(&r.call_to),
                    call_from: ValueSet::new(&r.call_from),
                    call_sighash: ValueSet::new(&r.call_sighash),
                    suicide_refund_address: ValueSet::new(&r.suicide_refund_address),
                    reward_author: ValueSet::new(&r.reward_author),
                };
                (predicate, r.relations)
            })
            .collect();
        let state_diffs = request
            .state_diffs
            .iter()
            .map(|r| {
                let predicate = StateDiffPredicate {
                    address: ValueSet::new(&r.address),
                    key: ValueSet::new(&r.key),
                    kind: ValueSet::new(&r.kind),
                };
                (predicate, r.relations)
            })
            .collect();

        ItemFilter {
            logs: EntityFilter { entries: logs },
            transactions: EntityFilter { entries: transactions },
            traces: EntityFilter { entries: traces },
            state_diffs: EntityFilter { entries: state_diffs },
        }
    }

    /// Items matched directly plus everything their relation flags pull in.
    pub fn include_set(&self, block: &Block) -> IncludeSet {
        let logs_by_tx = group_by_transaction(block.logs.iter().map(|l| l.transaction_index));
        let traces_by_tx = group_by_transaction(block.traces.iter().map(|t| t.transaction_index));
        let diffs_by_tx =
            group_by_transaction(block.state_diffs.iter().map(|d| d.transaction_index));
        let of_tx = |groups: &HashMap<u32, Vec<usize>>, tx: u32| -> Vec<usize> {
            groups.get(&tx).cloned().unwrap_or_default()
        };

        let mut include = IncludeSet::default();

        if self.logs.present() {
            for (i, log) in block.logs.iter().enumerate() {
                let Some(rel) = self.logs.matches(log) else {
                    continue;
                };
                include.logs.insert(i);
                if rel.transaction {
                    include.add_transaction(log.transaction);
                }
                if rel.transaction_logs {
                    include.logs.extend(of_tx(&logs_by_tx, log.transaction_index));
                }
                if rel.transaction_traces {
                    include.traces.extend(of_tx(&traces_by_tx, log.transaction_index));
                }
                if rel.transaction_state_diffs {
                    include
                        .state_diffs
                        .extend(of_tx(&diffs_by_tx, log.transaction_index));
                }
            }
        }

        if self.transactions.present() {
            for (i, tx) in block.transactions.iter().enumerate() {
                let Some(rel) = self.transactions.matches(tx) else {
                    continue;
                };
                include.transactions.insert(i);
                if rel.logs {
                    include.logs.extend(tx.logs.iter().copied());
                }
                if rel.traces {
                    include.traces.extend(tx.traces.iter().copied());
                }
                if rel.state_diffs {
                    include.state_diffs.extend(tx.state_diffs.iter().copied());
                }
            }
        }

        if self.traces.present() {
            for (i, trace) in block.traces.iter().enumerate() {
                let Some(rel) = self.traces.matches(trace) else {
                    continue;
                };
                include.traces.insert(i);
                if rel.parents {
                    include.add_trace_stack(block, trace.parent);
                }
                if rel.subtraces {
                    include.traces.extend(trace.children.iter().copied());
                }
                if rel.transaction {
                    include.add_transaction(trace.transaction);
                }
                if rel.transaction_logs {
                    include.logs.extend(of_tx(&logs_by_tx, trace.transaction_index));
                }
            }
        }

        if self.state_diffs.present() {
            for (i, diff) in block.state_diffs.iter().enumerate() {
                let Some(rel) = self.state_diffs.matches(diff) else {
                    continue;
                };
                include.state_diffs.insert(i);
                if rel.transaction {
                    include.add_transaction(diff.transaction);
                }
            }
        }

        include
    }

    pub fn apply(&self, block: &mut Block) {
        let include = self.include_set(block);
        let keep = |present: bool, set: &HashSet<usize>, len: usize| -> Vec<bool> {
            (0..len).map(|i| !present || set.contains(&i)).collect()
        };
        let masks = Masks {
            transactions: keep(
                self.transactions.present(),
                &include.transactions,
                block.transactions.len(),
            ),
            logs: keep(self.logs.present(), &include.logs, block.logs.len()),
            traces: keep(self.traces.present(), &include.traces, block.traces.len()),
            state_diffs: keep(
                self.state_diffs.present(),
                &include.state_diffs,
                block.state_diffs.len(),
            ),
        };
        prune(block, &masks);
    }
}

/// Keep only the requested items of a wired block.
pub fn filter_block(block: &mut Block, request: &DataRequest) {
    ItemFilter::new(request).apply(block)
}

fn group_by_transaction(indexes: impl Iterator<Item = u32>) -> HashMap<u32, Vec<usize>> {
    let mut groups: HashMap<u32, Vec<usize>> = HashMap::new();
    for (pos, tx) in indexes.enumerate() {
        groups.entry(tx).or_default().push(pos);
    }
    groups
}

struct Masks {
    transactions: Vec<bool>,
    logs: Vec<bool>,
    traces: Vec<bool>,
    state_diffs: Vec<bool>,
}

/// Old position to new position, `None` for dropped items.
fn remap(mask: &[bool]) -> Vec<Option<usize>> {
    let mut next = 0;
    mask.iter()
        .map(|&keep| {
            keep.then(|| {
                next += 1;
                next - 1
            })
        })
        .collect()
}

fn retain_masked<T>(items: &mut Vec<T>, mask: &[bool]) {
    let mut i = 0;
    items.retain(|_| {
        let keep = mask.get(i).copied().unwrap_or(false);
        i += 1;
        keep
    });
}

fn lookup(map: &[Option<usize>], i: usize) -> Option<usize> {
    map.get(i).copied().flatten()
}

fn prune(block: &mut Block, masks: &Masks) {
    let tx_map = remap(&masks.transactions);
    let log_map = remap(&masks.logs);
    let trace_map = remap(&masks.traces);
    let diff_map = remap(&masks.state_diffs);

    retain_masked(&mut block.transactions, &masks.transactions);
    retain_masked(&mut block.logs, &masks.logs);
    retain_masked(&mut block.traces, &masks.traces);
    retain_masked(&mut block.state_diffs, &masks.state_diffs);

    for tx in &mut block.transactions {
        tx.logs = tx.logs.iter().filter_map(|&i| lookup(&log_map, i)).collect();
        tx.traces = tx.traces.iter().filter_map(|&i| lookup(&trace_map, i)).collect();
        tx.state_diffs = tx
            .state_diffs
            .iter()
            .filter_map(|&i| lookup(&diff_map, i))
            .collect();
    }
    for log in &mut block.logs {
        log.transaction = log.transaction.and_then(|i| lookup(&tx_map, i));
    }
    for trace in &mut block.traces {
        trace.transaction = trace.transaction.and_then(|i| lookup(&tx_map, i));
        trace.parent = trace.parent.and_then(|i| lookup(&trace_map, i));
        trace.children = trace
            .children
            .iter()
            .filter_map(|&i| lookup(&trace_map, i))
            .collect();
    }
    for diff in &mut block.state_diffs {
        diff.transaction = diff.transaction.and_then(|i| lookup(&tx_map, i));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BlockHeader, LogRequest, StateDiffRequest, TraceCallAction, TraceCreateAction,
        TraceRequest, TransactionRequest,
    };
    use crate::relations::wire;
    use alloy_primitives::address;

    const AAAA: Address = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    const BBBB: Address = address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");

    fn log(log_index: u32, tx: u32, address: Address) -> Log {
        let mut log = Log::new(log_index, tx);
        log.address = Some(address);
        log.topics = Some(vec![B256::repeat_byte(log_index as u8)]);
        log
    }

    fn call(tx: u32, trace_address: &[u32], to: Address) -> Trace {
        Trace::new(
            tx,
            trace_address.to_vec(),
            TraceData::Call {
                action: TraceCallAction {
                    to: Some(to),
                    ..Default::default()
                },
                result: None,
            },
        )
    }

    fn create(tx: u32, trace_address: &[u32], from: Address) -> Trace {
        Trace::new(
            tx,
            trace_address.to_vec(),
            TraceData::Create {
                action: TraceCreateAction {
                    from: Some(from),
                    ..Default::default()
                },
                result: None,
            },
        )
    }

    fn wired(
        transactions: u32,
        logs: Vec<Log>,
        traces: Vec<Trace>,
        state_diffs: Vec<StateDiff>,
    ) -> Block {
        let mut block = Block::new(BlockHeader::new(1, B256::ZERO, B256::ZERO));
        block.transactions = (0..transactions).map(Transaction::new).collect();
        block.logs = logs;
        block.traces = traces;
        block.state_diffs = state_diffs;
        wire(&mut block);
        block
    }

    #[test]
    fn test_log_with_transaction() {
        let mut block = wired(1, vec![log(0, 0, AAAA), log(1, 0, BBBB)], vec![], vec![]);
        let request = DataRequest {
            logs: vec![LogRequest {
                address: Some(vec![AAAA]),
                relations: LogRelations {
                    transaction: true,
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        };

        filter_block(&mut block, &request);

        assert_eq!(block.logs.len(), 1);
        assert_eq!(block.logs[0].address, Some(AAAA));
        assert_eq!(block.logs[0].transaction, Some(0));
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.transactions[0].logs, vec![0]);
    }

    #[test]
    fn test_unmatched_transactions_are_dropped() {
        let mut block = wired(3, vec![log(0, 2, AAAA)], vec![], vec![]);
        let request = DataRequest {
            logs: vec![LogRequest {
                relations: LogRelations {
                    transaction: true,
                    ..Default::default()
                },
                ..Default::default()
            }],
            transactions: vec![TransactionRequest {
                from: Some(vec![BBBB]),
                ..Default::default()
            }],
            ..Default::default()
        };

        filter_block(&mut block, &request);

        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.transactions[0].transaction_index, 2);
        assert_eq!(block.logs[0].transaction, Some(0));
    }

    #[test]
    fn test_unrequested_kinds_are_untouched() {
        let mut block = wired(
            2,
            vec![log(0, 0, AAAA), log(1, 1, BBBB)],
            vec![call(0, &[], BBBB)],
            vec![],
        );
        let request = DataRequest {
            logs: vec![LogRequest {
                address: Some(vec![AAAA]),
                ..Default::default()
            }],
            ..Default::default()
        };

        filter_block(&mut block, &request);

        assert_eq!(block.logs.len(), 1);
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.traces.len(), 1);
        assert_eq!(block.transactions[0].logs, vec![0]);
        assert!(block.transactions[1].logs.is_empty());
    }

    #[test]
    fn test_empty_request_changes_nothing() {
        let mut block = wired(1, vec![log(0, 0, AAAA)], vec![call(0, &[], AAAA)], vec![]);
        let before = block.clone();
        filter_block(&mut block, &DataRequest::default());
        assert_eq!(block, before);
    }

    #[test]
    fn test_trace_parents_and_subtraces() {
        let traces = vec![
            call(0, &[], AAAA),
            call(0, &[0], AAAA),
            call(0, &[0, 0], BBBB),
            call(0, &[0, 0, 0], AAAA),
            call(0, &[1], AAAA),
        ];
        let mut block = wired(1, vec![], traces, vec![]);
        let request = DataRequest {
            traces: vec![TraceRequest {
                call_to: Some(vec![BBBB]),
                relations: TraceRelations {
                    parents: true,
                    subtraces: true,
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        };

        filter_block(&mut block, &request);

        let addresses: Vec<Vec<u32>> = block.traces.iter().map(|t| t.trace_address.clone()).collect();
        assert_eq!(addresses, vec![vec![], vec![0], vec![0, 0], vec![0, 0, 0]]);
        assert_eq!(block.traces[0].children, vec![1, 2, 3]);
        assert_eq!(block.traces[3].parent, Some(2));
        // transactions are not requested, so only the dropped trace leaves their list
        assert_eq!(block.transactions[0].traces, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_variant_specific_predicate() {
        let mut block = wired(
            1,
            vec![],
            vec![create(0, &[], AAAA), call(0, &[0], AAAA)],
            vec![],
        );
        let request = DataRequest {
            traces: vec![TraceRequest {
                create_from: Some(vec![AAAA]),
                ..Default::default()
            }],
            ..Default::default()
        };

        filter_block(&mut block, &request);

        assert_eq!(block.traces.len(), 1);
        assert_eq!(block.traces[0].kind(), TraceKind::Create);
        assert!(block.traces[0].children.is_empty());
    }

    #[test]
    fn test_request_entries_are_or_combined() {
        let mut block = wired(
            1,
            vec![log(0, 0, AAAA), log(1, 0, BBBB), log(2, 0, Address::ZERO)],
            vec![],
            vec![],
        );
        let request = DataRequest {
            logs: vec![
                LogRequest {
                    address: Some(vec![AAAA]),
                    ..Default::default()
                },
                LogRequest {
                    topic0: Some(vec![B256::repeat_byte(1)]),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        filter_block(&mut block, &request);

        let indexes: Vec<u32> = block.logs.iter().map(|l| l.log_index).collect();
        assert_eq!(indexes, vec![0, 1]);
    }

    #[test]
    fn test_missing_property_fails_predicate() {
        let mut anonymous = Log::new(0, 0);
        anonymous.topics = Some(vec![]);
        let mut block = wired(1, vec![anonymous], vec![], vec![]);
        let request = DataRequest {
            logs: vec![LogRequest {
                topic0: Some(vec![B256::ZERO]),
                ..Default::default()
            }],
            ..Default::default()
        };

        filter_block(&mut block, &request);
        assert!(block.logs.is_empty());
    }

    #[test]
    fn test_state_diff_with_transaction() {
        let diffs = vec![
            StateDiff::new(0, AAAA, DiffKey::Balance, StateDiffKind::Change),
            StateDiff::new(1, AAAA, DiffKey::Nonce, StateDiffKind::Change),
        ];
        let mut block = wired(2, vec![], vec![], diffs);
        let request = DataRequest {
            state_diffs: vec![StateDiffRequest {
                key: Some(vec![DiffKey::Nonce]),
                relations: StateDiffRelations { transaction: true },
                ..Default::default()
            }],
            transactions: vec![TransactionRequest {
                to: Some(vec![BBBB]),
                ..Default::default()
            }],
            ..Default::default()
        };

        filter_block(&mut block, &request);

        assert_eq!(block.state_diffs.len(), 1);
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.transactions[0].transaction_index, 1);
        assert_eq!(block.transactions[0].state_diffs, vec![0]);
        assert_eq!(block.state_diffs[0].transaction, Some(0));
    }

    #[test]
    fn test_filter_is_idempotent() {
        let mut block = wired(
            2,
            vec![log(0, 0, AAAA), log(1, 1, BBBB)],
            vec![call(0, &[], AAAA), call(0, &[0], BBBB), call(1, &[], BBBB)],
            vec![],
        );
        let request = DataRequest {
            logs: vec![LogRequest {
                address: Some(vec![BBBB]),
                relations: LogRelations {
                    transaction: true,
                    transaction_traces: true,
                    ..Default::default()
                },
                ..Default::default()
            }],
            traces: vec![TraceRequest {
                call_to: Some(vec![BBBB]),
                relations: TraceRelations {
                    parents: true,
                    ..Default::default()
                },
                ..Default::default()
            }],
            transactions: vec![TransactionRequest {
                to: Some(vec![AAAA]),
                ..Default::default()
            }],
            ..Default::default()
        };

        filter_block(&mut block, &request);
        let once = block.clone();
        filter_block(&mut block, &request);
        assert_eq!(block, once);
    }
}
