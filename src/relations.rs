//! Canonical ordering and cross references between the entities of a block.

use crate::model::{Block, Trace};
use std::cmp::Ordering;

/// Sort a block's collections and link every item to its transaction and every
/// trace to its parent and subtree. Running it again on a wired block changes nothing.
pub fn wire(block: &mut Block) {
    clear_links(block);

    block.transactions.sort_by_key(|tx| tx.transaction_index);
    block.logs.sort_by_key(|log| log.log_index);
    block.traces.sort_by(trace_order);

    let lookup = TransactionLookup::new(block);

    for (i, log) in block.logs.iter_mut().enumerate() {
        if let Some(tx) = lookup.get(log.transaction_index) {
            log.transaction = Some(tx);
            block.transactions[tx].logs.push(i);
        }
    }

    for i in 0..block.traces.len() {
        if let Some(tx) = lookup.get(block.traces[i].transaction_index) {
            block.traces[i].transaction = Some(tx);
            block.transactions[tx].traces.push(i);
        }
        // descendants of a trace form a contiguous run right after it
        let depth = block.traces[i].trace_address.len();
        let mut j = i + 1;
        while j < block.traces.len() && block.traces[i].is_ancestor_of(&block.traces[j]) {
            block.traces[i].children.push(j);
            if block.traces[j].trace_address.len() == depth + 1 {
                block.traces[j].parent = Some(i);
            }
            j += 1;
        }
    }

    for (i, diff) in block.state_diffs.iter_mut().enumerate() {
        if let Some(tx) = lookup.get(diff.transaction_index) {
            diff.transaction = Some(tx);
            block.transactions[tx].state_diffs.push(i);
        }
    }
}

/// `(transaction_index, trace_address)`, addresses compared component-wise with a
/// prefix sorting before its extensions.
pub fn trace_order(a: &Trace, b: &Trace) -> Ordering {
    a.transaction_index
        .cmp(&b.transaction_index)
        .then_with(|| a.trace_address.cmp(&b.trace_address))
}

fn clear_links(block: &mut Block) {
    for tx in &mut block.transactions {
        tx.logs.clear();
        tx.traces.clear();
        tx.state_diffs.clear();
    }
    for log in &mut block.logs {
        log.transaction = None;
    }
    for trace in &mut block.traces {
        trace.transaction = None;
        trace.parent = None;
        trace.children.clear();
    }
    for diff in &mut block.state_diffs {
        diff.transaction = None;
    }
}

/// `transaction_index` to position in the (sorted) transaction list.
struct TransactionLookup {
    positions: Vec<Option<usize>>,
}

impl TransactionLookup {
    fn new(block: &Block) -> Self {
        let len = block
            .transactions
            .last()
            .map_or(0, |tx| tx.transaction_index as usize + 1);
        let mut positions = vec![None; len];
        for (pos, tx) in block.transactions.iter().enumerate() {
            positions[tx.transaction_index as usize] = Some(pos);
        }
        Self { positions }
    }

    fn get(&self, transaction_index: u32) -> Option<usize> {
        self.positions
            .get(transaction_index as usize)
            .copied()
            .flatten()
    }
}
