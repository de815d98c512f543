//! Chain specific tracing quirks, identified by genesis hash.
//!
//! The thresholds below are operational facts about particular networks, not
//! derived values. Keep them literal.

use alloy_primitives::{b256, B256};

/// How traces of a given block have to be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMethod {
    /// A parity style replay API with a chain specific method name.
    Replay(&'static str),
    /// `debug_traceBlockByHash` with the call tracer.
    DebugCallTracer,
    /// No tracing API serves this height.
    Unavailable,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ChainQuirk {
    pub name: &'static str,
    pub genesis_hash: B256,
    /// Last height served by `legacy_trace_method`.
    pub legacy_trace_max_height: u64,
    pub legacy_trace_method: &'static str,
    /// First height served by the debug call tracer.
    pub debug_trace_min_height: u64,
    pub state_diffs_supported: bool,
}

impl ChainQuirk {
    pub fn trace_method(&self, height: u64) -> TraceMethod {
        if height <= self.legacy_trace_max_height {
            TraceMethod::Replay(self.legacy_trace_method)
        } else if height >= self.debug_trace_min_height {
            TraceMethod::DebugCallTracer
        } else {
            TraceMethod::Unavailable
        }
    }
}

pub static CHAIN_QUIRKS: &[ChainQuirk] = &[ChainQuirk {
    name: "Arbitrum One",
    genesis_hash: b256!("7ee576b35482195fc49205cec9af72ce14f003b9ae69f6ba0faef4514be8b442"),
    legacy_trace_max_height: 22207815,
    legacy_trace_method: "arbtrace_replayBlockTransactions",
    debug_trace_min_height: 22207818,
    state_diffs_supported: false,
}];

/// Strategy for traces and state diffs, resolved once per endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceStrategy {
    /// Configuration driven choice between replay, `trace_block` and debug tracers.
    Standard,
    /// Height-switched strategy of a known chain.
    Quirk(&'static ChainQuirk),
}

impl TraceStrategy {
    pub fn for_genesis(genesis_hash: &B256) -> Self {
        Self::lookup(CHAIN_QUIRKS, genesis_hash)
    }

    pub fn lookup(table: &'static [ChainQuirk], genesis_hash: &B256) -> Self {
        table
            .iter()
            .find(|quirk| &quirk.genesis_hash == genesis_hash)
            .map_or(TraceStrategy::Standard, TraceStrategy::Quirk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arbitrum_one_height_switch() {
        let strategy = TraceStrategy::for_genesis(&b256!(
            "7ee576b35482195fc49205cec9af72ce14f003b9ae69f6ba0faef4514be8b442"
        ));
        let TraceStrategy::Quirk(quirk) = strategy else {
            panic!("expected a quirk strategy");
        };

        assert!(!quirk.state_diffs_supported);
        assert_eq!(
            quirk.trace_method(22207815),
            TraceMethod::Replay("arbtrace_replayBlockTransactions")
        );
        assert_eq!(quirk.trace_method(22207816), TraceMethod::Unavailable);
        assert_eq!(quirk.trace_method(22207817), TraceMethod::Unavailable);
        assert_eq!(quirk.trace_method(22207818), TraceMethod::DebugCallTracer);
    }

    #[test]
    fn test_unknown_chain_is_standard() {
        assert_eq!(TraceStrategy::for_genesis(&B256::ZERO), TraceStrategy::Standard);
    }
}
