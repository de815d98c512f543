use serde::Deserialize;

/// How many times a finalized block (or its enrichment) is re-requested before giving up.
pub const MAX_RETRY_DEPTH: u32 = 9;

/// Switches for node consistency checks. Each flag disables exactly one check,
/// letting an operator accept a known non-compliant endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidationFlags {
    /// Don't flag blocks whose bloom is non-empty while `eth_getLogs` returned nothing.
    pub disable_logs_bloom_check: bool,
    /// Don't compare the number of receipts with the number of transactions.
    pub disable_tx_receipts_number_check: bool,
    /// Don't check that every batched receipt belongs to the requested block.
    pub disable_tx_receipt_block_hash_check: bool,
    /// Accept an empty `trace_block` result for a block with transactions.
    pub disable_missing_traces_check: bool,
    /// Accept `trace_block` frames that name another block.
    pub disable_trace_block_hash_check: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IngestConfig {
    pub validation: ValidationFlags,
    /// Use `trace_block` / replay APIs for traces instead of the debug call tracer.
    pub prefer_trace_api: bool,
    /// Always fetch state diffs with the prestate tracer.
    pub use_debug_api_for_state_diffs: bool,
    /// Passed verbatim as the `timeout` of debug tracer calls, e.g. `"30s"`.
    pub debug_trace_timeout: Option<String>,
    pub max_retry_depth: u32,
    /// Height used to identify the chain by its genesis hash.
    pub genesis_height: u64,
    pub priority: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            validation: ValidationFlags::default(),
            prefer_trace_api: false,
            use_debug_api_for_state_diffs: false,
            debug_trace_timeout: None,
            max_retry_depth: MAX_RETRY_DEPTH,
            genesis_height: 0,
            priority: 0,
        }
    }
}

impl IngestConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
