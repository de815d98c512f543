//! Trace frames of the replay APIs and call trees of the geth call tracer.

use super::pick;
use crate::error::MappingError;
use crate::model::selection::TraceFields;
use crate::model::{
    Trace, TraceCallAction, TraceCallResult, TraceCreateAction, TraceCreateResult, TraceData,
    TraceRewardAction, TraceSuicideAction,
};
use crate::rpc::data::{DebugFrame, DebugFrameResult, TraceFrame};
use alloy_primitives::Bytes;

/// First four bytes of call data.
pub fn sighash(input: &Bytes) -> Bytes {
    Bytes::copy_from_slice(&input[..input.len().min(4)])
}

fn some_if<T: PartialEq + Default>(value: T) -> Option<T> {
    (value != T::default()).then_some(value)
}

pub fn map_replay_frame(
    transaction_index: u32,
    frame: &TraceFrame,
    fields: &TraceFields,
) -> Result<Trace, MappingError> {
    let action = &frame.action;
    let result = frame.result.as_ref();
    let data = match frame.frame_type.as_str() {
        "create" => TraceData::Create {
            action: TraceCreateAction {
                from: action.from,
                value: pick(fields.create_value, &action.value),
                gas: pick(fields.create_gas, &action.gas),
                init: fields
                    .create_init
                    .then(|| action.init.clone().unwrap_or_default()),
            },
            result: result.and_then(|r| {
                some_if(TraceCreateResult {
                    gas_used: pick(fields.create_result_gas_used, &r.gas_used),
                    code: fields
                        .create_result_code
                        .then(|| r.code.clone().unwrap_or_default()),
                    address: pick(fields.create_result_address, &r.address),
                })
            }),
        },
        "call" => TraceData::Call {
            action: TraceCallAction {
                call_type: pick(fields.call_call_type, &action.call_type),
                from: action.from,
                to: action.to,
                value: pick(fields.call_value, &action.value),
                gas: pick(fields.call_gas, &action.gas),
                input: pick(fields.call_input, &action.input),
                sighash: action.input.as_ref().map(sighash),
            },
            result: result.and_then(|r| {
                some_if(TraceCallResult {
                    gas_used: pick(fields.call_result_gas_used, &r.gas_used),
                    output: fields
                        .call_result_output
                        .then(|| r.output.clone().unwrap_or_default()),
                })
            }),
        },
        "suicide" => TraceData::Suicide {
            action: TraceSuicideAction {
                address: pick(fields.suicide_address, &action.address),
                refund_address: action.refund_address,
                balance: pick(fields.suicide_balance, &action.balance),
            },
        },
        "reward" => TraceData::Reward {
            action: TraceRewardAction {
                author: action.author,
                value: pick(fields.reward_value, &action.value),
                reward_type: pick(fields.reward_type, &action.reward_type),
            },
        },
        other => return Err(MappingError::UnexpectedTraceType(other.to_string())),
    };

    let mut trace = Trace::new(transaction_index, frame.trace_address.clone(), data);
    trace.subtraces = pick(fields.subtraces, &frame.subtraces);
    trace.error = pick(fields.error, &frame.error);
    trace.revert_reason = pick(fields.revert_reason, &frame.revert_reason);
    Ok(trace)
}

/// Flatten one transaction's call tree depth first. A top level `STOP` produces nothing.
pub fn map_debug_frame(
    transaction_index: u32,
    frame: &DebugFrameResult,
    fields: &TraceFields,
) -> Result<Vec<Trace>, MappingError> {
    let root = &frame.result;
    if root.frame_type == "STOP" {
        if !root.calls.is_empty() {
            return Err(MappingError::StopFrameWithCalls);
        }
        return Ok(Vec::new());
    }
    let mut traces = Vec::new();
    let mut address = Vec::new();
    traverse(transaction_index, root, &mut address, fields, &mut traces)?;
    Ok(traces)
}

fn traverse(
    transaction_index: u32,
    frame: &DebugFrame,
    address: &mut Vec<u32>,
    fields: &TraceFields,
    out: &mut Vec<Trace>,
) -> Result<(), MappingError> {
    out.push(map_call_frame(transaction_index, frame, address.clone(), fields)?);
    for (i, call) in frame.calls.iter().enumerate() {
        address.push(i as u32);
        traverse(transaction_index, call, address, fields, out)?;
        address.pop();
    }
    Ok(())
}

fn map_call_frame(
    transaction_index: u32,
    frame: &DebugFrame,
    trace_address: Vec<u32>,
    fields: &TraceFields,
) -> Result<Trace, MappingError> {
    let data = match frame.frame_type.as_str() {
        "CREATE" | "CREATE2" => TraceData::Create {
            action: TraceCreateAction {
                from: frame.from,
                value: pick(fields.create_value, &frame.value),
                gas: pick(fields.create_gas, &frame.gas),
                init: fields.create_init.then(|| frame.input.clone()),
            },
            result: some_if(TraceCreateResult {
                gas_used: pick(fields.create_result_gas_used, &frame.gas_used),
                code: pick(fields.create_result_code, &frame.output),
                address: pick(fields.create_result_address, &frame.to),
            }),
        },
        "CALL" | "CALLCODE" | "DELEGATECALL" | "STATICCALL" | "INVALID" => TraceData::Call {
            action: TraceCallAction {
                call_type: fields
                    .call_call_type
                    .then(|| frame.frame_type.to_lowercase()),
                from: pick(fields.call_from, &frame.from),
                to: frame.to,
                value: pick(fields.call_value, &frame.value),
                gas: pick(fields.call_gas, &frame.gas),
                input: fields.call_input.then(|| frame.input.clone()),
                sighash: Some(sighash(&frame.input)),
            },
            result: some_if(TraceCallResult {
                gas_used: pick(fields.call_result_gas_used, &frame.gas_used),
                output: pick(fields.call_result_output, &frame.output),
            }),
        },
        "SELFDESTRUCT" => TraceData::Suicide {
            action: TraceSuicideAction {
                address: pick(fields.suicide_address, &frame.from),
                refund_address: frame.to,
                balance: pick(fields.suicide_balance, &frame.value),
            },
        },
        other => return Err(MappingError::UnexpectedTraceType(other.to_string())),
    };

    let mut trace = Trace::new(transaction_index, trace_address, data);
    if fields.subtraces {
        trace.subtraces = Some(frame.calls.len() as u32);
    }
    trace.error = frame.error.clone();
    trace.revert_reason = frame.revert_reason.clone();
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TraceKind;
    use crate::rpc::data::decode;
    use alloy_primitives::{address, bytes, U256};
    use serde_json::json;

    fn call_tree() -> DebugFrameResult {
        decode(
            "debug_traceBlockByHash",
            json!({
                "txHash": null,
                "result": {
                    "type": "CALL",
                    "from": "0x1111111111111111111111111111111111111111",
                    "to": "0x2222222222222222222222222222222222222222",
                    "value": "0x10",
                    "input": "0xa9059cbb0000",
                    "calls": [
                        {
                            "type": "STATICCALL",
                            "from": "0x2222222222222222222222222222222222222222",
                            "to": "0x3333333333333333333333333333333333333333",
                            "input": "0x70a08231",
                            "error": "out of gas"
                        },
                        {
                            "type": "CREATE2",
                            "from": "0x2222222222222222222222222222222222222222",
                            "to": "0x4444444444444444444444444444444444444444",
                            "input": "0x6080",
                            "calls": [{
                                "type": "SELFDESTRUCT",
                                "from": "0x4444444444444444444444444444444444444444",
                                "to": "0x1111111111111111111111111111111111111111",
                                "value": "0x1"
                            }]
                        }
                    ]
                }
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_debug_frame_addresses_are_dfs_paths() {
        let traces = map_debug_frame(3, &call_tree(), &TraceFields::default()).unwrap();

        let addresses: Vec<Vec<u32>> = traces.iter().map(|t| t.trace_address.clone()).collect();
        assert_eq!(addresses, vec![vec![], vec![0], vec![1], vec![1, 0]]);
        let kinds: Vec<TraceKind> = traces.iter().map(|t| t.kind()).collect();
        assert_eq!(
            kinds,
            vec![TraceKind::Call, TraceKind::Call, TraceKind::Create, TraceKind::Suicide]
        );
        assert!(traces.iter().all(|t| t.transaction_index == 3));
        assert_eq!(traces[1].error.as_deref(), Some("out of gas"));
    }

    #[test]
    fn test_debug_frame_projection() {
        let traces = map_debug_frame(0, &call_tree(), &TraceFields::default()).unwrap();
        match &traces[0].data {
            TraceData::Call { action, result } => {
                assert_eq!(action.to, Some(address!("2222222222222222222222222222222222222222")));
                assert_eq!(action.sighash, Some(bytes!("a9059cbb")));
                assert_eq!(action.from, None);
                assert_eq!(action.value, None);
                assert_eq!(action.input, None);
                assert_eq!(result, &None);
            }
            other => panic!("unexpected {other:?}"),
        }

        let fields = TraceFields {
            call_from: true,
            call_value: true,
            call_call_type: true,
            subtraces: true,
            ..Default::default()
        };
        let traces = map_debug_frame(0, &call_tree(), &fields).unwrap();
        assert_eq!(traces[0].subtraces, Some(2));
        match &traces[0].data {
            TraceData::Call { action, .. } => {
                assert_eq!(action.call_type.as_deref(), Some("call"));
                assert_eq!(action.from, Some(address!("1111111111111111111111111111111111111111")));
                assert_eq!(action.value, Some(U256::from(16)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_stop_frame() {
        let stop: DebugFrameResult =
            decode("debug_traceBlockByHash", json!({ "result": { "type": "STOP" } })).unwrap();
        assert!(map_debug_frame(0, &stop, &TraceFields::default()).unwrap().is_empty());

        let bad: DebugFrameResult = decode(
            "debug_traceBlockByHash",
            json!({ "result": { "type": "STOP", "calls": [{ "type": "CALL" }] } }),
        )
        .unwrap();
        assert_eq!(
            map_debug_frame(0, &bad, &TraceFields::default()),
            Err(MappingError::StopFrameWithCalls)
        );
    }

    #[test]
    fn test_unknown_debug_frame_type() {
        let frame: DebugFrameResult =
            decode("debug_traceBlockByHash", json!({ "result": { "type": "JUMP" } })).unwrap();
        assert_eq!(
            map_debug_frame(0, &frame, &TraceFields::default()),
            Err(MappingError::UnexpectedTraceType("JUMP".into()))
        );
    }

    #[test]
    fn test_replay_call_frame() {
        let frame: TraceFrame = decode(
            "trace_replayBlockTransactions",
            json!({
                "traceAddress": [0],
                "subtraces": 0,
                "type": "call",
                "action": {
                    "callType": "delegatecall",
                    "from": "0x1111111111111111111111111111111111111111",
                    "to": "0x2222222222222222222222222222222222222222",
                    "input": "0x095ea7b3ffff",
                    "gas": "0x5208"
                },
                "result": { "gasUsed": "0x100", "output": "0x" },
                "error": "Reverted"
            }),
        )
        .unwrap();

        let fields = TraceFields {
            error: true,
            call_result_gas_used: true,
            ..Default::default()
        };
        let trace = map_replay_frame(1, &frame, &fields).unwrap();

        assert_eq!(trace.trace_address, vec![0]);
        assert_eq!(trace.error.as_deref(), Some("Reverted"));
        assert_eq!(trace.subtraces, None);
        match trace.data {
            TraceData::Call { action, result } => {
                assert_eq!(action.from, Some(address!("1111111111111111111111111111111111111111")));
                assert_eq!(action.sighash, Some(bytes!("095ea7b3")));
                assert_eq!(action.call_type, None);
                assert_eq!(action.gas, None);
                assert_eq!(
                    result,
                    Some(TraceCallResult {
                        gas_used: Some(U256::from(256)),
                        output: None
                    })
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_sighash_of_short_input() {
        assert_eq!(sighash(&bytes!("a9")), bytes!("a9"));
        assert_eq!(sighash(&Bytes::new()), Bytes::new());
    }
}
