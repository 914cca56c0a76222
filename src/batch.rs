//! Decoding of flushed call queues.
//!
//! A flushed queue is the array `[moduleIds, methodIds, params, callId?]`,
//! three parallel arrays plus an optional id for the first call. Ids of later
//! calls in the batch follow consecutively.

use crate::error::{JsError, Result};
use crate::value::BridgeValue;
use serde::{Deserialize, Serialize};

const MODULE_IDS: usize = 0;
const METHOD_IDS: usize = 1;
const PARAMS: usize = 2;
const CALL_ID: usize = 3;

/// One native method invocation requested by a script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodCall {
    /// Index of the native module
    pub module_id: u32,
    /// Index of the method within the module
    pub method_id: u32,
    /// Call arguments
    pub arguments: Vec<BridgeValue>,
    /// Call id, when the script tracks them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<u64>,
}

/// Decode a flushed queue into individual calls.
///
/// `Null` (an empty flush) decodes to no calls.
pub fn parse_method_calls(queue: &BridgeValue) -> Result<Vec<MethodCall>> {
    let parts = match queue {
        BridgeValue::Null => return Ok(Vec::new()),
        BridgeValue::Array(parts) => parts,
        other => {
            return Err(JsError::invalid_argument(format!(
                "Did not get valid calls back from JS: expected array, got {}",
                other.type_name()
            ))
            .into())
        }
    };

    if parts.len() < PARAMS + 1 {
        return Err(JsError::invalid_argument(format!(
            "Did not get valid calls back from JS: expected at least 3 parts, got {}",
            parts.len()
        ))
        .into());
    }

    let module_ids = array_part(parts, MODULE_IDS, "moduleIds")?;
    let method_ids = array_part(parts, METHOD_IDS, "methodIds")?;
    let params = array_part(parts, PARAMS, "params")?;

    if module_ids.len() != method_ids.len() || module_ids.len() != params.len() {
        return Err(JsError::invalid_argument(format!(
            "Did not get valid calls back from JS: {} module ids, {} method ids, {} param lists",
            module_ids.len(),
            method_ids.len(),
            params.len()
        ))
        .into());
    }

    let first_call_id = match parts.get(CALL_ID) {
        None | Some(BridgeValue::Null) => None,
        Some(value) => Some(to_index(value, "callId")? as u64),
    };

    module_ids
        .iter()
        .zip(method_ids)
        .zip(params)
        .enumerate()
        .map(|(i, ((module_id, method_id), arguments))| -> Result<MethodCall> {
            let arguments = arguments.as_array().ok_or_else(|| {
                JsError::invalid_argument(format!(
                    "Call arguments should be an array, got {}",
                    arguments.type_name()
                ))
            })?;
            Ok(MethodCall {
                module_id: to_index(module_id, "moduleId")?,
                method_id: to_index(method_id, "methodId")?,
                arguments: arguments.clone(),
                call_id: first_call_id.map(|id| id + i as u64),
            })
        })
        .collect()
}

fn array_part<'a>(parts: &'a [BridgeValue], index: usize, name: &str) -> Result<&'a Vec<BridgeValue>> {
    parts[index].as_array().ok_or_else(|| {
        JsError::invalid_argument(format!(
            "Did not get valid calls back from JS: {} should be an array, got {}",
            name,
            parts[index].type_name()
        ))
        .into()
    })
}

fn to_index(value: &BridgeValue, name: &str) -> Result<u32> {
    match value.as_number() {
        Some(n) if n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 => Ok(n as u32),
        _ => Err(JsError::invalid_argument(format!(
            "{} should be a non-negative integer, got {:?}",
            name, value
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn queue(json: &str) -> BridgeValue {
        BridgeValue::from_json(json).unwrap()
    }

    #[test]
    fn test_parse_batch_with_call_ids() {
        let calls = parse_method_calls(&queue(r#"[[3, 7], [1, 0], [["a"], [1, true]], 40]"#)).unwrap();

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].module_id, 3);
        assert_eq!(calls[0].method_id, 1);
        assert_eq!(calls[0].arguments, vec![BridgeValue::from("a")]);
        assert_eq!(calls[0].call_id, Some(40));
        assert_eq!(calls[1].call_id, Some(41));
    }

    #[test]
    fn test_parse_batch_without_call_id() {
        let calls = parse_method_calls(&queue(r#"[[1], [2], [[]]]"#)).unwrap();
        assert_eq!(calls[0].call_id, None);
        assert!(calls[0].arguments.is_empty());
    }

    #[test]
    fn test_null_queue_is_empty() {
        assert!(parse_method_calls(&BridgeValue::Null).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_queues_rejected() {
        for bad in [
            r#"{"a": 1}"#,
            r#"[[1], [2]]"#,
            r#"[[1, 2], [2], [[], []]]"#,
            r#"[[1], [2], ["not-an-array"]]"#,
            r#"[[-1], [2], [[]]]"#,
            r#"[[1.5], [2], [[]]]"#,
        ] {
            let err = parse_method_calls(&queue(bad)).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidArgument, "input: {}", bad);
        }
    }
}
