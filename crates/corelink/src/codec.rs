//! Encoding of method results into wire envelopes and back.
//!
//! Structured values (maps and arrays) are JSON-encoded to a string and
//! flagged with `is_object`; primitives pass through untouched so small
//! results never pay the stringify cost. The receiving side reverses the
//! flag. Encoding failures are reported as a failed envelope even when the
//! handler itself succeeded.

use crate::error::{LinkError, Result};
use crate::protocol::MethodReturn;
use serde_json::Value;

/// Encode a raw handler result into a success envelope.
///
/// Returns a [`LinkError::Serialization`] failure envelope instead of an
/// error: every call outcome must reach the caller as an envelope.
pub fn encode_return(value: Value) -> MethodReturn {
    match encode_value(value) {
        Ok((is_object, data)) => MethodReturn {
            is_success: true,
            is_object,
            data,
        },
        Err(err) => fail_return(&err),
    }
}

/// Build a failure envelope from a dispatch fault.
pub fn fail_return(err: &LinkError) -> MethodReturn {
    MethodReturn {
        is_success: false,
        is_object: false,
        data: Value::String(err.to_string()),
    }
}

/// Split a value into its wire form: `(is_object, data)`.
fn encode_value(value: Value) -> Result<(bool, Value)> {
    match value {
        Value::Object(_) | Value::Array(_) => {
            let encoded = serde_json::to_string(&value).map_err(|e| LinkError::Serialization {
                message: e.to_string(),
            })?;
            Ok((true, Value::String(encoded)))
        }
        primitive => Ok((false, primitive)),
    }
}

/// Decode a method answer envelope on the client side.
///
/// A failure envelope becomes [`LinkError::MethodExecute`] carrying the
/// method name and the host-reported message.
pub fn decode_return(method: &str, ret: MethodReturn) -> Result<Value> {
    if !ret.is_success {
        let message = match ret.data {
            Value::String(s) => s,
            other => other.to_string(),
        };
        return Err(LinkError::MethodExecute {
            method: method.to_string(),
            message,
        });
    }

    if ret.is_object {
        let encoded = ret.data.as_str().ok_or_else(|| {
            LinkError::protocol(format!(
                "method '{}': object payload is not a string",
                method
            ))
        })?;
        return Ok(serde_json::from_str(encoded)?);
    }

    Ok(ret.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primitives_pass_through() {
        for value in [json!(42), json!("text"), json!(true), json!(null)] {
            let ret = encode_return(value.clone());
            assert!(ret.is_success);
            assert!(!ret.is_object);
            assert_eq!(ret.data, value);
        }
    }

    #[test]
    fn test_structured_values_are_double_encoded() {
        let value = json!({"a": [1, 2, 3], "b": {"nested": true}});
        let ret = encode_return(value.clone());

        assert!(ret.is_success);
        assert!(ret.is_object);
        let encoded = ret.data.as_str().expect("data should be a string");
        assert_eq!(serde_json::from_str::<Value>(encoded).unwrap(), value);
    }

    #[test]
    fn test_roundtrip_deep_equals() {
        for value in [
            json!(21),
            json!("plain"),
            json!([1, "two", null]),
            json!({"k": {"deep": [true, 0.5]}}),
        ] {
            let decoded = decode_return("echo", encode_return(value.clone())).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_failure_envelope_becomes_method_execute_error() {
        let ret = fail_return(&LinkError::MethodUnknown {
            name: "missing".into(),
        });
        let err = decode_return("missing", ret).unwrap_err();
        match err {
            LinkError::MethodExecute { method, message } => {
                assert_eq!(method, "missing");
                assert!(message.contains("not registered"));
            }
            other => panic!("Expected MethodExecute, got: {:?}", other),
        }
    }

    #[test]
    fn test_object_flag_with_non_string_payload_is_protocol_error() {
        let ret = MethodReturn {
            is_success: true,
            is_object: true,
            data: json!(5),
        };
        let err = decode_return("odd", ret).unwrap_err();
        assert!(matches!(err, LinkError::Protocol { .. }));
    }
}
