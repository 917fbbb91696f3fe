//! JSON-RPC 2.0 message types and parameter helpers.

use super::error::RpcError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(params),
            id: Some(Value::Number(id.into())),
        }
    }
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }

    pub fn from_result(id: Option<Value>, result: Result<Value, RpcError>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(e) => Self::error(id, e.code(), e.to_string()),
        }
    }
}

/// Build a subscription notification for `namespace`.
pub fn notification(namespace: &str, subscription: &str, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": format!("{}_subscription", namespace),
        "params": {
            "subscription": subscription,
            "result": result,
        },
    })
}

// ============================================================================
// Parameter extraction helpers
// ============================================================================

/// Extract an optional parameter, either positionally from an array or by
/// name from an object. `null` counts as absent.
pub fn param<T: DeserializeOwned>(
    params: &Value,
    index: usize,
    name: &str,
) -> Result<Option<T>, RpcError> {
    let raw = match params {
        Value::Array(items) => items.get(index),
        Value::Object(map) => map.get(name),
        Value::Null => None,
        _ => {
            return Err(RpcError::InvalidParams(
                "params must be an array or an object".to_string(),
            ))
        }
    };
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| RpcError::InvalidParams(format!("invalid {}: {}", name, e))),
    }
}

/// Extract a required parameter or return an error.
pub fn require_param<T: DeserializeOwned>(
    params: &Value,
    index: usize,
    name: &str,
) -> Result<T, RpcError> {
    param(params, index, name)?
        .ok_or_else(|| RpcError::InvalidParams(format!("missing required parameter: {}", name)))
}
