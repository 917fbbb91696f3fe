//! Errors returned to RPC callers.

use crate::error::NodeError;
use thiserror::Error;

/// Error produced by an RPC method, mapped onto a JSON-RPC error code.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("the method {0} does not exist/is not available")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("notifications not supported")]
    NotificationsUnsupported,

    #[error("subscription not found")]
    SubscriptionNotFound,

    #[error("server is shutting down")]
    ShuttingDown,

    #[error("{0}")]
    Application(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Node(#[from] NodeError),
}

impl RpcError {
    /// Create an application error from any displayable cause.
    pub fn app(message: impl std::fmt::Display) -> Self {
        RpcError::Application(message.to_string())
    }

    /// The JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            RpcError::Parse(_) => -32700,
            RpcError::InvalidRequest(_) => -32600,
            RpcError::MethodNotFound(_) | RpcError::NotificationsUnsupported => -32601,
            RpcError::InvalidParams(_) => -32602,
            RpcError::Internal(_) => -32603,
            RpcError::SubscriptionNotFound
            | RpcError::ShuttingDown
            | RpcError::Application(_) => -32000,
            RpcError::Node(e) => e.to_rpc_error_code(),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Internal(err.to_string())
    }
}
