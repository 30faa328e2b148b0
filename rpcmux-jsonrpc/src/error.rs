//! JSON-RPC error objects and the routing-layer error taxonomy.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Standard JSON-RPC 2.0 codes
pub const CODE_PARSE_ERROR: i64 = -32700;
pub const CODE_INVALID_REQUEST: i64 = -32600;
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
pub const CODE_INVALID_PARAMS: i64 = -32602;
pub const CODE_INTERNAL_ERROR: i64 = -32603;

/// Implementation-defined server codes (-32000..-32099 range)
pub const CODE_TIMEOUT: i64 = -32000;
pub const CODE_SEND_ERROR: i64 = -32001;
pub const CODE_TRANSPORT_ERROR: i64 = -32002;

/// A JSON-RPC 2.0 error object as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn method_not_found() -> Self {
        Self::new(CODE_METHOD_NOT_FOUND, "method not found")
    }

    pub fn params_error(message: impl Into<String>) -> Self {
        Self::new(CODE_INVALID_PARAMS, message)
    }

    pub fn timeout() -> Self {
        Self::new(CODE_TIMEOUT, "request timeout")
    }

    pub fn send_error(message: impl Into<String>) -> Self {
        Self::new(CODE_SEND_ERROR, message)
    }

    pub fn transport_error(message: impl Into<String>) -> Self {
        Self::new(CODE_TRANSPORT_ERROR, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CODE_INTERNAL_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(CODE_INVALID_REQUEST, message)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.message)
    }
}

/// Abstract routing-layer error taxonomy.
///
/// Routing failures are converted to wire `RpcError` values and delivered as
/// error messages; this enum exists so internal code can signal the failure
/// kind without stringly-typed matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("method not found")]
    MethodNotFound,
    #[error("invalid params: {0}")]
    ParamsError(String),
    #[error("request timeout")]
    Timeout,
    #[error("send failed: {0}")]
    SendError(String),
    #[error("transport failure: {0}")]
    TransportError(String),
    #[error("malformed message: {0}")]
    ProtocolError(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorKind {
    /// Map the abstract kind onto the wire error object.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            ErrorKind::MethodNotFound => RpcError::method_not_found(),
            ErrorKind::ParamsError(msg) => RpcError::params_error(msg.clone()),
            ErrorKind::Timeout => RpcError::timeout(),
            ErrorKind::SendError(msg) => RpcError::send_error(msg.clone()),
            ErrorKind::TransportError(msg) => RpcError::transport_error(msg.clone()),
            ErrorKind::ProtocolError(msg) => RpcError::invalid_request(msg.clone()),
            ErrorKind::Internal(msg) => RpcError::internal(msg.clone()),
        }
    }
}
