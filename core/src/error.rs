use alloy::transports::{RpcError as AlloyRpcError, TransportErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcErrorKind {
    /// Server returned an error response.
    #[error("server returned an error response: {0}")]
    ErrorResp(RpcErrorResponse),

    /// Server returned a null response when a non-null response was expected.
    #[error("server returned a null response when a non-null response was expected")]
    NullResp,

    /// Anything else the transport layer surfaced (connectivity, HTTP
    /// status, serialization).
    #[error("transport error: {message}")]
    TransportError { message: String },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcErrorResponse {
    /// The error code.
    pub code: i64,
    /// The error message (if any).
    pub message: String,
}

impl std::fmt::Display for RpcErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)
    }
}

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineError {
    #[error("RPC error at {rpc_url}: {message}")]
    RpcError {
        rpc_url: String,
        message: String,
        kind: RpcErrorKind,
    },

    #[error("Bad RPC configuration: {message}")]
    RpcConfigError { message: String },

    #[error("Signing error: {message}")]
    SigningError { message: String },

    #[error("Failed to build transaction: {message}")]
    TransactionBuildFailed { message: String },

    #[error("Invalid recipient row: {message}")]
    ValidationError { message: String },

    #[error("State persistence error: {message}")]
    StoreError { message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl EngineError {
    /// The JSON-RPC error payload, when this error carries one. Send-error
    /// classification only acts on payloads; transport failures are handled
    /// by endpoint rotation instead.
    pub fn rpc_error_response(&self) -> Option<&RpcErrorResponse> {
        match self {
            EngineError::RpcError {
                kind: RpcErrorKind::ErrorResp(resp),
                ..
            } => Some(resp),
            _ => None,
        }
    }
}

pub trait AlloyRpcErrorToEngineError {
    fn to_engine_error(&self, rpc_url: &str) -> EngineError;
}

impl AlloyRpcErrorToEngineError for AlloyRpcError<TransportErrorKind> {
    fn to_engine_error(&self, rpc_url: &str) -> EngineError {
        let kind = match self {
            AlloyRpcError::ErrorResp(payload) => RpcErrorKind::ErrorResp(RpcErrorResponse {
                code: payload.code,
                message: payload.message.to_string(),
            }),
            AlloyRpcError::NullResp => RpcErrorKind::NullResp,
            other => RpcErrorKind::TransportError {
                message: other.to_string(),
            },
        };

        EngineError::RpcError {
            rpc_url: rpc_url.to_string(),
            message: self.to_string(),
            kind,
        }
    }
}
