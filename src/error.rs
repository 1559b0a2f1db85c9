//! Error types for the MCP server.

use thiserror::Error;

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// MCP server errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed JSON-RPC message.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid method parameters.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot read/write failure. Callers treat this as "no snapshot
    /// available"; the snapshot is best-effort only.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidRequest(_) => codes::INVALID_REQUEST,
            Error::InvalidParams(_) => codes::INVALID_PARAMS,
            Error::Serialization(_) => codes::PARSE_ERROR,
            Error::Io(_) => -32002,
            Error::Snapshot(_) => codes::INTERNAL_ERROR,
            Error::Internal(_) => codes::INTERNAL_ERROR,
        }
    }
}

/// Standard JSON-RPC error codes.
pub mod codes {
    /// Parse error.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error.
    pub const INTERNAL_ERROR: i32 = -32603;
}
