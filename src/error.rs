//! Error types for the MCP registry gateway

use std::io;

use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A registered service's `path` or `name` already exists
    #[error("Service conflict: {0}")]
    ServiceConflict(String),

    /// No service matches the requested path or name
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// The service cannot be enabled in its current scan status
    #[error("Service cannot be enabled: {0}")]
    ForbiddenByScanStatus(String),

    /// Credential missing, malformed, or failed verification
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Principal authenticated but lacks scope for the requested resource
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// Upstream transport failure (connection refused, DNS, TLS, ...)
    #[error("Upstream transport error: {0}")]
    Upstream(String),

    /// Upstream did not respond within the configured deadline
    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    /// MCP protocol violation (bad handshake, malformed JSON-RPC envelope)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON-RPC error surfaced to a caller
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// Error code
        code: i32,
        /// Error message
        message: String,
        /// Optional data
        data: Option<serde_json::Value>,
    },

    /// Persistence I/O failure (disk full, permission denied, ...)
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The tool index is unavailable (embedding model failed to load or run)
    #[error("Tool index unavailable: {0}")]
    IndexUnavailable(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client/server error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server shutdown in progress
    #[error("Server shutdown")]
    Shutdown,

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a JSON-RPC error
    pub fn json_rpc(code: i32, message: impl Into<String>) -> Self {
        Self::JsonRpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Map to the JSON-RPC error code this variant represents
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::JsonRpc { code, .. } => *code,
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::Protocol(_) => rpc_codes::INVALID_REQUEST,
            Self::ServiceNotFound(_) => -32001,
            Self::Upstream(_) | Self::UpstreamTimeout(_) => -32000,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }

    /// Map to the HTTP status code this variant surfaces at the edge
    #[must_use]
    pub fn to_status_code(&self) -> u16 {
        match self {
            Self::AuthFailed(_) => 401,
            Self::Forbidden(_) | Self::ForbiddenByScanStatus(_) => 403,
            Self::ServiceNotFound(_) => 404,
            Self::ServiceConflict(_) => 409,
            Self::UpstreamTimeout(_) => 504,
            Self::Upstream(_) => 502,
            Self::Config(_) | Self::Persistence(_) | Self::Internal(_) => 500,
            _ => 500,
        }
    }
}

/// Standard JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server error range start
    pub const SERVER_ERROR_START: i32 = -32000;
    /// Server error range end
    pub const SERVER_ERROR_END: i32 = -32099;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = Error::ServiceNotFound("/currenttime".to_string());
        assert_eq!(err.to_status_code(), 404);
    }

    #[test]
    fn forbidden_maps_to_403() {
        let err = Error::Forbidden("no scope for /currenttime".to_string());
        assert_eq!(err.to_status_code(), 403);
    }

    #[test]
    fn auth_failed_maps_to_401() {
        let err = Error::AuthFailed("missing bearer token".to_string());
        assert_eq!(err.to_status_code(), 401);
    }

    #[test]
    fn upstream_timeout_maps_to_504() {
        let err = Error::UpstreamTimeout("probe deadline exceeded".to_string());
        assert_eq!(err.to_status_code(), 504);
    }
}
