//! # Sync Error Types
//!
//! Error types for resilience and sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Cloud (HTTP)        │ │
//! │  │                 │  │   (retryable)   │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  Unauthorized  ✗        │ │
//! │  │  MissingDeviceId│  │  Disconnected   │  │  Forbidden     ✗        │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  BadRequest    ✗        │ │
//! │  │                 │  │  WebSocket      │  │  Http 5xx/429  ✓        │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Resilience    │  │    Protocol     │  │       Store             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  CircuitOpen    │  │  Validation     │  │  Store (DbError)        │ │
//! │  │  (fast fail)    │  │  Serialization  │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ✓ = retried by RetryExecutor    ✗ = fails fast                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use haven_core::ValidationError;
use thiserror::Error;

use crate::circuit_breaker::CircuitOpen;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID.
    #[error("Device ID not configured. Run initial setup first.")]
    MissingDeviceId,

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Could not reach the remote end.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Push socket disconnected unexpectedly.
    #[error("Disconnected from cloud")]
    Disconnected,

    /// Request or connect timeout.
    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    // =========================================================================
    // Cloud API Errors
    // =========================================================================
    /// The API key was rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The device is not allowed to read this resource.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The cloud rejected the request as malformed.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The requested path does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other non-success status (5xx, 429, ...).
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    // =========================================================================
    // Resilience Errors
    // =========================================================================
    /// Synthetic fast-fail raised by a circuit breaker. The wrapped call was
    /// never attempted.
    #[error("circuit '{name}' open, retry in {}s", .retry_in.as_secs_f64().ceil() as u64)]
    CircuitOpen { name: String, retry_in: Duration },

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// A snapshot, delta or push payload failed validation.
    #[error("Invalid payload: {0}")]
    Validation(#[from] ValidationError),

    /// Invalid message received on the push socket.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Failed to serialize message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// The local configuration store failed.
    #[error("Store error: {0}")]
    Store(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal sync agent error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CircuitOpen> for SyncError {
    fn from(open: CircuitOpen) -> Self {
        SyncError::CircuitOpen {
            name: open.name,
            retry_in: open.retry_in,
        }
    }
}

impl From<haven_db::DbError> for SyncError {
    fn from(err: haven_db::DbError) -> Self {
        SyncError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::Disconnected,
            WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => SyncError::TlsError(tls.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if a later attempt of the same call may succeed.
    ///
    /// ## Retryable Errors
    /// - Connection failures, disconnects, timeouts
    /// - Server errors (5xx) and rate limiting (429)
    ///
    /// ## Non-Retryable Errors
    /// - Authentication rejections and malformed requests
    /// - Configuration, validation and store errors
    /// - Open circuits (the breaker decides when to try again)
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_)
            | SyncError::Disconnected
            | SyncError::Timeout(_)
            | SyncError::WebSocketError(_) => true,
            SyncError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if this is a circuit breaker fast-fail.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, SyncError::CircuitOpen { .. })
    }
}
