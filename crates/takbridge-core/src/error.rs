//! Error types for the takbridge CoT/GraphQL bridge.
//!
//! Each failure family has its own enum so callers can decide locally how to
//! recover: connection failures feed the reconnect loop, transform failures
//! skip a record, store and file-transfer failures are logged, auth failures
//! become 401 responses. All variants are serializable for API responses.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Result type alias using BridgeError as the error type.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Top-level error type for all takbridge operations.
#[derive(Debug, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum BridgeError {
    /// TAK session errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Record-to-CoT conversion errors
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    /// Embedded store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Bearer token verification errors
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// File-share artifact errors
    #[error("File transfer error: {0}")]
    FileTransfer(#[from] FileTransferError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Internal errors that shouldn't normally occur
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while establishing or running a TAK session.
///
/// None of these are fatal: the connection manager logs them and schedules a
/// reconnect unless it has been stopped.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ConnectionError {
    /// TCP connect failed
    #[error("Failed to connect to {host}:{port}: {reason}")]
    ConnectionFailed {
        host: String,
        port: u16,
        reason: String,
    },

    /// TCP connect or TLS handshake did not finish in time
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    /// TLS handshake failed
    #[error("TLS handshake failed: {reason}")]
    TlsHandshakeFailed { reason: String },

    /// Endpoint string could not be resolved to host and port
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Client certificate, key or CA bundle could not be loaded
    #[error("Failed to load credentials from {path}: {reason}")]
    Credentials { path: String, reason: String },

    /// Peer closed the session
    #[error("Connection closed: {reason}")]
    ConnectionClosed { reason: String },

    /// No inbound traffic within the read timeout
    #[error("No data received for {timeout_ms}ms")]
    ReadTimeout { timeout_ms: u64 },

    /// Inbound frame exceeded the maximum frame size
    #[error("Frame of {size} bytes exceeds the maximum frame size")]
    FrameTooLarge { size: usize },

    /// No session is active
    #[error("Not connected")]
    NotConnected,

    /// The connection has been stopped and will not reconnect
    #[error("Connection stopped")]
    Stopped,
}

impl ConnectionError {
    /// Creates a connection failed error.
    pub fn failed(host: impl Into<String>, port: u16, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            host: host.into(),
            port,
            reason: reason.into(),
        }
    }

    /// Creates a connection closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Creates a TLS handshake failed error.
    pub fn tls_handshake_failed(reason: impl Into<String>) -> Self {
        Self::TlsHandshakeFailed {
            reason: reason.into(),
        }
    }

    /// Creates a credentials error.
    pub fn credentials(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Credentials {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if retrying with the same configuration cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ConnectionError::InvalidEndpoint { .. }
                | ConnectionError::Credentials { .. }
                | ConnectionError::Stopped
        )
    }
}

/// Errors raised while turning an external JSON record into a CoT event.
///
/// The record is skipped and the rest of the batch continues.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum TransformError {
    /// A required field did not resolve to a value
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// A numeric field resolved to something that is not a number
    #[error("Invalid number for field '{field}': {value}")]
    InvalidNumber { field: String, value: String },

    /// The payload did not have the expected shape
    #[error("Invalid payload: {reason}")]
    InvalidPayload { reason: String },
}

impl TransformError {
    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates an invalid number error.
    pub fn invalid_number(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidNumber {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Errors raised by the embedded CoT store and dedup ledger.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum StoreError {
    /// Database could not be opened
    #[error("Failed to open store at {path}: {reason}")]
    Open { path: String, reason: String },

    /// Query or statement failure
    #[error("Database error: {reason}")]
    Database { reason: String },

    /// Stored value could not be encoded or decoded
    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    /// No record exists for the uid
    #[error("Record not found: {uid}")]
    NotFound { uid: String },

    /// Record exists but carries no file-share descriptor
    #[error("Record {uid} has no file attachment")]
    NotFileShare { uid: String },

    /// Filesystem failure
    #[error("I/O error: {reason}")]
    Io { reason: String },

    /// Blocking task panicked or was cancelled
    #[error("Store task failed: {reason}")]
    Task { reason: String },
}

impl StoreError {
    /// Creates a database error.
    pub fn database(reason: impl ToString) -> Self {
        Self::Database {
            reason: reason.to_string(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(reason: impl ToString) -> Self {
        Self::Serialization {
            reason: reason.to_string(),
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io {
            reason: err.to_string(),
        }
    }
}

/// Errors raised while verifying a bearer token against the remote JWKS.
///
/// Every variant maps to a stable error code returned to API callers.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum AuthError {
    /// No JWKS URL is configured
    #[error("JWKS provider URL is required")]
    JwksProviderUrlRequired,

    /// Request carried no bearer token
    #[error("Bearer token is required")]
    TokenRequired,

    /// Signature, expiry or header validation failed
    #[error("JWT validation failed: {reason}")]
    ValidationFailed { reason: String },

    /// JWKS document could not be fetched or did not hold the key
    #[error("Error fetching JWKS: {reason}")]
    JwksFetch { reason: String },

    /// Token issuer does not match the configured issuer
    #[error("JWT issuer is invalid: expected {expected}, got {actual}")]
    IssuerInvalid { expected: String, actual: String },

    /// Token has no claims array
    #[error("JWT claims are missing")]
    ClaimsMissing,

    /// Claims array does not contain the application id
    #[error("JWT claims do not include application {app_id}")]
    ClaimsDoNotAlign { app_id: String },

    /// Anything else
    #[error("Unexpected JWT validation error: {reason}")]
    Unexpected { reason: String },
}

impl AuthError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::JwksProviderUrlRequired => "JWKS_PROVIDER_URL_REQUIRED",
            AuthError::TokenRequired => "CATALYST_TOKEN_REQUIRED",
            AuthError::ValidationFailed { .. } => "JWT_VALIDATION_FAILED",
            AuthError::JwksFetch { .. } => "JWKS_ERROR_FETCHING",
            AuthError::IssuerInvalid { .. } => "JWT_ISSUER_INVALID",
            AuthError::ClaimsMissing => "JWT_CLAIMS_MISSING",
            AuthError::ClaimsDoNotAlign { .. } => "JWT_CLAIMS_DO_NOT_ALIGN",
            AuthError::Unexpected { .. } => "UNEXPECTED_JWT_VALIDATION_ERROR",
        }
    }
}

/// Errors raised while retrieving a file-share artifact.
///
/// The owning event is stored regardless.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum FileTransferError {
    /// HTTP client could not be built from the TAK identity
    #[error("Failed to build client identity: {reason}")]
    Identity { reason: String },

    /// Request failed before a response arrived
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Sender answered with a non-success status
    #[error("Fetching {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// Artifact could not be written to the download directory
    #[error("Failed to write {path}: {reason}")]
    Write { path: String, reason: String },
}

/// Errors related to configuration.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Missing required configuration field
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// Neither the producer nor the consumer role is enabled
    #[error("Neither producer nor consumer is enabled")]
    NoRoleEnabled,
}

impl ConfigError {
    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
