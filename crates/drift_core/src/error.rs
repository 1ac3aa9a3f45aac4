use serde::Serialize;
use thiserror::Error;

/// Unified error type for drift operations
#[derive(Debug, Error)]
pub enum DriftError {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Transport errors
    #[error("Connection timed out waiting for server acknowledgment")]
    ConnectionTimeout,

    #[error("Connection error: {0}")]
    Connection(String),

    // Job state machine errors (local-only, non-fatal)
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // Delta sync errors
    #[error("A sync cycle is already in flight")]
    SyncInProgress,

    #[error("Device is offline; sync aborted")]
    DeviceOffline,

    #[error("Failed to fetch remote delta: {0}")]
    RemoteFetch(String),

    #[error("Failed to push local delta: {0}")]
    RemotePush(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Encryption error: {0}")]
    Cipher(String),

    // CRDT errors
    #[error("CRDT error: {0}")]
    Crdt(String),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Config errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    // Protocol errors (programmer-error conditions only)
    #[error("Malformed protocol message: {0}")]
    Protocol(String),
}

/// Result type alias for drift operations
pub type Result<T> = std::result::Result<T, DriftError>;

/// A serializable representation of DriftError for UI surfaces
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: String,
    /// Human-readable error message
    pub message: String,
}

impl From<&DriftError> for SerializableError {
    fn from(err: &DriftError) -> Self {
        let kind = match err {
            DriftError::Io(_) => "Io",
            DriftError::ConnectionTimeout => "ConnectionTimeout",
            DriftError::Connection(_) => "Connection",
            DriftError::InvalidTransition { .. } => "InvalidTransition",
            DriftError::SyncInProgress => "SyncInProgress",
            DriftError::DeviceOffline => "DeviceOffline",
            DriftError::RemoteFetch(_) => "RemoteFetch",
            DriftError::RemotePush(_) => "RemotePush",
            DriftError::Database(_) => "Database",
            DriftError::Storage(_) => "Storage",
            DriftError::Cipher(_) => "Cipher",
            DriftError::Crdt(_) => "Crdt",
            DriftError::Json(_) => "Json",
            DriftError::ConfigParse(_) => "ConfigParse",
            DriftError::ConfigSerialize(_) => "ConfigSerialize",
            DriftError::NoConfigDir => "NoConfigDir",
            DriftError::Protocol(_) => "Protocol",
        }
        .to_string();

        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl DriftError {
    /// Convert to a serializable representation for UI surfaces
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }
}
