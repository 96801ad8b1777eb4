//! Error types for the compiler session broker.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification carried on the wire by `error` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    VersionNotFound,
    LoadError,
    InvalidImportCallback,
    CompileError,
    CacheError,
    ProtocolError,
    ConfigError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::VersionNotFound => "VersionNotFound",
            ErrorKind::LoadError => "LoadError",
            ErrorKind::InvalidImportCallback => "InvalidImportCallback",
            ErrorKind::CompileError => "CompileError",
            ErrorKind::CacheError => "CacheError",
            ErrorKind::ProtocolError => "ProtocolError",
            ErrorKind::ConfigError => "ConfigError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker-side errors
///
/// Cloneable so that one failed initialization can be handed to every
/// request waiting on it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    #[error("Version not found in manifest: {0}")]
    VersionNotFound(String),

    #[error("Failed to load engine: {0}")]
    LoadError(String),

    #[error("Invalid import callback: {0}")]
    InvalidImportCallback(String),

    #[error("Compilation failed: {0}")]
    CompileError(String),

    #[error("Contract cache error: {0}")]
    CacheError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::VersionNotFound(_) => ErrorKind::VersionNotFound,
            BrokerError::LoadError(_) => ErrorKind::LoadError,
            BrokerError::InvalidImportCallback(_) => ErrorKind::InvalidImportCallback,
            BrokerError::CompileError(_) => ErrorKind::CompileError,
            BrokerError::CacheError(_) => ErrorKind::CacheError,
            BrokerError::ProtocolError(_) => ErrorKind::ProtocolError,
            BrokerError::ConfigError(_) => ErrorKind::ConfigError,
        }
    }

    /// Message without the kind prefix, as sent in `detail`
    pub fn detail(&self) -> &str {
        match self {
            BrokerError::VersionNotFound(d)
            | BrokerError::LoadError(d)
            | BrokerError::InvalidImportCallback(d)
            | BrokerError::CompileError(d)
            | BrokerError::CacheError(d)
            | BrokerError::ProtocolError(d)
            | BrokerError::ConfigError(d) => d,
        }
    }
}

impl From<config::ConfigError> for BrokerError {
    fn from(err: config::ConfigError) -> Self {
        BrokerError::ConfigError(err.to_string())
    }
}

/// Contract cache storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Corrupt cache record for {path}: {message}")]
    Corrupt { path: String, message: String },
}

impl From<StorageError> for BrokerError {
    fn from(err: StorageError) -> Self {
        BrokerError::CacheError(err.to_string())
    }
}

/// Errors surfaced to callers of a `ClientHandle`
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error("{kind}: {detail}")]
    Rejected { kind: ErrorKind, detail: String },

    #[error("Connection to broker closed")]
    Disconnected,

    #[error("Invalid import callback: {0}")]
    InvalidCallback(String),

    #[error("Unexpected reply for request: {0}")]
    UnexpectedReply(String),
}

impl ClientError {
    /// Wire kind when the broker rejected the request
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Rejected { kind, .. } => Some(*kind),
            ClientError::InvalidCallback(_) => Some(ErrorKind::InvalidImportCallback),
            _ => None,
        }
    }
}
