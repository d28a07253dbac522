//! Unified error types for the monitor pipeline.
//!
//! Error codes:
//! - STORE_001-002: Storage read/write errors
//! - MSG_001-003: Messaging errors
//! - CFG_001: Settings validation errors

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorCode {
    /// STORE_001: Reading from the storage area failed
    ReadFailed,
    /// STORE_002: Writing to the storage area failed (I/O, quota)
    WriteFailed,
}

impl StorageErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ReadFailed => "STORE_001",
            Self::WriteFailed => "STORE_002",
        }
    }
}

/// Messaging error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageErrorCode {
    /// MSG_001: Message has no type or an unexpected shape
    Malformed,
    /// MSG_002: Message type is not handled by this context
    Unhandled,
    /// MSG_003: A handler failed while processing the message
    HandlerFailed,
}

impl MessageErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed => "MSG_001",
            Self::Unhandled => "MSG_002",
            Self::HandlerFailed => "MSG_003",
        }
    }
}

/// Unified error type for the monitor pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage error with code.
    #[error("[{code}] {message}")]
    Storage { code: &'static str, message: String },

    /// Messaging error with code.
    #[error("[{code}] {message}")]
    Message { code: &'static str, message: String },

    /// CFG_001: settings failed validation.
    #[error("[CFG_001] invalid settings: {0}")]
    InvalidSettings(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a storage error.
    pub fn storage(code: StorageErrorCode, msg: impl Into<String>) -> Self {
        Self::Storage {
            code: code.code(),
            message: msg.into(),
        }
    }

    /// Create a messaging error.
    pub fn message(code: MessageErrorCode, msg: impl Into<String>) -> Self {
        Self::Message {
            code: code.code(),
            message: msg.into(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::message(MessageErrorCode::Malformed, msg)
    }

    pub fn handler(msg: impl Into<String>) -> Self {
        Self::message(MessageErrorCode::HandlerFailed, msg)
    }

    pub fn invalid_settings(msg: impl Into<String>) -> Self {
        Self::InvalidSettings(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the error code if this is a coded error.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::Storage { code, .. } => Some(code),
            Self::Message { code, .. } => Some(code),
            Self::InvalidSettings(_) => Some("CFG_001"),
            _ => None,
        }
    }

    /// Whether the failure came from the storage layer.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Io(_))
    }
}
