//! Error types for the aggregate writer crate

use thiserror::Error;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E101: A document read in the transaction changed before commit
    E101TransactionConflict,
    /// E102: Aggregate store unreachable or refused the commit
    E102StoreUnavailable,
    /// E103: Write was invalid for the document's current state
    E103WriteRejected,
    /// E104: Event ids cannot form a document key
    E104InvalidKey,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E101TransactionConflict => "E101",
            Self::E102StoreUnavailable => "E102",
            Self::E103WriteRejected => "E103",
            Self::E104InvalidKey => "E104",
        }
    }
}

/// Errors that can occur while committing aggregate updates
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WriterError {
    #[error("[{code}] Transaction conflict on '{path}'")]
    Conflict { code: &'static str, path: String },

    #[error("[{code}] Aggregate store unavailable: {message}")]
    StoreUnavailable { code: &'static str, message: String },

    #[error("[{code}] Write rejected for '{path}': {reason}")]
    WriteRejected {
        code: &'static str,
        path: String,
        reason: String,
    },

    #[error("[{code}] Invalid key: {message}")]
    InvalidKey { code: &'static str, message: String },
}

impl WriterError {
    pub fn conflict(path: impl Into<String>) -> Self {
        Self::Conflict {
            code: ErrorCode::E101TransactionConflict.as_str(),
            path: path.into(),
        }
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            code: ErrorCode::E102StoreUnavailable.as_str(),
            message: message.into(),
        }
    }

    pub fn write_rejected(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WriteRejected {
            code: ErrorCode::E103WriteRejected.as_str(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            code: ErrorCode::E104InvalidKey.as_str(),
            message: message.into(),
        }
    }

    /// Get the error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Conflict { code, .. }
            | Self::StoreUnavailable { code, .. }
            | Self::WriteRejected { code, .. }
            | Self::InvalidKey { code, .. } => code,
        }
    }

    /// Only conflicts are worth re-running the transaction for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<viewtrack_core::InvalidId> for WriterError {
    fn from(err: viewtrack_core::InvalidId) -> Self {
        Self::invalid_key(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WriterError>;
