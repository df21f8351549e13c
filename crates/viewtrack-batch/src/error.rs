//! Error types for the queue and unload transport

use thiserror::Error;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E201: Local queue storage failed
    E201QueueStorage,
    /// E202: Queue snapshot could not be encoded or decoded
    E202QueueSerialization,
    /// E301: Unload beacon could not be handed off
    E301TransportFailure,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E201QueueStorage => "E201",
            Self::E202QueueSerialization => "E202",
            Self::E301TransportFailure => "E301",
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("[{code}] Queue storage failed for '{key}': {source}")]
    Storage {
        code: &'static str,
        key: String,
        #[source]
        source: opendal::Error,
    },

    #[error("[{code}] Queue snapshot is malformed: {source}")]
    Serialization {
        code: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl QueueError {
    pub fn storage(key: impl Into<String>, source: opendal::Error) -> Self {
        Self::Storage {
            code: ErrorCode::E201QueueStorage.as_str(),
            key: key.into(),
            source,
        }
    }

    pub fn serialization(source: serde_json::Error) -> Self {
        Self::Serialization {
            code: ErrorCode::E202QueueSerialization.as_str(),
            source,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Storage { code, .. } | Self::Serialization { code, .. } => code,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("[{code}] Beacon payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        code: &'static str,
        size: usize,
        limit: usize,
    },

    #[error("[{code}] Beacon could not be sent: {message}")]
    SendFailed { code: &'static str, message: String },
}

impl TransportError {
    pub fn payload_too_large(size: usize, limit: usize) -> Self {
        Self::PayloadTooLarge {
            code: ErrorCode::E301TransportFailure.as_str(),
            size,
            limit,
        }
    }

    pub fn send_failed(message: impl Into<String>) -> Self {
        Self::SendFailed {
            code: ErrorCode::E301TransportFailure.as_str(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::PayloadTooLarge { code, .. } | Self::SendFailed { code, .. } => code,
        }
    }
}
