//! Error types for kgfusion.
//!
//! Errors are strongly typed using thiserror, one enum per layer, and
//! unified under [`FusionError`]. External-service failures are caught at
//! the component boundary and logged; they only surface through these
//! types on APIs that explicitly return them.

use std::time::Duration;

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors that occur during input or configuration validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Entity name cannot be empty")]
    EmptyEntityName,

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Malformed entity record: {reason}")]
    MalformedEntity {
        reason: String,
    },
}

/// Errors raised by external reference sources (code index, documentation index).
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited, retry after {0:?}")]
    RateLimited(Option<Duration>),

    #[error("Unexpected HTTP status {status}")]
    Status {
        status: u16,
    },

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

impl LookupError {
    /// Returns true if the lookup may succeed when retried with backoff.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

/// Errors raised by the LLM client.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM timed out after {0:?}")]
    Timeout(Duration),

    #[error("LLM rate limited, retry after {0:?}")]
    RateLimited(Option<Duration>),

    #[error("LLM returned HTTP {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("LLM returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Top-level error type for kgfusion.
#[derive(Debug, Error)]
pub enum FusionError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl FusionError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a reference lookup error.
    #[must_use]
    pub const fn is_lookup(&self) -> bool {
        matches!(self, Self::Lookup(_))
    }

    /// Returns true if this is an LLM error.
    #[must_use]
    pub const fn is_llm(&self) -> bool {
        matches!(self, Self::Llm(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Lookup(e) => match e {
                LookupError::RateLimited(_) | LookupError::Timeout(_) | LookupError::Network(_) => true,
                LookupError::Status { status } => *status >= 500,
                LookupError::Parse(_) => false,
            },
            Self::Llm(e) => match e {
                LlmError::RateLimited(_) | LlmError::Timeout(_) | LlmError::Request(_) => true,
                LlmError::Status { status, .. } => *status >= 500,
                _ => false,
            },
            Self::Storage(_) | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for kgfusion operations.
pub type FusionResult<T> = Result<T, FusionError>;
