use std::time::Duration;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Failures the Provider reports to the webhook layer.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Contradictory or unmappable request; the whole call is rejected.
    #[error("invalid change batch: {0}")]
    InvalidBatch(String),

    /// Porkbun refused the request (4xx or `"status": "ERROR"`). Not retried.
    #[error("Porkbun rejected {operation}: {message}")]
    RegistrarRejected { operation: String, message: String },

    /// Retry budget exhausted on transient failures.
    #[error("Porkbun unavailable for {operation} after {attempts} attempt(s): {message}")]
    UpstreamUnavailable {
        operation: String,
        attempts: u32,
        message: String,
    },

    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),

    /// A zone task died before reporting.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidBatch(msg.into())
    }
}

/// Reported as its message, e.g. inside an apply report.
impl Serialize for ProviderError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
