//! Outbound calls to the telemetry backend
use async_trait::async_trait;
use thiserror::Error;

use crate::batcher::Batch;

#[cfg(feature = "http")]
pub mod http;
pub mod memory;

#[cfg(feature = "http")]
pub use http::{Anonymous, HttpPublisher, RequestAuthorizer};
pub use memory::MemoryPublisher;

/// Error codes the backend uses for throttling and transient faults
const RETRYABLE_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "ServiceUnavailable",
    "InternalFailure",
    "InternalServiceFault",
];

/// Result of a single publish call
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Success,
    /// Throttling or a transient fault; the call may be repeated
    Retryable(String),
    /// The backend will not accept this call as it stands
    Fatal(String),
}

/// Failure of a publish call, with enough detail to decide on a retry
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("throttled ({code}): {message}")]
    Throttled { code: String, message: String },

    #[error("HTTP {status}{}: {message}", .code.as_ref().map(|c| format!(" ({})", c)).unwrap_or_default())]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("invalid request: {0}")]
    Request(String),

    #[error("authorization failed: {0}")]
    Authorization(String),
}

impl PublishError {
    /// Classify a non-success response by status code and error code
    pub fn from_response(status: u16, code: Option<String>, message: String) -> Self {
        match &code {
            Some(c) if RETRYABLE_CODES.iter().any(|r| c.contains(r)) => PublishError::Throttled {
                code: c.clone(),
                message,
            },
            _ => PublishError::Http {
                status,
                code,
                message,
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PublishError::Throttled { .. } | PublishError::Transport { .. } => true,
            PublishError::Http { status, .. } => *status == 429 || *status >= 500,
            PublishError::Request(_) | PublishError::Authorization(_) => false,
        }
    }
}

impl From<PublishError> for PublishOutcome {
    fn from(error: PublishError) -> Self {
        if error.is_retryable() {
            PublishOutcome::Retryable(error.to_string())
        } else {
            PublishOutcome::Fatal(error.to_string())
        }
    }
}

impl From<Result<(), PublishError>> for PublishOutcome {
    fn from(result: Result<(), PublishError>) -> Self {
        match result {
            Ok(()) => PublishOutcome::Success,
            Err(e) => e.into(),
        }
    }
}

/// Sends one batch per call to the backend.
///
/// Implementations perform exactly one outbound call per invocation and
/// never retry on their own.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    async fn publish(&self, batch: &Batch) -> PublishOutcome;

    /// Get a name for this publisher
    fn name(&self) -> &str;
}
