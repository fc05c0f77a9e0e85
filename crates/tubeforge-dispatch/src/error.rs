//! Dispatcher error types.

use thiserror::Error;
use tubeforge_models::{InvalidTransition, Provider};
use tubeforge_store::StoreError;

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Classified outcome of a failed provider call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider throttled the request: {0}")]
    RateLimited(String),

    #[error("Provider server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Content policy violation ({reason}): {message}")]
    ContentPolicy { reason: String, message: String },

    #[error("Provider rejected the request ({status}): {message}")]
    Client { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("No endpoint configured for provider {0}")]
    Unsupported(Provider),
}

impl ProviderError {
    /// Infrastructure failures: retried with backoff on a fresh credential.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::Server { .. }
                | ProviderError::Transport(_)
                | ProviderError::InvalidResponse(_)
        )
    }

    /// The provider refused the prompt itself.
    pub fn is_content_policy(&self) -> bool {
        matches!(self, ProviderError::ContentPolicy { .. })
    }

    /// Whether the credential used for the call should be taken out of rotation.
    pub fn taints_credential(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::Server { .. }
                | ProviderError::Transport(_)
                | ProviderError::InvalidResponse(_)
                | ProviderError::Client { .. }
        )
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::RateLimited(_) => "rate_limited",
            ProviderError::Server { .. } => "server_error",
            ProviderError::ContentPolicy { .. } => "content_policy",
            ProviderError::Client { .. } => "client_error",
            ProviderError::Transport(_) => "transport",
            ProviderError::InvalidResponse(_) => "invalid_response",
            ProviderError::Unsupported(_) => "unsupported",
        }
    }
}

/// Output sink failures.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Artifact decode failed: {0}")]
    Decode(String),

    #[error("Sink rejected output: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No active credential for provider {0}")]
    CredentialExhausted(Provider),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("cancelled")]
    Cancelled,

    #[error("Output sink failed: {0}")]
    Sink(#[from] SinkError),

    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("{failed} of {total} jobs failed")]
    BatchFailed { failed: usize, total: usize },
}

impl DispatchError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Cancelled)
    }
}
