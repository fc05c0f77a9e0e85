//! Generation provider seam and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use tubeforge_models::{Credential, GenerationRequest};

use crate::config::ProviderEndpoints;
use crate::error::{DispatchError, DispatchResult, ProviderError};

/// Reason codes that mark a refusal of the prompt itself.
const CONTENT_POLICY_MARKERS: &[&str] = &["content_policy_violation", "content_policy", "safety"];

/// Longest error body excerpt kept in an error message.
const MAX_ERROR_EXCERPT: usize = 300;

/// Raw provider payload, handed to the output sink untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutput {
    pub payload: serde_json::Value,
}

impl ProviderOutput {
    pub fn new(payload: serde_json::Value) -> Self {
        Self { payload }
    }
}

/// One call to an external generation service.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
    ) -> Result<ProviderOutput, ProviderError>;
}

/// JSON-over-HTTP provider client with one endpoint per provider.
pub struct HttpGenerationProvider {
    client: Client,
    endpoints: ProviderEndpoints,
}

impl HttpGenerationProvider {
    pub fn new(endpoints: ProviderEndpoints, timeout: Duration) -> DispatchResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("tubeforge-dispatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DispatchError::config_error(format!("HTTP client: {}", e)))?;

        Ok(Self { client, endpoints })
    }
}

#[async_trait]
impl GenerationProvider for HttpGenerationProvider {
    async fn generate(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
    ) -> Result<ProviderOutput, ProviderError> {
        let provider = request.provider();
        let url = self
            .endpoints
            .url_for(provider)
            .ok_or(ProviderError::Unsupported(provider))?;

        debug!(
            provider = %provider,
            credential_id = %credential.id,
            seed = request.seed(),
            "Calling generation provider"
        );

        let builder = self.client.post(url).bearer_auth(&credential.secret);
        let builder = match request {
            GenerationRequest::Image(body) => builder.json(body),
            GenerationRequest::Text(body) => builder.json(body),
        };

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();

        if status.is_success() {
            let payload = response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
            return Ok(ProviderOutput::new(payload));
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status.as_u16(), &body))
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Transport(format!("request timed out: {}", e))
    } else {
        ProviderError::Transport(e.to_string())
    }
}

/// Classify a non-success response.
///
/// The reason code wins over the status: a content-policy marker makes the
/// error a content-policy refusal whatever the status code is.
pub fn classify_error(status: u16, body: &str) -> ProviderError {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();

    let reason = parsed.as_ref().and_then(|v| {
        v.pointer("/error/detail/reason")
            .or_else(|| v.pointer("/detail/reason"))
            .and_then(|r| r.as_str())
    });

    let message = parsed
        .as_ref()
        .and_then(|v| {
            v.pointer("/error/detail/message")
                .or_else(|| v.pointer("/error/message"))
                .or_else(|| v.pointer("/detail/message"))
                .and_then(|m| m.as_str())
        })
        .map(str::to_string)
        .unwrap_or_else(|| excerpt(body));

    if let Some(reason) = reason {
        if is_content_policy_reason(reason) {
            return ProviderError::ContentPolicy {
                reason: reason.to_string(),
                message,
            };
        }
    }

    match status {
        429 => ProviderError::RateLimited(message),
        500..=599 => ProviderError::Server { status, message },
        400..=499 => ProviderError::Client { status, message },
        _ => ProviderError::InvalidResponse(format!("unexpected status {}: {}", status, message)),
    }
}

fn is_content_policy_reason(reason: &str) -> bool {
    let reason = reason.trim().to_ascii_lowercase();
    CONTENT_POLICY_MARKERS.iter().any(|m| *m == reason)
}

fn excerpt(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_EXCERPT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
