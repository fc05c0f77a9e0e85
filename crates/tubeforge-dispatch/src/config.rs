//! Dispatcher configuration.

use std::path::PathBuf;
use std::time::Duration;

use tubeforge_models::Provider;

use crate::error::{DispatchError, DispatchResult};
use crate::retry::BackoffPolicy;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum jobs with an in-flight provider call
    pub concurrency: usize,
    /// Provider calls admitted per rate window
    pub rate_limit: u32,
    /// Rate limiter window length
    pub rate_window: Duration,
    /// Infrastructure retries per job (429, 5xx, transport)
    pub max_infra_retries: u32,
    /// Prompt rewrites per job before it is skipped
    pub max_content_retries: u32,
    /// Delay between infrastructure retries
    pub backoff: BackoffPolicy,
    /// Per-call provider timeout
    pub request_timeout: Duration,
    /// Root directory for the filesystem sink
    pub output_dir: PathBuf,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            rate_limit: 30,
            rate_window: Duration::from_secs(60),
            max_infra_retries: 3,
            max_content_retries: 2,
            backoff: BackoffPolicy::default(),
            request_timeout: Duration::from_secs(120),
            output_dir: PathBuf::from("./output"),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl DispatchConfig {
    /// Create config from environment variables.
    pub fn from_env() -> DispatchResult<Self> {
        let defaults = Self::default();

        let config = Self {
            concurrency: env_or("DISPATCH_CONCURRENCY", defaults.concurrency),
            rate_limit: env_or("DISPATCH_RATE_LIMIT_PER_MINUTE", defaults.rate_limit),
            rate_window: defaults.rate_window,
            max_infra_retries: env_or("DISPATCH_MAX_INFRA_RETRIES", defaults.max_infra_retries),
            max_content_retries: env_or(
                "DISPATCH_MAX_CONTENT_RETRIES",
                defaults.max_content_retries,
            ),
            backoff: BackoffPolicy {
                initial: Duration::from_millis(env_or("DISPATCH_RETRY_INITIAL_MS", 1000)),
                multiplier: env_or("DISPATCH_RETRY_MULTIPLIER", 2.0),
                max: Duration::from_millis(env_or("DISPATCH_RETRY_MAX_MS", 30_000)),
            },
            request_timeout: Duration::from_secs(env_or("DISPATCH_REQUEST_TIMEOUT_SECS", 120)),
            output_dir: std::env::var("DISPATCH_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the dispatcher cannot run with.
    pub fn validate(&self) -> DispatchResult<()> {
        if self.concurrency == 0 {
            return Err(DispatchError::config_error("concurrency must be at least 1"));
        }
        if self.rate_limit == 0 {
            return Err(DispatchError::config_error(
                "rate limit must allow at least 1 call per window",
            ));
        }
        if self.rate_window.is_zero() {
            return Err(DispatchError::config_error("rate window cannot be zero"));
        }
        if self.request_timeout.is_zero() {
            return Err(DispatchError::config_error("request timeout cannot be zero"));
        }
        self.backoff.validate()
    }
}

/// Per-provider HTTP endpoints.
#[derive(Debug, Clone, Default)]
pub struct ProviderEndpoints {
    pub image_url: Option<String>,
    pub text_url: Option<String>,
}

impl ProviderEndpoints {
    /// Read `PROVIDER_IMAGE_URL` and `PROVIDER_TEXT_URL`; at least one must be set.
    pub fn from_env() -> DispatchResult<Self> {
        let endpoints = Self {
            image_url: std::env::var("PROVIDER_IMAGE_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            text_url: std::env::var("PROVIDER_TEXT_URL")
                .ok()
                .filter(|s| !s.is_empty()),
        };

        if endpoints.image_url.is_none() && endpoints.text_url.is_none() {
            return Err(DispatchError::config_error(
                "PROVIDER_IMAGE_URL or PROVIDER_TEXT_URL must be set",
            ));
        }
        Ok(endpoints)
    }

    pub fn url_for(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::Image => self.image_url.as_deref(),
            Provider::Text => self.text_url.as_deref(),
        }
    }
}
