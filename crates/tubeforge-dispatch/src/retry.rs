//! Per-job retry loop.
//!
//! Two independent budgets drive a job:
//! - infrastructure failures (429, 5xx, transport) flag the credential, back
//!   off and retry on a freshly selected credential, up to `max_infra_retries`;
//! - content-policy refusals rewrite the prompt and resubmit without flagging,
//!   up to `max_content_retries` rewrites, after which the job is skipped.
//!
//! Any other client error flags the credential and fails the job at once.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use tubeforge_models::{Credential, CredentialId, Job, JobResult};

use crate::credential_pool::CredentialPool;
use crate::error::{DispatchError, DispatchResult, ProviderError};
use crate::logging::JobLogger;
use crate::metrics::{record_backoff, record_provider_call};
use crate::prompt::{PromptTransform, SafetyRewrite};
use crate::provider::{GenerationProvider, ProviderOutput};
use crate::rate_limiter::RateLimiter;

/// Exponential backoff: `min(initial * multiplier^attempt, max)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt + 1` (attempt counts from 0).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.initial.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs).min(self.max)
    }

    pub fn validate(&self) -> DispatchResult<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(DispatchError::config_error(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max < self.initial {
            return Err(DispatchError::config_error(format!(
                "max retry delay {:?} is below initial delay {:?}",
                self.max, self.initial
            )));
        }
        Ok(())
    }
}

/// Retry budgets for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryLimits {
    pub max_infra_retries: u32,
    pub max_content_retries: u32,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            max_infra_retries: 3,
            max_content_retries: 2,
        }
    }
}

/// Outcome of driving one job, plus the payload when it completed.
#[derive(Debug, Clone)]
pub struct Submission {
    pub result: JobResult,
    pub output: Option<ProviderOutput>,
}

enum Ending {
    Completed(ProviderOutput),
    Failed(DispatchError),
    Skipped(ProviderError),
}

pub struct RetryController {
    pool: Arc<CredentialPool>,
    limiter: Arc<RateLimiter>,
    provider: Arc<dyn GenerationProvider>,
    transform: Arc<dyn PromptTransform>,
    backoff: BackoffPolicy,
    limits: RetryLimits,
}

impl RetryController {
    pub fn new(
        pool: Arc<CredentialPool>,
        limiter: Arc<RateLimiter>,
        provider: Arc<dyn GenerationProvider>,
    ) -> Self {
        Self {
            pool,
            limiter,
            provider,
            transform: Arc::new(SafetyRewrite::default()),
            backoff: BackoffPolicy::default(),
            limits: RetryLimits::default(),
        }
    }

    pub fn with_transform(mut self, transform: Arc<dyn PromptTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_limits(mut self, limits: RetryLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Drive `job` to a terminal result.
    ///
    /// Never returns an error: every failure is folded into the result.
    pub async fn submit(&self, job: &Job, cancel: &CancellationToken) -> Submission {
        let logger = JobLogger::new(job);
        let span = logger.create_span();
        self.drive(job, cancel, &logger).instrument(span).await
    }

    async fn drive(&self, job: &Job, cancel: &CancellationToken, logger: &JobLogger) -> Submission {
        let provider = job.provider();
        let mut request = job.request.clone();
        let mut calls = 0u32;
        let mut infra_retries = 0u32;
        let mut rewrites = 0u32;
        let mut last_credential: Option<CredentialId> = None;

        let ending = loop {
            if cancel.is_cancelled() {
                break Ending::Failed(DispatchError::Cancelled);
            }

            let credential = match self.pool.get_active(provider).await {
                Ok(credential) => credential,
                Err(e) => break Ending::Failed(e),
            };
            last_credential = Some(credential.id.clone());

            match self.limiter.acquire(cancel).await {
                Ok(waited) if !waited.is_zero() => logger.log_progress(&format!(
                    "rate limit admitted call after {} ms",
                    waited.as_millis()
                )),
                Ok(_) => {}
                Err(e) => break Ending::Failed(e),
            }

            calls += 1;
            let error = match self.provider.generate(&credential, &request).await {
                Ok(output) => {
                    record_provider_call(provider, "success");
                    break Ending::Completed(output);
                }
                Err(e) => e,
            };
            record_provider_call(provider, error.kind());

            if error.is_content_policy() {
                if rewrites >= self.limits.max_content_retries {
                    break Ending::Skipped(error);
                }
                rewrites += 1;
                logger.log_warning(&format!(
                    "content policy refusal, rewriting prompt ({}/{})",
                    rewrites, self.limits.max_content_retries
                ));
                request = request.with_prompt(self.transform.rewrite(request.prompt(), rewrites));
                continue;
            }

            if error.taints_credential() {
                self.flag(&credential, &error).await;
            }

            if !error.is_transient() || infra_retries >= self.limits.max_infra_retries {
                break Ending::Failed(error.into());
            }

            let delay = self.backoff.delay(infra_retries);
            infra_retries += 1;
            record_backoff(delay.as_secs_f64());
            warn!(
                attempt = calls,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient provider failure, backing off"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break Ending::Failed(DispatchError::Cancelled),
            }
        };

        let (result, output) = match ending {
            Ending::Completed(output) => {
                info!(attempts = calls, rewrites, "Provider call succeeded");
                (JobResult::completed(job.id.clone(), calls), Some(output))
            }
            Ending::Failed(e) => {
                logger.log_error(&e.to_string());
                (JobResult::failed(job.id.clone(), calls, e.to_string()), None)
            }
            Ending::Skipped(e) => {
                logger.log_warning(&format!("skipped after {} rewrites: {}", rewrites, e));
                (JobResult::skipped(job.id.clone(), calls, e.to_string()), None)
            }
        };

        Submission {
            result: result
                .with_content_rewrites(rewrites)
                .with_credential(last_credential),
            output,
        }
    }

    async fn flag(&self, credential: &Credential, error: &ProviderError) {
        if let Err(e) = self.pool.flag_problematic(&credential.id, &error.to_string()).await {
            warn!(
                credential_id = %credential.id,
                error = %e,
                "Failed to persist credential flag"
            );
        }
    }
}
