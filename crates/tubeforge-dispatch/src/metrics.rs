//! Dispatcher metrics.
//!
//! Exporter installation is left to the embedding binary; without one the
//! macros are no-ops.

use metrics::{counter, histogram};
use tubeforge_models::{JobStatus, Provider};

pub mod names {
    /// Provider calls by provider and outcome.
    pub const PROVIDER_CALLS_TOTAL: &str = "dispatch_provider_calls_total";

    /// Finished jobs by terminal status.
    pub const JOBS_TOTAL: &str = "dispatch_jobs_total";

    /// Credentials taken out of rotation.
    pub const CREDENTIALS_FLAGGED_TOTAL: &str = "dispatch_credentials_flagged_total";

    /// Time spent waiting for a rate limiter slot.
    pub const RATE_LIMIT_WAIT_SECONDS: &str = "dispatch_rate_limit_wait_seconds";

    /// Backoff delay between infrastructure retries.
    pub const BACKOFF_SECONDS: &str = "dispatch_backoff_seconds";
}

/// Record one provider call; `outcome` is `"success"` or an error kind.
pub fn record_provider_call(provider: Provider, outcome: &'static str) {
    counter!(
        names::PROVIDER_CALLS_TOTAL,
        "provider" => provider.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_job(status: JobStatus) {
    counter!(names::JOBS_TOTAL, "status" => status.as_str()).increment(1);
}

pub fn record_credential_flagged(provider: Provider) {
    counter!(
        names::CREDENTIALS_FLAGGED_TOTAL,
        "provider" => provider.as_str()
    )
    .increment(1);
}

pub fn record_rate_limit_wait(seconds: f64) {
    histogram!(names::RATE_LIMIT_WAIT_SECONDS).record(seconds);
}

pub fn record_backoff(seconds: f64) {
    histogram!(names::BACKOFF_SECONDS).record(seconds);
}
