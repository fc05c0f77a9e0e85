//! Structured job logging.
//!
//! Every line carries the job ID, its provider and its target so a batch
//! can be followed per job in JSON logs.

use tracing::{error, info, warn, Span};
use tubeforge_models::{Job, Provider};

/// Job logger with consistent contextual fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    provider: Provider,
    target: String,
}

impl JobLogger {
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            provider: job.provider(),
            target: job.target.clone(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            provider = %self.provider,
            target = %self.target,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            provider = %self.provider,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            provider = %self.provider,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            provider = %self.provider,
            target = %self.target,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            provider = %self.provider,
            target = %self.target,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Span wrapping all work for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            provider = %self.provider,
        )
    }
}
