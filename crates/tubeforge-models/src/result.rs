//! Per-job results and batch aggregation.

use serde::{Deserialize, Serialize};

use crate::{CredentialId, JobId, JobStatus};

/// Terminal outcome of one job in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Provider calls made for this job
    pub attempts: u32,
    /// Prompt rewrites triggered by content-policy refusals
    #[serde(default)]
    pub content_rewrites: u32,
    /// Credential used by the final attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<CredentialId>,
}

impl JobResult {
    pub fn completed(job_id: JobId, attempts: u32) -> Self {
        Self {
            job_id,
            status: JobStatus::Completed,
            error: None,
            attempts,
            content_rewrites: 0,
            credential_id: None,
        }
    }

    pub fn failed(job_id: JobId, attempts: u32, error: impl Into<String>) -> Self {
        Self {
            job_id,
            status: JobStatus::Failed,
            error: Some(error.into()),
            attempts,
            content_rewrites: 0,
            credential_id: None,
        }
    }

    pub fn skipped(job_id: JobId, attempts: u32, reason: impl Into<String>) -> Self {
        Self {
            job_id,
            status: JobStatus::Skipped,
            error: Some(reason.into()),
            attempts,
            content_rewrites: 0,
            credential_id: None,
        }
    }

    pub fn with_content_rewrites(mut self, rewrites: u32) -> Self {
        self.content_rewrites = rewrites;
        self
    }

    pub fn with_credential(mut self, credential_id: Option<CredentialId>) -> Self {
        self.credential_id = credential_id;
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }
}

/// Aggregate counts for a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[JobResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            match result.status {
                JobStatus::Completed => summary.completed += 1,
                JobStatus::Failed => summary.failed += 1,
                JobStatus::Skipped => summary.skipped += 1,
                // Non-terminal results never leave the dispatcher
                JobStatus::Pending | JobStatus::Processing => {}
            }
        }
        summary
    }

    /// Skips are expected under normal operation and do not count here.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let results = vec![
            JobResult::completed(JobId::from_string("a"), 1),
            JobResult::skipped(JobId::from_string("b"), 3, "refused"),
            JobResult::completed(JobId::from_string("c"), 2),
        ];
        let summary = BatchSummary::from_results(&results);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.skipped, 1);
        assert!(!summary.has_failures());
    }

    #[test]
    fn test_summary_flags_failures() {
        let results = vec![JobResult::failed(JobId::from_string("a"), 4, "503")];
        assert!(BatchSummary::from_results(&results).has_failures());
    }
}
