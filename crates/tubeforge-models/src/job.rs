//! Generation job definitions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::{GenerationRequest, Provider};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job status. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for a dispatch slot
    #[default]
    Pending,
    /// Job has a slot and is talking to the provider
    Processing,
    /// Provider produced output and the sink accepted it
    Completed,
    /// Job failed (infrastructure, credentials, client error, sink)
    Failed,
    /// Provider kept refusing the content; not a failure
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped
        )
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped => 2,
        }
    }

    /// Check whether moving to `next` keeps the status monotonic.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid job status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One unit of generation work.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    #[serde(default)]
    pub id: JobId,

    /// Request sent to the provider
    pub request: GenerationRequest,

    /// Where the result is written (e.g. "videos/abc/scenes/3")
    pub target: String,

    #[serde(default)]
    pub status: JobStatus,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(request: impl Into<GenerationRequest>, target: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            request: request.into(),
            target: target.into(),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set an explicit ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = JobId::from_string(id);
        self
    }

    pub fn provider(&self) -> Provider {
        self.request.provider()
    }

    /// Move to `next`, rejecting reverse or repeated transitions.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}
