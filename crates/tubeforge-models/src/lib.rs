//! Shared data models for TubeForge.
//!
//! This crate provides Serde-serializable types for:
//! - Provider credentials
//! - Generation requests (one closed variant per provider tool)
//! - Jobs, job status and per-job results
//! - Batch summaries

pub mod credential;
pub mod job;
pub mod request;
pub mod result;

// Re-export common types
pub use credential::{Credential, CredentialId, Provider, UnknownProvider};
pub use job::{InvalidTransition, Job, JobId, JobStatus};
pub use request::{GenerationRequest, ImageRequest, TextRequest};
pub use result::{BatchSummary, JobResult};
