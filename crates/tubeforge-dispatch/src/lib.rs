//! Generation job dispatcher.
//!
//! This crate provides:
//! - Sliding-window rate limiting for provider calls
//! - Per-provider credential rotation with demotion of failing keys
//! - A per-job retry loop separating infrastructure failures from
//!   content-policy refusals
//! - A bounded-concurrency, cancellable batch dispatcher
//! - HTTP provider client and filesystem output sink

pub mod config;
pub mod credential_pool;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod prompt;
pub mod provider;
pub mod rate_limiter;
pub mod retry;
pub mod sink;

pub use config::{DispatchConfig, ProviderEndpoints};
pub use credential_pool::CredentialPool;
pub use dispatcher::{BatchReport, Dispatcher};
pub use error::{DispatchError, DispatchResult, ProviderError, SinkError};
pub use logging::JobLogger;
pub use prompt::{FramingOnly, PromptTransform, SafetyRewrite};
pub use provider::{GenerationProvider, HttpGenerationProvider, ProviderOutput};
pub use rate_limiter::RateLimiter;
pub use retry::{BackoffPolicy, RetryController, RetryLimits, Submission};
pub use sink::{FileSystemSink, OutputSink};
