//! The credential store interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tubeforge_models::{Credential, CredentialId, Provider};

use crate::error::StoreResult;

/// Persisted pool of provider credentials.
///
/// The store is the source of truth; implementations serialize conflicting
/// updates themselves. `touch_last_used` is idempotent. `deactivate` bumps
/// `error_count`, so implementations apply it at most once per call and never
/// replay a write that may already have landed.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Active credential for `provider` with the oldest `last_used_at`.
    ///
    /// Never-used credentials come first. Returns `None` when the provider
    /// has no active credential left.
    async fn find_active_least_recently_used(
        &self,
        provider: Provider,
    ) -> StoreResult<Option<Credential>>;

    /// Record that the credential was handed out at `at`.
    async fn touch_last_used(&self, id: &CredentialId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Mark the credential inactive, increment its error counter and keep `reason`.
    async fn deactivate(&self, id: &CredentialId, reason: &str) -> StoreResult<()>;
}
