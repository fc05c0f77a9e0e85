//! In-memory credential store.
//!
//! Used for local runs (keys seeded from the environment) and as the fake
//! store in dispatcher tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use tubeforge_models::{Credential, CredentialId, Provider};

use crate::error::{StoreError, StoreResult};
use crate::store::CredentialStore;

/// Credential store backed by a map guarded by an async lock.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: RwLock<HashMap<CredentialId, Credential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `credentials`.
    pub fn with_credentials(credentials: impl IntoIterator<Item = Credential>) -> Self {
        let map = credentials
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        Self {
            credentials: RwLock::new(map),
        }
    }

    /// Seed credentials from comma-separated key lists, one list per provider.
    ///
    /// Reads `TUBEFORGE_IMAGE_API_KEYS` and `TUBEFORGE_TEXT_API_KEYS`. Keys get
    /// stable IDs (`image-0`, `image-1`, ...) so logs stay readable.
    pub fn from_env() -> Self {
        let mut credentials = Vec::new();
        for provider in Provider::all() {
            let var = format!("TUBEFORGE_{}_API_KEYS", provider.as_str().to_uppercase());
            let Ok(raw) = std::env::var(&var) else {
                continue;
            };
            for (i, key) in raw
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .enumerate()
            {
                credentials.push(
                    Credential::new(provider, key).with_id(format!("{}-{}", provider, i)),
                );
            }
        }
        debug!("Seeded {} credentials from environment", credentials.len());
        Self::with_credentials(credentials)
    }

    /// Add or replace a credential.
    pub async fn insert(&self, credential: Credential) {
        self.credentials
            .write()
            .await
            .insert(credential.id.clone(), credential);
    }

    /// Get a copy of a credential.
    pub async fn get(&self, id: &CredentialId) -> Option<Credential> {
        self.credentials.read().await.get(id).cloned()
    }

    /// Reset a credential to active (operator action, outside the dispatcher).
    pub async fn reactivate(&self, id: &CredentialId) -> StoreResult<()> {
        let mut credentials = self.credentials.write().await;
        let credential = credentials
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(id.to_string()))?;
        credential.active = true;
        Ok(())
    }

    /// All credentials, sorted by ID.
    pub async fn snapshot(&self) -> Vec<Credential> {
        let mut all: Vec<Credential> = self.credentials.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        all
    }

    pub async fn len(&self) -> usize {
        self.credentials.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.credentials.read().await.is_empty()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_active_least_recently_used(
        &self,
        provider: Provider,
    ) -> StoreResult<Option<Credential>> {
        let credentials = self.credentials.read().await;
        Ok(credentials
            .values()
            .filter(|c| c.is_usable_for(provider))
            // None < Some(_): never-used credentials win; ties broken by ID
            .min_by(|a, b| {
                a.last_used_at
                    .cmp(&b.last_used_at)
                    .then_with(|| a.id.as_str().cmp(b.id.as_str()))
            })
            .cloned())
    }

    async fn touch_last_used(&self, id: &CredentialId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut credentials = self.credentials.write().await;
        let credential = credentials
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(id.to_string()))?;
        credential.last_used_at = Some(at);
        Ok(())
    }

    async fn deactivate(&self, id: &CredentialId, reason: &str) -> StoreResult<()> {
        let mut credentials = self.credentials.write().await;
        let credential = credentials
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(id.to_string()))?;
        credential.active = false;
        credential.error_count += 1;
        credential.last_error = Some(reason.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serial_test::serial;

    fn cred(id: &str, provider: Provider) -> Credential {
        Credential::new(provider, format!("secret-{}", id)).with_id(id)
    }

    #[tokio::test]
    async fn test_lru_prefers_never_used() {
        let mut used = cred("a", Provider::Image);
        used.last_used_at = Some(Utc::now());
        let store = InMemoryCredentialStore::with_credentials([used, cred("b", Provider::Image)]);

        let picked = store
            .find_active_least_recently_used(Provider::Image)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.id.as_str(), "b");
    }

    #[tokio::test]
    async fn test_lru_orders_by_last_used() {
        let now = Utc::now();
        let mut older = cred("old", Provider::Text);
        older.last_used_at = Some(now - Duration::minutes(5));
        let mut newer = cred("new", Provider::Text);
        newer.last_used_at = Some(now);
        let store = InMemoryCredentialStore::with_credentials([newer, older]);

        let picked = store
            .find_active_least_recently_used(Provider::Text)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.id.as_str(), "old");
    }

    #[tokio::test]
    async fn test_lru_ignores_inactive_and_other_providers() {
        let mut inactive = cred("off", Provider::Image);
        inactive.active = false;
        let store =
            InMemoryCredentialStore::with_credentials([inactive, cred("text", Provider::Text)]);

        let picked = store
            .find_active_least_recently_used(Provider::Image)
            .await
            .unwrap();
        assert!(picked.is_none());
    }

    #[tokio::test]
    async fn test_deactivate_increments_error_count() {
        let store = InMemoryCredentialStore::with_credentials([cred("a", Provider::Image)]);
        let id = CredentialId::from_string("a");

        store.deactivate(&id, "HTTP 503").await.unwrap();
        store.deactivate(&id, "HTTP 503").await.unwrap();

        let stored = store.get(&id).await.unwrap();
        assert!(!stored.active);
        assert_eq!(stored.error_count, 2);
        assert_eq!(stored.last_error.as_deref(), Some("HTTP 503"));

        store.reactivate(&id).await.unwrap();
        assert!(store.get(&id).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store = InMemoryCredentialStore::new();
        let err = store
            .touch_last_used(&CredentialId::from_string("missing"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    #[serial]
    async fn test_from_env_seeds_keys() {
        std::env::set_var("TUBEFORGE_IMAGE_API_KEYS", "k1, k2,,");
        std::env::remove_var("TUBEFORGE_TEXT_API_KEYS");

        let store = InMemoryCredentialStore::from_env();
        let all = store.snapshot().await;

        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id.as_str(), "image-0");
        assert_eq!(all[1].secret, "k2");

        std::env::remove_var("TUBEFORGE_IMAGE_API_KEYS");
    }
}
