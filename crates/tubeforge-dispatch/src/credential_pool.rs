//! Per-provider credential rotation.
//!
//! The pool caches one current credential per provider. Lookups share a read
//! lock; selecting a replacement or evicting a flagged credential takes the
//! write lock. The store stays the source of truth for activity flags and
//! usage stats.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use tubeforge_models::{Credential, CredentialId, Provider};
use tubeforge_store::CredentialStore;

use crate::error::{DispatchError, DispatchResult};
use crate::metrics::record_credential_flagged;

pub struct CredentialPool {
    store: Arc<dyn CredentialStore>,
    current: RwLock<HashMap<Provider, Credential>>,
}

impl CredentialPool {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            current: RwLock::new(HashMap::new()),
        }
    }

    /// Current credential for `provider`, selecting the least recently used
    /// active one from the store when nothing usable is cached.
    pub async fn get_active(&self, provider: Provider) -> DispatchResult<Credential> {
        // Fast path: read lock
        {
            let current = self.current.read().await;
            if let Some(credential) = current.get(&provider) {
                if credential.is_usable_for(provider) {
                    return Ok(credential.clone());
                }
            }
        }

        // Slow path: write lock, re-check before going to the store
        let mut current = self.current.write().await;
        if let Some(credential) = current.get(&provider) {
            if credential.is_usable_for(provider) {
                return Ok(credential.clone());
            }
        }

        let mut credential = self
            .store
            .find_active_least_recently_used(provider)
            .await?
            .filter(|c| c.is_usable_for(provider))
            .ok_or(DispatchError::CredentialExhausted(provider))?;

        let now = Utc::now();
        if let Err(e) = self.store.touch_last_used(&credential.id, now).await {
            // Usage stats are advisory; the credential is still valid
            warn!(
                credential_id = %credential.id,
                provider = %provider,
                error = %e,
                "Failed to record credential use"
            );
        }
        credential.last_used_at = Some(now);

        info!(
            credential_id = %credential.id,
            provider = %provider,
            "Selected credential"
        );
        current.insert(provider, credential.clone());
        Ok(credential)
    }

    /// Take a credential out of rotation.
    ///
    /// The cache entry is evicted even when the store update fails, so this
    /// process never hands the credential out again.
    pub async fn flag_problematic(&self, id: &CredentialId, reason: &str) -> DispatchResult<()> {
        let result = self.store.deactivate(id, reason).await;

        let evicted = {
            let mut current = self.current.write().await;
            let provider = current
                .iter()
                .find(|(_, c)| &c.id == id)
                .map(|(p, _)| *p);
            provider.and_then(|p| current.remove(&p))
        };

        match &evicted {
            Some(credential) => {
                record_credential_flagged(credential.provider);
                warn!(
                    credential_id = %id,
                    provider = %credential.provider,
                    reason = %reason,
                    "Flagged credential and evicted it from the pool"
                );
            }
            None => debug!(credential_id = %id, reason = %reason, "Flagged credential"),
        }

        result.map_err(DispatchError::from)
    }

    /// Currently cached credential for `provider`, if any.
    pub async fn cached(&self, provider: Provider) -> Option<CredentialId> {
        self.current
            .read()
            .await
            .get(&provider)
            .map(|c| c.id.clone())
    }
}
