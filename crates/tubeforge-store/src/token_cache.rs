//! Access tokens for Firestore requests.
//!
//! A token is reused until it comes within a minute of expiring. Callers
//! that find it stale queue on the write lock and only the first one fetches.
//! When a fetch fails while the current token is still alive, that token is
//! served instead of an error.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use gcp_auth::TokenProvider;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// OAuth scope for Firestore/Datastore access.
pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

fn refresh_window() -> Duration {
    Duration::seconds(60)
}

/// Where access tokens come from.
#[derive(Clone)]
pub enum TokenSource {
    /// Service account credentials via gcp_auth
    ServiceAccount(Arc<dyn TokenProvider>),
    /// Fixed bearer token (the emulator accepts "owner")
    Static(String),
}

#[derive(Debug, Clone)]
struct Lease {
    token: String,
    expires_at: DateTime<Utc>,
}

impl Lease {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + refresh_window() < self.expires_at
    }

    fn is_alive(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

pub struct TokenCache {
    source: TokenSource,
    lease: RwLock<Option<Lease>>,
}

impl TokenCache {
    pub fn new(source: TokenSource) -> Self {
        Self {
            source,
            lease: RwLock::new(None),
        }
    }

    /// Drop the current token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        self.lease.write().await.take();
    }

    pub async fn get_token(&self) -> StoreResult<String> {
        let provider = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::ServiceAccount(provider) => provider,
        };

        if let Some(token) = fresh_token(&*self.lease.read().await) {
            return Ok(token);
        }

        let mut lease = self.lease.write().await;
        if let Some(token) = fresh_token(&lease) {
            return Ok(token);
        }

        match provider.token(&[FIRESTORE_SCOPE]).await {
            Ok(token) => {
                let next = Lease {
                    token: token.as_str().to_string(),
                    expires_at: token.expires_at(),
                };
                debug!(expires_at = %next.expires_at, "Fetched Firestore access token");
                *lease = Some(next.clone());
                Ok(next.token)
            }
            Err(e) => match lease.as_ref().filter(|l| l.is_alive(Utc::now())) {
                Some(current) => {
                    warn!(error = %e, "Token refresh failed, reusing current token");
                    Ok(current.token.clone())
                }
                None => Err(StoreError::auth_error(format!(
                    "Failed to obtain auth token: {}",
                    e
                ))),
            },
        }
    }
}

fn fresh_token(lease: &Option<Lease>) -> Option<String> {
    lease
        .as_ref()
        .filter(|l| l.is_fresh(Utc::now()))
        .map(|l| l.token.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease_expiring_in(secs: i64) -> Lease {
        Lease {
            token: "ya29.token".into(),
            expires_at: Utc::now() + Duration::seconds(secs),
        }
    }

    #[test]
    fn test_lease_goes_stale_before_it_dies() {
        let now = Utc::now();
        let lease = lease_expiring_in(30);
        assert!(!lease.is_fresh(now));
        assert!(lease.is_alive(now));

        let expired = lease_expiring_in(-1);
        assert!(!expired.is_alive(now));
    }

    #[test]
    fn test_fresh_token_only_from_fresh_lease() {
        assert_eq!(
            fresh_token(&Some(lease_expiring_in(3600))).as_deref(),
            Some("ya29.token")
        );
        assert!(fresh_token(&Some(lease_expiring_in(10))).is_none());
        assert!(fresh_token(&None).is_none());
    }

    #[tokio::test]
    async fn test_static_token_survives_invalidate() {
        let cache = TokenCache::new(TokenSource::Static("owner".into()));
        assert_eq!(cache.get_token().await.unwrap(), "owner");
        cache.invalidate().await;
        assert_eq!(cache.get_token().await.unwrap(), "owner");
    }
}
