//! Firestore-backed credential store.
//!
//! Credentials live in one top-level collection (default `api_keys`), one
//! document per key:
//!
//! | field          | type              |
//! |----------------|-------------------|
//! | `provider`     | string            |
//! | `secret`       | string            |
//! | `active`       | bool              |
//! | `error_count`  | integer           |
//! | `last_used_at` | timestamp or null |
//! | `last_error`   | string or null    |
//!
//! `last_used_at` must be present (null for never-used keys): Firestore drops
//! documents that lack an ordered-by field from query results.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use tubeforge_models::{Credential, CredentialId, Provider};

use crate::client::FirestoreClient;
use crate::error::{StoreError, StoreResult};
use crate::retry::Replay;
use crate::store::CredentialStore;
use crate::types::{
    CollectionSelector, Document, DocumentMask, FieldTransform, Filter, Order, Precondition,
    StructuredQuery, ToFirestoreValue, Value, Write,
};

/// Default collection holding provider credentials.
pub const DEFAULT_COLLECTION: &str = "api_keys";

/// Credential store backed by a Firestore collection.
#[derive(Clone)]
pub struct FirestoreCredentialStore {
    client: FirestoreClient,
    collection: String,
}

impl FirestoreCredentialStore {
    pub fn new(client: FirestoreClient, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }

    /// Create from environment variables (`CREDENTIALS_COLLECTION` plus Firestore config).
    pub async fn from_env() -> StoreResult<Self> {
        let client = FirestoreClient::from_env().await?;
        let collection = std::env::var("CREDENTIALS_COLLECTION")
            .unwrap_or_else(|_| DEFAULT_COLLECTION.to_string());
        info!("Using Firestore credential collection '{}'", collection);
        Ok(Self::new(client, collection))
    }

    /// Fetch one credential by ID.
    pub async fn get(&self, id: &CredentialId) -> StoreResult<Option<Credential>> {
        let doc = self
            .client
            .with_retry("get_credential", Replay::Transient, || {
                self.client.get_document(&self.collection, id.as_str())
            })
            .await?;
        doc.map(|d| document_to_credential(&d)).transpose()
    }

    fn lru_query(&self, provider: Provider) -> StructuredQuery {
        StructuredQuery {
            from: vec![CollectionSelector {
                collection_id: self.collection.clone(),
            }],
            r#where: Some(Filter::and(vec![
                Filter::equal("provider", provider.as_str().to_firestore_value()),
                Filter::equal("active", true.to_firestore_value()),
            ])),
            // Nulls order before timestamps, so never-used keys come first
            order_by: Some(vec![Order::ascending("last_used_at")]),
            limit: Some(1),
        }
    }
}

#[async_trait]
impl CredentialStore for FirestoreCredentialStore {
    async fn find_active_least_recently_used(
        &self,
        provider: Provider,
    ) -> StoreResult<Option<Credential>> {
        let docs = self
            .client
            .with_retry("find_lru_credential", Replay::Transient, || {
                self.client.run_query(self.lru_query(provider))
            })
            .await?;

        match docs.first() {
            Some(doc) => {
                let credential = document_to_credential(doc)?;
                debug!(
                    credential_id = %credential.id,
                    provider = %provider,
                    "Selected least recently used credential"
                );
                Ok(Some(credential))
            }
            None => Ok(None),
        }
    }

    async fn touch_last_used(&self, id: &CredentialId, at: DateTime<Utc>) -> StoreResult<()> {
        self.client
            .with_retry("touch_credential", Replay::Transient, || {
                let mut fields = HashMap::new();
                fields.insert("last_used_at".to_string(), at.to_firestore_value());
                self.client
                    .update_document(&self.collection, id.as_str(), fields, &["last_used_at"])
            })
            .await?;
        Ok(())
    }

    async fn deactivate(&self, id: &CredentialId, reason: &str) -> StoreResult<()> {
        let name = self.client.full_document_name(&self.collection, id.as_str());

        self.client
            .with_retry("deactivate_credential", Replay::Throttled, || {
                let mut fields = HashMap::new();
                fields.insert("active".to_string(), false.to_firestore_value());
                fields.insert("last_error".to_string(), reason.to_firestore_value());

                let write = Write {
                    update: Document {
                        name: Some(name.clone()),
                        fields: Some(fields),
                        create_time: None,
                        update_time: None,
                    },
                    update_mask: Some(DocumentMask {
                        field_paths: vec!["active".to_string(), "last_error".to_string()],
                    }),
                    update_transforms: vec![FieldTransform::increment("error_count", 1)],
                    current_document: Some(Precondition { exists: true }),
                };
                self.client.commit(vec![write])
            })
            .await?;

        info!(credential_id = %id, reason = %reason, "Deactivated credential");
        Ok(())
    }
}

/// Map a Firestore document to a credential.
pub fn document_to_credential(doc: &Document) -> StoreResult<Credential> {
    let id = doc
        .id()
        .ok_or_else(|| StoreError::invalid_document("credential document has no name"))?;

    let provider_raw: String = doc
        .get("provider")
        .ok_or_else(|| StoreError::invalid_document(format!("{}: missing provider", id)))?;
    let provider: Provider = provider_raw
        .parse()
        .map_err(|e| StoreError::invalid_document(format!("{}: {}", id, e)))?;

    let secret: String = doc
        .get("secret")
        .ok_or_else(|| StoreError::invalid_document(format!("{}: missing secret", id)))?;

    Ok(Credential {
        id: CredentialId::from_string(id),
        secret,
        provider,
        active: doc.get("active").unwrap_or(false),
        error_count: doc.get("error_count").unwrap_or(0),
        last_used_at: doc.get("last_used_at"),
        last_error: doc.get("last_error"),
    })
}

/// Map a credential to document fields (used when seeding a collection).
pub fn credential_to_fields(credential: &Credential) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("provider".to_string(), credential.provider.as_str().to_firestore_value());
    fields.insert("secret".to_string(), credential.secret.to_firestore_value());
    fields.insert("active".to_string(), credential.active.to_firestore_value());
    fields.insert("error_count".to_string(), credential.error_count.to_firestore_value());
    fields.insert("last_used_at".to_string(), credential.last_used_at.to_firestore_value());
    fields.insert("last_error".to_string(), credential.last_error.to_firestore_value());
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(fields: serde_json::Value) -> Document {
        serde_json::from_value(serde_json::json!({
            "name": "projects/p/databases/(default)/documents/api_keys/img-1",
            "fields": fields,
        }))
        .unwrap()
    }

    #[test]
    fn test_document_to_credential() {
        let credential = document_to_credential(&doc(serde_json::json!({
            "provider": {"stringValue": "image"},
            "secret": {"stringValue": "sk-1"},
            "active": {"booleanValue": true},
            "error_count": {"integerValue": "4"},
            "last_used_at": {"nullValue": null},
        })))
        .unwrap();

        assert_eq!(credential.id.as_str(), "img-1");
        assert_eq!(credential.provider, Provider::Image);
        assert_eq!(credential.error_count, 4);
        assert!(credential.active);
        assert!(credential.last_used_at.is_none());
    }

    #[test]
    fn test_document_missing_secret_is_invalid() {
        let err = document_to_credential(&doc(serde_json::json!({
            "provider": {"stringValue": "text"},
        })))
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));
    }

    #[test]
    fn test_unknown_provider_is_invalid() {
        let err = document_to_credential(&doc(serde_json::json!({
            "provider": {"stringValue": "audio"},
            "secret": {"stringValue": "x"},
        })))
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));
    }

    #[test]
    fn test_fields_round_trip() {
        let credential = Credential::new(Provider::Text, "sk-text").with_id("txt-9");
        let mut document = Document::new(credential_to_fields(&credential));
        document.name = Some("projects/p/databases/(default)/documents/api_keys/txt-9".into());

        let parsed = document_to_credential(&document).unwrap();
        assert_eq!(parsed.id, credential.id);
        assert_eq!(parsed.secret, "sk-text");
        assert_eq!(
            document.fields.as_ref().unwrap()["last_used_at"],
            Value::NullValue(())
        );
    }
}
