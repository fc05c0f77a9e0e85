//! Tests for the Firestore client and credential store against a mock server.

use std::time::Duration;

use chrono::Utc;
use serial_test::serial;
use tubeforge_models::{CredentialId, Provider};
use wiremock::matchers::{body_partial_json, header, method, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::client::{FirestoreClient, FirestoreConfig};
use crate::error::StoreError;
use crate::firestore_store::FirestoreCredentialStore;
use crate::retry::RetryPolicy;
use crate::store::CredentialStore;
use crate::token_cache::TokenSource;

// =============================================================================
// Test Helpers
// =============================================================================

fn test_config(server: &MockServer) -> FirestoreConfig {
    FirestoreConfig {
        project_id: "test-project".to_string(),
        database_id: "(default)".to_string(),
        emulator_host: Some(server.uri()),
        timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
        retry: RetryPolicy {
            max_retries: 2,
            initial: Duration::from_millis(1),
            max: Duration::from_millis(5),
        },
    }
}

fn test_store(server: &MockServer) -> FirestoreCredentialStore {
    let client =
        FirestoreClient::with_token_source(test_config(server), TokenSource::Static("owner".into()))
            .unwrap();
    FirestoreCredentialStore::new(client, "api_keys")
}

fn credential_doc(id: &str, provider: &str) -> serde_json::Value {
    serde_json::json!({
        "name": format!("projects/test-project/databases/(default)/documents/api_keys/{}", id),
        "fields": {
            "provider": {"stringValue": provider},
            "secret": {"stringValue": format!("secret-{}", id)},
            "active": {"booleanValue": true},
            "error_count": {"integerValue": "0"},
            "last_used_at": {"nullValue": null}
        }
    })
}

// =============================================================================
// Error Type Tests
// =============================================================================

#[test]
fn test_error_from_http_status_429() {
    let err = StoreError::from_http_status(429, "rate limited");
    assert!(matches!(err, StoreError::RateLimited(_)));
    assert!(err.is_retryable());
}

#[test]
fn test_error_from_http_status_503() {
    let err = StoreError::from_http_status(503, "service unavailable");
    assert!(matches!(err, StoreError::ServerError(503, _)));
    assert!(err.is_retryable());
    assert_eq!(err.http_status(), Some(503));
}

#[test]
fn test_error_from_http_status_400() {
    let err = StoreError::from_http_status(400, "bad request");
    assert!(matches!(err, StoreError::RequestFailed(_)));
    assert!(!err.is_retryable());
}

#[test]
fn test_error_from_http_status_404() {
    let err = StoreError::from_http_status(404, "not found");
    assert!(matches!(err, StoreError::NotFound(_)));
    assert!(!err.is_retryable());
}

// =============================================================================
// Config Tests
// =============================================================================

#[test]
#[serial]
fn test_config_from_env_validates_project_id() {
    std::env::remove_var("GCP_PROJECT_ID");
    std::env::remove_var("FIREBASE_PROJECT_ID");
    assert!(FirestoreConfig::from_env().is_err());
}

#[test]
#[serial]
fn test_config_emulator_base_url() {
    std::env::set_var("GCP_PROJECT_ID", "demo");
    std::env::set_var("FIRESTORE_EMULATOR_HOST", "localhost:8080");
    let config = FirestoreConfig::from_env().unwrap();
    assert_eq!(
        config.base_url(),
        "http://localhost:8080/v1/projects/demo/databases/(default)/documents"
    );
    assert_eq!(config.connect_timeout, Duration::from_secs(5));
    std::env::remove_var("FIRESTORE_EMULATOR_HOST");
    std::env::remove_var("GCP_PROJECT_ID");
}

// =============================================================================
// Store Tests
// =============================================================================

#[tokio::test]
async fn test_find_lru_parses_query_stream() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"/documents:runQuery$"))
        .and(header("authorization", "Bearer owner"))
        .and(body_partial_json(serde_json::json!({
            "structuredQuery": {"limit": 1}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"document": credential_doc("img-2", "image"), "readTime": "2024-01-01T00:00:00Z"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let credential = test_store(&server)
        .find_active_least_recently_used(Provider::Image)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(credential.id.as_str(), "img-2");
    assert_eq!(credential.secret, "secret-img-2");
}

#[tokio::test]
async fn test_find_lru_empty_result() {
    let server = MockServer::start().await;

    // An empty result set still yields one element carrying only readTime
    Mock::given(method("POST"))
        .and(path_regex(r"/documents:runQuery$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([{"readTime": "2024-01-01T00:00:00Z"}])),
        )
        .mount(&server)
        .await;

    let found = test_store(&server)
        .find_active_least_recently_used(Provider::Text)
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn test_touch_patches_only_last_used() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path_regex(r"/documents/api_keys/img-1$"))
        .and(query_param("updateMask.fieldPaths", "last_used_at"))
        .and(query_param("currentDocument.exists", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(credential_doc("img-1", "image")))
        .expect(1)
        .mount(&server)
        .await;

    test_store(&server)
        .touch_last_used(&CredentialId::from_string("img-1"), Utc::now())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_deactivate_commits_increment_transform() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"/documents:commit$"))
        .and(body_partial_json(serde_json::json!({
            "writes": [{
                "updateMask": {"fieldPaths": ["active", "last_error"]},
                "updateTransforms": [{"fieldPath": "error_count", "increment": {"integerValue": "1"}}],
                "currentDocument": {"exists": true}
            }]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"commitTime": "2024-01-01T00:00:00Z"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    test_store(&server)
        .deactivate(&CredentialId::from_string("img-1"), "HTTP 401")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"/documents:runQuery$"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path_regex(r"/documents:runQuery$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"document": credential_doc("txt-1", "text")}
        ])))
        .mount(&server)
        .await;

    let credential = test_store(&server)
        .find_active_least_recently_used(Provider::Text)
        .await
        .unwrap();
    assert!(credential.is_some());
}

#[tokio::test]
async fn test_unparseable_query_body_with_multibyte_text_is_an_error() {
    let server = MockServer::start().await;

    // 'é' straddles the 200th byte of the excerpt
    let body = format!("{}é trailing", "a".repeat(199));
    Mock::given(method("POST"))
        .and(path_regex(r"/documents:runQuery$"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let err = test_store(&server)
        .find_active_least_recently_used(Provider::Image)
        .await
        .unwrap_err();

    match err {
        StoreError::RequestFailed(message) => {
            assert!(message.contains("Failed to parse runQuery response"));
            assert!(message.contains(&format!("{}é", "a".repeat(199))));
            assert!(!message.contains("trailing"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_deactivate_is_not_replayed_after_server_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"/documents:commit$"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let err = test_store(&server)
        .deactivate(&CredentialId::from_string("img-1"), "HTTP 500")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ServerError(503, _)));
}

#[tokio::test]
async fn test_deactivate_is_replayed_after_throttling() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"/documents:commit$"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path_regex(r"/documents:commit$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"commitTime": "2024-01-01T00:00:00Z"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    test_store(&server)
        .deactivate(&CredentialId::from_string("img-1"), "HTTP 500")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_missing_document_on_touch_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = test_store(&server)
        .touch_last_used(&CredentialId::from_string("ghost"), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn test_get_credential_by_id() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path_regex(r"/documents/api_keys/txt-3$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(credential_doc("txt-3", "text")))
        .mount(&server)
        .await;

    let store = test_store(&server);
    let credential = tokio_test::assert_ok!(store.get(&CredentialId::from_string("txt-3")).await);
    assert_eq!(credential.unwrap().provider, Provider::Text);
}
