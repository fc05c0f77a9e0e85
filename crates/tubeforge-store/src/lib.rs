//! Credential store for TubeForge.
//!
//! This crate provides:
//! - The `CredentialStore` trait consumed by the dispatcher
//! - An in-memory store for local runs and tests
//! - A Firestore-backed store (REST API, service account auth)
//! - Token caching, retry with backoff and request metrics for Firestore

pub mod client;
pub mod error;
pub mod firestore_store;
pub mod memory;
pub mod metrics;
pub mod retry;
pub mod store;
pub mod token_cache;
pub mod types;

#[cfg(test)]
mod client_tests;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{StoreError, StoreResult};
pub use retry::{Replay, RetryPolicy};
pub use firestore_store::FirestoreCredentialStore;
pub use memory::InMemoryCredentialStore;
pub use store::CredentialStore;
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
