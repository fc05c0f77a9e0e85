//! Batch dispatcher binary.
//!
//! Usage: `tubeforge-dispatch <jobs.json>`
//!
//! Reads a JSON array of jobs, runs them, prints the batch report as JSON
//! and exits non-zero when any job failed. Ctrl-C cancels the batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tubeforge_dispatch::{
    CredentialPool, DispatchConfig, Dispatcher, FileSystemSink, HttpGenerationProvider,
    ProviderEndpoints, RateLimiter, RetryController, RetryLimits,
};
use tubeforge_models::{BatchSummary, Job, JobResult};
use tubeforge_store::{CredentialStore, FirestoreCredentialStore, InMemoryCredentialStore};

#[derive(Serialize)]
struct Report<'a> {
    summary: BatchSummary,
    elapsed_ms: u64,
    results: &'a [JobResult],
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr; stdout carries the report
    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }
}

async fn build_store() -> anyhow::Result<Arc<dyn CredentialStore>> {
    let backend = std::env::var("CREDENTIAL_BACKEND").unwrap_or_else(|_| "firestore".to_string());
    match backend.as_str() {
        "memory" => {
            let store = InMemoryCredentialStore::from_env();
            if store.is_empty().await {
                warn!("CREDENTIAL_BACKEND=memory but no TUBEFORGE_*_API_KEYS are set");
            }
            Ok(Arc::new(store))
        }
        "firestore" => Ok(Arc::new(
            FirestoreCredentialStore::from_env()
                .await
                .context("failed to connect to Firestore credential store")?,
        )),
        other => bail!("unknown CREDENTIAL_BACKEND '{}'", other),
    }
}

async fn load_jobs(path: &Path) -> anyhow::Result<Vec<Job>> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("invalid job list in {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Ignore the error: a provider may already be installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();
    init_tracing();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DISPATCH_JOBS_FILE").ok())
        .map(PathBuf::from)
        .context("usage: tubeforge-dispatch <jobs.json>")?;

    let config = DispatchConfig::from_env()?;
    info!("Dispatch config: {:?}", config);

    let jobs = load_jobs(&path).await?;
    info!(jobs = jobs.len(), file = %path.display(), "Loaded jobs");

    let store = build_store().await?;
    let pool = Arc::new(CredentialPool::new(store));
    let limiter = Arc::new(RateLimiter::new(config.rate_limit, config.rate_window)?);
    let provider = Arc::new(HttpGenerationProvider::new(
        ProviderEndpoints::from_env()?,
        config.request_timeout,
    )?);

    let controller = RetryController::new(pool, limiter, provider)
        .with_backoff(config.backoff.clone())
        .with_limits(RetryLimits {
            max_infra_retries: config.max_infra_retries,
            max_content_retries: config.max_content_retries,
        });
    let sink = FileSystemSink::new(&config.output_dir);
    info!(output_dir = %sink.root().display(), "Writing job outputs");
    let dispatcher = Dispatcher::new(Arc::new(controller), Arc::new(sink));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal, cancelling batch");
                cancel.cancel();
            }
        });
    }

    let report = dispatcher
        .run_batch_with_cancel(jobs, config.concurrency, cancel)
        .await;

    let output = Report {
        summary: report.summary,
        elapsed_ms: report.elapsed.as_millis() as u64,
        results: &report.results,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    if let Some(e) = report.error() {
        error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}
