//! Fakes shared by the dispatcher integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tubeforge_dispatch::{
    BackoffPolicy, CredentialPool, Dispatcher, GenerationProvider, OutputSink, ProviderError,
    ProviderOutput, RateLimiter, RetryController, RetryLimits, SinkError,
};
use tubeforge_models::{
    Credential, CredentialId, GenerationRequest, ImageRequest, Job, JobId, JobStatus, Provider,
};
use tubeforge_store::InMemoryCredentialStore;

type Behavior =
    dyn Fn(&Credential, &GenerationRequest, usize) -> Result<ProviderOutput, ProviderError>
        + Send
        + Sync;

/// One observed provider call.
#[derive(Debug, Clone)]
pub struct Call {
    pub at: Instant,
    pub credential_id: CredentialId,
    pub prompt: String,
}

/// Provider whose answers come from a closure; records every call.
pub struct FakeProvider {
    behavior: Box<Behavior>,
    latency: Duration,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeProvider {
    /// `behavior` receives the credential, the request and the 0-based call index.
    pub fn new<F>(behavior: F) -> Self
    where
        F: Fn(&Credential, &GenerationRequest, usize) -> Result<ProviderOutput, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            behavior: Box::new(behavior),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn always_ok() -> Self {
        Self::new(|_, _, _| Ok(success()))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for FakeProvider {
    async fn generate(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
    ) -> Result<ProviderOutput, ProviderError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                at: Instant::now(),
                credential_id: credential.id.clone(),
                prompt: request.prompt().to_string(),
            });
            calls.len() - 1
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        (self.behavior)(credential, request, index)
    }
}

/// Sink that remembers what it saw and can be told to fail for some targets.
#[derive(Default)]
pub struct RecordingSink {
    pub persisted: Mutex<Vec<JobId>>,
    pub transitions: Mutex<Vec<(JobId, JobStatus)>>,
    pub failing_targets: HashSet<String>,
}

impl RecordingSink {
    pub fn failing_for(targets: &[&str]) -> Self {
        Self {
            failing_targets: targets.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn statuses_of(&self, id: &JobId) -> Vec<JobStatus> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|(job, _)| job == id)
            .map(|(_, status)| *status)
            .collect()
    }
}

#[async_trait]
impl OutputSink for RecordingSink {
    async fn persist(&self, job: &Job, _output: &ProviderOutput) -> Result<(), SinkError> {
        if self.failing_targets.contains(&job.target) {
            return Err(SinkError::Rejected(format!("cannot write {}", job.target)));
        }
        self.persisted.lock().unwrap().push(job.id.clone());
        Ok(())
    }

    async fn status_changed(&self, job: &Job) {
        self.transitions
            .lock()
            .unwrap()
            .push((job.id.clone(), job.status));
    }
}

pub fn success() -> ProviderOutput {
    ProviderOutput::new(serde_json::json!({"artifacts": [{"seed": 1}]}))
}

pub fn server_error() -> ProviderError {
    ProviderError::Server {
        status: 503,
        message: "unavailable".into(),
    }
}

pub fn content_policy() -> ProviderError {
    ProviderError::ContentPolicy {
        reason: "content_policy_violation".into(),
        message: "prompt refused".into(),
    }
}

pub fn image_credentials(count: usize) -> Vec<Credential> {
    (0..count)
        .map(|i| Credential::new(Provider::Image, format!("sk-image-{}", i)).with_id(format!("img-{}", i)))
        .collect()
}

pub fn image_job(id: &str, prompt: &str) -> Job {
    Job::new(GenerationRequest::Image(ImageRequest::new(prompt)), format!("scenes/{}", id)).with_id(id)
}

pub fn image_jobs(count: usize) -> Vec<Job> {
    (0..count)
        .map(|i| image_job(&format!("job-{}", i), &format!("scene number {}", i)))
        .collect()
}

/// Everything a dispatcher test needs to inspect afterwards.
pub struct Harness {
    pub dispatcher: Dispatcher,
    pub provider: Arc<FakeProvider>,
    pub store: Arc<InMemoryCredentialStore>,
    pub sink: Arc<RecordingSink>,
}

pub struct HarnessBuilder {
    credentials: Vec<Credential>,
    rate_limit: u32,
    backoff: BackoffPolicy,
    limits: RetryLimits,
    sink: RecordingSink,
}

impl HarnessBuilder {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self {
            credentials,
            rate_limit: 1000,
            backoff: BackoffPolicy {
                initial: Duration::from_millis(10),
                multiplier: 2.0,
                max: Duration::from_millis(100),
            },
            limits: RetryLimits::default(),
            sink: RecordingSink::default(),
        }
    }

    pub fn rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit = per_minute;
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn limits(mut self, max_infra_retries: u32, max_content_retries: u32) -> Self {
        self.limits = RetryLimits {
            max_infra_retries,
            max_content_retries,
        };
        self
    }

    pub fn sink(mut self, sink: RecordingSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self, provider: FakeProvider) -> Harness {
        let store = Arc::new(InMemoryCredentialStore::with_credentials(self.credentials));
        let provider = Arc::new(provider);
        let sink = Arc::new(self.sink);

        let controller = RetryController::new(
            Arc::new(CredentialPool::new(store.clone())),
            Arc::new(RateLimiter::per_minute(self.rate_limit).unwrap()),
            provider.clone(),
        )
        .with_backoff(self.backoff)
        .with_limits(self.limits);

        Harness {
            dispatcher: Dispatcher::new(Arc::new(controller), sink.clone()),
            provider,
            store,
            sink,
        }
    }
}

/// Largest number of instants that fall inside any half-open window of `window`.
pub fn densest_window(instants: &[Instant], window: Duration) -> usize {
    let mut sorted = instants.to_vec();
    sorted.sort();
    (0..sorted.len())
        .map(|i| {
            sorted[i..]
                .iter()
                .take_while(|&&t| t < sorted[i] + window)
                .count()
        })
        .max()
        .unwrap_or(0)
}
