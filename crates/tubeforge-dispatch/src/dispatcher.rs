//! Batch dispatcher.
//!
//! One task per job; a semaphore bounds how many jobs hold a slot (and so
//! can have a provider call in flight) at once. Individual failures never
//! abort the batch: every job ends with a result.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tubeforge_models::{BatchSummary, Job, JobResult, JobStatus};

use crate::error::DispatchError;
use crate::logging::JobLogger;
use crate::metrics::record_job;
use crate::retry::RetryController;
use crate::sink::OutputSink;

/// Per-job results plus aggregate counts.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// One result per job, in submission order
    pub results: Vec<JobResult>,
    pub summary: BatchSummary,
    pub elapsed: Duration,
}

impl BatchReport {
    fn new(results: Vec<JobResult>, elapsed: Duration) -> Self {
        let summary = BatchSummary::from_results(&results);
        Self {
            results,
            summary,
            elapsed,
        }
    }

    /// Aggregate error: set only when at least one job failed. Skips do not count.
    pub fn error(&self) -> Option<DispatchError> {
        if self.summary.has_failures() {
            Some(DispatchError::BatchFailed {
                failed: self.summary.failed,
                total: self.summary.total,
            })
        } else {
            None
        }
    }

    pub fn result(&self, job_id: &str) -> Option<&JobResult> {
        self.results.iter().find(|r| r.job_id.as_str() == job_id)
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    controller: Arc<RetryController>,
    sink: Arc<dyn OutputSink>,
}

impl Dispatcher {
    pub fn new(controller: Arc<RetryController>, sink: Arc<dyn OutputSink>) -> Self {
        Self { controller, sink }
    }

    /// Run `jobs` with at most `concurrency` in flight.
    pub async fn run_batch(&self, jobs: Vec<Job>, concurrency: usize) -> BatchReport {
        self.run_batch_with_cancel(jobs, concurrency, CancellationToken::new())
            .await
    }

    /// Like [`run_batch`](Self::run_batch), stopping early once `cancel` fires.
    ///
    /// After cancellation no new attempt starts: queued jobs fail with
    /// `cancelled`, rate-limit waits and backoff sleeps return at once.
    pub async fn run_batch_with_cancel(
        &self,
        jobs: Vec<Job>,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> BatchReport {
        let start = Instant::now();
        let concurrency = if concurrency == 0 {
            warn!("Batch concurrency 0 requested, running with 1");
            1
        } else {
            concurrency
        };
        let semaphore = Arc::new(Semaphore::new(concurrency));

        info!(jobs = jobs.len(), concurrency, "Starting batch");

        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let job_id = job.id.clone();
            let controller = self.controller.clone();
            let sink = self.sink.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let handle = tokio::spawn(async move {
                run_job(job, controller, sink, semaphore, cancel).await
            });
            handles.push((job_id, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (job_id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Job task aborted");
                    record_job(JobStatus::Failed);
                    JobResult::failed(job_id, 0, format!("job task aborted: {}", e))
                }
            };
            results.push(result);
        }

        let report = BatchReport::new(results, start.elapsed());
        info!(
            total = report.summary.total,
            completed = report.summary.completed,
            failed = report.summary.failed,
            skipped = report.summary.skipped,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Batch finished"
        );
        report
    }
}

async fn run_job(
    mut job: Job,
    controller: Arc<RetryController>,
    sink: Arc<dyn OutputSink>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) -> JobResult {
    let logger = JobLogger::new(&job);

    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = semaphore.acquire_owned() => permit.ok(),
    };

    let Some(permit) = permit else {
        let reason = if cancel.is_cancelled() {
            DispatchError::Cancelled.to_string()
        } else {
            "dispatch slots closed".to_string()
        };
        advance(&mut job, JobStatus::Failed, sink.as_ref(), &logger).await;
        record_job(JobStatus::Failed);
        return JobResult::failed(job.id.clone(), 0, reason);
    };

    if let Err(e) = job.transition(JobStatus::Processing) {
        logger.log_error(&e.to_string());
        record_job(JobStatus::Failed);
        return JobResult::failed(job.id.clone(), 0, DispatchError::from(e).to_string());
    }
    sink.status_changed(&job).await;
    logger.log_start(job.request.prompt());

    let submission = controller.submit(&job, &cancel).await;
    drop(permit);

    let mut result = submission.result;
    if let (JobStatus::Completed, Some(output)) = (result.status, submission.output.as_ref()) {
        if let Err(e) = sink.persist(&job, output).await {
            let error = DispatchError::from(e);
            logger.log_error(&error.to_string());
            result = JobResult::failed(job.id.clone(), result.attempts, error.to_string())
                .with_content_rewrites(result.content_rewrites)
                .with_credential(result.credential_id.clone());
        }
    }

    advance(&mut job, result.status, sink.as_ref(), &logger).await;
    record_job(result.status);
    if result.status == JobStatus::Completed {
        logger.log_completion(&format!("{} attempt(s)", result.attempts));
    }
    result
}

async fn advance(job: &mut Job, next: JobStatus, sink: &dyn OutputSink, logger: &JobLogger) {
    match job.transition(next) {
        Ok(()) => sink.status_changed(job).await,
        Err(e) => logger.log_warning(&e.to_string()),
    }
}
