//! Background worker that drains the job queue.
//!
//! The worker claims up to `max_concurrent_jobs` pending jobs per pass and
//! runs them concurrently, sleeping only while the queue is empty. Every
//! pass also sweeps transiently failed jobs whose backoff has elapsed back
//! into the pending state, so retries need no separate scheduler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use palimpsest_core::{defaults, Job, JobRepository, JobType, Result};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::retry::{classify_error, next_retry_at};

/// Worker tuning knobs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when the queue is empty, in milliseconds.
    pub poll_interval_ms: u64,
    /// Jobs run concurrently per claim pass.
    pub max_concurrent_jobs: usize,
    /// A disabled worker starts and immediately exits its loop.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Read worker settings from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable or disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Jobs run concurrently per pass |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Empty-queue polling interval |
    pub fn from_env() -> Self {
        let defaults_cfg = Self::default();

        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults_cfg.max_concurrent_jobs)
            .max(1);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults_cfg.poll_interval_ms);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            enabled,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Broadcast to observers of the worker's lifecycle.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    WorkerStarted,
    WorkerStopped,
    JobStarted {
        job_id: Uuid,
        job_type: JobType,
    },
    JobCompleted {
        job_id: Uuid,
        job_type: JobType,
    },
    /// `retryable` reports whether the retry sweep will re-queue the job.
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
        retryable: bool,
    },
}

/// Control handle for a started worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    events_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Ask the worker to finish its current pass and stop.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| palimpsest_core::Error::Internal("Worker already stopped".into()))
    }

    /// Subscribe to worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events_rx.resubscribe()
    }
}

/// Queue-draining worker. Built with [`WorkerBuilder`], started with
/// [`JobWorker::start`].
pub struct JobWorker {
    jobs: Arc<dyn JobRepository>,
    config: WorkerConfig,
    handlers: Arc<RwLock<HashMap<JobType, Arc<dyn JobHandler>>>>,
    events: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    pub fn new(jobs: Arc<dyn JobRepository>, config: WorkerConfig) -> Self {
        let (events, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            jobs,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Register the handler for one job type, replacing any previous one.
    pub async fn register_handler<H: JobHandler + 'static>(&self, handler: H) {
        let job_type = handler.job_type();
        self.handlers.write().await.insert(job_type, Arc::new(handler));
        debug!(?job_type, "Registered job handler");
    }

    /// Subscribe to worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Spawn the worker loop and return its control handle.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let events_rx = self.events.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            events_rx,
        }
    }

    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker disabled, exiting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            "Job worker started"
        );
        let _ = self.events.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Job worker shutting down");
                break;
            }

            match self.jobs.sweep_retryable().await {
                Ok(0) => {}
                Ok(requeued) => debug!(requeued, "Retry sweep re-queued jobs"),
                Err(e) => error!(error = %e, "Retry sweep failed"),
            }

            let batch = self.claim_batch().await;
            if batch.is_empty() {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Job worker shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }
                continue;
            }

            debug!(claimed = batch.len(), "Running job batch");
            let mut tasks = tokio::task::JoinSet::new();
            for job in batch {
                let ctx = self.context();
                tasks.spawn(async move { ctx.execute(job).await });
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Job task panicked");
                }
            }
            // Claim again immediately; the queue may hold more work.
        }

        let _ = self.events.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }

    /// Claim up to the concurrency limit. A claim error ends the batch early
    /// rather than killing the loop.
    async fn claim_batch(&self) -> Vec<Job> {
        let mut batch = Vec::with_capacity(self.config.max_concurrent_jobs);
        while batch.len() < self.config.max_concurrent_jobs {
            match self.jobs.claim_next().await {
                Ok(Some(job)) => batch.push(job),
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to claim job");
                    break;
                }
            }
        }
        batch
    }

    fn context(&self) -> WorkerContext {
        WorkerContext {
            jobs: self.jobs.clone(),
            handlers: self.handlers.clone(),
            events: self.events.clone(),
        }
    }
}

/// Everything one spawned job task needs, detached from the worker itself.
struct WorkerContext {
    jobs: Arc<dyn JobRepository>,
    handlers: Arc<RwLock<HashMap<JobType, Arc<dyn JobHandler>>>>,
    events: broadcast::Sender<WorkerEvent>,
}

impl WorkerContext {
    async fn execute(self, job: Job) {
        let started = Instant::now();
        let job_id = job.id;
        let job_type = job.job_type;
        let retry_count = job.retry_count;

        info!(?job_id, ?job_type, "Processing job");
        let _ = self.events.send(WorkerEvent::JobStarted { job_id, job_type });

        let result = self.run_handler(job).await;

        match result {
            JobResult::Success(data) => {
                if let Err(e) = self.jobs.complete(job_id, data).await {
                    error!(error = %e, ?job_id, "Failed to record job completion");
                    return;
                }
                info!(
                    ?job_id,
                    ?job_type,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
                let _ = self
                    .events
                    .send(WorkerEvent::JobCompleted { job_id, job_type });
            }
            JobResult::Failed(error) => {
                let class = classify_error(&error);
                let retry_at = class.can_retry.then(|| next_retry_at(retry_count));

                if let Err(e) = self.jobs.fail(job_id, &error, class, retry_at).await {
                    error!(error = %e, ?job_id, "Failed to record job failure");
                    return;
                }
                warn!(
                    ?job_id,
                    ?job_type,
                    %error,
                    failure_kind = class.kind.as_str(),
                    retryable = class.can_retry,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Job failed"
                );
                let _ = self.events.send(WorkerEvent::JobFailed {
                    job_id,
                    job_type,
                    error,
                    retryable: class.can_retry,
                });
            }
        }
    }

    /// Look up the handler and run it under the per-job timeout. Missing
    /// handlers and timeouts are folded into the normal failure path.
    async fn run_handler(&self, job: Job) -> JobResult {
        let job_type = job.job_type;
        let handler = self.handlers.read().await.get(&job_type).cloned();
        let Some(handler) = handler else {
            warn!(?job_type, "No handler registered for job type");
            return JobResult::Failed(format!("Unsupported job type: {job_type:?}"));
        };

        let budget = Duration::from_secs(defaults::JOB_TIMEOUT_SECS);
        match tokio::time::timeout(budget, handler.execute(JobContext::new(job))).await {
            Ok(result) => result,
            Err(_) => {
                // The timeout message contains "timed out" so the classifier
                // schedules a retry.
                warn!(?job_type, timeout_secs = defaults::JOB_TIMEOUT_SECS, "Job timed out");
                JobResult::Failed(format!(
                    "Job timed out after {}s",
                    defaults::JOB_TIMEOUT_SECS
                ))
            }
        }
    }
}

/// Builder wiring a worker to its handlers.
pub struct WorkerBuilder {
    jobs: Arc<dyn JobRepository>,
    config: WorkerConfig,
    handlers: Vec<Box<dyn JobHandler>>,
}

impl WorkerBuilder {
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            jobs,
            config: WorkerConfig::default(),
            handlers: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub async fn build(self) -> JobWorker {
        let worker = JobWorker::new(self.jobs, self.config);
        {
            let mut handlers = worker.handlers.write().await;
            for handler in self.handlers {
                handlers.insert(handler.job_type(), Arc::from(handler));
            }
        }
        worker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, defaults::JOB_POLL_INTERVAL_MS);
        assert_eq!(config.max_concurrent_jobs, defaults::JOB_MAX_CONCURRENT);
        assert!(config.enabled);
    }

    #[test]
    fn test_worker_config_builders() {
        let config = WorkerConfig::default()
            .with_poll_interval(1000)
            .with_max_concurrent(8)
            .with_enabled(false);

        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.max_concurrent_jobs, 8);
        assert!(!config.enabled);
    }

    #[test]
    fn test_worker_config_max_concurrent_floor() {
        let config = WorkerConfig::default().with_max_concurrent(0);
        assert_eq!(config.max_concurrent_jobs, 1);
        assert_eq!(config.poll_interval_ms, defaults::JOB_POLL_INTERVAL_MS);
    }
}
