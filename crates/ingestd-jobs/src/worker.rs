//! Out-of-process job execution loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use ingestd_core::defaults::{EVENT_BUS_CAPACITY, WORKER_MAX_CONCURRENT, WORKER_POLL_INTERVAL_MS};
use ingestd_core::error::{Error, Result};
use ingestd_core::metrics::MetricsRecorder;
use ingestd_core::models::JobRecord;
use ingestd_core::traits::JobStore;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds when the queue is empty.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs.
    pub max_concurrent: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: WORKER_POLL_INTERVAL_MS,
            max_concurrent: WORKER_MAX_CONCURRENT,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `WORKER_MAX_CONCURRENT` | `5` | Max concurrent jobs |
    /// | `WORKER_POLL_INTERVAL_MS` | `500` | Polling interval when queue is empty |
    pub fn from_env() -> Self {
        let enabled = std::env::var("WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent = std::env::var("WORKER_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(WORKER_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("WORKER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(WORKER_POLL_INTERVAL_MS);

        Self {
            poll_interval_ms,
            max_concurrent,
            enabled,
        }
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Outcome of executing one job.
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    /// Job succeeded with this result payload.
    Success(JsonValue),
    /// Job failed with this error message.
    Failed(String),
}

/// Executes one claimed job. The worker enforces the per-job timeout around
/// `execute`, so handlers do not need their own deadline.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, job: &JobRecord) -> HandlerOutcome;
}

/// Handler that succeeds immediately, echoing the payload. Useful for
/// deployments that only exercise the queue plumbing, and for tests.
pub struct NoOpHandler;

#[async_trait]
impl JobHandler for NoOpHandler {
    async fn execute(&self, job: &JobRecord) -> HandlerOutcome {
        HandlerOutcome::Success(serde_json::json!({ "url": job.payload }))
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job was started.
    JobStarted { job_id: Uuid },
    /// A job completed successfully.
    JobFinished { job_id: Uuid },
    /// A job failed.
    JobFailed { job_id: Uuid, error: String },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Job worker that claims ready jobs from the store and runs them through a
/// [`JobHandler`].
pub struct JobWorker {
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
    metrics: Arc<MetricsRecorder>,
}

impl JobWorker {
    pub fn new(
        store: Arc<dyn JobStore>,
        handler: Arc<dyn JobHandler>,
        config: WorkerConfig,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            store,
            handler,
            config,
            event_tx,
            metrics,
        }
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Run the worker loop with concurrent job processing.
    ///
    /// Claims up to `max_concurrent` jobs at a time and runs them
    /// concurrently. Only sleeps when the queue is empty.
    #[instrument(skip(self, shutdown_rx))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent,
            "Job worker started"
        );

        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Job worker received shutdown signal");
                break;
            }

            // Claim up to max_concurrent jobs
            let mut claimed = 0;
            let mut tasks = tokio::task::JoinSet::new();

            for _ in 0..self.config.max_concurrent {
                match self.claim_job().await {
                    Some(job) => {
                        claimed += 1;
                        let worker = self.clone_refs();
                        tasks.spawn(async move {
                            worker.execute_job(job).await;
                        });
                    }
                    None => break,
                }
            }

            if claimed == 0 {
                // Queue empty, sleep before polling again
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Job worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(claimed, "Processing concurrent job batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "Job task panicked");
                    }
                }
                // No sleep: immediately try to claim more jobs
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }

    /// Claim the next ready job without processing it.
    async fn claim_job(&self) -> Option<JobRecord> {
        match self.store.claim_next().await {
            Ok(Some(job)) => Some(job),
            Ok(None) => None,
            Err(e) => {
                error!(error = ?e, "Failed to claim job");
                None
            }
        }
    }

    /// Clone references needed for spawned job tasks.
    fn clone_refs(&self) -> JobWorkerRef {
        JobWorkerRef {
            store: self.store.clone(),
            handler: self.handler.clone(),
            event_tx: self.event_tx.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }
}

/// Lightweight reference bundle for executing a single job in a spawned task.
struct JobWorkerRef {
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    event_tx: broadcast::Sender<WorkerEvent>,
    metrics: Arc<MetricsRecorder>,
}

impl JobWorkerRef {
    /// Execute a single claimed job, enforcing its timeout.
    async fn execute_job(self, job: JobRecord) {
        let start = Instant::now();
        let job_id = job.id;

        info!(%job_id, payload = %job.payload, "Processing job");
        let _ = self.event_tx.send(WorkerEvent::JobStarted { job_id });

        let job_timeout = Duration::from_secs(u64::from(job.timeout_minutes) * 60);
        let outcome = match tokio::time::timeout(job_timeout, self.handler.execute(&job)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    %job_id,
                    "Job exceeded timeout of {} minutes",
                    job.timeout_minutes
                );
                HandlerOutcome::Failed(format!(
                    "Job exceeded timeout of {} minutes",
                    job.timeout_minutes
                ))
            }
        };

        match outcome {
            HandlerOutcome::Success(result) => {
                if let Err(e) = self.store.complete(job_id, result).await {
                    error!(error = ?e, %job_id, "Failed to mark job as finished");
                } else {
                    info!(
                        %job_id,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Job finished successfully"
                    );
                    self.metrics.record_finished();
                    let _ = self.event_tx.send(WorkerEvent::JobFinished { job_id });
                }
            }
            HandlerOutcome::Failed(message) => {
                if let Err(e) = self.store.fail(job_id, &message).await {
                    error!(error = ?e, %job_id, "Failed to mark job as failed");
                } else {
                    warn!(%job_id, error = %message, "Job failed");
                    self.metrics.record_failed();
                    let _ = self.event_tx.send(WorkerEvent::JobFailed {
                        job_id,
                        error: message,
                    });
                }
            }
        }
    }
}
