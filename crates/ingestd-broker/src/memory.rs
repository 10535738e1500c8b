//! In-memory queue transport.
//!
//! Single-process stand-in for [`crate::RedisBroker`] with the same
//! observable semantics. Used by the test suites and by deployments that
//! run the worker in-process.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;
use uuid::Uuid;

use ingestd_core::defaults::RECENT_JOBS_CAP;
use ingestd_core::error::{Error, Result};
use ingestd_core::models::{JobRecord, JobStatus};
use ingestd_core::traits::{Broker, JobStore, RecentJobsIndex};

/// In-memory broker, job store, and recent-jobs index in one value.
#[derive(Debug)]
pub struct MemoryBroker {
    jobs: RwLock<HashMap<Uuid, JobRecord>>,
    ready: Mutex<VecDeque<Uuid>>,
    recent: Mutex<VecDeque<Uuid>>,
    recent_cap: usize,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            ready: Mutex::new(VecDeque::new()),
            recent: Mutex::new(VecDeque::new()),
            recent_cap: RECENT_JOBS_CAP,
        }
    }

    /// Override the recent-index capacity (tests exercise eviction with
    /// small caps).
    pub fn with_recent_cap(mut self, cap: usize) -> Self {
        self.recent_cap = cap;
        self
    }

    /// Number of jobs currently waiting on the ready queue.
    pub async fn ready_len(&self) -> usize {
        self.ready.lock().await.len()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, mut record: JobRecord) -> Result<()> {
        if record.status != JobStatus::Queued {
            return Err(Error::Broker(format!(
                "cannot enqueue job {} in status {}",
                record.id, record.status
            )));
        }
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&record.id) {
            return Err(Error::Broker(format!("job {} already enqueued", record.id)));
        }
        record.mark_enqueued();
        let id = record.id;
        jobs.insert(id, record);
        drop(jobs);
        self.ready.lock().await.push_back(id);
        Ok(())
    }

    async fn fetch(&self, id: Uuid, _refresh: bool) -> Result<JobRecord> {
        // No snapshot cache here, so refresh is a no-op.
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(Error::JobNotFound(id))
    }

    async fn cancel(&self, id: Uuid) -> Result<JobRecord> {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        if record.status.is_terminal() {
            return Err(Error::CancelFailed(id));
        }
        record.mark_stopped()?;
        let record = record.clone();
        drop(jobs);
        self.ready.lock().await.retain(|queued| *queued != id);
        Ok(record)
    }
}

#[async_trait]
impl JobStore for MemoryBroker {
    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn claim_next(&self) -> Result<Option<JobRecord>> {
        let mut ready = self.ready.lock().await;
        if ready.is_empty() {
            return Ok(None);
        }
        let mut jobs = self.jobs.write().await;

        // Highest priority wins; FIFO within a priority level.
        let mut best: Option<(usize, i32)> = None;
        for (pos, id) in ready.iter().enumerate() {
            if let Some(record) = jobs.get(id) {
                let priority = record.priority;
                if best.map_or(true, |(_, p)| priority > p) {
                    best = Some((pos, priority));
                }
            }
        }
        let Some((pos, _)) = best else {
            ready.clear();
            return Ok(None);
        };
        let id = match ready.remove(pos) {
            Some(id) => id,
            None => return Ok(None),
        };
        let record = jobs
            .get_mut(&id)
            .ok_or_else(|| Error::Broker(format!("ready queue referenced missing job {id}")))?;
        record.mark_started()?;
        Ok(Some(record.clone()))
    }

    async fn complete(&self, id: Uuid, result: JsonValue) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        match record.mark_finished(result) {
            Ok(()) => Ok(()),
            // Cancel raced the worker; the terminal state stands.
            Err(Error::InvalidTransition { from, to }) => {
                warn!(job_id = %id, %from, %to, "ignoring completion of settled job");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        match record.mark_failed(error) {
            Ok(()) => Ok(()),
            Err(Error::InvalidTransition { from, to }) => {
                warn!(job_id = %id, %from, %to, "ignoring failure of settled job");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn defer(&self, id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        record.mark_deferred()?;
        drop(jobs);
        self.ready.lock().await.retain(|queued| *queued != id);
        Ok(())
    }
}

#[async_trait]
impl RecentJobsIndex for MemoryBroker {
    async fn push(&self, id: Uuid) -> Result<()> {
        let mut recent = self.recent.lock().await;
        recent.push_front(id);
        recent.truncate(self.recent_cap);
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Uuid>> {
        Ok(self.recent.lock().await.iter().take(limit).copied().collect())
    }
}
