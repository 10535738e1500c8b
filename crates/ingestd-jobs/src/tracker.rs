//! Status reads, listing, and cancellation.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use ingestd_core::auth::{authorize, Principal};
use ingestd_core::defaults::RECENT_JOBS_CAP;
use ingestd_core::error::{Error, Result};
use ingestd_core::metrics::MetricsRecorder;
use ingestd_core::models::JobView;
use ingestd_core::traits::{Broker, RecentJobsIndex};

/// Read-side service over the broker: per-job status, recent listings, and
/// cancellation. Every operation enforces the owner-or-admin rule after
/// resolving the record.
pub struct StatusTracker {
    broker: Arc<dyn Broker>,
    recent: Arc<dyn RecentJobsIndex>,
    metrics: Arc<MetricsRecorder>,
}

impl StatusTracker {
    pub fn new(
        broker: Arc<dyn Broker>,
        recent: Arc<dyn RecentJobsIndex>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            broker,
            recent,
            metrics,
        }
    }

    /// Current status of one job. With `refresh` set the broker reads live
    /// transport state instead of any cached snapshot.
    pub async fn status(&self, principal: &Principal, id: Uuid, refresh: bool) -> Result<JobView> {
        let record = self.broker.fetch(id, refresh).await?;
        authorize(principal, &record.owner)?;
        Ok(JobView::from(&record))
    }

    /// Recently submitted jobs, newest first. Admins see every job; other
    /// callers see only the jobs they own. Ids whose records have expired
    /// out of the transport are skipped.
    pub async fn list(&self, principal: &Principal, limit: usize) -> Result<Vec<JobView>> {
        let limit = limit.clamp(1, RECENT_JOBS_CAP);
        let ids = self.recent.list(limit).await?;
        let mut views = Vec::with_capacity(ids.len());
        for id in ids {
            match self.broker.fetch(id, false).await {
                Ok(record) => {
                    if principal.can_access(&record.owner) {
                        views.push(JobView::from(&record));
                    }
                }
                Err(Error::JobNotFound(_)) => {
                    debug!(job_id = %id, "skipping expired job in recent index");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(views)
    }

    /// Request cancellation. Cooperative: a running worker may still be
    /// winding down when the terminal `stopped` state is recorded. Fails
    /// with `CancelFailed` when the job is already settled.
    pub async fn cancel(&self, principal: &Principal, id: Uuid) -> Result<JobView> {
        // Live read so a just-settled job is rejected rather than re-marked.
        let record = self.broker.fetch(id, true).await?;
        authorize(principal, &record.owner)?;
        if record.status.is_terminal() {
            return Err(Error::CancelFailed(id));
        }
        let record = self.broker.cancel(id).await?;
        self.metrics.record_stopped();
        info!(job_id = %id, requested_by = %principal.name, "job cancelled");
        Ok(JobView::from(&record))
    }
}
