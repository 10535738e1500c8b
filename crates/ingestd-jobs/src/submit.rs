//! Validated job submission.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use ingestd_core::auth::Principal;
use ingestd_core::defaults::{
    self, DEFAULT_JOB_TIMEOUT_MINUTES, PRIORITY_MAX, PRIORITY_MIN,
};
use ingestd_core::error::{Error, Result};
use ingestd_core::metrics::MetricsRecorder;
use ingestd_core::models::{
    BatchItemFailure, BatchReceipt, BatchSubmitRequest, JobRecord, SubmitReceipt, SubmitRequest,
};
use ingestd_core::traits::{Broker, RecentJobsIndex};

/// Accepts submissions, validates them, and hands records to the broker.
pub struct SubmissionService {
    broker: Arc<dyn Broker>,
    recent: Arc<dyn RecentJobsIndex>,
    metrics: Arc<MetricsRecorder>,
    require_rights_confirm: bool,
    timeout_minutes: u32,
}

impl SubmissionService {
    pub fn new(
        broker: Arc<dyn Broker>,
        recent: Arc<dyn RecentJobsIndex>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            broker,
            recent,
            metrics,
            require_rights_confirm: true,
            timeout_minutes: DEFAULT_JOB_TIMEOUT_MINUTES,
        }
    }

    /// Disable (or re-enable) the content-rights confirmation gate.
    pub fn with_require_rights_confirm(mut self, required: bool) -> Self {
        self.require_rights_confirm = required;
        self
    }

    /// Execution timeout applied to new records, clamped to the permitted
    /// range.
    pub fn with_timeout_minutes(mut self, minutes: u32) -> Self {
        self.timeout_minutes = defaults::clamp_timeout_minutes(minutes);
        self
    }

    /// Submit one job. The receipt carries the assigned id and the initial
    /// `queued` status.
    pub async fn submit(
        &self,
        principal: &Principal,
        request: SubmitRequest,
    ) -> Result<SubmitReceipt> {
        self.check_rights(request.confirm_rights.unwrap_or(false))?;
        validate_url(&request.url)?;
        validate_priority(request.priority)?;

        let mut record = JobRecord::new(&principal.name, &request.url, request.priority)
            .with_timeout_minutes(self.timeout_minutes);
        if let Some(callback) = &request.callback_url {
            validate_url(callback)?;
            record = record.with_meta(defaults::META_CALLBACK_URL, json!(callback));
        }

        let job_id = record.id;
        self.broker.enqueue(record).await?;
        // The job is already enqueued; an index hiccup only costs listing
        // visibility.
        if let Err(e) = self.recent.push(job_id).await {
            warn!(%job_id, error = %e, "failed to record job in recent index");
        }
        self.metrics.record_submitted();
        info!(%job_id, owner = %principal.name, "job submitted");

        Ok(SubmitReceipt {
            job_id,
            status: ingestd_core::JobStatus::Queued,
        })
    }

    /// Submit a group of jobs under one batch correlation id.
    ///
    /// Not atomic: each item is validated and enqueued independently, and a
    /// failure on one item never unwinds the items already accepted. The
    /// receipt reports accepted ids and per-item failures side by side.
    pub async fn submit_batch(
        &self,
        principal: &Principal,
        request: BatchSubmitRequest,
    ) -> Result<BatchReceipt> {
        self.check_rights(request.confirm_rights)?;
        if request.urls.is_empty() {
            return Err(Error::Validation("batch contains no urls".to_string()));
        }

        let batch_id = Uuid::new_v4();
        let mut job_ids = Vec::with_capacity(request.urls.len());
        let mut failures = Vec::new();

        for (index, url) in request.urls.iter().enumerate() {
            match self.submit_batch_item(principal, batch_id, url).await {
                Ok(job_id) => job_ids.push(job_id),
                Err(e) => {
                    warn!(%batch_id, index, error = %e, "batch item rejected");
                    failures.push(BatchItemFailure {
                        index,
                        url: url.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.metrics.record_batch();
        info!(
            %batch_id,
            accepted = job_ids.len(),
            rejected = failures.len(),
            owner = %principal.name,
            "batch submitted"
        );

        Ok(BatchReceipt {
            batch_id,
            job_ids,
            failures,
        })
    }

    async fn submit_batch_item(
        &self,
        principal: &Principal,
        batch_id: Uuid,
        url: &str,
    ) -> Result<Uuid> {
        validate_url(url)?;
        let record = JobRecord::new(&principal.name, url, PRIORITY_MIN)
            .with_timeout_minutes(self.timeout_minutes)
            .with_meta(defaults::META_BATCH_ID, json!(batch_id.to_string()));
        let job_id = record.id;
        self.broker.enqueue(record).await?;
        if let Err(e) = self.recent.push(job_id).await {
            warn!(%job_id, error = %e, "failed to record job in recent index");
        }
        self.metrics.record_submitted();
        Ok(job_id)
    }

    fn check_rights(&self, confirmed: bool) -> Result<()> {
        if self.require_rights_confirm && !confirmed {
            return Err(Error::Validation(
                "content rights must be confirmed (confirm_rights: true)".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(Error::Validation("url must not be empty".to_string()));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Error::Validation(format!(
            "url must be http(s), got: {url}"
        )));
    }
    Ok(())
}

fn validate_priority(priority: i32) -> Result<()> {
    if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
        return Err(Error::Validation(format!(
            "priority must be between {PRIORITY_MIN} and {PRIORITY_MAX}, got {priority}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use ingestd_broker::MemoryBroker;
    use ingestd_core::models::JobStatus;

    fn service(broker: Arc<MemoryBroker>) -> SubmissionService {
        SubmissionService::new(
            broker.clone(),
            broker,
            Arc::new(MetricsRecorder::new()),
        )
        .with_require_rights_confirm(false)
    }

    fn request(url: &str) -> SubmitRequest {
        SubmitRequest {
            url: url.to_string(),
            priority: 0,
            callback_url: None,
            confirm_rights: None,
        }
    }

    #[tokio::test]
    async fn test_submit_returns_queued_receipt() {
        let broker = Arc::new(MemoryBroker::new());
        let svc = service(broker.clone());
        let alice = Principal::new("alice");

        let receipt = svc
            .submit(&alice, request("https://example.com/v.mp4"))
            .await
            .unwrap();
        assert_eq!(receipt.status, JobStatus::Queued);

        let record = broker.fetch(receipt.job_id, true).await.unwrap();
        assert_eq!(record.owner, "alice");
        assert!(record.enqueued_at.is_some());
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_url() {
        let broker = Arc::new(MemoryBroker::new());
        let svc = service(broker);
        let alice = Principal::new("alice");

        for url in ["", "   ", "ftp://example.com/v", "not-a-url"] {
            let err = svc.submit(&alice, request(url)).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "url {url:?}");
        }
    }

    #[tokio::test]
    async fn test_submit_rejects_priority_out_of_range() {
        let broker = Arc::new(MemoryBroker::new());
        let svc = service(broker);
        let alice = Principal::new("alice");

        for priority in [-1, 11, 100] {
            let mut req = request("https://example.com/v");
            req.priority = priority;
            let err = svc.submit(&alice, req).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "priority {priority}");
        }
    }

    #[tokio::test]
    async fn test_rights_confirmation_gate() {
        let broker = Arc::new(MemoryBroker::new());
        let svc = SubmissionService::new(
            broker.clone(),
            broker,
            Arc::new(MetricsRecorder::new()),
        );
        let alice = Principal::new("alice");

        let err = svc
            .submit(&alice, request("https://example.com/v"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let mut req = request("https://example.com/v");
        req.confirm_rights = Some(true);
        assert!(svc.submit(&alice, req).await.is_ok());
    }

    #[tokio::test]
    async fn test_callback_url_recorded_in_meta() {
        let broker = Arc::new(MemoryBroker::new());
        let svc = service(broker.clone());
        let alice = Principal::new("alice");

        let mut req = request("https://example.com/v");
        req.callback_url = Some("https://hooks.example.com/done".to_string());
        let receipt = svc.submit(&alice, req).await.unwrap();

        let record = broker.fetch(receipt.job_id, true).await.unwrap();
        assert_eq!(
            record.meta.get(defaults::META_CALLBACK_URL),
            Some(&json!("https://hooks.example.com/done"))
        );
    }

    #[tokio::test]
    async fn test_sequential_submissions_get_distinct_ids() {
        let broker = Arc::new(MemoryBroker::new());
        let svc = service(broker);
        let alice = Principal::new("alice");

        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let receipt = svc
                .submit(&alice, request("https://example.com/v"))
                .await
                .unwrap();
            assert!(seen.insert(receipt.job_id), "duplicate id issued");
        }
    }

    #[tokio::test]
    async fn test_batch_shares_one_batch_id() {
        let broker = Arc::new(MemoryBroker::new());
        let svc = service(broker.clone());
        let alice = Principal::new("alice");

        let receipt = svc
            .submit_batch(
                &alice,
                BatchSubmitRequest {
                    urls: vec![
                        "https://example.com/a".to_string(),
                        "https://example.com/b".to_string(),
                        "https://example.com/c".to_string(),
                    ],
                    confirm_rights: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(receipt.job_ids.len(), 3);
        assert!(receipt.failures.is_empty());
        for id in &receipt.job_ids {
            let record = broker.fetch(*id, true).await.unwrap();
            assert_eq!(record.batch_id(), Some(receipt.batch_id));
        }
    }

    #[tokio::test]
    async fn test_batch_rejects_empty() {
        let broker = Arc::new(MemoryBroker::new());
        let svc = service(broker);
        let alice = Principal::new("alice");

        let err = svc
            .submit_batch(
                &alice,
                BatchSubmitRequest {
                    urls: vec![],
                    confirm_rights: true,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_batch_isolates_invalid_items() {
        let broker = Arc::new(MemoryBroker::new());
        let svc = service(broker);
        let alice = Principal::new("alice");

        let receipt = svc
            .submit_batch(
                &alice,
                BatchSubmitRequest {
                    urls: vec![
                        "https://example.com/a".to_string(),
                        "not-a-url".to_string(),
                        "https://example.com/c".to_string(),
                    ],
                    confirm_rights: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(receipt.job_ids.len(), 2);
        assert_eq!(receipt.failures.len(), 1);
        assert_eq!(receipt.failures[0].index, 1);
        assert_eq!(receipt.failures[0].url, "not-a-url");
    }

    /// Broker wrapper that fails every `fail_on`-th enqueue.
    struct FlakyBroker {
        inner: Arc<MemoryBroker>,
        calls: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait]
    impl Broker for FlakyBroker {
        async fn enqueue(&self, record: ingestd_core::JobRecord) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_on {
                return Err(Error::Broker("connection reset".to_string()));
            }
            self.inner.enqueue(record).await
        }

        async fn fetch(&self, id: Uuid, refresh: bool) -> Result<ingestd_core::JobRecord> {
            self.inner.fetch(id, refresh).await
        }

        async fn cancel(&self, id: Uuid) -> Result<ingestd_core::JobRecord> {
            self.inner.cancel(id).await
        }
    }

    #[tokio::test]
    async fn test_batch_survives_mid_batch_broker_failure() {
        let inner = Arc::new(MemoryBroker::new());
        let flaky = Arc::new(FlakyBroker {
            inner: inner.clone(),
            calls: AtomicUsize::new(0),
            fail_on: 2,
        });
        let svc = SubmissionService::new(
            flaky,
            inner.clone(),
            Arc::new(MetricsRecorder::new()),
        )
        .with_require_rights_confirm(false);
        let alice = Principal::new("alice");

        let receipt = svc
            .submit_batch(
                &alice,
                BatchSubmitRequest {
                    urls: vec![
                        "https://example.com/a".to_string(),
                        "https://example.com/b".to_string(),
                        "https://example.com/c".to_string(),
                    ],
                    confirm_rights: true,
                },
            )
            .await
            .unwrap();

        // First and third items stayed enqueued; only the second failed.
        assert_eq!(receipt.job_ids.len(), 2);
        assert_eq!(receipt.failures.len(), 1);
        assert_eq!(receipt.failures[0].index, 1);
        assert!(receipt.failures[0].error.contains("connection reset"));
        for id in &receipt.job_ids {
            assert!(inner.fetch(*id, true).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_metrics_count_submissions() {
        let broker = Arc::new(MemoryBroker::new());
        let metrics = Arc::new(MetricsRecorder::new());
        let svc = SubmissionService::new(broker.clone(), broker, metrics.clone())
            .with_require_rights_confirm(false);
        let alice = Principal::new("alice");

        svc.submit(&alice, request("https://example.com/a"))
            .await
            .unwrap();
        svc.submit_batch(
            &alice,
            BatchSubmitRequest {
                urls: vec!["https://example.com/b".to_string()],
                confirm_rights: true,
            },
        )
        .await
        .unwrap();

        let snap = metrics.snapshot();
        assert_eq!(snap.jobs_submitted, 2);
        assert_eq!(snap.batches_submitted, 1);
    }
}
