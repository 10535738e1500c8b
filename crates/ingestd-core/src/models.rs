//! Job record model, status state machine, and request/response types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// JOB STATUS
// =============================================================================

/// Lifecycle status of a job.
///
/// `Finished`, `Failed`, `Stopped`, and `Cancelled` are terminal: once a
/// record reaches one of them, no further transition is permitted and no
/// field may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the queue (initial state).
    Queued,
    /// Claimed by a worker and executing.
    Started,
    /// Held back by broker-level dependency or back-pressure deferral.
    Deferred,
    /// Completed successfully; `result` is set.
    Finished,
    /// Execution raised or timed out; `error` is set.
    Failed,
    /// Cancellation request accepted (cooperative; the worker may still be
    /// winding down when this is recorded).
    Stopped,
    /// Cancelled at the transport level before execution. Read off the wire
    /// only; no transition here produces it (cancellation records
    /// `Stopped`).
    Cancelled,
}

impl JobStatus {
    /// Whether this status permits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Stopped | JobStatus::Cancelled
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `Finished` is only reachable through `Started`. `Failed` is reachable
    /// from any non-terminal state because a timeout breach surfaces as a
    /// failure regardless of where the job was sitting.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Queued, Started) | (Queued, Deferred) => true,
            (Started, Finished) => true,
            (Deferred, Queued) | (Deferred, Started) => true,
            // Cooperative stop is accepted from any non-terminal state.
            (_, Stopped) => true,
            // Timeout breach: any non-terminal state may fail.
            (_, Failed) => true,
            _ => false,
        }
    }

    /// Stable wire name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Deferred => "deferred",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// JOB RECORD
// =============================================================================

/// Canonical state of one unit of work.
///
/// The record is decoupled from the queue transport: only the capability
/// traits in [`crate::traits`] read or write persisted records. `id` and
/// `owner` are immutable after creation; timestamps are set at most once and
/// are non-decreasing in the order created -> enqueued -> started -> ended;
/// `result` and `error` are mutually exclusive and only set in a terminal
/// state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub owner: String,
    /// Opaque payload descriptor (a validated source URL).
    pub payload: String,
    pub priority: i32,
    pub status: JobStatus,
    /// Execution timeout enforced by the worker pairing.
    pub timeout_minutes: u32,
    pub created_at: DateTime<Utc>,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    /// Auxiliary key/value pairs (batch id, callback URL).
    #[serde(default)]
    pub meta: HashMap<String, JsonValue>,
}

impl JobRecord {
    /// Create a fresh `Queued` record with a random 128-bit id.
    pub fn new(owner: impl Into<String>, payload: impl Into<String>, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            payload: payload.into(),
            priority,
            status: JobStatus::Queued,
            timeout_minutes: defaults::DEFAULT_JOB_TIMEOUT_MINUTES,
            created_at: Utc::now(),
            enqueued_at: None,
            started_at: None,
            ended_at: None,
            result: None,
            error: None,
            meta: HashMap::new(),
        }
    }

    /// Set the execution timeout, clamped to the permitted range.
    pub fn with_timeout_minutes(mut self, minutes: u32) -> Self {
        self.timeout_minutes = defaults::clamp_timeout_minutes(minutes);
        self
    }

    /// Attach a meta entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Guarded status transition. Timestamps are owned by the `mark_*`
    /// methods; this only moves the status pointer.
    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Record the enqueue timestamp. Called exactly once by the broker when
    /// the record is pushed onto the ready queue.
    pub fn mark_enqueued(&mut self) {
        if self.enqueued_at.is_none() {
            self.enqueued_at = Some(Utc::now());
        }
    }

    /// Worker claims the job: `Queued -> Started` (also valid from
    /// `Deferred` when a deferral resolves directly into execution).
    pub fn mark_started(&mut self) -> Result<()> {
        self.transition(JobStatus::Started)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Worker completed: `Started -> Finished`, result and ended_at set.
    pub fn mark_finished(&mut self, result: JsonValue) -> Result<()> {
        self.transition(JobStatus::Finished)?;
        self.result = Some(result);
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Worker raised (or the timeout was breached): terminal `Failed`,
    /// error and ended_at set.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Cancellation request accepted: terminal `Stopped`, recorded
    /// immediately rather than on confirmed worker exit.
    pub fn mark_stopped(&mut self) -> Result<()> {
        self.transition(JobStatus::Stopped)?;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Broker-level deferral: `Queued -> Deferred`.
    pub fn mark_deferred(&mut self) -> Result<()> {
        self.transition(JobStatus::Deferred)
    }

    /// Deferral resolved: `Deferred -> Queued`.
    pub fn mark_requeued(&mut self) -> Result<()> {
        self.transition(JobStatus::Queued)
    }

    /// Batch correlation id carried in `meta`, if any.
    pub fn batch_id(&self) -> Option<Uuid> {
        self.meta
            .get(defaults::META_BATCH_ID)
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

/// Client-facing projection of a [`JobRecord`].
///
/// `result` is only populated for `Finished` jobs; callers never see a
/// partial result from a running or failed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: Uuid,
    pub owner: String,
    pub status: JobStatus,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub meta: HashMap<String, JsonValue>,
}

impl From<&JobRecord> for JobView {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.id,
            owner: record.owner.clone(),
            status: record.status,
            enqueued_at: record.enqueued_at,
            started_at: record.started_at,
            ended_at: record.ended_at,
            result: if record.status == JobStatus::Finished {
                record.result.clone()
            } else {
                None
            },
            error: record.error.clone(),
            meta: record.meta.clone(),
        }
    }
}

// =============================================================================
// SUBMISSION TYPES
// =============================================================================

/// Request to submit one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Source URL to ingest.
    pub url: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub callback_url: Option<String>,
    /// Confirmation that the caller holds rights to the content.
    #[serde(default)]
    pub confirm_rights: Option<bool>,
}

/// Receipt for a single accepted submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Request to submit a group of jobs under one batch correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSubmitRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub confirm_rights: bool,
}

/// One item of a batch that could not be enqueued. Batch submission is not
/// atomic: earlier items stay enqueued when a later item fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemFailure {
    pub index: usize,
    pub url: String,
    pub error: String,
}

/// Receipt for a batch submission: successful ids plus per-item failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReceipt {
    pub batch_id: Uuid,
    pub job_ids: Vec<Uuid>,
    pub failures: Vec<BatchItemFailure>,
}
