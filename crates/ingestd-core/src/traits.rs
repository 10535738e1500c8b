//! Capability traits implemented by the queue transport.
//!
//! The services in `ingestd-jobs` are written against these traits only, so
//! the Redis transport and the in-memory test transport are interchangeable.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::JobRecord;

/// Client-facing side of the queue transport.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Persist a record and push it onto the ready queue. The record must be
    /// `Queued` with a previously unseen id; `enqueued_at` is stamped here.
    async fn enqueue(&self, record: JobRecord) -> Result<()>;

    /// Fetch the record for `id`.
    ///
    /// With `refresh` set, this reads live transport state and updates any
    /// cached snapshot; otherwise a cached snapshot may be served. Returns
    /// `Error::JobNotFound` when no record exists.
    async fn fetch(&self, id: Uuid, refresh: bool) -> Result<JobRecord>;

    /// Cancel the job: remove it from the ready queue if still waiting and
    /// record the terminal `Stopped` state. Returns `Error::CancelFailed`
    /// when the job is already terminal.
    async fn cancel(&self, id: Uuid) -> Result<JobRecord>;
}

/// Worker-facing side of the queue transport.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Read a record without any caching.
    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>>;

    /// Atomically claim the next ready job and move it to `Started`.
    /// Returns `None` when the queue is empty.
    async fn claim_next(&self) -> Result<Option<JobRecord>>;

    /// Record successful completion with its result.
    async fn complete(&self, id: Uuid, result: JsonValue) -> Result<()>;

    /// Record failure with an error message.
    async fn fail(&self, id: Uuid, error: &str) -> Result<()>;

    /// Move a queued job to `Deferred`.
    async fn defer(&self, id: Uuid) -> Result<()>;
}

/// Bounded most-recent-first index of submitted job ids.
#[async_trait]
pub trait RecentJobsIndex: Send + Sync {
    /// Record `id` as the most recent submission, evicting the oldest entry
    /// once the index is at capacity.
    async fn push(&self, id: Uuid) -> Result<()>;

    /// The most recent ids, newest first, at most `limit`.
    async fn list(&self, limit: usize) -> Result<Vec<Uuid>>;
}
