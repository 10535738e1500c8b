//! Redis queue transport.
//!
//! Layout:
//! - `job:{id}`     JSON-serialized [`JobRecord`]
//! - `jobs:ready`   sorted set of waiting job ids, scored by priority with
//!   an enqueue-time tiebreak so claims are FIFO within a priority level
//! - `jobs:recent`  bounded list of recently submitted ids, newest first
//!
//! Fetches with `refresh = false` may be served from a process-local LRU
//! snapshot cache; live reads always update it.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use ingestd_core::defaults::RECENT_JOBS_CAP;
use ingestd_core::error::{Error, Result};
use ingestd_core::models::JobRecord;
use ingestd_core::traits::{Broker, JobStore, RecentJobsIndex};

const JOB_KEY_PREFIX: &str = "job:";
const READY_KEY: &str = "jobs:ready";
const RECENT_KEY: &str = "jobs:recent";

const SNAPSHOT_CACHE_CAP: usize = 1024;

/// Compare-and-set stop, atomic on the Redis side.
///
/// A plain load/check/save would race a worker settling the job between the
/// check and the save and overwrite its terminal record. The script rejects
/// the stop unless the stored status is still non-terminal, stamps
/// `status`/`ended_at` in place, and drops the id from the ready queue in
/// the same step. Returns the updated record JSON, `"terminal"`, or nil
/// when the key is missing.
///
/// KEYS[1] = job key, KEYS[2] = ready key
/// ARGV[1] = ended_at timestamp, ARGV[2] = job id
const CANCEL_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return false
end
local job = cjson.decode(raw)
local status = job['status']
if status == 'finished' or status == 'failed'
    or status == 'stopped' or status == 'cancelled' then
  return 'terminal'
end
job['status'] = 'stopped'
job['ended_at'] = ARGV[1]
local updated = cjson.encode(job)
redis.call('SET', KEYS[1], updated)
redis.call('ZREM', KEYS[2], ARGV[2])
return updated
"#;

fn job_key(id: Uuid) -> String {
    format!("{JOB_KEY_PREFIX}{id}")
}

/// Ready-queue score: priority dominates, earlier enqueue wins within a
/// priority level (claims pop the highest score).
fn ready_score(priority: i32, enqueued_ms: i64) -> f64 {
    priority as f64 * 1e13 - enqueued_ms as f64
}

/// Redis-backed broker, job store, and recent-jobs index.
pub struct RedisBroker {
    conn: ConnectionManager,
    snapshots: Mutex<LruCache<Uuid, JobRecord>>,
}

impl RedisBroker {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = ::redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!(%url, "connected to redis");
        Ok(Self::with_connection(conn))
    }

    pub fn with_connection(conn: ConnectionManager) -> Self {
        let cap = NonZeroUsize::new(SNAPSHOT_CACHE_CAP)
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            conn,
            snapshots: Mutex::new(LruCache::new(cap)),
        }
    }

    async fn load(&self, id: Uuid) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(job_key(id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &JobRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(record)?;
        let _: () = conn.set(job_key(record.id), raw).await?;
        self.snapshots.lock().await.put(record.id, record.clone());
        Ok(())
    }

    async fn load_live(&self, id: Uuid) -> Result<JobRecord> {
        let record = self.load(id).await?.ok_or(Error::JobNotFound(id))?;
        self.snapshots.lock().await.put(id, record.clone());
        Ok(record)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn enqueue(&self, mut record: JobRecord) -> Result<()> {
        if record.status != ingestd_core::JobStatus::Queued {
            return Err(Error::Broker(format!(
                "cannot enqueue job {} in status {}",
                record.id, record.status
            )));
        }
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(job_key(record.id)).await?;
        if exists {
            return Err(Error::Broker(format!("job {} already enqueued", record.id)));
        }
        record.mark_enqueued();
        let enqueued_ms = record
            .enqueued_at
            .map(|t| t.timestamp_millis())
            .unwrap_or_default();
        self.save(&record).await?;
        let score = ready_score(record.priority, enqueued_ms);
        let _: () = conn.zadd(READY_KEY, record.id.to_string(), score).await?;
        Ok(())
    }

    async fn fetch(&self, id: Uuid, refresh: bool) -> Result<JobRecord> {
        if !refresh {
            if let Some(record) = self.snapshots.lock().await.get(&id) {
                return Ok(record.clone());
            }
        }
        self.load_live(id).await
    }

    async fn cancel(&self, id: Uuid) -> Result<JobRecord> {
        let mut conn = self.conn.clone();
        let ended_at = chrono::Utc::now().to_rfc3339();
        let updated: Option<String> = ::redis::Script::new(CANCEL_SCRIPT)
            .key(job_key(id))
            .key(READY_KEY)
            .arg(ended_at)
            .arg(id.to_string())
            .invoke_async(&mut conn)
            .await?;
        match updated.as_deref() {
            None => Err(Error::JobNotFound(id)),
            Some("terminal") => Err(Error::CancelFailed(id)),
            Some(raw) => {
                let record: JobRecord = serde_json::from_str(raw)?;
                self.snapshots.lock().await.put(id, record.clone());
                Ok(record)
            }
        }
    }
}

#[async_trait]
impl JobStore for RedisBroker {
    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>> {
        self.load(id).await
    }

    async fn claim_next(&self) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        // ZPOPMAX is atomic, so concurrent workers never claim the same id.
        let popped: Vec<(String, f64)> = conn.zpopmax(READY_KEY, 1).await?;
        let Some((raw_id, _score)) = popped.into_iter().next() else {
            return Ok(None);
        };
        let id = Uuid::parse_str(&raw_id)
            .map_err(|e| Error::Broker(format!("malformed id on ready queue: {e}")))?;
        let mut record = self.load(id).await?.ok_or_else(|| {
            Error::Broker(format!("ready queue referenced missing job {id}"))
        })?;
        record.mark_started()?;
        self.save(&record).await?;
        Ok(Some(record))
    }

    async fn complete(&self, id: Uuid, result: JsonValue) -> Result<()> {
        let mut record = self.load_live(id).await?;
        match record.mark_finished(result) {
            Ok(()) => self.save(&record).await,
            Err(Error::InvalidTransition { from, to }) => {
                warn!(job_id = %id, %from, %to, "ignoring completion of settled job");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<()> {
        let mut record = self.load_live(id).await?;
        match record.mark_failed(error) {
            Ok(()) => self.save(&record).await,
            Err(Error::InvalidTransition { from, to }) => {
                warn!(job_id = %id, %from, %to, "ignoring failure of settled job");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn defer(&self, id: Uuid) -> Result<()> {
        let mut record = self.load_live(id).await?;
        record.mark_deferred()?;
        let mut conn = self.conn.clone();
        let _: () = conn.zrem(READY_KEY, id.to_string()).await?;
        self.save(&record).await
    }
}

#[async_trait]
impl RecentJobsIndex for RedisBroker {
    async fn push(&self, id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(RECENT_KEY, id.to_string()).await?;
        let _: () = conn
            .ltrim(RECENT_KEY, 0, RECENT_JOBS_CAP as isize - 1)
            .await?;
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Uuid>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(RECENT_KEY, 0, limit as isize - 1).await?;
        // Skip entries that fail to parse rather than failing the listing.
        Ok(raw
            .iter()
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect())
    }
}
