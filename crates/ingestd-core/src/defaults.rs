//! Service-wide defaults and bounds.

/// Capacity of the recent-jobs index. Older entries are evicted.
pub const RECENT_JOBS_CAP: usize = 200;

/// Execution timeout applied when a submission does not specify one.
pub const DEFAULT_JOB_TIMEOUT_MINUTES: u32 = 60;

/// Lower bound on the configurable execution timeout.
pub const JOB_TIMEOUT_MIN_MINUTES: u32 = 5;

/// Upper bound on the configurable execution timeout.
pub const JOB_TIMEOUT_MAX_MINUTES: u32 = 480;

/// Inclusive priority range accepted at submission.
pub const PRIORITY_MIN: i32 = 0;
pub const PRIORITY_MAX: i32 = 10;

/// Interval between live status polls on a streaming connection.
pub const STREAM_POLL_INTERVAL_MS: u64 = 1_000;

/// Interval between claim attempts in the worker loop.
pub const WORKER_POLL_INTERVAL_MS: u64 = 500;

/// Jobs a single worker executes concurrently.
pub const WORKER_MAX_CONCURRENT: usize = 5;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Default page size for job listings.
pub const LIST_DEFAULT_LIMIT: usize = 50;

/// Meta key carrying the batch correlation id.
pub const META_BATCH_ID: &str = "batch_id";

/// Meta key carrying the per-job callback URL.
pub const META_CALLBACK_URL: &str = "callback_url";

/// Clamp a requested timeout into the permitted range.
pub fn clamp_timeout_minutes(minutes: u32) -> u32 {
    minutes.clamp(JOB_TIMEOUT_MIN_MINUTES, JOB_TIMEOUT_MAX_MINUTES)
}
