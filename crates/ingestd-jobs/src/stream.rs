//! Live job status streaming.
//!
//! A stream polls the broker for live state on a fixed interval, emits a
//! snapshot whenever the status changes, and closes itself after a terminal
//! snapshot, an authorization denial, or a broker error.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;
use uuid::Uuid;

use ingestd_core::auth::{authorize, Principal};
use ingestd_core::defaults::STREAM_POLL_INTERVAL_MS;
use ingestd_core::models::{JobStatus, JobView};
use ingestd_core::traits::Broker;

const STREAM_CHANNEL_CAPACITY: usize = 16;

/// One event on a status stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Status changed; the full job view is attached.
    Snapshot {
        #[serde(flatten)]
        job: JobView,
    },
    /// Caller is neither owner nor admin. Always the last event.
    Denied { job_id: Uuid, message: String },
    /// The job disappeared or the broker failed. Always the last event.
    Error { job_id: Uuid, message: String },
}

impl StreamEvent {
    /// SSE event name for this variant.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Snapshot { .. } => "snapshot",
            StreamEvent::Denied { .. } => "denied",
            StreamEvent::Error { .. } => "error",
        }
    }
}

/// Produces per-job status streams by polling the broker.
pub struct StatusStreamer {
    broker: Arc<dyn Broker>,
    poll_interval: Duration,
}

impl StatusStreamer {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            poll_interval: Duration::from_millis(STREAM_POLL_INTERVAL_MS),
        }
    }

    /// Override the poll interval (tests use a short one).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Open a status stream for `id`.
    ///
    /// Emits a first snapshot immediately, then one snapshot per observed
    /// status change (consecutive identical statuses are deduplicated). The
    /// stream ends after a terminal snapshot, a `denied` event, or an
    /// `error` event. Every poll reads live broker state.
    pub fn stream(&self, principal: Principal, id: Uuid) -> ReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let broker = self.broker.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            let mut last_status: Option<JobStatus> = None;

            loop {
                // Stop on disconnect even while the status is unchanging; a
                // dropped receiver must not leave the poll loop running.
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tx.closed() => {
                        debug!(job_id = %id, "status stream receiver dropped");
                        break;
                    }
                }

                let record = match broker.fetch(id, true).await {
                    Ok(record) => record,
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Error {
                                job_id: id,
                                message: e.to_string(),
                            })
                            .await;
                        break;
                    }
                };

                if let Err(e) = authorize(&principal, &record.owner) {
                    let _ = tx
                        .send(StreamEvent::Denied {
                            job_id: id,
                            message: e.to_string(),
                        })
                        .await;
                    break;
                }

                if last_status == Some(record.status) {
                    continue;
                }
                last_status = Some(record.status);

                let terminal = record.status.is_terminal();
                let event = StreamEvent::Snapshot {
                    job: JobView::from(&record),
                };
                if tx.send(event).await.is_err() {
                    // Client went away.
                    debug!(job_id = %id, "status stream receiver dropped");
                    break;
                }
                if terminal {
                    break;
                }
            }
        });

        ReceiverStream::new(rx)
    }
}
