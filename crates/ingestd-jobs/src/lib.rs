//! # ingestd-jobs
//!
//! The service layer of ingestd: validated submission ([`SubmissionService`]),
//! status reads and cancellation ([`StatusTracker`]), live status streaming
//! ([`StatusStreamer`]), and the out-of-process execution loop ([`JobWorker`]).
//!
//! Every service is written against the capability traits in
//! `ingestd_core::traits`, so the Redis transport and the in-memory test
//! transport are interchangeable underneath.

pub mod stream;
pub mod submit;
pub mod tracker;
pub mod worker;

pub use stream::{StatusStreamer, StreamEvent};
pub use submit::SubmissionService;
pub use tracker::StatusTracker;
pub use worker::{
    HandlerOutcome, JobHandler, JobWorker, NoOpHandler, WorkerConfig, WorkerEvent, WorkerHandle,
};
