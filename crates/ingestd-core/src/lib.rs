//! # ingestd-core
//!
//! Core types, traits, and abstractions for the ingestd job orchestration
//! service.
//!
//! This crate provides:
//! - The [`JobRecord`] value type and its status state machine
//! - Capability traits for the queue transport ([`Broker`], [`JobStore`],
//!   [`RecentJobsIndex`])
//! - Owner-or-admin access control ([`Principal`], [`authorize`]) and the
//!   injected [`IdentityProvider`] seam
//! - The shared [`Error`] taxonomy and [`MetricsRecorder`]

pub mod auth;
pub mod defaults;
pub mod error;
pub mod metrics;
pub mod models;
pub mod traits;

pub use auth::{authorize, IdentityProvider, Principal};
pub use error::{Error, Result};
pub use metrics::{MetricsRecorder, MetricsSnapshot};
pub use models::{
    BatchItemFailure, BatchReceipt, BatchSubmitRequest, JobRecord, JobStatus, JobView,
    SubmitReceipt, SubmitRequest,
};
pub use traits::{Broker, JobStore, RecentJobsIndex};
