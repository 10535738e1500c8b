//! # ingestd-broker
//!
//! Queue transports for ingestd. [`RedisBroker`] is the production
//! transport; [`MemoryBroker`] backs tests and single-process deployments.
//! Both implement the capability traits from `ingestd_core::traits`.

pub mod memory;
pub mod redis;

pub use memory::MemoryBroker;
pub use redis::RedisBroker;
