//! Durable job dispatch for function and agent work.
//!
//! Two named queues (`functions`, `agents`) back the executor and the agent
//! engine respectively; see [`service::JobQueue`] for the full contract.

pub mod envelope;
pub mod service;
pub mod ttl_store;

pub use envelope::{DeadLetter, Job, JobOutcome, JobPayload, JobStatusRecord, QueueName};
pub use service::{JobHandler, JobQueue, QueueConfig, QueueError};
