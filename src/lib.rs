#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

/// Key/value configuration table.
pub mod config;
/// Web dashboard for monitoring the queue.
pub mod dashboard;
/// Database bootstrap.
pub mod db;
mod enqueue;
mod errors;
/// Bounded subprocess execution.
pub mod executor;
mod reaper;
mod runner;
/// Database schema definitions.
pub mod schema;
/// Signal handling for graceful shutdown.
pub mod shutdown;
/// SQL queries for the jobs table.
pub mod storage;
mod worker;

/// Validated insertion of new jobs.
pub use self::enqueue::{DEFAULT_MAX_RETRIES, NewJob, enqueue};
/// Error type for job enqueueing operations.
pub use self::errors::EnqueueError;
/// Janitor that releases jobs orphaned in `processing`.
pub use self::reaper::Reaper;
/// The pool supervisor that launches and joins workers.
pub use self::runner::{RunHandle, Runner};
/// Per-worker tuning knobs.
pub use self::worker::WorkerConfig;
