//! Build execution for Tinderbox CI.
//!
//! A fixed pool of workers pulls build ids from a bounded in-process queue,
//! runs each build's script in a private workspace and streams the output
//! into the build store. Recovery re-enqueues unfinished builds at startup.

pub mod error;
pub mod pool;
pub mod queue;
pub mod recovery;
pub mod script;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::{SchedulerError, SchedulerResult, WorkerError};
pub use pool::{EngineConfig, WorkerPool};
pub use queue::{BuildQueue, QueueReceiver};
pub use recovery::recover;
pub use script::ScriptConfig;
pub use worker::{ScriptOutcome, Worker};
