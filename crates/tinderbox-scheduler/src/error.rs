//! Scheduler error types.

use std::path::PathBuf;
use thiserror::Error;
use tinderbox_core::BuildId;
use tinderbox_db::DbError;

/// Faults while orchestrating a single build. Any of these ends the build
/// with status Error; a failing user script is a [`crate::ScriptOutcome`].
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to start script: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to read script output: {0}")]
    Pipe(String),

    #[error("workspace I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("build store failed: {0}")]
    Store(#[from] DbError),
}

/// Errors starting the engine or feeding its queue.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to prepare workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("build queue is closed, dropped build {0}")]
    QueueClosed(BuildId),

    #[error("build store failed: {0}")]
    Store(#[from] DbError),
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
