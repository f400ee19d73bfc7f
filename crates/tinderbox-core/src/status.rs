//! Traits for the external collaborators the build engine reports to.
//!
//! The status reporter publishes commit statuses (the little dots next to a
//! commit on the forge), the remote repository lists branches for the UI.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Commit status as understood by the remote forge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Error,
    Failure,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitState::Pending => "pending",
            CommitState::Success => "success",
            CommitState::Error => "error",
            CommitState::Failure => "failure",
        }
    }
}

impl std::fmt::Display for CommitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publishes commit statuses.
///
/// Failures are reported to the caller, which only logs them: a build never
/// fails because its status could not be published.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Name of this reporter, for logs.
    fn name(&self) -> &'static str;

    /// Set the status of commit `sha`.
    async fn create_status(&self, sha: &str, state: CommitState) -> Result<()>;
}

/// Read access to the remote repository's metadata.
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    /// Names of the branches on the remote.
    async fn list_remote_branches(&self) -> Result<Vec<String>>;
}

/// Reporter used when no forge is configured: statuses only go to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

#[async_trait]
impl StatusReporter for LogReporter {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn create_status(&self, sha: &str, state: CommitState) -> Result<()> {
        tracing::info!(sha = %sha, state = %state, "Commit status");
        Ok(())
    }
}
