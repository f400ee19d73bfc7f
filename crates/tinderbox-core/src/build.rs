//! Build records, statuses and output lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::CommitState;
use crate::{BuildId, Error};

/// What kind of repository event triggered a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildKind {
    Push,
    PullRequest,
}

impl BuildKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildKind::Push => "push",
            BuildKind::PullRequest => "pull_request",
        }
    }
}

impl std::fmt::Display for BuildKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(BuildKind::Push),
            "pull_request" | "pull-request" | "pr" => Ok(BuildKind::PullRequest),
            _ => Err(Error::InvalidInput(format!("unknown build kind: {}", s))),
        }
    }
}

/// Status of a build.
///
/// `Success`, `Failed` and `Error` are terminal. `Failed` means the user's
/// script exited nonzero; `Error` means the CI system itself could not
/// carry the build through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Queued,
    Running,
    Success,
    Failed,
    Error,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failed | BuildStatus::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Queued => "queued",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
            BuildStatus::Error => "error",
        }
    }

    /// The commit status reported to the remote for this build status.
    pub fn commit_state(&self) -> CommitState {
        match self {
            BuildStatus::Queued | BuildStatus::Running => CommitState::Pending,
            BuildStatus::Success => CommitState::Success,
            BuildStatus::Failed => CommitState::Failure,
            BuildStatus::Error => CommitState::Error,
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(BuildStatus::Queued),
            "running" => Ok(BuildStatus::Running),
            "success" => Ok(BuildStatus::Success),
            "failed" => Ok(BuildStatus::Failed),
            "error" => Ok(BuildStatus::Error),
            _ => Err(Error::InvalidInput(format!("unknown build status: {}", s))),
        }
    }
}

/// One execution attempt of the CI script for one commit.
///
/// Every field is fixed at creation and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub kind: BuildKind,
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub clone_url: String,
    pub commit_sha: String,
    pub created_at: DateTime<Utc>,
}

/// A repository change event handed over by the ingestion layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEvent {
    pub kind: BuildKind,
    pub clone_url: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub commit_sha: String,
}

/// Which stream an output line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Script standard output.
    Stdout,
    /// Script standard error.
    Stderr,
    /// Progress lines written by the CI system.
    Info,
    /// Failures of the CI system itself.
    Error,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Stdout => "stdout",
            Channel::Stderr => "stderr",
            Channel::Info => "info",
            Channel::Error => "error",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(Channel::Stdout),
            "stderr" => Ok(Channel::Stderr),
            "info" => Ok(Channel::Info),
            "error" => Ok(Channel::Error),
            _ => Err(Error::InvalidInput(format!("unknown output channel: {}", s))),
        }
    }
}

/// A line of build output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub channel: Channel,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl OutputLine {
    pub fn new(channel: Channel, text: impl Into<String>) -> Self {
        Self {
            channel,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn stdout(text: impl Into<String>) -> Self {
        Self::new(Channel::Stdout, text)
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self::new(Channel::Stderr, text)
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(Channel::Info, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Channel::Error, text)
    }
}

/// An output line as persisted, with its per-build sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Position of the line within its build's output, starting at 0.
    pub sequence: i64,
    #[serde(flatten)]
    pub line: OutputLine,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!BuildStatus::Queued.is_terminal());
        assert!(!BuildStatus::Running.is_terminal());
        assert!(BuildStatus::Success.is_terminal());
        assert!(BuildStatus::Failed.is_terminal());
        assert!(BuildStatus::Error.is_terminal());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            BuildStatus::Queued,
            BuildStatus::Running,
            BuildStatus::Success,
            BuildStatus::Failed,
            BuildStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<BuildStatus>().unwrap(), status);
        }
        assert!("finished".parse::<BuildStatus>().is_err());
    }

    #[test]
    fn test_commit_state_mapping() {
        assert_eq!(BuildStatus::Running.commit_state(), CommitState::Pending);
        assert_eq!(BuildStatus::Success.commit_state(), CommitState::Success);
        assert_eq!(BuildStatus::Failed.commit_state(), CommitState::Failure);
        assert_eq!(BuildStatus::Error.commit_state(), CommitState::Error);
    }

    #[test]
    fn test_build_kind_parsing() {
        assert_eq!("push".parse::<BuildKind>().unwrap(), BuildKind::Push);
        assert_eq!(
            "pull_request".parse::<BuildKind>().unwrap(),
            BuildKind::PullRequest
        );
        assert_eq!("pr".parse::<BuildKind>().unwrap(), BuildKind::PullRequest);
        assert!("tag".parse::<BuildKind>().is_err());
    }

    #[test]
    fn test_build_serializes_ref_field() {
        let build = Build {
            id: BuildId::new(1),
            kind: BuildKind::Push,
            ref_name: "refs/heads/main".to_string(),
            clone_url: "https://example.com/r.git".to_string(),
            commit_sha: "deadbeef".to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&build).unwrap();
        assert_eq!(json["ref"], "refs/heads/main");
        assert_eq!(json["kind"], "push");
        assert_eq!(json["id"], 1);
    }

    #[test]
    fn test_output_record_flattens_line() {
        let record = OutputRecord {
            sequence: 3,
            line: OutputLine::stderr("boom"),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["sequence"], 3);
        assert_eq!(json["channel"], "stderr");
        assert_eq!(json["text"], "boom");
    }
}
