//! Test doubles shared by the engine tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tinderbox_core::{
    Build, BuildId, BuildKind, BuildStatus, CommitState, Error, OutputLine, OutputRecord, Result,
    StatusReporter,
};
use tinderbox_db::{BuildStore, DbError, DbResult, SqliteBuildStore};

/// Reporter that remembers every call.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    calls: Mutex<Vec<(String, CommitState)>>,
    fail: bool,
}

impl RecordingReporter {
    /// A reporter whose every call fails after being recorded.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(String, CommitState)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn create_status(&self, sha: &str, state: CommitState) -> Result<()> {
        self.calls.lock().unwrap().push((sha.to_string(), state));
        if self.fail {
            return Err(Error::ExternalService("status API unavailable".to_string()));
        }
        Ok(())
    }
}

/// A "remote repository" on local disk plus a stand-in `git` on `PATH` that
/// copies it on clone and accepts fetch and checkout.
pub struct FakeRemote {
    repo: PathBuf,
    bin: PathBuf,
}

const FAKE_GIT: &str = r#"#!/bin/sh
if [ "$1" = clone ]; then
    shift
    while [ $# -gt 2 ]; do shift; done
    mkdir -p "$2"
    cp -R "$1"/. "$2"/
fi
exit 0
"#;

impl FakeRemote {
    pub fn new(root: &Path) -> Self {
        let repo = root.join("remote");
        let bin = root.join("bin");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::create_dir_all(&bin).unwrap();

        let git = bin.join("git");
        std::fs::write(&git, FAKE_GIT).unwrap();
        std::fs::set_permissions(&git, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self { repo, bin }
    }

    pub fn path(&self) -> &Path {
        &self.repo
    }

    pub fn url(&self) -> String {
        self.repo.to_string_lossy().into_owned()
    }

    /// Set the repository's `ci.sh`.
    pub fn ci_script(&self, body: &str) {
        std::fs::write(self.repo.join("ci.sh"), body).unwrap();
    }

    /// Build environment that puts the fake `git` first on `PATH`.
    pub fn env(&self) -> BTreeMap<String, String> {
        let path = std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string());
        let mut env = BTreeMap::new();
        env.insert("PATH".to_string(), format!("{}:{}", self.bin.display(), path));
        env.insert("OS".to_string(), "linux".to_string());
        env
    }
}

/// Which store operation [`FaultyStore`] breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `build` fails with a database error.
    Load,
    /// `append_output` rejects every line.
    Output,
}

/// Store that delegates to SQLite except for one failing operation.
pub struct FaultyStore {
    inner: SqliteBuildStore,
    fault: Fault,
}

impl FaultyStore {
    pub fn new(inner: SqliteBuildStore, fault: Fault) -> Self {
        Self { inner, fault }
    }
}

#[async_trait]
impl BuildStore for FaultyStore {
    async fn create_build(
        &self,
        kind: BuildKind,
        clone_url: &str,
        ref_name: &str,
        commit_sha: &str,
    ) -> DbResult<Build> {
        self.inner.create_build(kind, clone_url, ref_name, commit_sha).await
    }

    async fn build(&self, id: BuildId) -> DbResult<Build> {
        if self.fault == Fault::Load {
            return Err(DbError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.build(id).await
    }

    async fn pending_builds(&self) -> DbResult<Vec<Build>> {
        self.inner.pending_builds().await
    }

    async fn refs(&self, kind: BuildKind) -> DbResult<Vec<String>> {
        self.inner.refs(kind).await
    }

    async fn ref_builds(
        &self,
        kind: BuildKind,
        ref_name: &str,
        start: i64,
        end: i64,
    ) -> DbResult<Vec<Build>> {
        self.inner.ref_builds(kind, ref_name, start, end).await
    }

    async fn sha_builds(&self, sha: &str) -> DbResult<Vec<Build>> {
        self.inner.sha_builds(sha).await
    }

    async fn set_status(&self, id: BuildId, status: BuildStatus) -> DbResult<()> {
        self.inner.set_status(id, status).await
    }

    async fn status(&self, id: BuildId) -> DbResult<BuildStatus> {
        self.inner.status(id).await
    }

    async fn append_output(&self, id: BuildId, line: &OutputLine) -> DbResult<()> {
        if self.fault == Fault::Output {
            return Err(DbError::InvalidRecord("disk full".to_string()));
        }
        self.inner.append_output(id, line).await
    }

    async fn output(&self, id: BuildId, start: i64, end: i64) -> DbResult<Vec<OutputRecord>> {
        self.inner.output(id, start, end).await
    }

    async fn purge_build(&self, id: BuildId) -> DbResult<()> {
        self.inner.purge_build(id).await
    }
}
