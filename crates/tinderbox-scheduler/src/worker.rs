//! Worker that runs builds from the queue.
//!
//! Each build goes through the same pipeline: mark it Running, run the
//! composed build script in the worker's workspace while streaming its
//! output into the store, record a closing line, clean the workspace, then
//! persist and report the final status. Faults anywhere in the pipeline end
//! the build with status Error; the worker itself keeps going.

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tinderbox_core::{
    Build, BuildId, BuildStatus, Channel, CommitState, OutputLine, StatusReporter,
};
use tinderbox_db::{BuildStore, DbError};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::WorkerError;
use crate::pool::EngineConfig;
use crate::queue::QueueReceiver;
use crate::script;

/// "Text file busy": another thread forked while the script was open for writing.
const ETXTBSY: i32 = 26;
const SPAWN_ATTEMPTS: u32 = 5;

/// How a script run ended, when nothing went wrong around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOutcome {
    Success,
    /// Nonzero exit. `code` is `None` when the script was killed by a signal.
    Failed { code: Option<i32> },
    TimedOut { after: Duration },
}

impl ScriptOutcome {
    fn from_exit(status: ExitStatus) -> Self {
        if status.success() {
            ScriptOutcome::Success
        } else {
            ScriptOutcome::Failed {
                code: status.code(),
            }
        }
    }

    /// Build status this outcome finalizes to.
    pub fn status(&self) -> BuildStatus {
        match self {
            ScriptOutcome::Success => BuildStatus::Success,
            ScriptOutcome::Failed { .. } => BuildStatus::Failed,
            ScriptOutcome::TimedOut { .. } => BuildStatus::Error,
        }
    }
}

impl fmt::Display for ScriptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptOutcome::Success => write!(f, "script exited with status 0"),
            ScriptOutcome::Failed { code: Some(code) } => {
                write!(f, "script exited with status {}", code)
            }
            ScriptOutcome::Failed { code: None } => write!(f, "script was killed by a signal"),
            ScriptOutcome::TimedOut { after } => {
                write!(f, "script timed out after {}s and was killed", after.as_secs_f64())
            }
        }
    }
}

/// One execution slot with its own workspace.
pub struct Worker {
    index: usize,
    workspace: PathBuf,
    store: Arc<dyn BuildStore>,
    reporter: Arc<dyn StatusReporter>,
    config: Arc<EngineConfig>,
}

impl Worker {
    pub fn new(
        index: usize,
        workspace: PathBuf,
        store: Arc<dyn BuildStore>,
        reporter: Arc<dyn StatusReporter>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            index,
            workspace,
            store,
            reporter,
            config,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Run builds until the queue is closed and drained.
    pub async fn run(self, queue: QueueReceiver) {
        info!(worker = self.index, workspace = %self.workspace.display(), "Starting worker");

        while let Some(id) = queue.recv().await {
            self.process(id).await;
        }

        info!(worker = self.index, "Worker stopped");
    }

    /// Run one build through the whole pipeline. Never fails: every fault is
    /// recorded on the build instead.
    pub async fn process(&self, id: BuildId) {
        let build = match self.store.build(id).await {
            Ok(build) => build,
            Err(DbError::NotFound(_)) => {
                warn!(worker = self.index, build_id = %id, "Skipping unknown build");
                return;
            }
            Err(e) => {
                error!(worker = self.index, build_id = %id, error = %e, "Failed to load build");
                self.record(id, OutputLine::error(format!("Build errored: failed to load build: {}", e)))
                    .await;
                if let Err(e) = self.store.set_status(id, BuildStatus::Error).await {
                    error!(worker = self.index, build_id = %id, error = %e, "Failed to persist final status");
                }
                return;
            }
        };

        info!(
            worker = self.index,
            build_id = %id,
            kind = %build.kind,
            r#ref = %build.ref_name,
            sha = %build.commit_sha,
            "Starting build"
        );

        let result = self.execute(&build).await;
        let status = match &result {
            Ok(outcome) => outcome.status(),
            Err(_) => BuildStatus::Error,
        };

        let summary = match &result {
            Ok(outcome @ ScriptOutcome::TimedOut { .. }) => {
                OutputLine::error(format!("Build errored: {}", outcome))
            }
            Ok(outcome) => OutputLine::info(format!("Build {}: {}", status, outcome)),
            Err(e) => OutputLine::error(format!("Build errored: {}", e)),
        };
        self.record(id, summary).await;

        self.cleanup(id).await;

        match self.store.set_status(id, status).await {
            Ok(()) => info!(worker = self.index, build_id = %id, status = %status, "Build finished"),
            Err(e) => {
                error!(worker = self.index, build_id = %id, status = %status, error = %e, "Failed to persist final status")
            }
        }
        self.report(&build.commit_sha, status.commit_state()).await;
    }

    /// Mark the build Running and run its script.
    async fn execute(&self, build: &Build) -> Result<ScriptOutcome, WorkerError> {
        self.store.set_status(build.id, BuildStatus::Running).await?;
        self.report(&build.commit_sha, CommitState::Pending).await;

        let script = script::build_script(&self.config.script, &self.workspace, build);
        self.store
            .append_output(build.id, &OutputLine::info("Running build script"))
            .await?;

        let outcome = self.run_script(build.id, &script).await?;
        if let ScriptOutcome::TimedOut { after } = outcome {
            warn!(worker = self.index, build_id = %build.id, timeout_secs = after.as_secs(), "Build timed out");
        }
        Ok(outcome)
    }

    /// Empty the workspace. Problems are recorded on the build and otherwise
    /// ignored.
    async fn cleanup(&self, id: BuildId) {
        self.record(id, OutputLine::info("Cleaning workspace")).await;

        let script = script::cleanup_script(&self.workspace);
        match self.run_script(id, &script).await {
            Ok(ScriptOutcome::Success) => {}
            Ok(outcome) => self.record(id, OutputLine::error(format!("Cleanup {}", outcome))).await,
            Err(e) => {
                warn!(worker = self.index, build_id = %id, error = %e, "Workspace cleanup failed");
                self.record(id, OutputLine::error(format!("Cleanup failed: {}", e))).await;
            }
        }
    }

    /// Write `script` into the workspace and run it, forwarding both output
    /// streams line by line. Gives up once the configured timeout passes.
    async fn run_script(&self, id: BuildId, script: &str) -> Result<ScriptOutcome, WorkerError> {
        let path = self.workspace.join(script::SCRIPT_FILE);
        tokio::fs::write(&path, script).await?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700)).await?;

        let mut command = Command::new(&path);
        command
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = spawn(&mut command).await?;
        // The script leads its own process group, so whatever it starts can
        // be killed with it.
        let group = child.id().map(|pid| Pid::from_raw(pid as i32));
        debug!(worker = self.index, build_id = %id, pid = ?child.id(), "Spawned script");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Pipe("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| WorkerError::Pipe("stderr was not captured".to_string()))?;

        let stdout_task = tokio::spawn(forward_lines(self.store.clone(), id, stdout, Channel::Stdout));
        let stderr_task = tokio::spawn(forward_lines(self.store.clone(), id, stderr, Channel::Stderr));
        let readers = [stdout_task.abort_handle(), stderr_task.abort_handle()];

        let timeout = self.config.timeout;
        let finished = tokio::time::timeout(timeout, async {
            tokio::try_join!(join_reader(stdout_task), join_reader(stderr_task))?;
            Ok::<_, WorkerError>(child.wait().await?)
        })
        .await;

        match finished {
            Ok(Ok(status)) => {
                // Background jobs must not outlive the build.
                kill_group(group);
                Ok(ScriptOutcome::from_exit(status))
            }
            Ok(Err(e)) => {
                stop(&mut child, group, &readers).await;
                Err(e)
            }
            Err(_) => {
                stop(&mut child, group, &readers).await;
                Ok(ScriptOutcome::TimedOut { after: timeout })
            }
        }
    }

    /// Append a line outside the script's own output. Store failures here
    /// can no longer change the build's outcome, so they are only logged.
    async fn record(&self, id: BuildId, line: OutputLine) {
        if let Err(e) = self.store.append_output(id, &line).await {
            error!(worker = self.index, build_id = %id, error = %e, "Failed to record output line");
        }
    }

    async fn report(&self, sha: &str, state: CommitState) {
        if let Err(e) = self.reporter.create_status(sha, state).await {
            warn!(
                reporter = self.reporter.name(),
                sha = %sha,
                state = %state,
                error = %e,
                "Failed to report commit status"
            );
        }
    }
}

async fn spawn(command: &mut Command) -> Result<Child, WorkerError> {
    let mut attempt = 1;
    loop {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(e) if e.raw_os_error() == Some(ETXTBSY) && attempt < SPAWN_ATTEMPTS => {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
            }
            Err(e) => return Err(WorkerError::Spawn(e)),
        }
    }
}

/// Kill the script with everything it started, reap it and stop forwarding
/// its output.
async fn stop(child: &mut Child, group: Option<Pid>, readers: &[tokio::task::AbortHandle]) {
    kill_group(group);
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill script");
    }
    for reader in readers {
        reader.abort();
    }
}

fn kill_group(group: Option<Pid>) {
    let Some(group) = group else {
        return;
    };
    match killpg(group, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = %group, error = %e, "Failed to kill script process group"),
    }
}

async fn join_reader(task: JoinHandle<Result<(), WorkerError>>) -> Result<(), WorkerError> {
    task.await
        .map_err(|e| WorkerError::Pipe(format!("output reader stopped: {}", e)))?
}

/// Forward every line of `reader` to the build's output as soon as it is read.
async fn forward_lines<R>(
    store: Arc<dyn BuildStore>,
    id: BuildId,
    reader: R,
    channel: Channel,
) -> Result<(), WorkerError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| WorkerError::Pipe(e.to_string()))?;
        if read == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(trim_line_end(&buf)).into_owned();
        store.append_output(id, &OutputLine::new(channel, text)).await?;
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptConfig;
    use crate::testing::{FakeRemote, Fault, FaultyStore, RecordingReporter};
    use tinderbox_core::BuildKind;
    use tinderbox_db::SqliteBuildStore;

    struct Harness {
        _dir: tempfile::TempDir,
        remote: FakeRemote,
        store: SqliteBuildStore,
        reporter: Arc<RecordingReporter>,
        worker: Worker,
    }

    async fn harness(timeout: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let remote = FakeRemote::new(dir.path());
        let workspace = dir.path().join("workspace");
        std::fs::create_dir_all(&workspace).unwrap();

        let store = SqliteBuildStore::in_memory().await.unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let config = Arc::new(EngineConfig {
            workers: 1,
            root: dir.path().join("workspace"),
            script: ScriptConfig {
                env: remote.env(),
                ci_script: "./ci.sh".to_string(),
            },
            timeout,
            queue_capacity: 4,
        });
        let worker = Worker::new(
            0,
            workspace,
            Arc::new(store.clone()),
            reporter.clone(),
            config,
        );
        Harness {
            _dir: dir,
            remote,
            store,
            reporter,
            worker,
        }
    }

    async fn create(h: &Harness) -> BuildId {
        h.store
            .create_build(BuildKind::Push, &h.remote.url(), "refs/heads/main", "abc123")
            .await
            .unwrap()
            .id
    }

    async fn lines(h: &Harness, id: BuildId) -> Vec<OutputLine> {
        h.store
            .output(id, 0, -1)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.line)
            .collect()
    }

    #[test]
    fn test_trim_line_end() {
        assert_eq!(trim_line_end(b"abc\n"), b"abc");
        assert_eq!(trim_line_end(b"abc\r\n"), b"abc");
        assert_eq!(trim_line_end(b"abc"), b"abc");
        assert_eq!(trim_line_end(b"\n"), b"");
    }

    #[test]
    fn test_outcome_status() {
        assert_eq!(ScriptOutcome::Success.status(), BuildStatus::Success);
        assert_eq!(
            ScriptOutcome::Failed { code: Some(2) }.status(),
            BuildStatus::Failed
        );
        assert_eq!(
            ScriptOutcome::TimedOut {
                after: Duration::from_secs(1)
            }
            .status(),
            BuildStatus::Error
        );
    }

    #[tokio::test]
    async fn test_successful_build() {
        let h = harness(Duration::from_secs(30)).await;
        h.remote.ci_script("echo hello\necho oops >&2\necho \"OS=$OS\"\n");
        let id = create(&h).await;

        h.worker.process(id).await;

        assert_eq!(h.store.status(id).await.unwrap(), BuildStatus::Success);
        assert!(h.store.pending_builds().await.unwrap().is_empty());

        let lines = lines(&h, id).await;
        assert_eq!(lines[0].channel, Channel::Info);
        assert_eq!(lines[0].text, "Running build script");
        let stdout: Vec<&str> = lines
            .iter()
            .filter(|l| l.channel == Channel::Stdout)
            .map(|l| l.text.as_str())
            .collect();
        assert_eq!(stdout, vec!["hello", "OS=linux"]);
        assert!(lines
            .iter()
            .any(|l| l.channel == Channel::Stderr && l.text == "oops"));
        assert!(lines
            .iter()
            .any(|l| l.channel == Channel::Info && l.text == "Build success: script exited with status 0"));

        assert_eq!(
            h.reporter.calls(),
            vec![
                ("abc123".to_string(), CommitState::Pending),
                ("abc123".to_string(), CommitState::Success),
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_script() {
        let h = harness(Duration::from_secs(30)).await;
        h.remote.ci_script("echo before\nexit 3\necho never\n");
        let id = create(&h).await;

        h.worker.process(id).await;

        assert_eq!(h.store.status(id).await.unwrap(), BuildStatus::Failed);
        let lines = lines(&h, id).await;
        assert!(lines.iter().any(|l| l.text == "before"));
        assert!(!lines.iter().any(|l| l.text == "never"));
        assert!(lines
            .iter()
            .any(|l| l.text == "Build failed: script exited with status 3"));
        assert_eq!(
            h.reporter.calls().last(),
            Some(&("abc123".to_string(), CommitState::Failure))
        );
    }

    #[tokio::test]
    async fn test_missing_ci_script_is_not_an_error() {
        let h = harness(Duration::from_secs(30)).await;
        let id = create(&h).await;

        h.worker.process(id).await;

        assert_eq!(h.store.status(id).await.unwrap(), BuildStatus::Success);
        let lines = lines(&h, id).await;
        assert!(lines.iter().any(|l| l.channel == Channel::Stdout
            && l.text == "./ci.sh not found, it seems the ci script is not configured."));
    }

    #[tokio::test]
    async fn test_timeout_kills_script() {
        let h = harness(Duration::from_secs(1)).await;
        h.remote.ci_script("echo started\nsleep 10\necho finished\n");
        let id = create(&h).await;

        let started = std::time::Instant::now();
        h.worker.process(id).await;
        assert!(started.elapsed() < Duration::from_secs(8));

        assert_eq!(h.store.status(id).await.unwrap(), BuildStatus::Error);
        let lines = lines(&h, id).await;
        assert!(lines.iter().any(|l| l.text == "started"));
        assert!(!lines.iter().any(|l| l.text == "finished"));
        assert!(lines
            .iter()
            .any(|l| l.channel == Channel::Error && l.text.contains("timed out")));
        assert_eq!(
            h.reporter.calls().last(),
            Some(&("abc123".to_string(), CommitState::Error))
        );
    }

    #[tokio::test]
    async fn test_workspace_is_cleaned() {
        let h = harness(Duration::from_secs(30)).await;
        h.remote.ci_script("touch artifact .hidden\n");
        let id = create(&h).await;

        h.worker.process(id).await;

        assert_eq!(h.store.status(id).await.unwrap(), BuildStatus::Success);
        let left: Vec<_> = std::fs::read_dir(h.worker.workspace()).unwrap().collect();
        assert!(left.is_empty(), "workspace not empty: {:?}", left);
    }

    #[tokio::test]
    async fn test_output_is_streamed_while_running() {
        let h = harness(Duration::from_secs(30)).await;
        let gate = h.remote.path().join("gate");
        h.remote.ci_script(&format!(
            "echo first\nwhile [ ! -f '{}' ]; do sleep 0.05; done\necho second\n",
            gate.display()
        ));
        let id = create(&h).await;

        let store = h.store.clone();
        let watcher = async {
            loop {
                let out = store.output(id, 0, -1).await.unwrap();
                if out.iter().any(|r| r.line.text == "first") {
                    assert!(!out.iter().any(|r| r.line.text == "second"));
                    assert_eq!(store.status(id).await.unwrap(), BuildStatus::Running);
                    std::fs::write(&gate, "").unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        tokio::join!(h.worker.process(id), watcher);

        assert_eq!(h.store.status(id).await.unwrap(), BuildStatus::Success);
        assert!(lines(&h, id).await.iter().any(|l| l.text == "second"));
    }

    #[tokio::test]
    async fn test_unwritable_workspace_is_an_error() {
        let mut h = harness(Duration::from_secs(30)).await;
        h.worker.workspace = h.remote.path().join("does-not-exist");
        let id = create(&h).await;

        h.worker.process(id).await;

        assert_eq!(h.store.status(id).await.unwrap(), BuildStatus::Error);
        let lines = lines(&h, id).await;
        assert!(lines
            .iter()
            .any(|l| l.channel == Channel::Error && l.text.starts_with("Build errored: workspace I/O failed")));
        assert!(h.store.pending_builds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reporter_failure_does_not_fail_build() {
        let mut h = harness(Duration::from_secs(30)).await;
        let failing = Arc::new(RecordingReporter::failing());
        h.worker.reporter = failing.clone() as Arc<dyn StatusReporter>;
        h.remote.ci_script("echo ok\n");
        let id = create(&h).await;

        h.worker.process(id).await;

        assert_eq!(h.store.status(id).await.unwrap(), BuildStatus::Success);
        assert_eq!(failing.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_build_is_skipped() {
        let h = harness(Duration::from_secs(30)).await;
        h.worker.process(BuildId::new(42)).await;
        assert!(h.reporter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_kills_background_jobs() {
        let h = harness(Duration::from_secs(1)).await;
        let marker = h.remote.path().join("marker");
        let leftover = h.worker.workspace().join("leftover");
        h.remote.ci_script(&format!(
            "(sleep 2; touch '{}' '{}') &\necho started\nsleep 10\n",
            marker.display(),
            leftover.display()
        ));
        let id = create(&h).await;

        h.worker.process(id).await;
        assert_eq!(h.store.status(id).await.unwrap(), BuildStatus::Error);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists());
        let left: Vec<_> = std::fs::read_dir(h.worker.workspace()).unwrap().collect();
        assert!(left.is_empty(), "workspace not empty: {:?}", left);
    }

    #[tokio::test]
    async fn test_finished_script_leaves_no_jobs_behind() {
        let h = harness(Duration::from_secs(30)).await;
        let marker = h.remote.path().join("marker");
        h.remote.ci_script(&format!(
            "(sleep 1; touch '{}') >/dev/null 2>&1 &\necho done\n",
            marker.display()
        ));
        let id = create(&h).await;

        h.worker.process(id).await;
        assert_eq!(h.store.status(id).await.unwrap(), BuildStatus::Success);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_load_failure_is_an_error() {
        let mut h = harness(Duration::from_secs(30)).await;
        h.worker.store = Arc::new(FaultyStore::new(h.store.clone(), Fault::Load));
        let id = create(&h).await;

        h.worker.process(id).await;

        assert_eq!(h.store.status(id).await.unwrap(), BuildStatus::Error);
        assert!(h.store.pending_builds().await.unwrap().is_empty());
        let lines = lines(&h, id).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].channel, Channel::Error);
        assert!(lines[0].text.starts_with("Build errored: failed to load build"));
    }

    #[tokio::test]
    async fn test_script_that_cannot_start_is_an_error() {
        let mut h = harness(Duration::from_secs(30)).await;
        // A relative workspace resolves against itself once the child has
        // changed into it, so the script path does not exist for exec.
        let local = tempfile::tempdir_in(".").unwrap();
        h.worker.workspace = PathBuf::from(local.path().file_name().unwrap());
        h.remote.ci_script("echo never\n");
        let id = create(&h).await;

        h.worker.process(id).await;

        assert_eq!(h.store.status(id).await.unwrap(), BuildStatus::Error);
        let lines = lines(&h, id).await;
        assert!(!lines.iter().any(|l| l.text == "never"));
        assert!(lines
            .iter()
            .any(|l| l.channel == Channel::Error && l.text.starts_with("Build errored: failed to start script")));
        assert!(lines
            .iter()
            .any(|l| l.channel == Channel::Error && l.text.starts_with("Cleanup failed: failed to start script")));
        assert_eq!(
            h.reporter.calls().last(),
            Some(&("abc123".to_string(), CommitState::Error))
        );
    }
}
