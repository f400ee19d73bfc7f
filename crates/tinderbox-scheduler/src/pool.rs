//! Fixed pool of workers sharing one build queue.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tinderbox_config::BuildConfig;
use tinderbox_core::StatusReporter;
use tinderbox_db::BuildStore;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::queue::QueueReceiver;
use crate::script::ScriptConfig;
use crate::worker::Worker;
use crate::{SchedulerError, SchedulerResult};

/// Settings of the execution engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of workers, and so of builds running at once.
    pub workers: usize,
    /// Worker `i` builds in `<root>/<i>`.
    pub root: PathBuf,
    pub script: ScriptConfig,
    /// Limit for each script run.
    pub timeout: Duration,
    pub queue_capacity: usize,
}

impl From<&BuildConfig> for EngineConfig {
    fn from(config: &BuildConfig) -> Self {
        Self {
            workers: config.concurrent,
            root: config.dir.clone(),
            script: ScriptConfig {
                env: config.env.clone(),
                ci_script: config.filename.clone(),
            },
            timeout: config.timeout,
            queue_capacity: config.queue_capacity,
        }
    }
}

/// Running workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    workspaces: Vec<PathBuf>,
}

impl WorkerPool {
    /// Create every workspace, then start one worker per workspace.
    pub async fn start(
        config: EngineConfig,
        store: Arc<dyn BuildStore>,
        reporter: Arc<dyn StatusReporter>,
        queue: QueueReceiver,
    ) -> SchedulerResult<Self> {
        let mut workspaces = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let path = config.root.join(index.to_string());
            let workspace = prepare_workspace(path).await?;
            workspaces.push(workspace);
        }

        let config = Arc::new(config);
        let handles = workspaces
            .iter()
            .enumerate()
            .map(|(index, workspace)| {
                let worker = Worker::new(
                    index,
                    workspace.clone(),
                    store.clone(),
                    reporter.clone(),
                    config.clone(),
                );
                tokio::spawn(worker.run(queue.clone()))
            })
            .collect();

        info!(
            workers = config.workers,
            root = %config.root.display(),
            reporter = reporter.name(),
            "Worker pool started"
        );
        Ok(Self {
            handles,
            workspaces,
        })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn workspaces(&self) -> &[PathBuf] {
        &self.workspaces
    }

    /// Wait for every worker to exit. Workers exit once the queue is closed
    /// and drained.
    pub async fn join(self) {
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task failed");
            }
        }
        info!("Worker pool stopped");
    }
}

/// Create a workspace directory and return its absolute path.
async fn prepare_workspace(path: PathBuf) -> SchedulerResult<PathBuf> {
    tokio::fs::create_dir_all(&path)
        .await
        .map_err(|source| SchedulerError::Workspace {
            path: path.clone(),
            source,
        })?;
    tokio::fs::canonicalize(&path)
        .await
        .map_err(|source| SchedulerError::Workspace { path, source })
}
