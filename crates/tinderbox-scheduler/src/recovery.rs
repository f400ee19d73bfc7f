//! Startup reconciliation of unfinished builds.

use tinderbox_core::{BuildStatus, OutputLine};
use tinderbox_db::{BuildStore, DbError};
use tracing::info;

use crate::SchedulerResult;
use crate::queue::BuildQueue;

/// Submit every pending build to `queue` and return how many were submitted.
///
/// Builds left Running by a previous process are reset to Queued first,
/// with a note in their output. Run this once at startup, after the worker
/// pool is started (a queue smaller than the backlog would otherwise block)
/// and before webhooks are accepted.
pub async fn recover(store: &dyn BuildStore, queue: &BuildQueue) -> SchedulerResult<usize> {
    let pending = store.pending_builds().await?;

    for build in &pending {
        let status = match store.status(build.id).await {
            Ok(status) => Some(status),
            Err(DbError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        if status != Some(BuildStatus::Queued) {
            store.set_status(build.id, BuildStatus::Queued).await?;
        }
        if status == Some(BuildStatus::Running) {
            store
                .append_output(
                    build.id,
                    &OutputLine::info("Build was interrupted by a server restart, queued again"),
                )
                .await?;
        }

        queue.submit(build.id).await?;
        info!(build_id = %build.id, previous = ?status, "Re-queued pending build");
    }

    info!(count = pending.len(), "Recovery finished");
    Ok(pending.len())
}
