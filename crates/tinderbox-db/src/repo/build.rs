//! Build store: build records, status, output and their indices.
//!
//! Every mutation runs in a single SQLite transaction, so a build is either
//! fully created (record, status, pending entry and both indices) or absent.
//!
//! Ranges (`start`, `end`) follow one contract everywhere: `start >= 0`,
//! `end == -1` means "to the end", otherwise `start <= end` and the result
//! covers positions `start..end`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use tinderbox_core::{Build, BuildId, BuildKind, BuildStatus, Channel, OutputLine, OutputRecord};
use tracing::debug;

use crate::{DbError, DbResult};

#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Create a queued build for a commit.
    async fn create_build(
        &self,
        kind: BuildKind,
        clone_url: &str,
        ref_name: &str,
        commit_sha: &str,
    ) -> DbResult<Build>;

    /// Get a build by id.
    async fn build(&self, id: BuildId) -> DbResult<Build>;

    /// Builds whose status is not terminal, in ascending id order.
    async fn pending_builds(&self) -> DbResult<Vec<Build>>;

    /// Distinct refs ever built under `kind`, sorted.
    async fn refs(&self, kind: BuildKind) -> DbResult<Vec<String>>;

    /// Builds of a ref, most recent first, positions `start..end`.
    async fn ref_builds(
        &self,
        kind: BuildKind,
        ref_name: &str,
        start: i64,
        end: i64,
    ) -> DbResult<Vec<Build>>;

    /// Builds of a commit, in creation order.
    async fn sha_builds(&self, sha: &str) -> DbResult<Vec<Build>>;

    /// Set the status of a build. Terminal statuses leave the pending set,
    /// others (re)join it.
    async fn set_status(&self, id: BuildId, status: BuildStatus) -> DbResult<()>;

    /// Current status of a build.
    async fn status(&self, id: BuildId) -> DbResult<BuildStatus>;

    /// Append a line to the build's output. Empty lines are dropped.
    async fn append_output(&self, id: BuildId, line: &OutputLine) -> DbResult<()>;

    /// Output lines `start..end` of a build, in append order.
    async fn output(&self, id: BuildId, start: i64, end: i64) -> DbResult<Vec<OutputRecord>>;

    /// Remove a build and everything recorded about it.
    async fn purge_build(&self, id: BuildId) -> DbResult<()>;
}

/// Check a `start..end` range against the store's range contract.
pub fn validate_range(start: i64, end: i64) -> DbResult<()> {
    if start < 0 {
        return Err(DbError::InvalidRange {
            start,
            end,
            message: "start must not be negative",
        });
    }
    if end < -1 {
        return Err(DbError::InvalidRange {
            start,
            end,
            message: "end must be -1 or greater",
        });
    }
    if end >= 0 && start > end {
        return Err(DbError::InvalidRange {
            start,
            end,
            message: "start must not exceed end",
        });
    }
    Ok(())
}

/// SQLite `LIMIT` for a validated range; -1 means no limit.
fn range_limit(start: i64, end: i64) -> i64 {
    if end == -1 { -1 } else { end - start }
}

#[derive(Debug, sqlx::FromRow)]
struct BuildRow {
    id: i64,
    kind: String,
    ref_name: String,
    clone_url: String,
    commit_sha: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<BuildRow> for Build {
    type Error = DbError;

    fn try_from(row: BuildRow) -> DbResult<Self> {
        let kind = row
            .kind
            .parse::<BuildKind>()
            .map_err(|e| DbError::InvalidRecord(format!("build {}: {}", row.id, e)))?;
        Ok(Build {
            id: BuildId::new(row.id),
            kind,
            ref_name: row.ref_name,
            clone_url: row.clone_url,
            commit_sha: row.commit_sha,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OutputRow {
    seq: i64,
    channel: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<OutputRow> for OutputRecord {
    type Error = DbError;

    fn try_from(row: OutputRow) -> DbResult<Self> {
        let channel = row
            .channel
            .parse::<Channel>()
            .map_err(|e| DbError::InvalidRecord(format!("output line {}: {}", row.seq, e)))?;
        Ok(OutputRecord {
            sequence: row.seq,
            line: OutputLine {
                channel,
                text: row.content,
                timestamp: row.created_at,
            },
        })
    }
}

fn into_builds(rows: Vec<BuildRow>) -> DbResult<Vec<Build>> {
    rows.into_iter().map(Build::try_from).collect()
}

/// A write referencing a build that does not exist trips the foreign key.
fn missing_build(id: BuildId) -> impl FnOnce(sqlx::Error) -> DbError {
    move |err| match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            DbError::NotFound(format!("build {}", id))
        }
        _ => DbError::Database(err),
    }
}

/// SQLite implementation of BuildStore.
#[derive(Debug, Clone)]
pub struct SqliteBuildStore {
    pool: SqlitePool,
}

impl SqliteBuildStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the store file at `path` and bring its schema up to date.
    pub async fn open(path: &Path) -> DbResult<Self> {
        let pool = crate::create_pool(path).await?;
        crate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    /// A fresh store that lives only as long as this value.
    pub async fn in_memory() -> DbResult<Self> {
        let pool = crate::create_memory_pool().await?;
        crate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every connection. Later calls fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl BuildStore for SqliteBuildStore {
    async fn create_build(
        &self,
        kind: BuildKind,
        clone_url: &str,
        ref_name: &str,
        commit_sha: &str,
    ) -> DbResult<Build> {
        let created_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            INSERT INTO builds (kind, ref_name, clone_url, commit_sha, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, kind, ref_name, clone_url, commit_sha, created_at
            "#,
        )
        .bind(kind.as_str())
        .bind(ref_name)
        .bind(clone_url)
        .bind(commit_sha)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO sha_index (commit_sha, position, build_id)
            SELECT ?, COALESCE(MAX(position), 0) + 1, ?
            FROM sha_index WHERE commit_sha = ?
            "#,
        )
        .bind(commit_sha)
        .bind(row.id)
        .bind(commit_sha)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO ref_index (kind, ref_name, position, build_id)
            SELECT ?, ?, COALESCE(MAX(position), 0) + 1, ?
            FROM ref_index WHERE kind = ? AND ref_name = ?
            "#,
        )
        .bind(kind.as_str())
        .bind(ref_name)
        .bind(row.id)
        .bind(kind.as_str())
        .bind(ref_name)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO pending_builds (build_id) VALUES (?)")
            .bind(row.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO build_status (build_id, status, updated_at) VALUES (?, ?, ?)")
            .bind(row.id)
            .bind(BuildStatus::Queued.as_str())
            .bind(created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let build = Build::try_from(row)?;
        debug!(build_id = %build.id, kind = %build.kind, sha = %build.commit_sha, "Created build");
        Ok(build)
    }

    async fn build(&self, id: BuildId) -> DbResult<Build> {
        let row = sqlx::query_as::<_, BuildRow>(
            "SELECT id, kind, ref_name, clone_url, commit_sha, created_at FROM builds WHERE id = ?",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("build {}", id)))?;
        Build::try_from(row)
    }

    async fn pending_builds(&self) -> DbResult<Vec<Build>> {
        let rows = sqlx::query_as::<_, BuildRow>(
            r#"
            SELECT b.id, b.kind, b.ref_name, b.clone_url, b.commit_sha, b.created_at
            FROM pending_builds p
            JOIN builds b ON b.id = p.build_id
            ORDER BY p.build_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        into_builds(rows)
    }

    async fn refs(&self, kind: BuildKind) -> DbResult<Vec<String>> {
        let refs = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT ref_name FROM ref_index WHERE kind = ? ORDER BY ref_name",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(refs)
    }

    async fn ref_builds(
        &self,
        kind: BuildKind,
        ref_name: &str,
        start: i64,
        end: i64,
    ) -> DbResult<Vec<Build>> {
        validate_range(start, end)?;
        if start == end {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, BuildRow>(
            r#"
            SELECT b.id, b.kind, b.ref_name, b.clone_url, b.commit_sha, b.created_at
            FROM ref_index r
            JOIN builds b ON b.id = r.build_id
            WHERE r.kind = ? AND r.ref_name = ?
            ORDER BY r.position DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(kind.as_str())
        .bind(ref_name)
        .bind(range_limit(start, end))
        .bind(start)
        .fetch_all(&self.pool)
        .await?;
        into_builds(rows)
    }

    async fn sha_builds(&self, sha: &str) -> DbResult<Vec<Build>> {
        let rows = sqlx::query_as::<_, BuildRow>(
            r#"
            SELECT b.id, b.kind, b.ref_name, b.clone_url, b.commit_sha, b.created_at
            FROM sha_index s
            JOIN builds b ON b.id = s.build_id
            WHERE s.commit_sha = ?
            ORDER BY s.position ASC
            "#,
        )
        .bind(sha)
        .fetch_all(&self.pool)
        .await?;
        into_builds(rows)
    }

    async fn set_status(&self, id: BuildId, status: BuildStatus) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO build_status (build_id, status, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (build_id) DO UPDATE
            SET status = excluded.status, updated_at = excluded.updated_at
            "#,
        )
        .bind(id.get())
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(missing_build(id))?;

        if status.is_terminal() {
            sqlx::query("DELETE FROM pending_builds WHERE build_id = ?")
                .bind(id.get())
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query("INSERT OR IGNORE INTO pending_builds (build_id) VALUES (?)")
                .bind(id.get())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!(build_id = %id, status = %status, "Updated build status");
        Ok(())
    }

    async fn status(&self, id: BuildId) -> DbResult<BuildStatus> {
        let status =
            sqlx::query_scalar::<_, String>("SELECT status FROM build_status WHERE build_id = ?")
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| DbError::NotFound(format!("status of build {}", id)))?;
        status
            .parse()
            .map_err(|e| DbError::InvalidRecord(format!("status of build {}: {}", id, e)))
    }

    async fn append_output(&self, id: BuildId, line: &OutputLine) -> DbResult<()> {
        if line.text.is_empty() {
            return Ok(());
        }

        // One statement, so allocating the sequence number and writing the
        // line cannot interleave with another append to the same build.
        sqlx::query(
            r#"
            INSERT INTO build_output (build_id, seq, channel, content, created_at)
            SELECT ?, COALESCE(MAX(seq) + 1, 0), ?, ?, ?
            FROM build_output WHERE build_id = ?
            "#,
        )
        .bind(id.get())
        .bind(line.channel.as_str())
        .bind(&line.text)
        .bind(line.timestamp)
        .bind(id.get())
        .execute(&self.pool)
        .await
        .map_err(missing_build(id))?;
        Ok(())
    }

    async fn output(&self, id: BuildId, start: i64, end: i64) -> DbResult<Vec<OutputRecord>> {
        validate_range(start, end)?;
        if start == end {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, OutputRow>(
            r#"
            SELECT seq, channel, content, created_at
            FROM build_output
            WHERE build_id = ? AND seq >= ?
            ORDER BY seq ASC
            LIMIT ?
            "#,
        )
        .bind(id.get())
        .bind(start)
        .bind(range_limit(start, end))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OutputRecord::try_from).collect()
    }

    async fn purge_build(&self, id: BuildId) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        for table in ["build_output", "build_status", "pending_builds", "sha_index", "ref_index"] {
            sqlx::query(&format!("DELETE FROM {} WHERE build_id = ?", table))
                .bind(id.get())
                .execute(&mut *tx)
                .await?;
        }

        let deleted = sqlx::query("DELETE FROM builds WHERE id = ?")
            .bind(id.get())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(DbError::NotFound(format!("build {}", id)));
        }

        tx.commit().await?;
        debug!(build_id = %id, "Purged build");
        Ok(())
    }
}
