//! Build inspection commands, read straight from the store.

use anyhow::Result;
use std::io::Write;
use std::time::Duration;
use tinderbox_core::{BuildId, OutputRecord};
use tinderbox_db::BuildStore;

const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);

pub async fn show(store: &dyn BuildStore, id: BuildId, json: bool, out: &mut impl Write) -> Result<()> {
    let build = store.build(id).await?;
    let status = store.status(id).await?;

    if json {
        let mut value = serde_json::to_value(&build)?;
        value["status"] = serde_json::to_value(status)?;
        writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
        return Ok(());
    }

    writeln!(out, "Build {}", build.id)?;
    writeln!(out, "  status:  {}", status)?;
    writeln!(out, "  kind:    {}", build.kind)?;
    writeln!(out, "  ref:     {}", build.ref_name)?;
    writeln!(out, "  commit:  {}", build.commit_sha)?;
    writeln!(out, "  repo:    {}", build.clone_url)?;
    writeln!(out, "  created: {}", build.created_at.to_rfc3339())?;
    Ok(())
}

/// Print a build's output. With `follow`, keep polling until the build has
/// reached a terminal status and everything it wrote has been printed.
pub async fn logs(store: &dyn BuildStore, id: BuildId, follow: bool, out: &mut impl Write) -> Result<()> {
    store.build(id).await?;

    let mut next = 0;
    loop {
        // Status first: once it is terminal no more lines can follow the
        // ones read below.
        let status = store.status(id).await?;
        let records = store.output(id, next, -1).await?;
        for record in &records {
            writeln!(out, "{}", format_record(record))?;
        }
        if let Some(last) = records.last() {
            next = last.sequence + 1;
        }
        out.flush()?;

        if !follow || status.is_terminal() {
            return Ok(());
        }
        tokio::time::sleep(FOLLOW_INTERVAL).await;
    }
}

pub async fn pending(store: &dyn BuildStore, json: bool, out: &mut impl Write) -> Result<()> {
    let builds = store.pending_builds().await?;

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&builds)?)?;
        return Ok(());
    }

    if builds.is_empty() {
        writeln!(out, "No pending builds")?;
        return Ok(());
    }
    for build in builds {
        let status = store.status(build.id).await?;
        writeln!(
            out,
            "{:>6}  {:<8}  {:<12}  {}  {}",
            build.id.to_string(),
            status.as_str(),
            build.kind.as_str(),
            short_sha(&build.commit_sha),
            build.ref_name
        )?;
    }
    Ok(())
}

pub async fn purge(store: &dyn BuildStore, id: BuildId, out: &mut impl Write) -> Result<()> {
    store.purge_build(id).await?;
    writeln!(out, "Purged build {}", id)?;
    Ok(())
}

fn format_record(record: &OutputRecord) -> String {
    format!(
        "{} {:<6} {}",
        record.line.timestamp.format("%H:%M:%S"),
        record.line.channel.as_str(),
        record.line.text
    )
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}
