//! CLI command implementations.

pub mod builds;

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tinderbox_config::load_system_config;
use tinderbox_db::SqliteBuildStore;

/// Open the build store named by the configuration at `config_path`.
pub async fn open_store(config_path: &Path) -> Result<SqliteBuildStore> {
    let config = load_system_config(config_path)
        .with_context(|| format!("Failed to load config file: {}", config_path.display()))?;
    SqliteBuildStore::open(&config.database)
        .await
        .with_context(|| format!("Failed to open build store: {}", config.database.display()))
}

/// Check a configuration file. Returns whether it is valid.
pub fn validate(path: &Path, out: &mut impl Write) -> Result<bool> {
    match load_system_config(path) {
        Ok(config) => {
            writeln!(out, "Configuration is valid")?;
            writeln!(out, "  database: {}", config.database.display())?;
            writeln!(out, "  listen:   {}{}", config.http.addr, config.http.webhook_path)?;
            writeln!(
                out,
                "  workers:  {} in {}",
                config.build.concurrent,
                config.build.dir.display()
            )?;
            writeln!(
                out,
                "  github:   {}",
                config
                    .github
                    .as_ref()
                    .map(|g| format!("{}/{}", g.owner, g.name))
                    .unwrap_or_else(|| "not configured".to_string())
            )?;
            Ok(true)
        }
        Err(e) => {
            writeln!(out, "Configuration error: {}", e)?;
            Ok(false)
        }
    }
}
