//! System configuration parsing.

use crate::nodes::{children, get_first_string_arg, required_string, required_u64};
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

// Names that can be exported by a POSIX shell
static ENV_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// System-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Path of the SQLite build store.
    pub database: PathBuf,
    /// HTTP listener and webhook settings.
    pub http: HttpConfig,
    /// GitHub access. `None` disables commit statuses and branch listing.
    pub github: Option<GitHubConfig>,
    /// Build pool settings.
    pub build: BuildConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("tinderbox.db"),
            http: HttpConfig::default(),
            github: None,
            build: BuildConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Socket address to listen on.
    pub addr: String,
    /// Path that receives GitHub webhooks.
    pub webhook_path: String,
    /// Webhook secret. When set, every delivery must carry a valid signature.
    pub secret: Option<String>,
    /// Externally visible base URL, used for commit status links.
    pub hostname: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8000".to_string(),
            webhook_path: "/ci".to_string(),
            secret: None,
            hostname: "http://localhost:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Personal access token.
    pub token: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Description attached to commit statuses.
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Number of builds that run in parallel.
    pub concurrent: usize,
    /// Base directory for workspaces. Worker `i` builds in `<dir>/<i>`.
    pub dir: PathBuf,
    /// CI script run from the repository root.
    pub filename: String,
    /// Wall-clock limit of a single build.
    pub timeout: Duration,
    /// Number of build ids the queue buffers before submitters wait.
    pub queue_capacity: usize,
    /// Environment exported to every build.
    pub env: BTreeMap<String, String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            concurrent: 1,
            dir: PathBuf::from("./build"),
            filename: "./ci.sh".to_string(),
            timeout: Duration::from_secs(3600),
            queue_capacity: 256,
            env: BTreeMap::new(),
        }
    }
}

/// Parse system configuration from KDL text.
///
/// Every setting has a default, so an empty document is a valid configuration.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "database" => {
                config.database = PathBuf::from(required_string(node, "database")?);
            }
            "http" => parse_http(node, &mut config.http)?,
            "github" => config.github = Some(parse_github(node)?),
            "build" => parse_build(node, &mut config.build)?,
            _ => {} // Ignore unknown nodes
        }
    }

    validate(&config)?;
    Ok(config)
}

/// Read and parse a configuration file.
pub fn load_system_config(path: impl AsRef<Path>) -> ConfigResult<SystemConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_system_config(&content)
}

fn parse_http(node: &KdlNode, http: &mut HttpConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "addr" => http.addr = required_string(child, "http.addr")?,
            "webhook-path" => {
                let path = required_string(child, "http.webhook-path")?;
                if !path.starts_with('/') {
                    return Err(ConfigError::InvalidValue {
                        field: "http.webhook-path".to_string(),
                        message: format!("must start with '/', got {}", path),
                    });
                }
                http.webhook_path = path;
            }
            "secret" => http.secret = get_first_string_arg(child).filter(|s| !s.is_empty()),
            "hostname" => {
                http.hostname = required_string(child, "http.hostname")?
                    .trim_end_matches('/')
                    .to_string();
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_github(node: &KdlNode) -> ConfigResult<GitHubConfig> {
    let mut token = None;
    let mut owner = None;
    let mut name = None;
    let mut description = "Tinderbox CI".to_string();

    for child in children(node) {
        match child.name().value() {
            "token" => token = Some(required_string(child, "github.token")?),
            "owner" => owner = Some(required_string(child, "github.owner")?),
            "name" => name = Some(required_string(child, "github.name")?),
            "description" => description = required_string(child, "github.description")?,
            _ => {}
        }
    }

    Ok(GitHubConfig {
        token: token.ok_or_else(|| ConfigError::MissingField("github.token".to_string()))?,
        owner: owner.ok_or_else(|| ConfigError::MissingField("github.owner".to_string()))?,
        name: name.ok_or_else(|| ConfigError::MissingField("github.name".to_string()))?,
        description,
    })
}

fn parse_build(node: &KdlNode, build: &mut BuildConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "concurrent" => build.concurrent = as_usize(child, "build.concurrent")?,
            "dir" => build.dir = PathBuf::from(required_string(child, "build.dir")?),
            "filename" => build.filename = required_string(child, "build.filename")?,
            "timeout-secs" => {
                build.timeout = Duration::from_secs(required_u64(child, "build.timeout-secs")?);
            }
            "queue-capacity" => build.queue_capacity = as_usize(child, "build.queue-capacity")?,
            "env" => {
                for var in children(child) {
                    let key = var.name().value().to_string();
                    let value = get_first_string_arg(var).unwrap_or_default();
                    build.env.insert(key, value);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn as_usize(node: &KdlNode, field: &str) -> ConfigResult<usize> {
    let value = required_u64(node, field)?;
    usize::try_from(value).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("{} is too large", value),
    })
}

fn validate(config: &SystemConfig) -> ConfigResult<()> {
    if config.build.concurrent == 0 {
        return Err(ConfigError::InvalidValue {
            field: "build.concurrent".to_string(),
            message: "at least one worker is required".to_string(),
        });
    }
    if config.build.queue_capacity == 0 {
        return Err(ConfigError::InvalidValue {
            field: "build.queue-capacity".to_string(),
            message: "the queue must hold at least one build".to_string(),
        });
    }
    if config.build.timeout.is_zero() {
        return Err(ConfigError::InvalidValue {
            field: "build.timeout-secs".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    if config.build.filename.is_empty() {
        return Err(ConfigError::MissingField("build.filename".to_string()));
    }
    for key in config.build.env.keys() {
        if !ENV_KEY_REGEX.is_match(key) {
            return Err(ConfigError::InvalidValue {
                field: format!("build.env.{}", key),
                message: "not a valid shell variable name".to_string(),
            });
        }
    }
    Ok(())
}
