//! KDL configuration parsing for Tinderbox CI.
//!
//! This crate handles parsing of the system configuration file
//! (`tinderbox.kdl`): database location, HTTP listener, GitHub access and
//! build pool settings.

pub mod error;
mod nodes;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    BuildConfig, GitHubConfig, HttpConfig, SystemConfig, load_system_config, parse_system_config,
};
