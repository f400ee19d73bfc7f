//! Core domain types and traits for Tinderbox CI.
//!
//! This crate contains:
//! - Build identifiers
//! - Build, status and output line types
//! - Traits for the external status-reporting and remote-repository collaborators

pub mod build;
pub mod error;
pub mod id;
pub mod status;

pub use build::{Build, BuildEvent, BuildKind, BuildStatus, Channel, OutputLine, OutputRecord};
pub use error::{Error, Result};
pub use id::BuildId;
pub use status::{CommitState, LogReporter, RemoteRepository, StatusReporter};
