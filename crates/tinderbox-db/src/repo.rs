//! Repository traits and implementations.

pub mod build;

pub use build::{BuildStore, SqliteBuildStore, validate_range};
