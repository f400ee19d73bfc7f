//! HTTP server for Tinderbox CI.
//!
//! Receives GitHub webhooks, serves the build store over a read-only JSON
//! API and talks back to GitHub for commit statuses.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
