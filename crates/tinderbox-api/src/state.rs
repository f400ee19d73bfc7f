//! Application state.

use std::sync::Arc;
use tinderbox_config::HttpConfig;
use tinderbox_core::RemoteRepository;
use tinderbox_db::BuildStore;
use tinderbox_scheduler::BuildQueue;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BuildStore>,
    pub queue: BuildQueue,
    /// Remote repository metadata, when GitHub access is configured.
    pub remote: Option<Arc<dyn RemoteRepository>>,
    pub http: Arc<HttpConfig>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn BuildStore>,
        queue: BuildQueue,
        remote: Option<Arc<dyn RemoteRepository>>,
        http: HttpConfig,
    ) -> Self {
        Self {
            store,
            queue,
            remote,
            http: Arc::new(http),
        }
    }
}
