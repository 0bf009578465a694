use axum::extract::FromRef;
use std::sync::Arc;

use crate::services::DownloadService;
use crate::store::SessionStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub downloads: Arc<DownloadService>,
    pub store: Arc<SessionStore>,
    /// Used for `downloadUrl` when a request carries no `Host` header.
    pub public_host: String,
}

impl AppState {
    pub fn new(downloads: Arc<DownloadService>, public_host: impl Into<String>) -> Self {
        Self {
            store: downloads.store().clone(),
            downloads,
            public_host: public_host.into(),
        }
    }
}

impl FromRef<AppState> for Arc<DownloadService> {
    fn from_ref(state: &AppState) -> Self {
        state.downloads.clone()
    }
}

impl FromRef<AppState> for Arc<SessionStore> {
    fn from_ref(state: &AppState) -> Self {
        state.store.clone()
    }
}
