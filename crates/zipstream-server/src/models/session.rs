use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ===== REQUEST MODELS =====

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default, rename = "zipName")]
    pub zip_name: Option<String>,
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateResponse {
    pub download_url: String,
}

// ===== DOMAIN =====

/// One pending aggregation job. Immutable once stored.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub member_urls: Vec<String>,
    pub archive_name: String,
    pub created_at: Instant,
}

impl Session {
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}
