use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fallback archive name when a session is created without `zipName`.
pub const DEFAULT_ARCHIVE_NAME: &str = "files.zip";

/// Copy buffer used between a remote body and the archive (32 KB).
pub const DEFAULT_COPY_BUFFER_BYTES: usize = 32 * 1024;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub fetch: FetchConfig,
    pub archive: ArchiveConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    pub ttl_secs: u64,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FetchConfig {
    /// Ceiling for a single member request, body included.
    pub http_timeout_secs: u64,
    /// Budget for a whole download, shared by every member.
    pub download_timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ArchiveConfig {
    pub default_name: String,
    pub copy_buffer_bytes: usize,
    /// Chunks buffered between the archive task and the response body.
    pub channel_capacity: usize,
    /// Append `_omitted.txt` listing members that did not make it into the archive.
    pub report_omitted: bool,
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 6001)?
            .set_default("session.ttl_secs", 60 * 60)?
            .set_default("session.cleanup_interval_secs", 5 * 60)?
            .set_default("fetch.http_timeout_secs", 5 * 60)?
            .set_default("fetch.download_timeout_secs", 30 * 60)?
            .set_default(
                "fetch.user_agent",
                concat!("zipstream-server/", env!("CARGO_PKG_VERSION")),
            )?
            .set_default("archive.default_name", DEFAULT_ARCHIVE_NAME)?
            .set_default("archive.copy_buffer_bytes", DEFAULT_COPY_BUFFER_BYTES as u64)?
            .set_default("archive.channel_capacity", 8)?
            .set_default("archive.report_omitted", false)?
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            session_ttl: Duration::from_secs(self.session.ttl_secs),
            cleanup_interval: Duration::from_secs(self.session.cleanup_interval_secs.max(1)),
            http_timeout: Duration::from_secs(self.fetch.http_timeout_secs),
            download_timeout: Duration::from_secs(self.fetch.download_timeout_secs),
            user_agent: self.fetch.user_agent.clone(),
            default_archive_name: self.archive.default_name.clone(),
            copy_buffer_bytes: self.archive.copy_buffer_bytes.max(512),
            channel_capacity: self.archive.channel_capacity.max(1),
            report_omitted: self.archive.report_omitted,
        }
    }
}

/// Runtime view of the settings the session and download pipeline work with.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub session_ttl: Duration,
    pub cleanup_interval: Duration,
    pub http_timeout: Duration,
    pub download_timeout: Duration,
    pub user_agent: String,
    pub default_archive_name: String,
    pub copy_buffer_bytes: usize,
    pub channel_capacity: usize,
    pub report_omitted: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
            http_timeout: Duration::from_secs(5 * 60),
            download_timeout: Duration::from_secs(30 * 60),
            user_agent: concat!("zipstream-server/", env!("CARGO_PKG_VERSION")).to_string(),
            default_archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
            copy_buffer_bytes: DEFAULT_COPY_BUFFER_BYTES,
            channel_capacity: 8,
            report_omitted: false,
        }
    }
}
