use bytes::Bytes;
use futures::stream;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::DownloadConfig;
use crate::models::Session;
use crate::services::archive::{ArchiveError, ArchiveSink, ArchiveWriter};
use crate::services::fetcher::MemberFetcher;
use crate::store::SessionStore;
use crate::utils::error::ApiError;
use crate::utils::UsedNames;

/// Entry appended when `report_omitted` is on and some members are missing.
pub const OMITTED_MANIFEST_NAME: &str = "_omitted.txt";

/// A member that did not make it into the archive intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OmittedMember {
    pub url: String,
    pub reason: String,
}

/// What one download actually produced.
#[derive(Debug, Default, Clone)]
pub struct DownloadReport {
    /// Entry names in archive order.
    pub written: Vec<String>,
    pub omitted: Vec<OmittedMember>,
    pub timed_out: bool,
    pub client_gone: bool,
    pub bytes_out: u64,
}

/// Ties the session store, the fetcher and the archive writer together.
pub struct DownloadService {
    store: Arc<SessionStore>,
    fetcher: Arc<dyn MemberFetcher>,
    config: DownloadConfig,
}

impl DownloadService {
    pub fn new(
        store: Arc<SessionStore>,
        fetcher: Arc<dyn MemberFetcher>,
        config: DownloadConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            config,
        }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Register a new session. An empty member list is rejected before the store is touched.
    pub fn create_session(
        &self,
        files: Vec<String>,
        zip_name: Option<String>,
    ) -> Result<String, ApiError> {
        if files.is_empty() {
            return Err(ApiError::BadRequest("No files provided".to_string()));
        }

        let archive_name = zip_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.config.default_archive_name.clone());
        let member_count = files.len();
        let token = self.store.create(files, archive_name);

        let expires = chrono::Local::now()
            + chrono::Duration::from_std(self.config.session_ttl).unwrap_or_default();
        info!(
            "Created session {} with {} files (expires: {})",
            token,
            member_count,
            expires.format("%H:%M:%S")
        );

        Ok(token)
    }

    /// Resolve a token to a live session.
    ///
    /// Unknown tokens are `NotFound`. Expired ones are purged and reported as
    /// `Gone`, so a second attempt sees `NotFound`.
    pub fn open_session(&self, token: &str) -> Result<Session, ApiError> {
        let session = self
            .store
            .lookup(token)
            .ok_or_else(|| ApiError::NotFound("Invalid or expired token".to_string()))?;

        if SessionStore::is_expired(&session, self.config.session_ttl) {
            self.store.delete(token);
            info!(token, age = ?session.age(), "Rejected expired session");
            return Err(ApiError::Gone("Session expired".to_string()));
        }

        Ok(session)
    }

    /// Fetch every member in order and stream it into `sink` as one archive.
    ///
    /// Member failures are logged and skipped. Once the overall deadline has
    /// passed no further member is started. The archive is always finalized
    /// and the session is always deleted afterwards.
    pub async fn stream_session<S: ArchiveSink>(&self, session: Session, sink: S) -> DownloadReport {
        let token = session.token.as_str();
        let deadline = Instant::now() + self.config.download_timeout;
        let mut writer = ArchiveWriter::begin(sink, self.config.copy_buffer_bytes);
        let mut used_names = UsedNames::new();
        let mut report = DownloadReport::default();

        for (idx, url) in session.member_urls.iter().enumerate() {
            if Instant::now() >= deadline {
                warn!("Download timeout for token: {}", token);
                report.timed_out = true;
                skip_remaining(&mut report, &session.member_urls[idx..], "download deadline exceeded");
                break;
            }
            if writer.sink_closed() {
                warn!("Client went away during download for token: {}", token);
                report.client_gone = true;
                skip_remaining(&mut report, &session.member_urls[idx..], "client disconnected");
                break;
            }

            let member = match self.fetcher.fetch(url, deadline).await {
                Ok(member) => member,
                Err(e) => {
                    warn!("Error fetching {}: {}", url, e);
                    report.omitted.push(OmittedMember {
                        url: url.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let entry_name = used_names.claim(&member.name);
            info!(
                size = ?member.content_length,
                "Streaming: {} -> {}",
                url,
                entry_name
            );

            // the body is consumed here and dropped on every path
            match writer.add_entry(&entry_name, member.body).await {
                Ok(_) => report.written.push(entry_name),
                Err(e) => {
                    warn!("Error streaming {} ({}): {}", url, entry_name, e);
                    if matches!(e, ArchiveError::Sink(_)) {
                        report.client_gone = true;
                    }
                    report.omitted.push(OmittedMember {
                        url: url.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if self.config.report_omitted && !report.omitted.is_empty() && !writer.sink_closed() {
            let name = used_names.claim(OMITTED_MANIFEST_NAME);
            let manifest = stream::iter([Ok(Bytes::from(render_manifest(&report.omitted)))]);
            if let Err(e) = writer.add_entry(&name, manifest).await {
                warn!("Failed to append omitted-members manifest: {}", e);
            }
        }

        // ===== Finalizing =====
        if let Err(e) = writer.close().await {
            if writer.sink_closed() {
                warn!("Archive for token {} not finalized, client gone: {}", token, e);
            } else {
                error!("Failed to finalize archive for token {}: {}", token, e);
            }
        }
        report.bytes_out = writer.bytes_out();

        self.store.delete(token);

        info!(
            token,
            entries = writer.entries(),
            written = report.written.len(),
            omitted = report.omitted.len(),
            timed_out = report.timed_out,
            bytes = report.bytes_out,
            "Download completed"
        );
        report
    }
}

fn skip_remaining(report: &mut DownloadReport, urls: &[String], reason: &str) {
    report.omitted.extend(urls.iter().map(|url| OmittedMember {
        url: url.clone(),
        reason: reason.to_string(),
    }));
}

fn render_manifest(omitted: &[OmittedMember]) -> String {
    let mut out = String::from("The following members are missing or incomplete:\n\n");
    for member in omitted {
        out.push_str(&member.url);
        out.push('\t');
        out.push_str(&member.reason);
        out.push('\n');
    }
    out
}
