use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION};
use reqwest::{Client, StatusCode, Url};
use std::io;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::utils::filename::{
    filename_from_content_disposition, filename_from_url, FALLBACK_ENTRY_NAME,
};

pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("bad status {0}")]
    Status(StatusCode),

    #[error("download deadline exceeded")]
    DeadlineExceeded,
}

/// A remote response that is ready to be copied into the archive.
pub struct FetchedMember {
    pub name: String,
    pub content_length: Option<u64>,
    pub body: BodyStream,
}

impl std::fmt::Debug for FetchedMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedMember")
            .field("name", &self.name)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Source of member bodies for the download pipeline.
#[async_trait]
pub trait MemberFetcher: Send + Sync {
    /// Open `url`, bounded by `deadline`. The returned body is bounded by it too.
    async fn fetch(&self, url: &str, deadline: Instant) -> Result<FetchedMember, FetchError>;
}

/// HTTP implementation backed by one shared reqwest client.
#[derive(Clone)]
pub struct RemoteFetcher {
    client: Client,
}

impl RemoteFetcher {
    /// `http_timeout` caps every single member request, body included.
    pub fn new(http_timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(http_timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MemberFetcher for RemoteFetcher {
    async fn fetch(&self, url: &str, deadline: Instant) -> Result<FetchedMember, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", url, e)))?;

        let response = timeout_at(deadline, self.client.get(parsed.clone()).send())
            .await
            .map_err(|_| FetchError::DeadlineExceeded)??;

        let status = response.status();
        if !status.is_success() {
            // dropping the response releases the connection
            return Err(FetchError::Status(status));
        }

        let name = resolve_entry_name(response.headers(), &parsed);
        let content_length = response.content_length();
        debug!(
            url = %parsed,
            name = %name,
            status = status.as_u16(),
            content_length = ?content_length,
            "Remote member opened"
        );

        Ok(FetchedMember {
            name,
            content_length,
            body: bounded_body(response.bytes_stream(), deadline),
        })
    }
}

/// Header `filename`, then URL basename, then `file`.
pub fn resolve_entry_name(headers: &HeaderMap, url: &Url) -> String {
    headers
        .get(CONTENT_DISPOSITION)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .and_then(|v| filename_from_content_disposition(&v))
        .or_else(|| filename_from_url(url))
        .unwrap_or_else(|| FALLBACK_ENTRY_NAME.to_string())
}

/// Wrap a body so that each chunk read gives up once `deadline` has passed.
pub fn bounded_body<S>(stream: S, deadline: Instant) -> BodyStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let mut stream = Box::pin(stream);
    Box::pin(async_stream::stream! {
        loop {
            match timeout_at(deadline, stream.next()).await {
                Ok(Some(Ok(chunk))) => yield Ok(chunk),
                Ok(Some(Err(e))) => {
                    yield Err(io::Error::other(e));
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    yield Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "download deadline exceeded",
                    ));
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_header_beats_url() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"report.pdf\""),
        );
        assert_eq!(
            resolve_entry_name(&headers, &url("https://example.com/download/other.bin")),
            "report.pdf"
        );
    }

    #[test]
    fn test_url_when_no_header() {
        let headers = HeaderMap::new();
        assert_eq!(
            resolve_entry_name(&headers, &url("https://example.com/data/dataset.csv?x=1")),
            "dataset.csv"
        );
    }

    #[test]
    fn test_header_without_filename_falls_back_to_url() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_DISPOSITION, HeaderValue::from_static("inline"));
        assert_eq!(
            resolve_entry_name(&headers, &url("https://example.com/x/y.txt")),
            "y.txt"
        );
    }

    #[test]
    fn test_bare_domain_yields_file() {
        let headers = HeaderMap::new();
        assert_eq!(resolve_entry_name(&headers, &url("https://example.com")), "file");
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let fetcher = RemoteFetcher::new(Duration::from_secs(5), "test").unwrap();
        let err = fetcher
            .fetch("not a url", Instant::now() + Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_body_times_out() {
        let slow = futures::stream::once(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, reqwest::Error>(Bytes::from_static(b"late"))
        });

        let mut body = bounded_body(slow, Instant::now() + Duration::from_secs(1));
        let first = body.next().await.unwrap();
        assert_eq!(first.unwrap_err().kind(), io::ErrorKind::TimedOut);
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn test_bounded_body_passes_chunks_through() {
        let chunks = futures::stream::iter(vec![
            Ok::<_, reqwest::Error>(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
        ]);

        let body = bounded_body(chunks, Instant::now() + Duration::from_secs(5));
        let collected: Vec<_> = body.map(|c| c.unwrap()).collect().await;
        assert_eq!(collected, vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")]);
    }
}
