use axum::{
    body::Body,
    extract::{Path, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderValue, StatusCode,
    },
    response::Response,
};
use bytes::Bytes;
use std::io;
use tokio::sync::mpsc;
use tracing::info;

use crate::state::AppState;
use crate::utils::error::ApiError;
use crate::utils::filename::header_safe_filename;

/// `GET /download/{token}`: stream the session's members as one ZIP.
///
/// The archive is produced on its own task and handed to the body through a
/// bounded channel, so a slow client slows the fetches down instead of
/// buffering, and the session is finalized even if the client goes away.
pub async fn download_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    let session = state.downloads.open_session(&token)?;
    let config = state.downloads.config();

    let archive_name = header_safe_filename(&session.archive_name, &config.default_archive_name);
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", archive_name))
        .or_else(|_| {
            HeaderValue::from_str(&format!(
                "attachment; filename=\"{}\"",
                config.default_archive_name
            ))
        })
        .map_err(|e| ApiError::InternalError(format!("Invalid archive name: {}", e)))?;

    info!(
        "Starting download for token {}: {} files as {}",
        token,
        session.member_urls.len(),
        archive_name
    );

    let (tx, mut rx) = mpsc::channel::<io::Result<Bytes>>(config.channel_capacity);
    let downloads = state.downloads.clone();
    tokio::spawn(async move {
        downloads.stream_session(session, tx).await;
    });

    let body = Body::from_stream(async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield chunk;
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/zip")
        .header(CONTENT_DISPOSITION, disposition)
        .body(body)
        .map_err(|e| ApiError::InternalError(e.to_string()))
}
