use axum::{
    body::Bytes,
    extract::State,
    http::{header::HOST, HeaderMap},
    Json,
};
use tracing::debug;

use crate::models::{CreateRequest, CreateResponse};
use crate::state::AppState;
use crate::utils::error::ApiError;

/// `POST /create`: register a list of member URLs and hand back a one-shot link.
pub async fn create_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CreateResponse>, ApiError> {
    // parsed by hand so every malformed body is a 400, whatever the content type
    let request: CreateRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;

    debug!(
        files = request.files.len(),
        zip_name = ?request.zip_name,
        "Create request"
    );

    let token = state
        .downloads
        .create_session(request.files, request.zip_name)?;

    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or(state.public_host.as_str());

    Ok(Json(CreateResponse {
        download_url: format!("http://{}/download/{}", host, token),
    }))
}

/// Any other method on `/create`.
pub async fn method_not_allowed() -> ApiError {
    ApiError::BadRequest("Method not allowed".to_string())
}
