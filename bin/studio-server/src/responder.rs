//! Download Responder.
//!
//! [`render`] is the one place that decides between a streamed attachment
//! and an error envelope. Everything that can fail before the first byte has
//! already failed by the time a [`DownloadArtifact`] exists; what is left can
//! only cut the body short, which the client sees as an aborted transfer.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use studio_import_logs::DownloadArtifact;

use crate::error::ServerError;

pub fn render(result: Result<DownloadArtifact, ServerError>) -> Response {
    match result {
        Ok(artifact) => attachment(artifact),
        Err(e) => e.into_response(),
    }
}

fn attachment(artifact: DownloadArtifact) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", artifact.filename);
    let disposition = match HeaderValue::from_str(&disposition) {
        Ok(v) => v,
        // Task IDs are restricted to [A-Za-z0-9_-], so this is unreachable in practice.
        Err(_) => HeaderValue::from_static("attachment"),
    };

    let mut response = Response::new(Body::from_stream(artifact.body));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(artifact.content_type),
    );
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if let Some(len) = artifact.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    response
}
