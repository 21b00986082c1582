//! Import-task endpoints: status, log browsing and the log download.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use tracing::info;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::extract::{ApiPath, ApiQuery};
use crate::responder;
use crate::schemas::import_task::{
    validate_task_id, DownloadLogsQuery, ImportTaskResponse, LogLinesQuery, LogLinesResponse,
    LogSegmentResponse,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(get_import_task, list_log_segments, read_log_lines, download_logs),
    components(schemas(
        ImportTaskResponse,
        LogSegmentResponse,
        LogLinesResponse,
        DownloadLogsQuery,
        LogLinesQuery
    ))
)]
pub struct ImportTasksApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/import-tasks/{id}", get(get_import_task))
        .route("/import-tasks/{id}/logs", get(list_log_segments))
        .route("/import-tasks/{id}/logs/{segment}", get(read_log_lines))
        .route("/import-tasks/{id}/download-logs", get(download_logs))
}

#[utoipa::path(
    get,
    path = "/api/import-tasks/{id}",
    tag = "import-tasks",
    params(
        ("id" = String, Path, description = "Import task ID")
    ),
    responses(
        (status = 200, description = "Task status", body = ImportTaskResponse),
        (status = 400, description = "Malformed task ID"),
        (status = 404, description = "Task does not exist"),
        (status = 503, description = "Task table unavailable"),
    )
)]
pub async fn get_import_task(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<ImportTaskResponse>, ServerError> {
    let task_id = validate_task_id(&id)?;
    let task = state.logs.task(&task_id).await?;
    Ok(Json(task.into()))
}

#[utoipa::path(
    get,
    path = "/api/import-tasks/{id}/logs",
    tag = "import-tasks",
    params(
        ("id" = String, Path, description = "Import task ID")
    ),
    responses(
        (status = 200, description = "Log segments of the task", body = [LogSegmentResponse]),
        (status = 400, description = "Malformed task ID"),
        (status = 404, description = "Task does not exist"),
        (status = 503, description = "Log storage unavailable"),
    )
)]
pub async fn list_log_segments(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<Vec<LogSegmentResponse>>, ServerError> {
    let task_id = validate_task_id(&id)?;
    let segments = state.logs.list_segments(&task_id).await?;
    Ok(Json(segments.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/api/import-tasks/{id}/logs/{segment}",
    tag = "import-tasks",
    params(
        ("id" = String, Path, description = "Import task ID"),
        ("segment" = u32, Path, description = "Segment (worker) index"),
        LogLinesQuery
    ),
    responses(
        (status = 200, description = "A page of log lines", body = LogLinesResponse),
        (status = 400, description = "Malformed request"),
        (status = 404, description = "Task or segment does not exist"),
        (status = 503, description = "Log storage unavailable"),
    )
)]
pub async fn read_log_lines(
    State(state): State<Arc<AppState>>,
    ApiPath((id, segment)): ApiPath<(String, u32)>,
    ApiQuery(q): ApiQuery<LogLinesQuery>,
) -> Result<Json<LogLinesResponse>, ServerError> {
    let req = q.validate(&id, segment)?;
    let page = state
        .logs
        .read_lines(&req.task_id, req.segment, req.offset, req.limit)
        .await?;
    Ok(Json(page.into()))
}

/// Download all logs of an import task.
///
/// One segment is returned as plain text; several are bundled into a tar
/// archive with one `shard-NNNNN.log` entry per segment.
#[utoipa::path(
    get,
    path = "/api/import-tasks/{id}/download-logs",
    tag = "import-tasks",
    params(
        ("id" = String, Path, description = "Import task ID"),
        DownloadLogsQuery
    ),
    responses(
        (status = 200, description = "Log file (text/plain) or tar archive (application/x-tar)"),
        (status = 400, description = "Malformed request"),
        (status = 404, description = "Task does not exist"),
        (status = 500, description = "A log segment could not be read"),
        (status = 503, description = "Log storage unavailable, retry"),
    )
)]
pub async fn download_logs(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<String>,
    ApiQuery(q): ApiQuery<DownloadLogsQuery>,
) -> Response {
    let result = match q.validate(&id) {
        Ok(req) => {
            info!(task_id = %req.task_id, segment = ?req.segment, "log download requested");
            state.logs.download_logs(&req).await.map_err(ServerError::from)
        }
        Err(e) => Err(e),
    };
    responder::render(result)
}
