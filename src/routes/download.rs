use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::storage::{EXPORT_MEDIA_TYPE, NOT_FOUND_MESSAGE};
use crate::telemetry::metrics::DOWNLOADS_TOTAL;

pub async fn download(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Response> {
    let resolved = state.store.resolve(&token).await?;

    let bytes = tokio::fs::read(&resolved.path).await.map_err(|error| {
        // the retention sweeper can race us between resolve and read
        if error.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound(NOT_FOUND_MESSAGE.to_string())
        } else {
            AppError::Internal(format!("failed to read export file: {error}"))
        }
    })?;

    DOWNLOADS_TOTAL.add(1, &[]);
    tracing::info!(token = %resolved.name, size_bytes = resolved.size_bytes, "Export downloaded");

    let headers = [
        (header::CONTENT_TYPE, EXPORT_MEDIA_TYPE.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", resolved.name),
        ),
    ];
    Ok((headers, bytes).into_response())
}
