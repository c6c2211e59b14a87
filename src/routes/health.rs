use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use crate::AppState;

// liveness plus a probe of the one local dependency, the export store root
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let storage_status = match tokio::fs::metadata(state.store.root()).await {
        Ok(meta) if meta.is_dir() => "healthy",
        _ => "unhealthy",
    };

    let status = if storage_status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "ok" } else { "error" },
            "storage": storage_status,
            "service": "fin-report-service",
            "version": "1.0.0",
            "environment": state.config.environment,
        })),
    )
}
