use axum::{Json, extract::State};

use crate::AppState;
use crate::credentials::Credentials;
use crate::error::AppResult;
use crate::pipeline::{QueryResponse, ReportRequest, handle_report};

pub async fn create_report(
    State(state): State<AppState>,
    credentials: Credentials,
    Json(request): Json<ReportRequest>,
) -> AppResult<Json<QueryResponse>> {
    request.validate()?;

    let response = handle_report(
        state.provider.as_ref(),
        state.chat.as_ref(),
        &state.store,
        &request,
        &credentials,
    )
    .await?;

    Ok(Json(response))
}
