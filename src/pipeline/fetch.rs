use crate::error::AppError;
use crate::provider::{MarketDataProvider, SymbolFrame};

use super::ReportRequest;

// Stage 1: merged statement frames for every requested symbol. Gaps inside
// a frame are normal and flow through; only a provider that cannot be used
// at all turns into an error here.
#[tracing::instrument(
    name = "pipeline_stage fetch",
    skip(provider, request, token),
    fields(
        pipeline.stage = "fetch",
        fetch.symbols = request.symbols.len(),
        fetch.rows,
    )
)]
pub async fn fetch(
    provider: &dyn MarketDataProvider,
    request: &ReportRequest,
    token: &str,
) -> Result<Vec<SymbolFrame>, AppError> {
    let frames = provider
        .fetch_financials(request, token)
        .await
        .map_err(|e| AppError::Provider(e.to_string()))?;

    let rows: usize = frames.iter().map(|frame| frame.rows.len()).sum();
    tracing::Span::current().record("fetch.rows", rows);
    tracing::debug!(frames = frames.len(), rows, "Fetched provider frames");

    Ok(frames)
}
