use crate::dataset::{CellValue, FinancialDataset};
use crate::llm::ChatModel;

use super::{PeriodType, ReportRequest};

// older rows are dropped so a wide window cannot blow up the prompt
pub const MAX_PROMPT_ROWS: usize = 12;

pub const EMPTY_REPLY: &str = "(the model returned no content)";

const SYSTEM_PROMPT: &str = "You are a strict, neutral and concise sell-side research assistant.";

// Stage 3: a short narrative over the table. Best effort by contract; the
// caller decides what a failure means.
#[tracing::instrument(
    name = "pipeline_stage summarize",
    skip(chat, dataset, request, api_key),
    fields(pipeline.stage = "summarize", summarize.rows = dataset.row_count())
)]
pub async fn summarize(
    chat: &dyn ChatModel,
    dataset: &FinancialDataset,
    request: &ReportRequest,
    api_key: &str,
) -> anyhow::Result<String> {
    let prompt = build_prompt(dataset, request);
    let reply = chat.complete(api_key, SYSTEM_PROMPT, &prompt).await?;
    let reply = reply.trim();
    if reply.is_empty() {
        Ok(EMPTY_REPLY.to_string())
    } else {
        Ok(reply.to_string())
    }
}

fn build_prompt(dataset: &FinancialDataset, request: &ReportRequest) -> String {
    let window = match request.period_type {
        PeriodType::Year => format!("{} to {}", request.start_year, request.end_year),
        PeriodType::Quarter => format!(
            "{} Q{} to {} Q{}",
            request.start_year,
            request.start_quarter.unwrap_or(1),
            request.end_year,
            request.end_quarter.unwrap_or(4)
        ),
    };
    let period_type = match request.period_type {
        PeriodType::Year => "year",
        PeriodType::Quarter => "quarter",
    };

    format!(
        "Summarize the financial table below in at most 8 bullet points. \
         Do not give investment advice.\n\n\
         Query:\n\
         - symbols: {symbols}\n\
         - period type: {period_type}\n\
         - window: {window}\n\n\
         Data (most recent {MAX_PROMPT_ROWS} rows at most):\n\
         {table}\n\
         Requirements:\n\
         - Cover revenue, operating cost, gross margin, net profit, net margin, \
         the debt ratio, the current and quick ratios, and ROE/ROA.\n\
         - If a period has missing figures, say which ones.\n\
         - Finish with one overall conclusion of 10 to 25 words.",
        symbols = request.symbols.join(", "),
        table = markdown_table(dataset, MAX_PROMPT_ROWS),
    )
}

// Rows are re-ranked chronologically first, so the tail is the most recent
// reporting periods across all symbols rather than whichever symbol sorts
// last.
fn markdown_table(dataset: &FinancialDataset, max_rows: usize) -> String {
    let mut ordered: Vec<&Vec<CellValue>> = dataset.rows().iter().collect();
    ordered.sort_by_key(|row| row_period(row));
    let skip = ordered.len().saturating_sub(max_rows);
    let recent = &ordered[skip..];

    let mut out = String::new();
    out.push_str("| ");
    out.push_str(&dataset.columns().join(" | "));
    out.push_str(" |\n|");
    for _ in dataset.columns() {
        out.push_str(" --- |");
    }
    out.push('\n');
    for row in recent {
        let rendered: Vec<String> = row.iter().map(render_cell).collect();
        out.push_str("| ");
        out.push_str(&rendered.join(" | "));
        out.push_str(" |\n");
    }
    out
}

fn row_period(row: &[CellValue]) -> (i64, i64) {
    let year = match row.get(1) {
        Some(CellValue::Int(year)) => *year,
        _ => 0,
    };
    let quarter = match row.get(2) {
        Some(CellValue::Int(quarter)) => *quarter,
        _ => 0,
    };
    (year, quarter)
}

fn render_cell(cell: &CellValue) -> String {
    match cell {
        CellValue::Text(text) => text.clone(),
        CellValue::Int(value) => value.to_string(),
        CellValue::Float(value) => value.to_string(),
        CellValue::Null => String::new(),
    }
}
