use rust_xlsxwriter::{Format, Workbook, XlsxError};

use crate::dataset::{CellValue, FinancialDataset};
use crate::error::AppError;
use crate::pipeline::{PeriodType, ReportRequest};
use crate::storage::{EXPORT_EXTENSION, ExportStore};

pub const SHEET_NAME: &str = "Financials";

#[derive(Debug, Clone)]
pub struct ExportedFile {
    pub name: String,
    pub size_bytes: u64,
}

// Render, stage, then claim: the file becomes reachable by token only once
// it is complete.
pub async fn export_dataset(
    store: &ExportStore,
    dataset: &FinancialDataset,
    request: &ReportRequest,
) -> Result<ExportedFile, AppError> {
    let bytes = render_workbook(dataset)
        .map_err(|e| AppError::Export(format!("failed to render workbook: {e}")))?;

    let mut base = sanitize_base_name(request.filename.as_deref().unwrap_or(""));
    if base.is_empty() {
        base = default_base_name(request);
    }

    let staging = store.staging_path();
    tokio::fs::write(&staging, &bytes)
        .await
        .map_err(|e| AppError::Export(format!("failed to stage export file: {e}")))?;

    match store.claim(&staging, &base).await {
        Ok(name) => Ok(ExportedFile {
            name,
            size_bytes: bytes.len() as u64,
        }),
        Err(error) => {
            // a failed claim must not leave the staging file behind
            let _ = tokio::fs::remove_file(&staging).await;
            Err(AppError::Export(format!(
                "failed to publish export file: {error}"
            )))
        }
    }
}

// Trailing .xlsx is stripped case-insensitively and repeatedly, so
// `a.xlsx.xlsx` and `a` land on the same final name. May come out empty;
// the caller falls back then.
pub fn sanitize_base_name(raw: &str) -> String {
    let mut name = raw.trim().replace(['/', '\\'], "_");
    while name.to_ascii_lowercase().ends_with(EXPORT_EXTENSION) {
        name.truncate(name.len() - EXPORT_EXTENSION.len());
    }
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn default_base_name(request: &ReportRequest) -> String {
    match request.period_type {
        PeriodType::Year => format!("financials-{}-{}", request.start_year, request.end_year),
        PeriodType::Quarter => format!(
            "financials-{}Q{}-{}Q{}",
            request.start_year,
            request.start_quarter.unwrap_or(1),
            request.end_year,
            request.end_quarter.unwrap_or(4)
        ),
    }
}

fn render_workbook(dataset: &FinancialDataset) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    let header_format = Format::new().set_bold();
    for (col, name) in dataset.columns().iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, name, &header_format)?;
    }

    for (row_idx, row) in dataset.rows().iter().enumerate() {
        let row_num = (row_idx + 1) as u32;
        for (col_idx, cell) in row.iter().enumerate() {
            let col_num = col_idx as u16;
            match cell {
                CellValue::Text(text) => {
                    worksheet.write_string(row_num, col_num, text)?;
                }
                CellValue::Int(value) => {
                    worksheet.write_number(row_num, col_num, *value as f64)?;
                }
                CellValue::Float(value) => {
                    worksheet.write_number(row_num, col_num, *value)?;
                }
                CellValue::Null => {}
            }
        }
    }

    worksheet.autofit();
    workbook.save_to_buffer()
}
