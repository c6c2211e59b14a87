use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::provider::{RawPeriod, SymbolFrame};

// The order is part of the contract: the JSON columns array, every row
// mapping and the spreadsheet header all follow it exactly.
pub const DISPLAY_COLUMNS: [&str; 15] = [
    "Symbol",
    "Year",
    "Quarter",
    "Net Profit",
    "Revenue",
    "Operating Cost",
    "Total Assets",
    "Total Liabilities",
    "Gross Margin (%)",
    "Net Margin (%)",
    "Debt Ratio",
    "Current Ratio",
    "Quick Ratio",
    "ROE (%)",
    "ROA (%)",
];

// untagged, so text serializes as a JSON string, numbers as numbers and
// missing values as null
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Text(String),
    Int(i64),
    Float(f64),
    Null,
}

// Rows are positional, cell i of every row belongs to column i, and rows
// are sorted by (symbol, year, quarter).
#[derive(Debug, Clone)]
pub struct FinancialDataset {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl FinancialDataset {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    // rows as ordered column-name-to-value mappings, for the JSON table field
    pub fn record_rows(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                let mut record = Map::new();
                for (name, cell) in self.columns.iter().zip(row) {
                    let value = serde_json::to_value(cell).unwrap_or(Value::Null);
                    record.insert(name.clone(), value);
                }
                record
            })
            .collect()
    }
}

// Fails only when the provider returned nothing usable: no rows at all, or
// rows in which every statement field is empty. Partial gaps stay in the
// table as null cells.
pub fn build_financial_dataset(frames: &[SymbolFrame]) -> Result<FinancialDataset, AppError> {
    let mut built: Vec<BuiltRow> = Vec::new();
    let mut any_payload = false;

    for frame in frames {
        for raw in &frame.rows {
            any_payload = any_payload || raw.has_payload();
            built.push(BuiltRow {
                symbol: frame.symbol.clone(),
                year: raw.year,
                quarter: raw.quarter,
                cells: build_row(&frame.symbol, raw),
            });
        }
    }

    if built.is_empty() || !any_payload {
        let symbols: Vec<&str> = frames.iter().map(|f| f.symbol.as_str()).collect();
        return Err(AppError::InvalidRequest(format!(
            "no financial statement data returned for {}; check the stock codes and the reporting window",
            symbols.join(", ")
        )));
    }

    built.sort_by(|a, b| {
        (a.symbol.as_str(), a.year, a.quarter).cmp(&(b.symbol.as_str(), b.year, b.quarter))
    });

    Ok(FinancialDataset {
        columns: DISPLAY_COLUMNS.iter().map(|c| c.to_string()).collect(),
        rows: built.into_iter().map(|row| row.cells).collect(),
    })
}

struct BuiltRow {
    symbol: String,
    year: i32,
    quarter: u8,
    cells: Vec<CellValue>,
}

fn build_row(symbol: &str, raw: &RawPeriod) -> Vec<CellValue> {
    // Attributable net income is the headline figure; the indicator-table
    // value is the fallback. Revenue prefers the income line over the total.
    let net_profit = raw.n_income_attr_p.or(raw.netprofit);
    let revenue = raw.revenue.or(raw.total_revenue);
    let cost = raw.oper_cost;

    let gross_margin = safe_div(revenue.zip(cost).map(|(r, c)| r - c), revenue).map(to_pct);
    let net_margin = safe_div(net_profit, revenue).map(to_pct);
    let debt_ratio = safe_div(raw.total_liab, raw.total_assets);
    let current_ratio = safe_div(raw.total_cur_assets, raw.total_cur_liab);
    // Missing inventories count as zero; a missing current-assets figure
    // still makes the whole ratio unknown.
    let quick_ratio = safe_div(
        raw.total_cur_assets
            .map(|assets| assets - raw.inventories.unwrap_or(0.0)),
        raw.total_cur_liab,
    );

    vec![
        CellValue::Text(symbol.to_string()),
        CellValue::Int(i64::from(raw.year)),
        CellValue::Int(i64::from(raw.quarter)),
        number_cell(net_profit),
        number_cell(revenue),
        number_cell(cost),
        number_cell(raw.total_assets),
        number_cell(raw.total_liab),
        number_cell(gross_margin),
        number_cell(net_margin),
        number_cell(debt_ratio),
        number_cell(current_ratio),
        number_cell(quick_ratio),
        number_cell(raw.roe),
        number_cell(raw.roa),
    ]
}

// unknown or zero denominators fold into None rather than infinities
fn safe_div(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    let n = numerator?;
    let d = denominator?;
    if d == 0.0 { None } else { Some(n / d) }
}

fn to_pct(ratio: f64) -> f64 {
    ratio * 100.0
}

fn number_cell(value: Option<f64>) -> CellValue {
    match value {
        Some(v) => CellValue::Float(round4(v)),
        None => CellValue::Null,
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
