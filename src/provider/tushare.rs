use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{MarketDataProvider, RawPeriod, SymbolFrame};
use crate::pipeline::{PeriodType, ReportRequest};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// standard YYYYMMDD quarter-end dates, plus the legacy YYYYq0 codes still
// served for some older filings
const STD_QUARTER_END: [&str; 4] = ["0331", "0630", "0930", "1231"];
const LEGACY_QUARTER_END: [&str; 4] = ["10", "20", "30", "40"];

const INDICATOR_FIELDS: &str = "ts_code,ann_date,end_date,netprofit,roe,roa";
const INCOME_FIELDS: &str =
    "ts_code,ann_date,end_date,revenue,total_revenue,oper_cost,n_income_attr_p,report_type";
const BALANCE_FIELDS: &str = "ts_code,ann_date,end_date,total_assets,total_liab,\
     total_cur_assets,total_cur_liab,inventories,report_type";

// Tushare Pro serves every statement API from one endpoint: POST
// {api_name, token, params, fields}, answered with a column-name array plus
// row tuples. The caller's token is never stored on the client.
pub struct TushareProvider {
    client: reqwest::Client,
    api_url: String,
}

impl TushareProvider {
    pub fn new(api_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.to_string(),
        }
    }

    async fn call(
        &self,
        token: &str,
        api_name: &str,
        ts_code: &str,
        period: &str,
        fields: &str,
    ) -> anyhow::Result<Vec<StatementRow>> {
        let body = ApiRequest {
            api_name,
            token,
            params: ApiParams { ts_code, period },
            fields,
        };

        let response = self
            .client
            .post(&self.api_url)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Tushare")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Tushare API error ({status}): {error_text}");
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .context("Failed to parse Tushare response")?;

        if parsed.code != 0 {
            anyhow::bail!(
                "Tushare rejected {api_name} (code {}): {}",
                parsed.code,
                parsed.msg.unwrap_or_default()
            );
        }

        let Some(ApiData { fields, items }) = parsed.data else {
            return Ok(Vec::new());
        };
        Ok(items
            .into_iter()
            .map(|item| StatementRow(fields.iter().cloned().zip(item).collect()))
            .collect())
    }

    // One statement for one (symbol, period). Failures are logged and
    // swallowed; a broken statement call leaves its fields empty instead of
    // failing the whole report.
    async fn statement(
        &self,
        token: &str,
        api_name: &str,
        ts_code: &str,
        period: &str,
        fields: &str,
    ) -> Option<StatementRow> {
        match self.call(token, api_name, ts_code, period, fields).await {
            Ok(rows) => pick_latest(rows),
            Err(error) => {
                tracing::warn!(
                    api = api_name,
                    symbol = ts_code,
                    period,
                    error = %error,
                    "Statement call failed, leaving period fields empty"
                );
                None
            }
        }
    }

    async fn fetch_period(&self, token: &str, ts_code: &str, period: &str) -> RawPeriod {
        let indicator = self
            .statement(token, "fina_indicator", ts_code, period, INDICATOR_FIELDS)
            .await;
        let income = self
            .statement(token, "income", ts_code, period, INCOME_FIELDS)
            .await;
        let balance = self
            .statement(token, "balancesheet", ts_code, period, BALANCE_FIELDS)
            .await;
        merge_statements(indicator.as_ref(), income.as_ref(), balance.as_ref())
    }
}

#[async_trait]
impl MarketDataProvider for TushareProvider {
    async fn fetch_financials(
        &self,
        request: &ReportRequest,
        token: &str,
    ) -> anyhow::Result<Vec<SymbolFrame>> {
        let periods = request_periods(request);
        let mut frames = Vec::with_capacity(request.symbols.len());

        for symbol in &request.symbols {
            let mut rows = Vec::with_capacity(periods.len());
            for &(year, quarter) in &periods {
                let mut resolved: Option<RawPeriod> = None;
                for period in period_candidates(year, quarter) {
                    let merged = self.fetch_period(token, symbol, &period).await;
                    if merged.has_payload() {
                        resolved = Some(merged);
                        break;
                    }
                }
                // A period nothing answered for still gets a row, so the
                // rendered table shows the gap instead of silently shrinking.
                let mut row = resolved.unwrap_or_default();
                row.year = year;
                row.quarter = quarter;
                rows.push(row);
            }
            frames.push(SymbolFrame {
                symbol: symbol.clone(),
                rows,
            });
        }

        Ok(frames)
    }

    fn name(&self) -> &str {
        "tushare"
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    api_name: &'a str,
    token: &'a str,
    params: ApiParams<'a>,
    fields: &'a str,
}

#[derive(Debug, Serialize)]
struct ApiParams<'a> {
    ts_code: &'a str,
    period: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    msg: Option<String>,
    data: Option<ApiData>,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    fields: Vec<String>,
    items: Vec<Vec<Value>>,
}

// one response row, keyed by the field names the API returned
#[derive(Debug, Clone)]
struct StatementRow(HashMap<String, Value>);

impl StatementRow {
    // Tushare serves most numbers as JSON numbers but occasionally as
    // strings; both are accepted
    fn number(&self, field: &str) -> Option<f64> {
        match self.0.get(field) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn text(&self, field: &str) -> Option<&str> {
        match self.0.get(field) {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

// Each metric comes from exactly one statement; a missing statement leaves
// its fields empty.
fn merge_statements(
    indicator: Option<&StatementRow>,
    income: Option<&StatementRow>,
    balance: Option<&StatementRow>,
) -> RawPeriod {
    RawPeriod {
        year: 0,
        quarter: 0,
        revenue: income.and_then(|row| row.number("revenue")),
        total_revenue: income.and_then(|row| row.number("total_revenue")),
        oper_cost: income.and_then(|row| row.number("oper_cost")),
        n_income_attr_p: income.and_then(|row| row.number("n_income_attr_p")),
        netprofit: indicator.and_then(|row| row.number("netprofit")),
        total_assets: balance.and_then(|row| row.number("total_assets")),
        total_liab: balance.and_then(|row| row.number("total_liab")),
        total_cur_assets: balance.and_then(|row| row.number("total_cur_assets")),
        total_cur_liab: balance.and_then(|row| row.number("total_cur_liab")),
        inventories: balance.and_then(|row| row.number("inventories")),
        roe: indicator.and_then(|row| row.number("roe")),
        roa: indicator.and_then(|row| row.number("roa")),
    }
}

// When the API returns several rows for one period, consolidated statements
// (report_type == 1) win, then the latest announcement date.
fn pick_latest(rows: Vec<StatementRow>) -> Option<StatementRow> {
    if rows.is_empty() {
        return None;
    }
    let consolidated: Vec<StatementRow> = rows
        .iter()
        .filter(|row| row.number("report_type") == Some(1.0))
        .cloned()
        .collect();
    let pool = if consolidated.is_empty() {
        rows
    } else {
        consolidated
    };
    pool.into_iter()
        .max_by(|a, b| a.text("ann_date").cmp(&b.text("ann_date")))
}

// most-specific first: standard quarter-end date, legacy quarter code, then
// the annual period
fn period_candidates(year: i32, quarter: u8) -> Vec<String> {
    let idx = usize::from(quarter.clamp(1, 4)) - 1;
    let candidates = [
        format!("{year}{}", STD_QUARTER_END[idx]),
        format!("{year}{}", LEGACY_QUARTER_END[idx]),
        format!("{year}1231"),
    ];
    let mut unique = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique
}

// Annual mode yields Q4 per year; quarterly mode clamps the first and last
// year to the requested quarters.
fn request_periods(request: &ReportRequest) -> Vec<(i32, u8)> {
    let mut periods = Vec::new();
    for year in request.start_year..=request.end_year {
        match request.period_type {
            PeriodType::Year => periods.push((year, 4)),
            PeriodType::Quarter => {
                let first = if year == request.start_year {
                    request.start_quarter.unwrap_or(1)
                } else {
                    1
                };
                let last = if year == request.end_year {
                    request.end_quarter.unwrap_or(4)
                } else {
                    4
                };
                for quarter in first..=last {
                    periods.push((year, quarter));
                }
            }
        }
    }
    periods
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> StatementRow {
        StatementRow(
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
        )
    }

    fn quarter_request(
        start_year: i32,
        start_quarter: u8,
        end_year: i32,
        end_quarter: u8,
    ) -> ReportRequest {
        ReportRequest {
            symbols: vec!["600519.SH".to_string()],
            period_type: PeriodType::Quarter,
            start_year,
            end_year,
            start_quarter: Some(start_quarter),
            end_quarter: Some(end_quarter),
            filename: None,
        }
    }

    #[test]
    fn test_period_candidates_for_q1() {
        assert_eq!(
            period_candidates(2023, 1),
            vec!["20230331", "202310", "20231231"]
        );
    }

    #[test]
    fn test_period_candidates_dedupes_q4() {
        // Standard Q4 and the annual fallback are the same string.
        assert_eq!(period_candidates(2023, 4), vec!["20231231", "202340"]);
    }

    #[test]
    fn test_annual_mode_yields_q4_per_year() {
        let request = ReportRequest {
            symbols: vec!["600519.SH".to_string()],
            period_type: PeriodType::Year,
            start_year: 2021,
            end_year: 2023,
            start_quarter: None,
            end_quarter: None,
            filename: None,
        };
        assert_eq!(
            request_periods(&request),
            vec![(2021, 4), (2022, 4), (2023, 4)]
        );
    }

    #[test]
    fn test_quarter_mode_within_one_year() {
        assert_eq!(
            request_periods(&quarter_request(2023, 2, 2023, 3)),
            vec![(2023, 2), (2023, 3)]
        );
    }

    #[test]
    fn test_quarter_mode_clamps_edge_years() {
        assert_eq!(
            request_periods(&quarter_request(2022, 3, 2023, 2)),
            vec![(2022, 3), (2022, 4), (2023, 1), (2023, 2)]
        );
    }

    #[test]
    fn test_pick_latest_prefers_consolidated() {
        let rows = vec![
            row(&[
                ("ann_date", json!("20240430")),
                ("report_type", json!(4)),
                ("revenue", json!(2.0)),
            ]),
            row(&[
                ("ann_date", json!("20240101")),
                ("report_type", json!(1)),
                ("revenue", json!(1.0)),
            ]),
        ];
        let picked = pick_latest(rows).unwrap();
        assert_eq!(picked.number("revenue"), Some(1.0));
    }

    #[test]
    fn test_pick_latest_falls_back_to_latest_announcement() {
        let rows = vec![
            row(&[("ann_date", json!("20240101")), ("revenue", json!(1.0))]),
            row(&[("ann_date", json!("20240301")), ("revenue", json!(2.0))]),
        ];
        let picked = pick_latest(rows).unwrap();
        assert_eq!(picked.number("revenue"), Some(2.0));
    }

    #[test]
    fn test_pick_latest_of_nothing_is_none() {
        assert!(pick_latest(Vec::new()).is_none());
    }

    #[test]
    fn test_number_coerces_strings_and_ignores_null() {
        let r = row(&[
            ("a", json!(1.5)),
            ("b", json!("2.5")),
            ("c", json!(null)),
            ("d", json!("not a number")),
        ]);
        assert_eq!(r.number("a"), Some(1.5));
        assert_eq!(r.number("b"), Some(2.5));
        assert_eq!(r.number("c"), None);
        assert_eq!(r.number("d"), None);
        assert_eq!(r.number("missing"), None);
    }

    #[test]
    fn test_merge_statements_routes_fields() {
        let indicator = row(&[("netprofit", json!(10.0)), ("roe", json!(15.0))]);
        let income = row(&[("revenue", json!(100.0)), ("oper_cost", json!(60.0))]);
        let merged = merge_statements(Some(&indicator), Some(&income), None);

        assert_eq!(merged.netprofit, Some(10.0));
        assert_eq!(merged.roe, Some(15.0));
        assert_eq!(merged.revenue, Some(100.0));
        assert_eq!(merged.oper_cost, Some(60.0));
        // No balance sheet row: all its fields stay empty.
        assert_eq!(merged.total_assets, None);
        assert_eq!(merged.inventories, None);
        assert!(merged.has_payload());
    }
}
