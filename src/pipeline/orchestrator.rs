use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::credentials::Credentials;
use crate::dataset;
use crate::error::AppError;
use crate::export;
use crate::llm::ChatModel;
use crate::provider::MarketDataProvider;
use crate::storage::ExportStore;
use crate::telemetry::metrics::{
    EXPORT_FILE_SIZE, REPORT_GENERATION_DURATION, REPORT_ROWS, SUMMARY_FAILURES,
};

use super::{fetch, summarize};

pub const MAX_SYMBOLS: usize = 10;
pub const MAX_FILENAME_CHARS: usize = 60;

pub const SUMMARY_SKIPPED: &str = "Summary skipped: no language-model key was provided.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Year,
    Quarter,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequest {
    pub symbols: Vec<String>,
    pub period_type: PeriodType,
    pub start_year: i32,
    pub end_year: i32,
    #[serde(default)]
    pub start_quarter: Option<u8>,
    #[serde(default)]
    pub end_quarter: Option<u8>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl ReportRequest {
    // shape checks only; no upstream call
    pub fn validate(&self) -> Result<(), AppError> {
        if self.symbols.is_empty() {
            return Err(AppError::Validation(
                "at least one symbol is required".to_string(),
            ));
        }
        if self.symbols.len() > MAX_SYMBOLS {
            return Err(AppError::Validation(format!(
                "at most {MAX_SYMBOLS} symbols per report"
            )));
        }
        if self.start_year > self.end_year {
            return Err(AppError::Validation(
                "start_year must not be after end_year".to_string(),
            ));
        }
        if let Some(name) = &self.filename {
            if name.chars().count() > MAX_FILENAME_CHARS {
                return Err(AppError::Validation(format!(
                    "filename must be at most {MAX_FILENAME_CHARS} characters"
                )));
            }
        }
        for quarter in [self.start_quarter, self.end_quarter].into_iter().flatten() {
            if !(1..=4).contains(&quarter) {
                return Err(AppError::Validation(
                    "quarters must be between 1 and 4".to_string(),
                ));
            }
        }
        if self.period_type == PeriodType::Quarter {
            let (Some(start), Some(end)) = (self.start_quarter, self.end_quarter) else {
                return Err(AppError::Validation(
                    "start_quarter and end_quarter are required for quarterly reports"
                        .to_string(),
                ));
            };
            if self.start_year == self.end_year && start > end {
                return Err(AppError::Validation(
                    "start_quarter must not be after end_quarter within the same year"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub summary: String,
    pub columns: Vec<String>,
    pub table: Vec<Map<String, Value>>,
    pub download_token: String,
}

// One report end to end. The summary is the only best-effort stage;
// everything else aborts the request. Credentials are checked first, so a
// rejected request performs no upstream call and writes nothing.
#[tracing::instrument(
    name = "pipeline report",
    skip(provider, chat, store, credentials),
    fields(
        report.symbols_count = request.symbols.len(),
        report.rows,
        report.download_token,
        report.duration_ms,
    )
)]
pub async fn handle_report(
    provider: &dyn MarketDataProvider,
    chat: &dyn ChatModel,
    store: &ExportStore,
    request: &ReportRequest,
    credentials: &Credentials,
) -> Result<QueryResponse, AppError> {
    let start = std::time::Instant::now();

    let token = credentials.provider_token.as_deref().ok_or_else(|| {
        AppError::MissingCredential(
            "a market data token is required; pass it in the X-Tushare-Token header".to_string(),
        )
    })?;

    // Stage 1: raw statements per symbol and period
    let frames = fetch::fetch(provider, request, token).await?;

    // Stage 2: derive the display table
    let dataset = dataset::build_financial_dataset(&frames)?;

    // Stage 3: narrative summary, best effort
    let summary = match credentials.summary_key.as_deref() {
        None => SUMMARY_SKIPPED.to_string(),
        Some(key) => match summarize::summarize(chat, &dataset, request, key).await {
            Ok(text) => text,
            Err(error) => {
                SUMMARY_FAILURES.add(1, &[]);
                tracing::warn!(error = %error, "Summarization failed, continuing without it");
                format!("Summary unavailable: {error}")
            }
        },
    };

    // Stage 4: spreadsheet export; its final filename is the download token
    let exported = export::export_dataset(store, &dataset, request).await?;

    let duration = start.elapsed();
    REPORT_GENERATION_DURATION.record(duration.as_secs_f64(), &[]);
    REPORT_ROWS.record(dataset.row_count() as f64, &[]);
    EXPORT_FILE_SIZE.record(exported.size_bytes as f64, &[]);

    let span = tracing::Span::current();
    span.record("report.rows", dataset.row_count());
    span.record("report.download_token", exported.name.as_str());
    span.record("report.duration_ms", duration.as_millis() as u64);

    Ok(QueryResponse {
        summary,
        columns: dataset.columns().to_vec(),
        table: dataset.record_rows(),
        download_token: exported.name,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;

    use super::*;
    use crate::provider::{RawPeriod, SymbolFrame};

    fn annual_request(symbols: &[&str]) -> ReportRequest {
        ReportRequest {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            period_type: PeriodType::Year,
            start_year: 2022,
            end_year: 2023,
            start_quarter: None,
            end_quarter: None,
            filename: None,
        }
    }

    fn both_credentials() -> Credentials {
        Credentials {
            provider_token: Some("tushare-token".to_string()),
            summary_key: Some("openai-key".to_string()),
        }
    }

    enum ProviderBehavior {
        Data,
        Skeletons,
        Fail,
    }

    struct StubProvider {
        behavior: ProviderBehavior,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn new(behavior: ProviderBehavior) -> Self {
            Self {
                behavior,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl MarketDataProvider for StubProvider {
        async fn fetch_financials(
            &self,
            request: &ReportRequest,
            _token: &str,
        ) -> anyhow::Result<Vec<SymbolFrame>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                ProviderBehavior::Fail => anyhow::bail!("connection refused"),
                ProviderBehavior::Skeletons => Ok(request
                    .symbols
                    .iter()
                    .map(|symbol| SymbolFrame {
                        symbol: symbol.clone(),
                        rows: vec![RawPeriod {
                            year: 2023,
                            quarter: 4,
                            ..Default::default()
                        }],
                    })
                    .collect()),
                ProviderBehavior::Data => Ok(request
                    .symbols
                    .iter()
                    .map(|symbol| SymbolFrame {
                        symbol: symbol.clone(),
                        rows: vec![RawPeriod {
                            year: 2023,
                            quarter: 4,
                            revenue: Some(100.0),
                            oper_cost: Some(40.0),
                            n_income_attr_p: Some(30.0),
                            ..Default::default()
                        }],
                    })
                    .collect()),
            }
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    enum ChatBehavior {
        Reply(&'static str),
        Fail,
    }

    struct StubChat {
        behavior: ChatBehavior,
        calls: AtomicUsize,
    }

    impl StubChat {
        fn new(behavior: ChatBehavior) -> Self {
            Self {
                behavior,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatModel for StubChat {
        async fn complete(
            &self,
            _api_key: &str,
            _system: &str,
            _prompt: &str,
        ) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                ChatBehavior::Reply(text) => Ok(text.to_string()),
                ChatBehavior::Fail => anyhow::bail!("rate limit exceeded"),
            }
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn file_count(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|entry| entry.as_ref().unwrap().path().is_file())
            .count()
    }

    #[tokio::test]
    async fn test_happy_path_returns_table_summary_and_token() {
        let dir = TempDir::new().unwrap();
        let store = ExportStore::new(dir.path()).unwrap();
        let provider = StubProvider::new(ProviderBehavior::Data);
        let chat = StubChat::new(ChatBehavior::Reply("- revenue grew"));

        let response = handle_report(
            &provider,
            &chat,
            &store,
            &annual_request(&["600519.SH"]),
            &both_credentials(),
        )
        .await
        .unwrap();

        assert_eq!(response.summary, "- revenue grew");
        assert_eq!(response.columns.len(), 15);
        assert_eq!(response.columns[0], "Symbol");
        assert_eq!(response.table.len(), 1);
        assert!(response.download_token.ends_with(".xlsx"));

        // the token resolves to a real file
        let resolved = store.resolve(&response.download_token).await.unwrap();
        assert!(resolved.size_bytes > 0);

        // row mappings keep the column order
        let keys: Vec<&str> = response.table[0].keys().map(String::as_str).collect();
        let columns: Vec<&str> = response.columns.iter().map(String::as_str).collect();
        assert_eq!(keys, columns);
    }

    #[tokio::test]
    async fn test_missing_provider_token_has_no_side_effects() {
        let dir = TempDir::new().unwrap();
        let store = ExportStore::new(dir.path()).unwrap();
        let provider = StubProvider::new(ProviderBehavior::Data);
        let chat = StubChat::new(ChatBehavior::Reply("unused"));
        let credentials = Credentials {
            provider_token: None,
            summary_key: Some("openai-key".to_string()),
        };

        let error = handle_report(
            &provider,
            &chat,
            &store,
            &annual_request(&["600519.SH"]),
            &credentials,
        )
        .await
        .unwrap_err();

        assert!(matches!(error, AppError::MissingCredential(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
        assert_eq!(file_count(store.root()), 0);
    }

    #[tokio::test]
    async fn test_no_summary_key_skips_the_model() {
        let dir = TempDir::new().unwrap();
        let store = ExportStore::new(dir.path()).unwrap();
        let provider = StubProvider::new(ProviderBehavior::Data);
        let chat = StubChat::new(ChatBehavior::Reply("unused"));
        let credentials = Credentials {
            provider_token: Some("tushare-token".to_string()),
            summary_key: None,
        };

        let response = handle_report(
            &provider,
            &chat,
            &store,
            &annual_request(&["600519.SH"]),
            &credentials,
        )
        .await
        .unwrap();

        assert_eq!(response.summary, SUMMARY_SKIPPED);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
        // the rest of the report is intact
        assert!(store.resolve(&response.download_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_summary_failure_degrades_but_report_succeeds() {
        let dir = TempDir::new().unwrap();
        let store = ExportStore::new(dir.path()).unwrap();
        let provider = StubProvider::new(ProviderBehavior::Data);
        let chat = StubChat::new(ChatBehavior::Fail);

        let response = handle_report(
            &provider,
            &chat,
            &store,
            &annual_request(&["600519.SH"]),
            &both_credentials(),
        )
        .await
        .unwrap();

        assert!(response.summary.starts_with("Summary unavailable:"));
        assert!(response.summary.contains("rate limit exceeded"));
        assert_eq!(response.table.len(), 1);
        assert!(store.resolve(&response.download_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_provider_failure_aborts_the_report() {
        let dir = TempDir::new().unwrap();
        let store = ExportStore::new(dir.path()).unwrap();
        let provider = StubProvider::new(ProviderBehavior::Fail);
        let chat = StubChat::new(ChatBehavior::Reply("unused"));

        let error = handle_report(
            &provider,
            &chat,
            &store,
            &annual_request(&["600519.SH"]),
            &both_credentials(),
        )
        .await
        .unwrap_err();

        assert!(matches!(error, AppError::Provider(_)));
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
        assert_eq!(file_count(store.root()), 0);
    }

    #[tokio::test]
    async fn test_all_empty_upstream_data_is_a_client_error() {
        let dir = TempDir::new().unwrap();
        let store = ExportStore::new(dir.path()).unwrap();
        let provider = StubProvider::new(ProviderBehavior::Skeletons);
        let chat = StubChat::new(ChatBehavior::Reply("unused"));

        let error = handle_report(
            &provider,
            &chat,
            &store,
            &annual_request(&["600519.SH"]),
            &both_credentials(),
        )
        .await
        .unwrap_err();

        match error {
            AppError::InvalidRequest(message) => assert!(message.contains("600519.SH")),
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
        assert_eq!(file_count(store.root()), 0);
    }

    #[test]
    fn test_validate_accepts_a_sound_request() {
        assert!(annual_request(&["600519.SH"]).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_and_oversized_symbol_lists() {
        assert!(annual_request(&[]).validate().is_err());

        let symbols: Vec<String> = (0..11).map(|i| format!("SYM{i}")).collect();
        let refs: Vec<&str> = symbols.iter().map(String::as_str).collect();
        assert!(annual_request(&refs).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_years() {
        let mut request = annual_request(&["600519.SH"]);
        request.start_year = 2024;
        request.end_year = 2023;
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_validate_requires_quarters_in_quarter_mode() {
        let mut request = annual_request(&["600519.SH"]);
        request.period_type = PeriodType::Quarter;
        assert!(request.validate().is_err());

        request.start_quarter = Some(1);
        request.end_quarter = Some(4);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_validate_bounds_quarters() {
        let mut request = annual_request(&["600519.SH"]);
        request.period_type = PeriodType::Quarter;
        request.start_quarter = Some(0);
        request.end_quarter = Some(4);
        assert!(request.validate().is_err());

        request.start_quarter = Some(1);
        request.end_quarter = Some(5);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_validate_orders_quarters_within_one_year() {
        let mut request = annual_request(&["600519.SH"]);
        request.period_type = PeriodType::Quarter;
        request.start_year = 2023;
        request.end_year = 2023;
        request.start_quarter = Some(3);
        request.end_quarter = Some(2);
        assert!(request.validate().is_err());

        // across years the same quarters are fine
        request.end_year = 2024;
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_validate_limits_filename_length() {
        let mut request = annual_request(&["600519.SH"]);
        request.filename = Some("x".repeat(MAX_FILENAME_CHARS + 1));
        assert!(request.validate().is_err());

        request.filename = Some("x".repeat(MAX_FILENAME_CHARS));
        assert!(request.validate().is_ok());
    }
}
