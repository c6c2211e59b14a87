use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: String,
    pub export_dir: PathBuf,
    pub export_retention_hours: u64,
    pub tushare_api_url: String,
    pub openai_model: String,
    pub openai_base_url: Option<String>,
    pub otel_service_name: String,
    pub otel_exporter_endpoint: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            port: env::var("APP_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("APP_PORT must be a number"),
            environment: env::var("APP_ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            export_dir: env::var("EXPORT_DIR")
                .unwrap_or_else(|_| "tmp_exports".to_string())
                .into(),
            export_retention_hours: env::var("EXPORT_RETENTION_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .expect("EXPORT_RETENTION_HOURS must be a number"),
            tushare_api_url: env::var("TUSHARE_API_URL")
                .unwrap_or_else(|_| "http://api.tushare.pro".to_string()),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            openai_base_url: env::var("OPENAI_BASE_URL").ok(),
            otel_service_name: env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "fin-report-service".to_string()),
            otel_exporter_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    // None disables the sweeper; files then persist until removed externally
    pub fn export_retention(&self) -> Option<Duration> {
        if self.export_retention_hours == 0 {
            None
        } else {
            Some(Duration::from_secs(self.export_retention_hours * 3600))
        }
    }
}
