use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::{Request, Response, StatusCode};
use axum::routing::{get, post};
use opentelemetry::KeyValue;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::{MakeSpan, OnResponse, TraceLayer},
};
use tracing::Span;

mod config;
mod credentials;
mod dataset;
mod error;
mod export;
mod llm;
mod pipeline;
mod provider;
mod routes;
mod storage;
mod telemetry;

use config::Config;
use llm::{ChatModel, OpenAiChat};
use provider::{MarketDataProvider, TushareProvider};
use storage::{ExportStore, SWEEP_INTERVAL};
use telemetry::{HTTP_REQUEST_DURATION, HTTP_REQUESTS_TOTAL, init_telemetry};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub provider: Arc<dyn MarketDataProvider>,
    pub chat: Arc<dyn ChatModel>,
    pub store: ExportStore,
}

#[derive(Clone)]
struct HttpMakeSpan;

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let method = request.method().as_str();
        let path = request.uri().path();

        tracing::info_span!(
            "HTTP request",
            otel.name = %format!("{} {}", method, path),
            http.method = %method,
            http.route = %path,
            http.target = %request.uri(),
            http.scheme = "http",
            http.flavor = ?request.version(),
            http.user_agent = request.headers()
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .unwrap_or(""),
            http.response.status_code = tracing::field::Empty,
            otel.status_code = tracing::field::Empty,
        )
    }
}

#[derive(Clone)]
struct HttpOnResponse;

impl<B> OnResponse<B> for HttpOnResponse {
    fn on_response(self, response: &Response<B>, latency: Duration, span: &Span) {
        let status = response.status().as_u16();

        span.record("http.response.status_code", status as i64);

        if status >= 500 {
            span.record("otel.status_code", "ERROR");
        } else {
            span.record("otel.status_code", "OK");
        }

        let latency_ms = latency.as_secs_f64() * 1000.0;
        let status_class = format!("{}xx", status / 100);

        HTTP_REQUESTS_TOTAL.add(
            1,
            &[
                KeyValue::new("http.status_code", status.to_string()),
                KeyValue::new("http.status_class", status_class.clone()),
            ],
        );

        HTTP_REQUEST_DURATION.record(
            latency_ms,
            &[
                KeyValue::new("http.status_code", status.to_string()),
                KeyValue::new("http.status_class", status_class),
            ],
        );

        tracing::info!(
            http.response.status_code = status,
            latency_ms = latency_ms,
            "finished processing request"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    let telemetry_guard = init_telemetry(&config)?;

    tracing::info!(
        port = config.port,
        environment = %config.environment,
        "Starting fin-report-service"
    );

    let store = ExportStore::new(&config.export_dir)?;
    tracing::info!(root = %config.export_dir.display(), "Export store ready");

    match config.export_retention() {
        Some(retention) => spawn_retention_sweeper(store.clone(), retention),
        None => tracing::info!("Export retention disabled, files are kept until removed externally"),
    }

    let provider: Arc<dyn MarketDataProvider> =
        Arc::new(TushareProvider::new(&config.tushare_api_url));
    let chat: Arc<dyn ChatModel> = Arc::new(OpenAiChat::new(
        &config.openai_model,
        config.openai_base_url.as_deref(),
    ));

    tracing::info!(
        provider = provider.name(),
        chat = chat.name(),
        model = %config.openai_model,
        "Upstream clients initialized"
    );

    let state = AppState {
        config: config.clone(),
        provider,
        chat,
        store,
    };

    let app = Router::new()
        .route("/api/health", get(routes::health::health))
        .route("/api/financials", post(routes::financials::create_report))
        .route("/api/download/{token}", get(routes::download::download))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(HttpMakeSpan)
                .on_response(HttpOnResponse),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(300),
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    telemetry_guard.shutdown();

    Ok(())
}

fn spawn_retention_sweeper(store: ExportStore, retention: Duration) {
    tracing::info!(
        retention_hours = retention.as_secs() / 3600,
        "Retention sweeper started"
    );
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            // first tick fires immediately, clearing leftovers from crashes
            interval.tick().await;
            match store.sweep_expired(retention).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Expired exports removed"),
                Err(error) => tracing::warn!(error = %error, "Export sweep failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
