use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod config;
mod dom_features;
mod engine;
mod error;
mod model;
mod store;
mod types;
mod url_features;
mod verdicts;

use config::Config;
use dom_features::DOM_FEATURE_NAMES;
use engine::ScoringEngine;
use error::AppError;
use store::ModelStore;
use types::{AnalyzeRequest, ScoreRequest, ScoreResponse, Verdict};
use url_features::URL_FEATURE_NAMES;

type AppState = Arc<ScoringEngine>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "suparna_engine=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load();
    info!("Loaded configuration: {:?}", config);

    // Load both ensembles once; everything after this point is read-only
    let store = ModelStore::new();
    let url_model = store.load(&config.url_model_path, &URL_FEATURE_NAMES).await;
    let dom_model = store.load(&config.dom_model_path, &DOM_FEATURE_NAMES).await;
    let alpha = config::load_alpha(&config.alpha_path).await;
    info!(
        "URL model: {} trees, DOM model: {} trees, alpha = {}",
        url_model.len(),
        dom_model.len(),
        alpha
    );

    let engine = Arc::new(ScoringEngine::new(url_model, dom_model, alpha));

    // Initialize metrics exporter
    let recorder = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    // Build router
    let app = Router::new()
        .route("/score", post(score_handler))
        .route("/analyze", post(analyze_handler))
        .route("/verdict/:session_id", get(verdict_handler).delete(forget_handler))
        .route("/metrics", get(move || {
            let recorder = recorder.clone();
            async move { recorder.render() }
        }))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(engine);

    // Start server
    let addr: SocketAddr = config.bind_addr.parse()?;
    info!("Starting Suparna Phishing Scoring Engine on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn score_handler(
    State(engine): State<AppState>,
    Json(request): Json<ScoreRequest>,
) -> Result<Json<ScoreResponse>, AppError> {
    let start = Instant::now();
    metrics::counter!("requests_total").increment(1);

    // The URL channel is mandatory
    if request.url_features.is_empty() {
        return Err(AppError::InvalidInput("url_features cannot be empty".to_string()));
    }

    let verdict = engine.score(&request);

    Ok(Json(respond(verdict, start)))
}

async fn analyze_handler(
    State(engine): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<ScoreResponse>, AppError> {
    let start = Instant::now();
    metrics::counter!("requests_total").increment(1);

    if request.url.is_empty() {
        return Err(AppError::InvalidInput("URL cannot be empty".to_string()));
    }

    let verdict = engine.analyze(&request)?;

    Ok(Json(respond(verdict, start)))
}

fn respond(verdict: Verdict, start: Instant) -> ScoreResponse {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    metrics::histogram!("request_duration_ms").record(latency_ms);
    metrics::counter!("verdicts_total", "label" => verdict.label.as_str()).increment(1);

    ScoreResponse {
        verdict,
        decision_id: Uuid::new_v4(),
        latency_ms,
    }
}

async fn verdict_handler(
    State(engine): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Verdict> {
    Json(engine.verdict_for(&session_id))
}

async fn forget_handler(
    State(engine): State<AppState>,
    Path(session_id): Path<String>,
) -> StatusCode {
    engine.end_session(&session_id);
    StatusCode::NO_CONTENT
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
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

    warn!("Shutdown signal received, starting graceful shutdown");
}
