mod handlers;

use anyhow::Context;
use axum::{
    Router,
    http::{HeaderValue, Request},
    middleware::{Next, from_fn},
    routing::{get, post},
};
use quote_flow::{Catalog, ConversationRunner, FlowConfig};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub runner: ConversationRunner,
}

/// Initialize structured JSON tracing based on environment variables
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "quote_chat_service=debug,quote_flow=debug,tower_http=debug".into());

    match log_format.as_str() {
        "pretty" => {
            // Human-readable logging for development
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

/// Built-in catalog, or the JSON file named by `QUOTE_CATALOG_PATH`.
fn load_catalog() -> anyhow::Result<Catalog> {
    match std::env::var("QUOTE_CATALOG_PATH") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading catalog from {path}"))?;
            let catalog = Catalog::from_json(&json)
                .with_context(|| format!("parsing catalog from {path}"))?;
            info!(path = %path, products = catalog.products.len(), "Loaded catalog");
            Ok(catalog)
        }
        Err(_) => {
            info!("Using built-in catalog (set QUOTE_CATALOG_PATH to override)");
            Ok(Catalog::default())
        }
    }
}

fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/sessions", post(handlers::start_session))
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::end_session),
        )
        .route("/sessions/{id}/submit", post(handlers::submit))
        .route("/sessions/{id}/reset", post(handlers::reset_session))
        .route("/sessions/{id}/transcript", get(handlers::get_transcript))
        .route("/leads", get(handlers::list_leads))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(from_fn(correlation_id_middleware)),
        )
        .with_state(app_state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let catalog = Arc::new(load_catalog()?);
    let config = FlowConfig::from_env().context("reading QUOTE_FLOW_* settings")?;
    info!(
        offer_count = config.offer_count,
        backend_timeout_ms = config.backend_timeout.as_millis() as u64,
        "Flow configuration loaded"
    );

    let runner = ConversationRunner::in_memory(catalog, config)?;
    let app = build_router(AppState { runner });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;

    info!("Server running on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
