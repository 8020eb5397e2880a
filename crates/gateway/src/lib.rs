//! HTTP API gateway for toolrelay.
//!
//! Exposes the orchestration loop and the tool catalog over HTTP:
//!
//! - `GET  /`              — Service banner
//! - `GET  /health`        — Liveness check
//! - `GET  /tools`         — Consolidated tool catalog
//! - `POST /tools/refresh` — Re-fetch every provider catalog
//! - `POST /agent/run`     — Run to completion, return the outcome
//! - `POST /agent/stream`  — Run with progress as an SSE stream
//!
//! Built on Axum.

pub mod api;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{Method, header},
    response::Json,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use toolrelay_agent::AgentLoop;
use toolrelay_config::AppConfig;
use toolrelay_tools::{RegistryCache, ToolDispatcher};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    pub agent: AgentLoop,
    /// The same cache the agent's dispatcher resolves tools through
    pub registry: Arc<RegistryCache>,
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(config: AppConfig, agent: AgentLoop, registry: Arc<RegistryCache>) -> Self {
        Self {
            config,
            agent,
            registry,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - Request body size limit (1 MB)
/// - CORS for GET and POST from any origin
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/tools", get(api::list_tools_handler))
        .route("/tools/refresh", post(api::refresh_tools_handler))
        .route("/agent/run", post(api::run_handler))
        .route("/agent/stream", post(api::stream_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
///
/// Builds the model client, the registry cache, and the dispatcher once
/// and shares them across requests.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let model = toolrelay_providers::build_from_config(&config)?;
    let dispatcher = ToolDispatcher::from_config(&config);
    let registry = dispatcher.cache().clone();
    let agent = AgentLoop::from_config(model, Arc::new(dispatcher), &config);

    let state = Arc::new(GatewayState::new(config, agent, registry));
    let app = build_router(state.clone());

    info!(
        addr = %addr,
        model = %state.config.model.model,
        providers = state.registry.providers().len(),
        "Gateway starting"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct RootResponse {
    service: &'static str,
    status: &'static str,
    model: String,
    started_at: DateTime<Utc>,
}

async fn root_handler(State(state): State<SharedState>) -> Json<RootResponse> {
    Json(RootResponse {
        service: "toolrelay",
        status: "running",
        model: state.config.model.model.clone(),
        started_at: state.started_at,
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
