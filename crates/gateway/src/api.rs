//! Catalog and agent route handlers.

use std::convert::Infallible;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Json, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use toolrelay_agent::RunOutcome;
use toolrelay_core::error::RegistryError;
use toolrelay_core::provider::Usage;
use toolrelay_core::tool::{ProviderFailure, ToolCallRecord};
use toolrelay_tools::ToolRegistry;

use crate::SharedState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

// --- Tool catalog ---

#[derive(Debug, Serialize)]
pub struct ToolEntry {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
    pub provider: String,
}

#[derive(Debug, Serialize)]
pub struct ShadowedEntry {
    pub name: String,
    pub provider: String,
    pub kept_by: String,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub tools: Vec<ToolEntry>,
    pub count: usize,
    pub failures: Vec<ProviderFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub shadowed: Vec<ShadowedEntry>,
}

impl From<&ToolRegistry> for CatalogResponse {
    fn from(registry: &ToolRegistry) -> Self {
        let tools: Vec<ToolEntry> = registry
            .bindings()
            .iter()
            .map(|binding| ToolEntry {
                name: binding.definition.name.clone(),
                description: binding.definition.description.clone(),
                input_schema: binding.definition.input_schema.clone(),
                provider: binding.provider.name.clone(),
            })
            .collect();

        Self {
            count: tools.len(),
            tools,
            failures: registry.failures().to_vec(),
            shadowed: registry
                .shadowed()
                .iter()
                .map(|s| ShadowedEntry {
                    name: s.name.clone(),
                    provider: s.provider.clone(),
                    kept_by: s.kept_by.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CatalogErrorResponse {
    error: String,
    failures: Vec<ProviderFailure>,
}

fn catalog_response(result: Result<std::sync::Arc<ToolRegistry>, RegistryError>) -> Response {
    match result {
        Ok(registry) => Json(CatalogResponse::from(registry.as_ref())).into_response(),
        Err(err) => {
            warn!(error = %err, "Tool catalog unavailable");
            let failures = match &err {
                RegistryError::AllProvidersFailed(failures) => failures.clone(),
            };
            (
                StatusCode::BAD_GATEWAY,
                Json(CatalogErrorResponse {
                    error: err.to_string(),
                    failures,
                }),
            )
                .into_response()
        }
    }
}

/// `GET /tools`: the consolidated catalog, populating the cache if needed.
pub async fn list_tools_handler(State(state): State<SharedState>) -> Response {
    catalog_response(state.registry.get().await)
}

/// `POST /tools/refresh`: re-fetch every provider catalog.
pub async fn refresh_tools_handler(State(state): State<SharedState>) -> Response {
    info!("Refreshing tool catalog");
    catalog_response(state.registry.refresh().await)
}

// --- Agent runs ---

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub message: String,
    #[serde(default)]
    pub max_turns: Option<u32>,
}

impl RunRequest {
    /// Resolve the turn budget, rejecting empty messages and out-of-range budgets.
    fn validate(&self, default_max_turns: u32, limit: u32) -> Result<u32, String> {
        if self.message.trim().is_empty() {
            return Err("message must not be empty".into());
        }
        match self.max_turns {
            None => Ok(default_max_turns),
            Some(0) => Err("max_turns must be at least 1".into()),
            Some(n) if n > limit => Err(format!("max_turns must not exceed {limit}")),
            Some(n) => Ok(n),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub run_id: String,
    pub response: String,
    pub turns: u32,
    pub tool_calls: Vec<ToolCallRecord>,
    pub status: &'static str,
    pub usage: Usage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<RunOutcome> for RunResponse {
    fn from(outcome: RunOutcome) -> Self {
        let error = match &outcome.termination {
            toolrelay_agent::Termination::Failed { message } => Some(message.clone()),
            _ => None,
        };
        Self {
            run_id: outcome.run_id,
            response: outcome.response,
            turns: outcome.turns,
            tool_calls: outcome.tool_calls,
            status: outcome.termination.status(),
            usage: outcome.usage,
            error,
        }
    }
}

/// `POST /agent/run`: run to completion.
pub async fn run_handler(
    State(state): State<SharedState>,
    Json(req): Json<RunRequest>,
) -> Response {
    let agent_config = &state.config.agent;
    let max_turns = match req.validate(agent_config.default_max_turns, agent_config.max_turns_limit) {
        Ok(n) => n,
        Err(message) => return bad_request(message),
    };

    let outcome = state.agent.run(&req.message, max_turns).await;
    let status = if outcome.termination.is_failed() {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::OK
    };
    (status, Json(RunResponse::from(outcome))).into_response()
}

/// `POST /agent/stream`: run with progress as Server-Sent Events.
///
/// Each SSE event is named after its event type and carries the event as
/// one JSON object. The stream ends after `done` or `error`.
pub async fn stream_handler(
    State(state): State<SharedState>,
    Json(req): Json<RunRequest>,
) -> Response {
    let agent_config = &state.config.agent;
    let max_turns = match req.validate(agent_config.default_max_turns, agent_config.max_turns_limit) {
        Ok(n) => n,
        Err(message) => return bad_request(message),
    };

    let rx = state.agent.run_stream(&req.message, max_turns);
    let stream = ReceiverStream::new(rx).map(|event| {
        Ok::<_, Infallible>(
            SseEvent::default()
                .event(event.event_type())
                .data(serde_json::to_string(&event).unwrap_or_default()),
        )
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}
