//! Local tool provider servers for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::registry::ToolProviderEndpoint;

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A provider whose catalog is `tools` and whose execute endpoint echoes
/// the call back as its result.
pub async fn catalog_provider(name: &str, tools: Value) -> ToolProviderEndpoint {
    let app = Router::new()
        .route("/tools", get(move || async move { Json(json!({ "tools": tools })) }))
        .route(
            "/execute",
            post(|Json(body): Json<Value>| async move { Json(json!({ "result": body })) }),
        );
    ToolProviderEndpoint::new(name, serve(app).await)
}

/// A calculator provider counting how often its catalog is fetched.
///
/// - `add` / `multiply` answer `{"result": n}`
/// - `divide` by zero answers 500 `{"error": "Division by zero"}`
/// - `slow` sleeps for two seconds
/// - `garbled` answers 200 with a non-JSON body
pub async fn calculator_provider(fetches: Arc<AtomicUsize>) -> ToolProviderEndpoint {
    let app = Router::new()
        .route(
            "/tools",
            get(|State(fetches): State<Arc<AtomicUsize>>| async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                Json(json!({
                    "tools": [
                        {"name": "add", "description": "Add two numbers",
                         "inputSchema": {"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "number"}}}},
                        {"name": "multiply", "description": "Multiply two numbers"},
                        {"name": "divide", "description": "Divide a by b"},
                        {"name": "slow"},
                        {"name": "garbled"}
                    ]
                }))
            }),
        )
        .route("/execute", post(execute_calculator))
        .with_state(fetches);
    ToolProviderEndpoint::new("calculator", serve(app).await)
}

async fn execute_calculator(Json(body): Json<Value>) -> (StatusCode, String) {
    let a = body["arguments"]["a"].as_f64().unwrap_or(0.0);
    let b = body["arguments"]["b"].as_f64().unwrap_or(0.0);
    match body["tool"].as_str().unwrap_or("") {
        "add" => (StatusCode::OK, json!({ "result": a + b }).to_string()),
        "multiply" => (StatusCode::OK, json!({ "result": a * b }).to_string()),
        "divide" if b == 0.0 => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": "Division by zero" }).to_string(),
        ),
        "divide" => (StatusCode::OK, json!({ "result": a / b }).to_string()),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            (StatusCode::OK, json!({ "result": "late" }).to_string())
        }
        "garbled" => (StatusCode::OK, "<<not json>>".to_string()),
        other => (
            StatusCode::NOT_FOUND,
            format!("no such tool: {other}"),
        ),
    }
}

/// A base URL nothing listens on.
pub async fn dead_endpoint(name: &str) -> ToolProviderEndpoint {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    ToolProviderEndpoint::new(name, format!("http://{addr}"))
}
