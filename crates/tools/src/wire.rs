//! Wire types of the tool provider contract.
//!
//! - `GET /tools` → `{"tools": [{"name", "description", "inputSchema"}]}`
//! - `POST /execute` with `{"tool", "arguments"}` → `{"result": ...}`,
//!   or a non-2xx status with `{"error": "..."}`

use serde::{Deserialize, Serialize};
use toolrelay_core::provider::ToolDefinition;

/// Body of `GET /tools`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogResponse {
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// Body of `POST /execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub tool: String,
    pub arguments: serde_json::Value,
}

/// Pull the payload out of a successful execute response.
///
/// Providers wrap their answer in `result`; a body without it is taken
/// as the payload itself.
pub fn success_payload(body: serde_json::Value) -> serde_json::Value {
    match body {
        serde_json::Value::Object(mut map) if map.contains_key("result") => {
            map.remove("result").unwrap_or(serde_json::Value::Null)
        }
        other => other,
    }
}

/// Pull a human-readable message out of a failed execute response.
pub fn error_message(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => match map.get("error") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => raw.to_string(),
            Some(other) => other.to_string(),
        },
        _ => raw.to_string(),
    }
}
