//! Tool executor trait — the abstraction over remote tool providers.
//!
//! The agent loop uses an executor to:
//! 1. Get tool definitions to send to the model
//! 2. Execute the tool calls the model requests

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, ToolError};
use crate::provider::ToolDefinition;

/// The normalized outcome of one tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolExecutionResult {
    /// The provider's result payload
    Ok(serde_json::Value),
    /// Why the call failed
    Err(ToolError),
}

impl ToolExecutionResult {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// Render the result as tool result content for the model.
    ///
    /// Success is the payload as compact JSON; failure is an
    /// `{"error": "..."}` object.
    pub fn to_content(&self) -> String {
        match self {
            Self::Ok(payload) => payload.to_string(),
            Self::Err(err) => serde_json::json!({ "error": err.to_string() }).to_string(),
        }
    }
}

/// One entry of a run's tool call log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Name of the tool the model asked for
    pub tool: String,
    /// Arguments exactly as the model sent them
    pub input: serde_json::Value,
    /// The model-assigned tool use id
    pub tool_use_id: String,
}

/// A tool provider that could not be reached while building the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub reason: String,
}

/// The core tool executor trait.
///
/// Implementations never fail a single call: every failure comes back as
/// [`ToolExecutionResult::Err`] so it can be shown to the model.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// The consolidated tool catalog to advertise to the model.
    async fn definitions(&self) -> std::result::Result<Vec<ToolDefinition>, RegistryError>;

    /// Execute one tool call.
    async fn execute(&self, name: &str, arguments: serde_json::Value) -> ToolExecutionResult;
}
