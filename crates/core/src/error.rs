//! Error types for the toolrelay domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

use crate::tool::ProviderFailure;

/// The top-level error type for all toolrelay operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Registry errors ---
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures while calling the hosted model. These are fatal to a run.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by model API, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),

    #[error("Model client not configured: {0}")]
    NotConfigured(String),
}

/// Failures of a single tool call.
///
/// These never abort a run: the dispatcher folds them into a
/// [`ToolExecutionResult::Err`](crate::tool::ToolExecutionResult) so the
/// model can see the failure and react to it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("Tool {0} not found")]
    UnknownTool(String),

    #[error("Tool provider {provider} unreachable: {reason}")]
    Unreachable { provider: String, reason: String },

    #[error("Tool {tool_name} timed out after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Tool execution failed: {status} {message}")]
    Rejected { status: u16, message: String },

    #[error("Tool {tool_name} returned an invalid response: {reason}")]
    InvalidResponse { tool_name: String, reason: String },
}

/// Failures while building the consolidated tool catalog.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("All {} tool providers failed: {}", .0.len(), join_failures(.0))]
    AllProvidersFailed(Vec<ProviderFailure>),
}

fn join_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.provider, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}
