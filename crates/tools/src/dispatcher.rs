//! Tool dispatcher — runs one tool call on the provider that owns it.
//!
//! Every failure mode (unknown name, unreachable provider, timeout,
//! rejection, garbage response) comes back as a
//! [`ToolExecutionResult::Err`] instead of an error, so the agent loop can
//! hand it to the model as an ordinary tool result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use toolrelay_config::AppConfig;
use toolrelay_core::error::{RegistryError, ToolError};
use toolrelay_core::provider::ToolDefinition;
use toolrelay_core::tool::{ToolExecutionResult, ToolExecutor};
use tracing::{debug, warn};

use crate::cache::RegistryCache;
use crate::registry::ToolRegistry;
use crate::wire::{self, ExecuteRequest};

/// Executes tool calls through the cached registry.
pub struct ToolDispatcher {
    cache: Arc<RegistryCache>,
    client: reqwest::Client,
    execute_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(cache: Arc<RegistryCache>, execute_timeout: Duration) -> Self {
        Self {
            cache,
            client: reqwest::Client::new(),
            execute_timeout,
        }
    }

    /// Build a dispatcher and its registry cache from configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(RegistryCache::from_config(config)),
            Duration::from_secs(config.registry.execute_timeout_secs),
        )
    }

    /// The registry cache this dispatcher resolves names through.
    pub fn cache(&self) -> &Arc<RegistryCache> {
        &self.cache
    }

    /// Execute `name` against a specific registry snapshot.
    pub async fn dispatch(
        &self,
        registry: &ToolRegistry,
        name: &str,
        arguments: serde_json::Value,
    ) -> ToolExecutionResult {
        let binding = match registry.resolve(name) {
            Ok(b) => b,
            Err(e) => {
                warn!(tool = %name, "Model requested an unknown tool");
                return ToolExecutionResult::Err(e);
            }
        };

        debug!(tool = %name, provider = %binding.provider.name, "Dispatching tool call");

        let request = ExecuteRequest {
            tool: name.to_string(),
            arguments,
        };

        let response = match self
            .client
            .post(binding.provider.execute_url())
            .timeout(self.execute_timeout)
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return self.fail(ToolError::Timeout {
                    tool_name: name.to_string(),
                    timeout_secs: self.execute_timeout.as_secs(),
                });
            }
            Err(e) => {
                return self.fail(ToolError::Unreachable {
                    provider: binding.provider.name.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => {
                return self.fail(ToolError::Timeout {
                    tool_name: name.to_string(),
                    timeout_secs: self.execute_timeout.as_secs(),
                });
            }
            Err(e) => {
                return self.fail(ToolError::InvalidResponse {
                    tool_name: name.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        if !status.is_success() {
            return self.fail(ToolError::Rejected {
                status: status.as_u16(),
                message: wire::error_message(&body),
            });
        }

        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(value) => ToolExecutionResult::Ok(wire::success_payload(value)),
            Err(e) => self.fail(ToolError::InvalidResponse {
                tool_name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn fail(&self, error: ToolError) -> ToolExecutionResult {
        warn!(error = %error, "Tool call failed");
        ToolExecutionResult::Err(error)
    }
}

#[async_trait]
impl ToolExecutor for ToolDispatcher {
    async fn definitions(&self) -> Result<Vec<ToolDefinition>, RegistryError> {
        Ok(self.cache.get().await?.definitions())
    }

    async fn execute(&self, name: &str, arguments: serde_json::Value) -> ToolExecutionResult {
        match self.cache.get().await {
            Ok(registry) => self.dispatch(&registry, name, arguments).await,
            Err(e) => self.fail(ToolError::Unreachable {
                provider: "registry".into(),
                reason: e.to_string(),
            }),
        }
    }
}
