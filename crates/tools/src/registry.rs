//! The consolidated tool catalog.
//!
//! Every configured provider is asked for its catalog concurrently, and the
//! answers are merged into one name → provider mapping. When two providers
//! advertise the same name, the one configured first keeps it; completion
//! order never matters.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use toolrelay_config::ToolProviderConfig;
use toolrelay_core::error::{RegistryError, ToolError};
use toolrelay_core::provider::ToolDefinition;
use toolrelay_core::tool::ProviderFailure;
use tracing::{debug, info, warn};

use crate::wire::CatalogResponse;

/// Where a tool provider lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolProviderEndpoint {
    pub name: String,
    /// Base URL, without a trailing slash
    pub url: String,
}

impl ToolProviderEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn tools_url(&self) -> String {
        format!("{}/tools", self.url)
    }

    pub fn execute_url(&self) -> String {
        format!("{}/execute", self.url)
    }
}

impl From<&ToolProviderConfig> for ToolProviderEndpoint {
    fn from(config: &ToolProviderConfig) -> Self {
        Self::new(&config.name, &config.url)
    }
}

/// A tool and the provider that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolBinding {
    pub definition: ToolDefinition,
    pub provider: ToolProviderEndpoint,
}

/// A definition that lost the name to an earlier provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowedTool {
    pub name: String,
    /// The provider whose definition was dropped
    pub provider: String,
    /// The provider that keeps the name
    pub kept_by: String,
}

/// Immutable name → provider mapping built from provider catalogs.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    bindings: Vec<ToolBinding>,
    index: HashMap<String, usize>,
    failures: Vec<ProviderFailure>,
    shadowed: Vec<ShadowedTool>,
}

impl ToolRegistry {
    /// A registry with no tools.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Merge catalogs given in registration order.
    pub fn from_catalogs(
        catalogs: Vec<(ToolProviderEndpoint, Vec<ToolDefinition>)>,
        failures: Vec<ProviderFailure>,
    ) -> Self {
        let mut registry = Self {
            failures,
            ..Self::default()
        };

        for (provider, definitions) in catalogs {
            for definition in definitions {
                if let Some(&existing) = registry.index.get(&definition.name) {
                    let kept_by = registry.bindings[existing].provider.name.clone();
                    warn!(
                        tool = %definition.name,
                        provider = %provider.name,
                        kept_by = %kept_by,
                        "Duplicate tool name, keeping the earlier provider"
                    );
                    registry.shadowed.push(ShadowedTool {
                        name: definition.name,
                        provider: provider.name.clone(),
                        kept_by,
                    });
                    continue;
                }

                registry
                    .index
                    .insert(definition.name.clone(), registry.bindings.len());
                registry.bindings.push(ToolBinding {
                    definition,
                    provider: provider.clone(),
                });
            }
        }

        registry
    }

    /// Fetch every provider's catalog concurrently and merge them.
    ///
    /// Each provider gets its own `timeout`. Fails only when providers are
    /// configured and every one of them failed.
    pub async fn fetch_all(
        client: &reqwest::Client,
        providers: &[ToolProviderEndpoint],
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        if providers.is_empty() {
            info!("No tool providers configured");
            return Ok(Self::empty());
        }

        // join_all keeps configured order regardless of completion order
        let results = join_all(
            providers
                .iter()
                .map(|provider| fetch_catalog(client, provider, timeout)),
        )
        .await;

        let mut catalogs = Vec::new();
        let mut failures = Vec::new();
        for (provider, result) in providers.iter().zip(results) {
            match result {
                Ok(definitions) => {
                    debug!(provider = %provider.name, tools = definitions.len(), "Fetched tool catalog");
                    catalogs.push((provider.clone(), definitions));
                }
                Err(reason) => {
                    warn!(provider = %provider.name, url = %provider.url, reason = %reason, "Tool provider unavailable");
                    failures.push(ProviderFailure {
                        provider: provider.name.clone(),
                        reason,
                    });
                }
            }
        }

        if catalogs.is_empty() {
            return Err(RegistryError::AllProvidersFailed(failures));
        }

        let registry = Self::from_catalogs(catalogs, failures);
        info!(
            tools = registry.len(),
            providers = providers.len(),
            failed = registry.failures.len(),
            "Tool registry built"
        );
        Ok(registry)
    }

    /// Look up the binding for a tool name.
    pub fn resolve(&self, name: &str) -> Result<&ToolBinding, ToolError> {
        self.index
            .get(name)
            .map(|&i| &self.bindings[i])
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    /// Definitions in catalog order: provider order, then each provider's own order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.bindings.iter().map(|b| b.definition.clone()).collect()
    }

    pub fn bindings(&self) -> &[ToolBinding] {
        &self.bindings
    }

    /// Providers that could not be reached while building this registry.
    pub fn failures(&self) -> &[ProviderFailure] {
        &self.failures
    }

    pub fn shadowed(&self) -> &[ShadowedTool] {
        &self.shadowed
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

async fn fetch_catalog(
    client: &reqwest::Client,
    provider: &ToolProviderEndpoint,
    timeout: Duration,
) -> Result<Vec<ToolDefinition>, String> {
    let response = client
        .get(provider.tools_url())
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                format!("timed out after {timeout:?}")
            } else {
                e.to_string()
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("catalog request returned HTTP {}", status.as_u16()));
    }

    let catalog: CatalogResponse = response
        .json()
        .await
        .map_err(|e| format!("invalid catalog: {e}"))?;
    Ok(catalog.tools)
}
