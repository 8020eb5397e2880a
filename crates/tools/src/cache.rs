//! Process-wide registry cache.
//!
//! The registry is fetched once, on first use, and then served from memory
//! until someone asks for a refresh. There is no TTL.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use toolrelay_config::AppConfig;
use toolrelay_core::error::RegistryError;
use tracing::{info, warn};

use crate::registry::{ToolProviderEndpoint, ToolRegistry};

/// Shared, lazily populated [`ToolRegistry`] snapshot.
pub struct RegistryCache {
    client: reqwest::Client,
    providers: Vec<ToolProviderEndpoint>,
    fetch_timeout: Duration,
    current: RwLock<Option<Arc<ToolRegistry>>>,
    /// Serializes fetches so concurrent first callers share one
    populate: tokio::sync::Mutex<()>,
}

impl RegistryCache {
    pub fn new(providers: Vec<ToolProviderEndpoint>, fetch_timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), providers, fetch_timeout)
    }

    pub fn with_client(
        client: reqwest::Client,
        providers: Vec<ToolProviderEndpoint>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            client,
            providers,
            fetch_timeout,
            current: RwLock::new(None),
            populate: tokio::sync::Mutex::new(()),
        }
    }

    /// Build a cache for the configured providers.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.tool_providers.iter().map(Into::into).collect(),
            Duration::from_secs(config.registry.fetch_timeout_secs),
        )
    }

    /// The configured providers, in registration order.
    pub fn providers(&self) -> &[ToolProviderEndpoint] {
        &self.providers
    }

    /// The cached registry, if one has been populated.
    pub fn snapshot(&self) -> Option<Arc<ToolRegistry>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Return the cached registry, fetching it first if needed.
    ///
    /// A failed population is not remembered; the next call fetches again.
    pub async fn get(&self) -> Result<Arc<ToolRegistry>, RegistryError> {
        if let Some(registry) = self.snapshot() {
            return Ok(registry);
        }

        let _guard = self.populate.lock().await;
        // Another caller may have populated it while we waited
        if let Some(registry) = self.snapshot() {
            return Ok(registry);
        }

        let registry = self.fetch().await?;
        self.store(registry.clone());
        Ok(registry)
    }

    /// Re-fetch every catalog and swap the snapshot.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn refresh(&self) -> Result<Arc<ToolRegistry>, RegistryError> {
        let _guard = self.populate.lock().await;

        match self.fetch().await {
            Ok(registry) => {
                self.store(registry.clone());
                info!(tools = registry.len(), "Tool registry refreshed");
                Ok(registry)
            }
            Err(e) => {
                warn!(error = %e, kept_previous = self.snapshot().is_some(), "Tool registry refresh failed");
                Err(e)
            }
        }
    }

    async fn fetch(&self) -> Result<Arc<ToolRegistry>, RegistryError> {
        ToolRegistry::fetch_all(&self.client, &self.providers, self.fetch_timeout)
            .await
            .map(Arc::new)
    }

    fn store(&self, registry: Arc<ToolRegistry>) {
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(registry);
    }
}
