//! `toolrelay tools` — Fetch and print the consolidated tool catalog.

use std::sync::Arc;

use toolrelay_config::AppConfig;
use toolrelay_tools::{RegistryCache, ToolRegistry};

async fn fetch_catalog(config: &AppConfig) -> toolrelay_core::Result<Arc<ToolRegistry>> {
    let cache = RegistryCache::from_config(config);
    println!("Fetching catalogs from {} provider(s)...", cache.providers().len());
    Ok(cache.get().await?)
}

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = fetch_catalog(&config).await?;

    println!();
    if registry.is_empty() {
        println!("   No tools available");
    }
    for binding in registry.bindings() {
        println!(
            "   {:<20} [{}] {}",
            binding.definition.name, binding.provider.name, binding.definition.description
        );
    }

    for shadowed in registry.shadowed() {
        println!(
            "   ⚠️  {} from {} shadowed by {}",
            shadowed.name, shadowed.provider, shadowed.kept_by
        );
    }
    for failure in registry.failures() {
        println!("   ❌ {} unavailable: {}", failure.provider, failure.reason);
    }

    println!();
    println!("   Tools: {}", registry.len());
    Ok(())
}
