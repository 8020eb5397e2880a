//! Model client selection from configuration.

use std::sync::Arc;
use std::time::Duration;

use toolrelay_config::AppConfig;
use toolrelay_core::error::ModelError;
use toolrelay_core::provider::ModelClient;

use crate::anthropic::AnthropicClient;

/// Build the model client named by `[model].provider`.
///
/// A missing API key is a configuration error rather than a deferred
/// authentication failure.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn ModelClient>, ModelError> {
    let model = &config.model;

    match model.provider.as_str() {
        "anthropic" => {
            let api_key = model.api_key.clone().ok_or_else(|| {
                ModelError::NotConfigured(
                    "no API key; set model.api_key or ANTHROPIC_API_KEY".into(),
                )
            })?;

            let mut client = AnthropicClient::with_timeout(
                api_key,
                Duration::from_secs(model.request_timeout_secs),
            )?;
            if let Some(ref base_url) = model.base_url {
                client = client.with_base_url(base_url);
            }

            tracing::debug!(provider = "anthropic", model = %model.model, "Model client ready");
            Ok(Arc::new(client))
        }
        other => Err(ModelError::NotConfigured(format!(
            "unknown model provider '{other}'"
        ))),
    }
}
