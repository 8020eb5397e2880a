//! `toolrelay config` — Show the effective configuration.

use std::path::Path;

use toolrelay_config::AppConfig;

const REDACTED: &str = "<redacted>";

/// Render the configuration as TOML with the API key masked.
pub fn render(config: &AppConfig) -> Result<String, toml::ser::Error> {
    let mut shown = config.clone();
    if shown.model.api_key.is_some() {
        shown.model.api_key = Some(REDACTED.into());
    }
    toml::to_string_pretty(&shown)
}

pub fn show(config: &AppConfig, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let default_path = AppConfig::config_dir().join("config.toml");
    let path = path.unwrap_or(&default_path);

    println!("# Source: {}", path.display());
    if !path.exists() {
        println!("# (file not found, defaults plus environment)");
    }
    println!("{}", render(config)?);
    Ok(())
}
