//! `toolrelay serve` — Start the HTTP API server.

use toolrelay_config::AppConfig;

pub async fn run(
    mut config: AppConfig,
    host_override: Option<String>,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(host) = host_override {
        config.gateway.host = host;
    }
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("toolrelay gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.model.model);
    println!(
        "   Providers: {}",
        config
            .tool_providers
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    toolrelay_gateway::start(config).await?;

    Ok(())
}
