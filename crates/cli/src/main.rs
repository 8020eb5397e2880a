//! toolrelay CLI — the main entry point.
//!
//! Commands:
//! - `serve`   — Start the HTTP gateway
//! - `run`     — Run the agent once on a message
//! - `tools`   — Show the consolidated tool catalog
//! - `config`  — Show the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use toolrelay_config::AppConfig;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "toolrelay",
    about = "toolrelay — LLM agent loop over remote tool providers",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.toolrelay/config.toml)
    #[arg(short, long, global = true, env = "TOOLRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the agent on a single message
    Run {
        /// The user message
        #[arg(short, long)]
        message: String,

        /// Turn budget (default: agent.default_max_turns)
        #[arg(long)]
        max_turns: Option<u32>,

        /// Stream text and tool activity while the run progresses
        #[arg(long)]
        stream: bool,
    },

    /// Fetch and print the consolidated tool catalog
    Tools,

    /// Print the effective configuration
    Config,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so `run` output stays pipeable
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    };
    config.map_err(|e| format!("Failed to load config: {e}").into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = load_config(cli.config.as_ref())?;
    tracing::debug!(?config, "Configuration loaded");

    match cli.command {
        Commands::Serve { host, port } => commands::serve::run(config, host, port).await?,
        Commands::Run {
            message,
            max_turns,
            stream,
        } => commands::run::run(config, &message, max_turns, stream).await?,
        Commands::Tools => commands::tools::run(config).await?,
        Commands::Config => commands::config_cmd::show(&config, cli.config.as_deref())?,
    }

    Ok(())
}
