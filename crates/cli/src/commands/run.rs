//! `toolrelay run` — One agent run from the command line.

use std::io::Write;
use std::sync::Arc;

use toolrelay_agent::{AgentLoop, AgentStreamEvent, RunOutcome, Termination};
use toolrelay_config::AppConfig;
use toolrelay_tools::ToolDispatcher;

pub async fn run(
    config: AppConfig,
    message: &str,
    max_turns: Option<u32>,
    stream: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let max_turns = resolve_max_turns(&config, max_turns)?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set TOOLRELAY_API_KEY or ANTHROPIC_API_KEY, or add it to:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let model = toolrelay_providers::build_from_config(&config)?;
    let tools = Arc::new(ToolDispatcher::from_config(&config));
    let agent = AgentLoop::from_config(model, tools, &config);

    if stream {
        stream_run(&agent, message, max_turns).await
    } else {
        eprint!("  Thinking...");
        let outcome = agent.run(message, max_turns).await;
        eprint!("\r              \r");
        print_outcome(&outcome)
    }
}

/// Apply the configured default and reject budgets outside `1..=limit`.
pub fn resolve_max_turns(config: &AppConfig, requested: Option<u32>) -> Result<u32, String> {
    let limit = config.agent.max_turns_limit;
    match requested {
        None => Ok(config.agent.default_max_turns),
        Some(n) if n == 0 || n > limit => {
            Err(format!("--max-turns must be between 1 and {limit}"))
        }
        Some(n) => Ok(n),
    }
}

fn print_outcome(outcome: &RunOutcome) -> Result<(), Box<dyn std::error::Error>> {
    if let Termination::Failed { message } = &outcome.termination {
        eprintln!("  [Error] {message}");
        print_summary(outcome.turns, outcome.tool_calls.len(), &outcome.termination.to_string());
        return Err(message.clone().into());
    }

    println!("{}", outcome.response);
    eprintln!();
    print_summary(outcome.turns, outcome.tool_calls.len(), outcome.termination.status());
    eprintln!(
        "  Tokens:     {} in / {} out",
        outcome.usage.input_tokens, outcome.usage.output_tokens
    );
    Ok(())
}

fn print_summary(turns: u32, tool_calls: usize, status: &str) {
    eprintln!("  Status:     {status}");
    eprintln!("  Turns:      {turns}");
    eprintln!("  Tool calls: {tool_calls}");
}

async fn stream_run(
    agent: &AgentLoop,
    message: &str,
    max_turns: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rx = agent.run_stream(message, max_turns);
    let mut stdout = std::io::stdout();

    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        match event {
            AgentStreamEvent::TextDelta { text } => {
                print!("{text}");
                stdout.flush()?;
            }
            AgentStreamEvent::ToolExecuting { tool, input, .. } => {
                eprintln!();
                eprintln!("  -> {tool} {input}");
            }
            AgentStreamEvent::ToolResult {
                tool,
                content,
                is_error,
                ..
            } => {
                let marker = if is_error { "!!" } else { "<-" };
                eprintln!("  {marker} {tool} {content}");
            }
            AgentStreamEvent::ToolUseStart { .. } | AgentStreamEvent::MessageComplete { .. } => {}
            AgentStreamEvent::Done {
                turns,
                tool_calls,
                status,
                usage,
                ..
            } => {
                println!();
                eprintln!();
                print_summary(turns, tool_calls.len(), &status);
                eprintln!(
                    "  Tokens:     {} in / {} out",
                    usage.input_tokens, usage.output_tokens
                );
            }
            AgentStreamEvent::Error {
                message,
                turns_so_far,
                tool_calls,
            } => {
                println!();
                eprintln!("  [Error] {message}");
                print_summary(turns_so_far, tool_calls.len(), "failed");
                return Err(message.into());
            }
        }
        if terminal {
            break;
        }
    }

    Ok(())
}
