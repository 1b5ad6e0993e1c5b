mod cli;
mod config;
mod render;
mod terminal;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use cortex_agent::{ChatSession, HttpAgentTransport, RequestTemplate, TurnStatus};
use cortex_core::Config;

use crate::cli::CliArgs;
use crate::config::CliConfig;
use crate::render::TurnView;
use crate::terminal::Terminal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    cortex_core::config::load_dotenv();
    let args = CliArgs::parse();
    let mut terminal = Terminal::new();

    // Load config: CLI flags > environment > config file
    let file_config = CliConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;
    let env_config = match args.profile.as_deref() {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    };
    let config = file_config.resolve(env_config, &args)?;
    config.log_summary();

    let transport = HttpAgentTransport::new(&config.snowflake, &config.agent, &config.http)
        .context("failed to configure agent endpoint")?;
    let endpoint = transport.endpoint().to_string();
    let session = Arc::new(ChatSession::new(
        Arc::new(transport),
        RequestTemplate::from_config(&config.agent, &config.tools),
        config.snowflake.auth_token.clone(),
    ));

    terminal.print_banner(&endpoint, config.agent.model.as_deref())?;
    if config.snowflake.auth_token.is_none() {
        terminal.print_error(
            "no auth token configured (--token, SNOWFLAKE_AUTH_TOKEN or config file)",
        )?;
    }

    // REPL loop
    loop {
        let input = match terminal.read_input()? {
            Some(text) => text,
            None => {
                terminal.print_info("Goodbye.")?;
                break;
            }
        };

        if input.is_empty() {
            continue;
        }

        follow_turn(&session, &mut terminal, input).await?;
    }

    Ok(())
}

/// Submit a turn and render the published state until it finishes.
async fn follow_turn(session: &Arc<ChatSession>, terminal: &mut Terminal, input: String) -> Result<()> {
    let mut conversation_rx = session.subscribe_conversation();
    let mut activity_rx = session.subscribe_activity();
    conversation_rx.borrow_and_update();
    activity_rx.borrow_and_update();

    let mut view = TurnView::new(session.conversation().len());
    let mut turn = session.submit_turn(input);

    let joined = loop {
        tokio::select! {
            joined = &mut turn => break joined,
            Ok(()) = conversation_rx.changed() => {
                let snapshot = conversation_rx.borrow_and_update().clone();
                for piece in view.update(&snapshot) {
                    terminal.print_piece(&piece)?;
                }
            }
            Ok(()) = activity_rx.changed() => {
                let activity = *activity_rx.borrow_and_update();
                terminal.print_activity(activity)?;
            }
        }
    };

    // Whatever was published after the last wakeup.
    let snapshot = session.conversation();
    for piece in view.update(&snapshot) {
        terminal.print_piece(&piece)?;
    }
    terminal.print_citations(&view.citations(&snapshot))?;

    match joined {
        Ok(Ok(summary)) => {
            info!(message_id = %summary.message_id, events = summary.events, "turn rendered");
        }
        Ok(Err(_)) => {
            if let Some(report) = session.last_report() {
                match report.status {
                    TurnStatus::Failed { error } => terminal.print_error(&error.to_string())?,
                    TurnStatus::Cancelled => terminal.print_info("[cancelled]")?,
                    TurnStatus::Completed => {}
                }
            }
        }
        Err(e) => {
            error!(error = %e, "turn task failed");
            terminal.print_error(&format!("{:#}", e))?;
        }
    }
    Ok(())
}
