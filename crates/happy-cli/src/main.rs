//! `happy`: the local-side runtime bridging Codex to the backend and
//! mobile control app (§1, §6.1).

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod cli;
mod commands;
mod credentials;
mod error;
mod session_map;

use clap::Parser;
use happy_core::telemetry::{LogConfig, LogFormat, setup_logging};

use cli::{Cli, CodexCommands, Commands, DaemonCommands, SessionArgs};
use commands::start::CodexResume;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        None => commands::start::run(SessionArgs::default(), "codex", None).await,
        Some(Commands::Start(args)) => commands::start::run(args, "codex", None).await,
        Some(Commands::Codex { command, args }) => match command {
            None => commands::start::run(args, "codex", None).await,
            Some(CodexCommands::Resume { session_id, all }) => {
                commands::start::run(args, "codex", Some(CodexResume { session_id, all })).await
            }
        },
        Some(Commands::Daemon { command }) => match command {
            DaemonCommands::Start => commands::daemon::start().await,
            DaemonCommands::Stop => commands::daemon::stop().await,
            DaemonCommands::StartSync => commands::daemon::start_sync().await,
        },
        Some(Commands::Doctor { clean }) => commands::doctor::run(clean).await,
    };

    if let Err(err) = result {
        eprintln!("happy: {err}");
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose || happy_core::env::debug_enabled() { "debug" } else { "info" };
    let _ = setup_logging(&LogConfig::new(level).with_format(LogFormat::Compact));
}
