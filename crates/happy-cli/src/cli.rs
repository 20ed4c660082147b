//! Command-line surface (§6.1).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

/// Happy - local-side runtime bridging coding agents to the backend.
#[derive(Parser)]
#[command(name = "happy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose (debug-level) logging, overriding `RUST_LOG`.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Initial mode-loop surface a session supervisor starts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum StartingMode {
    /// Attach to the current TTY and drive the agent directly.
    #[default]
    Local,
    /// Drive the agent through the stdio driver, routed over the sync link.
    Remote,
}

/// Origin tag carried into session metadata for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum StartedByArg {
    /// Spawned by the daemon's `spawn-happy-session` path.
    Daemon,
    /// Started directly from a terminal.
    #[default]
    Terminal,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a session supervisor in the current working directory
    /// using the default agent flavor (same as no subcommand).
    Start(SessionArgs),

    /// Start a Codex-flavored session supervisor.
    Codex {
        #[command(subcommand)]
        command: Option<CodexCommands>,

        #[command(flatten)]
        args: SessionArgs,
    },

    /// Manage the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },

    /// Diagnostics and optional orphan-process cleanup.
    Doctor {
        /// Attempt a conservative cleanup of stale sessions/daemon state.
        #[arg(long)]
        clean: bool,
    },
}

#[derive(Subcommand)]
pub enum CodexCommands {
    /// Resume a prior Codex rollout.
    Resume {
        /// Specific session id to resume; omit to resume the most
        /// recently touched resumable rollout in this directory.
        session_id: Option<String>,

        /// List every resumable rollout under `CODEX_HOME`, not just ones
        /// matching the current working directory.
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
pub enum DaemonCommands {
    /// Spawn a detached daemon then exit immediately.
    Start,
    /// Request graceful shutdown of a running daemon.
    Stop,
    /// Run the daemon synchronously in the foreground.
    StartSync,
}

/// Flags shared by `start` and `codex` (§6.1 "flags consumed by the
/// session supervisor").
#[derive(Debug, Clone, Default, clap::Args)]
pub struct SessionArgs {
    /// Initial mode-loop surface.
    #[arg(long = "happy-starting-mode", value_enum, default_value = "local")]
    pub starting_mode: StartingMode,

    /// Origin tag for session metadata.
    #[arg(long, value_enum, default_value = "terminal")]
    pub started_by: StartedByArg,

    /// Working directory to run the session in; defaults to the process cwd.
    #[arg(long)]
    pub directory: Option<PathBuf>,

    /// Pre-decrypted bootstrap metadata, passed daemon -> CLI to avoid a
    /// network round trip (§10.5).
    #[arg(long)]
    pub metadata: Option<String>,

    /// Resume a specific backend session id instead of minting a new one.
    #[arg(long = "resume-session")]
    pub resume_session: Option<Uuid>,
}
