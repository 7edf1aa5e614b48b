//! tether-hook: CLI hook handler for Tether session state tracking.
//!
//! Called by agent hooks (`handle`), by shell precmd hooks (`cwd`) and by
//! itself (`lock-holder`). The remaining subcommands are read-only queries and
//! maintenance for front ends and scripts; they print JSON to stdout.
//!
//! ## Subcommands
//!
//! - `handle`: Main hook handler, reads JSON from stdin
//! - `cwd`: Shell CWD tracking
//! - `lock-holder`: Background lock holder (spawned internally)
//! - `resolve`: Current state for a project path
//! - `activate`: Terminal activation decision for a project path
//! - `tick`: Auto-ready promotion and dead-session pruning
//! - `cleanup`: Startup cleanup of stale locks, records, shells and holders

mod cwd;
mod error;
mod handle;
mod lock_holder;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tether_core::{format_decision_trace, StorageConfig, TetherEngine, TmuxContext};

use crate::error::Result;

#[derive(Parser)]
#[command(name = "tether-hook")]
#[command(about = "Tether session state tracker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle a hook event (reads JSON from stdin)
    Handle,

    /// Report shell current working directory (called by shell precmd hooks)
    Cwd {
        /// Absolute path to current working directory
        #[arg(value_name = "PATH")]
        path: String,

        /// Shell process ID
        #[arg(value_name = "PID")]
        pid: u32,

        /// Terminal device path (e.g., /dev/ttys003)
        #[arg(value_name = "TTY")]
        tty: String,
    },

    /// Lock holder (spawned by the handle command)
    LockHolder {
        #[arg(long)]
        session_id: String,

        /// Project path the lock covers
        #[arg(long)]
        cwd: String,

        /// Agent process PID to monitor
        #[arg(long)]
        pid: u32,

        /// Lock directory path
        #[arg(long)]
        lock_dir: PathBuf,
    },

    /// Print the resolved state for a project path
    Resolve {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Print the activation decision for a project path
    Activate {
        #[arg(value_name = "PATH")]
        path: String,

        /// tmux session whose working directory is the project
        #[arg(long)]
        tmux_session: Option<String>,

        /// A tmux client is attached somewhere
        #[arg(long)]
        tmux_attached: bool,

        /// Also print the decision trace to stderr
        #[arg(long)]
        explain: bool,
    },

    /// Promote quiet sessions to ready and prune dead ones
    Tick,

    /// Remove stale locks, records, shells and orphaned lock holders
    Cleanup,
}

fn main() {
    let cli = Cli::parse();

    let engine = match StorageConfig::from_env() {
        Ok(storage) => TetherEngine::with_storage(storage),
        Err(e) => {
            eprintln!("tether-hook: {e}");
            // A broken environment must never break the shell prompt.
            let code = if matches!(cli.command, Commands::Cwd { .. }) { 0 } else { 1 };
            std::process::exit(code);
        }
    };
    let _logging_guard = logging::init(&engine.storage().logs_dir());

    match cli.command {
        Commands::Handle => {
            if let Err(e) = handle::run(&engine) {
                tracing::error!(error = %e, "tether-hook handle failed");
                std::process::exit(1);
            }
        }
        Commands::Cwd { path, pid, tty } => {
            if let Err(e) = cwd::run(&engine, &path, pid, &tty) {
                tracing::warn!(error = %e, "tether-hook cwd failed");
            }
        }
        Commands::LockHolder {
            session_id,
            cwd: cwd_path,
            pid,
            lock_dir,
        } => {
            let locks = engine.lock_store();
            lock_holder::run(
                &locks,
                engine.probe().as_ref(),
                &session_id,
                &cwd_path,
                pid,
                &lock_dir,
            );
        }
        Commands::Resolve { path } => exit_on_error("resolve", resolve(&engine, &path)),
        Commands::Activate {
            path,
            tmux_session,
            tmux_attached,
            explain,
        } => {
            let context = TmuxContext {
                session_at_path: tmux_session,
                has_attached_client: tmux_attached,
            };
            let decision = engine.activation(&path, &context);
            if explain {
                eprintln!("{}", format_decision_trace(&decision.trace));
            }
            exit_on_error("activate", print_json(&decision));
        }
        Commands::Tick => exit_on_error("tick", tick(&engine)),
        Commands::Cleanup => exit_on_error("cleanup", print_json(&engine.cleanup())),
    }
}

fn resolve(engine: &TetherEngine, path: &str) -> Result<()> {
    let state = engine.resolve(path)?;
    print_json(&state)
}

fn tick(engine: &TetherEngine) -> Result<()> {
    let stats = engine.tick()?;
    print_json(&stats)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_on_error(command: &str, result: Result<()>) {
    if let Err(e) = result {
        tracing::error!(error = %e, command, "tether-hook command failed");
        eprintln!("tether-hook {command}: {e}");
        std::process::exit(1);
    }
}
