//! Shell CWD reporting for activation.
//!
//! Called by shell precmd hooks to report the current working directory.
//! The shell runs it in the background; failures are logged and the shell is
//! never disturbed.
//!
//! ```bash
//! tether-hook cwd /path/to/project 12345 /dev/ttys003
//! ```

use std::process::Command;

use chrono::Utc;
use tether_core::{EventEnvelope, ParentApp, TetherEngine};

use crate::error::Result;

pub fn run(engine: &TetherEngine, path: &str, pid: u32, tty: &str) -> Result<()> {
    let parent_app = detect_parent_app();
    let (tmux_session, tmux_client_tty) = if parent_app == ParentApp::Tmux {
        detect_tmux_context().map_or((None, None), |(s, t)| (Some(s), Some(t)))
    } else {
        (None, None)
    };

    let event = EventEnvelope::shell_cwd(
        pid,
        path,
        tty,
        Some(parent_app.as_str()),
        tmux_session,
        tmux_client_tty,
        Utc::now(),
    );
    engine.ingest(&event)?;
    tracing::debug!(pid, path, parent_app = parent_app.as_str(), "Recorded shell cwd");
    Ok(())
}

fn detect_parent_app() -> ParentApp {
    parent_app_from_env(
        std::env::var("TMUX").ok().as_deref(),
        std::env::var("TERM_PROGRAM").ok().as_deref(),
        std::env::var("TERM").ok().as_deref(),
    )
}

/// Multiplexer first, then `TERM_PROGRAM`, then `TERM` for terminals that
/// don't set `TERM_PROGRAM`.
fn parent_app_from_env(tmux: Option<&str>, term_program: Option<&str>, term: Option<&str>) -> ParentApp {
    if tmux.is_some() {
        return ParentApp::Tmux;
    }

    if let Some(app) = term_program
        .map(ParentApp::from_identifier)
        .filter(ParentApp::is_known)
    {
        return app;
    }

    let term = term.map(str::to_lowercase).unwrap_or_default();
    if term.contains("kitty") {
        ParentApp::Kitty
    } else if term.contains("alacritty") {
        ParentApp::Alacritty
    } else {
        ParentApp::Unknown
    }
}

/// `(session name, client tty)` of the tmux client this shell runs under.
pub fn detect_tmux_context() -> Option<(String, String)> {
    std::env::var_os("TMUX")?;
    let session = tmux_display("#S")?;
    let client_tty = tmux_display("#{client_tty}")?;
    Some((session, client_tty))
}

pub(crate) fn tmux_display(format: &str) -> Option<String> {
    let output = Command::new("tmux")
        .args(["display-message", "-p", format])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}
