//! Terminal activation resolution.
//!
//! Pure decision logic: given the shell registry and the multiplexer context,
//! decide which high-level action a front end should take to bring the right
//! terminal forward for a project. Nothing here spawns processes or talks to
//! window servers.
//!
//! ```text
//! shell-cwd.json ──► collect_candidates ──► select ──► resolve_for_shell
//!                                              │
//!                      tmux context ───────────┴──► ActivationDecision
//! ```
//!
//! Every decision carries a primary and a fallback action. Without a live
//! candidate the fallback is always a new terminal at the target path.

pub mod policy;
pub mod trace;

use serde::Serialize;

use crate::shell::{ShellEntry, ShellRegistry};
use crate::state::path_utils::is_resolvable_path;
use crate::types::ParentApp;

pub use policy::{Candidate, PathMatch, Rule, SelectionOutcome, SelectionPolicy};
pub use trace::{format_decision_trace, CandidateTrace, DecisionTrace};

/// Multiplexer state, queried by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TmuxContext {
    /// Session name if one exists at the project path
    pub session_at_path: Option<String>,
    /// Whether any tmux client is currently attached
    pub has_attached_client: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationDecision {
    pub primary: ActivationAction,
    pub fallback: ActivationAction,
    pub reason: String,
    pub trace: DecisionTrace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActivationAction {
    /// Select the tab owning a TTY
    ActivateByTty {
        tty: String,
        terminal_type: TerminalType,
    },

    /// Bring an application's window to the front
    ActivateApp { app_name: String },

    /// Focus a kitty window by shell pid
    ActivateKittyWindow { shell_pid: u32 },

    /// Activate an IDE and focus the window for a folder
    ActivateIdeWindow {
        ide_type: IdeType,
        project_path: String,
    },

    /// Switch the attached tmux client to a session
    SwitchTmuxSession { session_name: String },

    /// Activate the terminal hosting the tmux client, then switch session
    ActivateHostThenSwitchTmux {
        host_tty: String,
        session_name: String,
    },

    /// Open a new terminal attached to a tmux session
    LaunchTerminalWithTmux {
        session_name: String,
        project_path: String,
    },

    /// Open a new terminal at the project path
    LaunchNewTerminal {
        project_path: String,
        project_name: String,
    },

    /// Activate the first running terminal from a priority list
    ActivatePriorityFallback,

    Skip,
}

/// Terminals addressed by TTY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalType {
    ITerm,
    TerminalApp,
    Ghostty,
    Alacritty,
    Kitty,
    Warp,
    Unknown,
}

impl From<ParentApp> for TerminalType {
    fn from(app: ParentApp) -> Self {
        match app {
            ParentApp::ITerm => Self::ITerm,
            ParentApp::Terminal => Self::TerminalApp,
            ParentApp::Ghostty => Self::Ghostty,
            ParentApp::Alacritty => Self::Alacritty,
            ParentApp::Kitty => Self::Kitty,
            ParentApp::Warp => Self::Warp,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdeType {
    Cursor,
    VsCode,
    VsCodeInsiders,
    Zed,
}

impl TryFrom<ParentApp> for IdeType {
    type Error = ();

    fn try_from(app: ParentApp) -> Result<Self, Self::Error> {
        match app {
            ParentApp::Cursor => Ok(Self::Cursor),
            ParentApp::VSCode => Ok(Self::VsCode),
            ParentApp::VSCodeInsiders => Ok(Self::VsCodeInsiders),
            ParentApp::Zed => Ok(Self::Zed),
            _ => Err(()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resolution Logic
// ═══════════════════════════════════════════════════════════════════════════════

/// Decides how to activate a terminal for `project_path`.
///
/// `registry` should come from [`crate::shell::ShellCwdTracker::snapshot`] so
/// that `is_live` reflects the OS rather than the last write. `home_dir` is
/// excluded from parent matching.
pub fn resolve_activation(
    project_path: &str,
    registry: &ShellRegistry,
    tmux_context: &TmuxContext,
    home_dir: Option<&str>,
) -> ActivationDecision {
    let policy = SelectionPolicy::new(tmux_context.has_attached_client);

    if !is_resolvable_path(project_path) {
        return ActivationDecision {
            primary: ActivationAction::Skip,
            fallback: ActivationAction::Skip,
            reason: format!("Path {:?} is not resolvable", project_path),
            trace: DecisionTrace::empty(&policy),
        };
    }

    let target = match project_path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    let outcome = policy::select(
        policy::collect_candidates(registry, target, home_dir),
        &policy,
    );
    let trace = DecisionTrace::from_outcome(&policy, &outcome);

    let (primary, fallback, reason) = match outcome.winner.as_ref().filter(|c| c.is_live) {
        Some(winner) => resolve_for_shell(winner, tmux_context, target),
        None => resolve_without_shell(tmux_context, target, outcome.ordered.len()),
    };

    tracing::debug!(
        path = %target,
        selected_pid = ?trace.selected_pid,
        decided_by = ?trace.decided_by,
        reason = %reason,
        "Resolved activation"
    );

    ActivationDecision {
        primary,
        fallback,
        reason,
        trace,
    }
}

fn resolve_for_shell(
    candidate: &Candidate<'_>,
    tmux_context: &TmuxContext,
    project_path: &str,
) -> (ActivationAction, ActivationAction, String) {
    let shell = candidate.shell;
    let pid = candidate.pid;
    let parent_app = shell.parent_app;
    let tmux_session = shell.tmux_session.clone();

    if let Ok(ide_type) = IdeType::try_from(parent_app) {
        let fallback = match &tmux_session {
            Some(session_name) => ActivationAction::SwitchTmuxSession {
                session_name: session_name.clone(),
            },
            None => ActivationAction::ActivateApp {
                app_name: parent_app.display_name().to_string(),
            },
        };
        return (
            ActivationAction::ActivateIdeWindow {
                ide_type,
                project_path: shell.cwd.clone(),
            },
            fallback,
            format!("Found shell (pid={}) in IDE {}", pid, parent_app.display_name()),
        );
    }

    if let Some(session_name) = tmux_session {
        // A detached session's client TTY is stale; attach from a new window.
        if !tmux_context.has_attached_client {
            return (
                ActivationAction::LaunchTerminalWithTmux {
                    session_name: session_name.clone(),
                    project_path: project_path.to_string(),
                },
                launch_new_terminal(project_path),
                format!(
                    "Found shell (pid={}) in tmux session '{}' but no client attached",
                    pid, session_name
                ),
            );
        }

        let host_tty = shell
            .tmux_client_tty
            .clone()
            .unwrap_or_else(|| shell.tty.clone());
        let reason = format!("Found shell (pid={}) in tmux session '{}'", pid, session_name);
        return (
            ActivationAction::ActivateHostThenSwitchTmux {
                host_tty,
                session_name,
            },
            ActivationAction::ActivatePriorityFallback,
            reason,
        );
    }

    match parent_app {
        ParentApp::Kitty => (
            ActivationAction::ActivateKittyWindow { shell_pid: pid },
            activate_app(parent_app),
            format!("Found shell (pid={}) in kitty", pid),
        ),
        ParentApp::ITerm | ParentApp::Terminal => (
            by_tty(shell, TerminalType::from(parent_app)),
            activate_app(parent_app),
            format!(
                "Found shell (pid={}) in {}, using TTY lookup",
                pid,
                parent_app.display_name()
            ),
        ),
        app if app.is_terminal() => (
            activate_app(app),
            launch_new_terminal(project_path),
            format!(
                "Found shell (pid={}) in {}, activating app (no tab selection)",
                pid,
                app.display_name()
            ),
        ),
        _ => (
            by_tty(shell, TerminalType::Unknown),
            ActivationAction::ActivatePriorityFallback,
            format!("Found shell (pid={}) with unknown parent, trying TTY discovery", pid),
        ),
    }
}

fn resolve_without_shell(
    tmux_context: &TmuxContext,
    project_path: &str,
    dead_candidates: usize,
) -> (ActivationAction, ActivationAction, String) {
    let note = if dead_candidates > 0 {
        format!(" ({} dead shell(s) ignored)", dead_candidates)
    } else {
        String::new()
    };

    match &tmux_context.session_at_path {
        Some(session_name) if tmux_context.has_attached_client => (
            ActivationAction::SwitchTmuxSession {
                session_name: session_name.clone(),
            },
            launch_new_terminal(project_path),
            format!("Tmux session '{}' exists with attached client{}", session_name, note),
        ),
        Some(session_name) => (
            ActivationAction::LaunchTerminalWithTmux {
                session_name: session_name.clone(),
                project_path: project_path.to_string(),
            },
            launch_new_terminal(project_path),
            format!(
                "Tmux session '{}' exists but no client attached{}",
                session_name, note
            ),
        ),
        None => (
            launch_new_terminal(project_path),
            launch_new_terminal(project_path),
            format!("No live shell or tmux session found{}", note),
        ),
    }
}

fn by_tty(shell: &ShellEntry, terminal_type: TerminalType) -> ActivationAction {
    ActivationAction::ActivateByTty {
        tty: shell.tty.clone(),
        terminal_type,
    }
}

fn activate_app(app: ParentApp) -> ActivationAction {
    ActivationAction::ActivateApp {
        app_name: app.display_name().to_string(),
    }
}

fn launch_new_terminal(project_path: &str) -> ActivationAction {
    let project_name = project_path
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(project_path)
        .to_string();
    ActivationAction::LaunchNewTerminal {
        project_path: project_path.to_string(),
        project_name,
    }
}
