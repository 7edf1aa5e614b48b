//! Event handler for agent hooks.
//!
//! Reads one JSON payload from stdin, turns it into an event envelope and
//! hands it to the engine.
//!
//! ## State Machine
//!
//! ```text
//! SessionStart           → ready    (unless mid-turn)
//! UserPromptSubmit       → working
//! PreToolUse/PostToolUse → working  (heartbeat if already working)
//! PermissionRequest      → waiting
//! Notification           → ready    (idle_prompt only)
//! PreCompact             → compacting
//! Stop                   → ready    (unless stop_hook_active=true)
//! SessionEnd             → removes session record and lock
//! ```

use std::env;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};

use chrono::Utc;
use tether_core::{IngestReport, LockHandle, TetherEngine};
use tether_protocol::HookInput;

use crate::error::{HookError, Result};

/// Set by tools that run the agent as a subprocess (summaries, titles) and
/// don't want those runs tracked.
const SKIP_ENV: &str = "TETHER_SKIP_HOOKS";
const PROJECT_DIR_ENV: &str = "CLAUDE_PROJECT_DIR";

pub fn run(engine: &TetherEngine) -> Result<()> {
    if env::var(SKIP_ENV).is_ok_and(|v| v == "1") {
        let _ = io::stdin().read_to_end(&mut Vec::new());
        return Ok(());
    }

    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .map_err(HookError::Stdin)?;

    if input.trim().is_empty() {
        return Ok(());
    }

    let hook_input: HookInput = serde_json::from_str(&input)?;
    let fallback_cwd = env::var(PROJECT_DIR_ENV).ok();

    if let Some(report) = handle_input(engine, hook_input, get_ppid(), fallback_cwd.as_deref())? {
        if let Some(lock) = report.new_lock {
            spawn_lock_holder(&lock)?;
        }
        if let Some(lock) = report.moved_lock {
            tracing::info!(
                session_id = %lock.record.session_id,
                path = %lock.record.path,
                "Lock moved; existing holder keeps watching"
            );
        }
    }
    Ok(())
}

/// Applies one hook payload. `Ok(None)` means the payload was not a usable
/// event (missing session id, unknown hook) and was dropped.
pub(crate) fn handle_input(
    engine: &TetherEngine,
    input: HookInput,
    agent_pid: Option<u32>,
    fallback_cwd: Option<&str>,
) -> Result<Option<IngestReport>> {
    let hook_name = input.hook_event_name.clone();
    let envelope = match input.into_envelope(agent_pid, fallback_cwd, Utc::now()) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::debug!(
                event = ?hook_name,
                code = %err.code,
                message = %err.message,
                "Skipping hook payload"
            );
            return Ok(None);
        }
    };

    let report = engine.ingest(&envelope)?;
    tracing::debug!(
        event = ?hook_name,
        session = ?envelope.session_id,
        outcome = ?report.outcome,
        "Hook event applied"
    );
    Ok(Some(report))
}

fn spawn_lock_holder(lock: &LockHandle) -> Result<()> {
    let exe = env::current_exe().map_err(HookError::Spawn)?;
    spawn_detached(&exe, lock)?;
    tracing::debug!(
        session = %lock.record.session_id,
        pid = lock.record.pid,
        "Spawned lock holder"
    );
    Ok(())
}

fn spawn_detached(exe: &Path, lock: &LockHandle) -> Result<()> {
    Command::new(exe)
        .arg("lock-holder")
        .arg("--session-id")
        .arg(&lock.record.session_id)
        .arg("--cwd")
        .arg(&lock.record.path)
        .arg("--pid")
        .arg(lock.record.pid.to_string())
        .arg("--lock-dir")
        .arg(&lock.dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(drop)
        .map_err(HookError::Spawn)
}

/// The agent process is the parent of the hook.
fn get_ppid() -> Option<u32> {
    #[cfg(unix)]
    {
        // SAFETY: getppid has no preconditions and cannot fail.
        let ppid = unsafe { libc::getppid() };
        u32::try_from(ppid).ok().filter(|pid| *pid > 1)
    }
    #[cfg(not(unix))]
    {
        None
    }
}
