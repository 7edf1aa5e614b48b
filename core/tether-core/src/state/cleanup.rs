//! Cleanup of orphaned state.
//!
//! Runs on startup and on `tether-hook cleanup`. Every step is best effort:
//! failures are logged and recorded in [`CleanupStats::errors`], and whatever
//! is left over is picked up by the next pass.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sysinfo::{ProcessRefreshKind, System, UpdateKind};

use crate::process::ProcessProbe;
use crate::shell::ShellCwdTracker;

use super::lock::LockStore;
use super::store::SessionStore;

/// Binary name that lock-holder processes run under.
pub const HOOK_BINARY_NAME: &str = "tether-hook";
pub const LOCK_HOLDER_SUBCOMMAND: &str = "lock-holder";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupStats {
    /// Lock directories removed (dead holder, or unreadable past grace).
    pub locks_removed: u32,
    /// Session records removed because their agent pid is dead.
    pub dead_sessions_removed: u32,
    /// Stale session records removed that had no live lock behind them.
    pub stale_sessions_removed: u32,
    /// Shell registry entries removed (dead shell pid).
    pub shells_removed: u32,
    /// Lock-holder processes signalled because their monitored pid is dead.
    pub orphaned_processes_killed: u32,
    pub errors: Vec<String>,
}

impl CleanupStats {
    pub fn total_removed(&self) -> u32 {
        self.locks_removed
            + self.dead_sessions_removed
            + self.stale_sessions_removed
            + self.shells_removed
            + self.orphaned_processes_killed
    }
}

/// Everything except the process scan. Order matters: locks go first so that
/// the stale-record pass sees the surviving set.
pub fn cleanup_state(
    locks: &LockStore,
    store: &mut SessionStore,
    shells: &ShellCwdTracker,
    probe: &dyn ProcessProbe,
    stale_threshold: Duration,
    now: DateTime<Utc>,
) -> CleanupStats {
    let mut stats = CleanupStats {
        locks_removed: locks.cleanup_stale() as u32,
        ..CleanupStats::default()
    };

    let dead = store.prune_dead(probe);
    let stale = store.prune_stale(now, stale_threshold, |record| {
        locks
            .read_lock(&record.session_id)
            .is_some_and(|lock| locks.is_record_live(&lock))
    });
    stats.dead_sessions_removed = dead.len() as u32;
    stats.stale_sessions_removed = stale.len() as u32;

    if !dead.is_empty() || !stale.is_empty() {
        if let Err(err) = store.save() {
            tracing::warn!(error = %err, "Failed to save session store after cleanup");
            stats.errors.push(format!("save session store: {err}"));
        }
    }

    match shells.prune_dead() {
        Ok(removed) => stats.shells_removed = removed as u32,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to prune shell registry");
            stats.errors.push(format!("prune shell registry: {err}"));
        }
    }

    stats
}

/// Signals lock-holder processes whose monitored pid is dead.
///
/// Holders run as `tether-hook lock-holder ... --pid <PID> ...`. A holder
/// whose command line has no parseable `--pid` is left alone, as is one whose
/// monitored process is still alive.
pub fn cleanup_orphaned_lock_holders(probe: &dyn ProcessProbe) -> CleanupStats {
    let mut stats = CleanupStats::default();

    let mut sys = System::new();
    sys.refresh_processes_specifics(ProcessRefreshKind::new().with_cmd(UpdateKind::Always));

    let own_pid = std::process::id();
    for (pid, process) in sys.processes() {
        let cmd = process.cmd();
        if pid.as_u32() == own_pid || !is_lock_holder_command(cmd) {
            continue;
        }
        let Some(monitored) = parse_monitored_pid(cmd) else {
            continue;
        };
        if probe.liveness(monitored).is_alive() {
            continue;
        }

        match terminate(pid.as_u32()) {
            Ok(()) => {
                tracing::info!(holder = pid.as_u32(), monitored, "Terminated orphaned lock holder");
                stats.orphaned_processes_killed += 1;
            }
            Err(err) if err.raw_os_error() == Some(libc::ESRCH) => {}
            Err(err) => {
                tracing::warn!(error = %err, holder = pid.as_u32(), "Failed to terminate lock holder");
                stats.errors.push(format!(
                    "Failed to kill orphaned lock-holder PID {}: {}",
                    pid.as_u32(),
                    err
                ));
            }
        }
    }

    stats
}

/// Full pass: state files, then orphaned holder processes.
pub fn run_startup_cleanup(
    locks: &LockStore,
    store: &mut SessionStore,
    shells: &ShellCwdTracker,
    probe: &dyn ProcessProbe,
    stale_threshold: Duration,
) -> CleanupStats {
    let mut stats = cleanup_state(locks, store, shells, probe, stale_threshold, Utc::now());
    let process_stats = cleanup_orphaned_lock_holders(probe);
    stats.orphaned_processes_killed = process_stats.orphaned_processes_killed;
    stats.errors.extend(process_stats.errors);

    if stats.total_removed() > 0 {
        tracing::info!(
            locks = stats.locks_removed,
            dead_sessions = stats.dead_sessions_removed,
            stale_sessions = stats.stale_sessions_removed,
            shells = stats.shells_removed,
            holders = stats.orphaned_processes_killed,
            "Cleanup removed orphaned state"
        );
    }
    stats
}

fn is_lock_holder_command(cmd: &[String]) -> bool {
    cmd.iter().any(|arg| arg.contains(HOOK_BINARY_NAME))
        && cmd.iter().any(|arg| arg == LOCK_HOLDER_SUBCOMMAND)
}

/// Accepts both `--pid 123` and `--pid=123`.
fn parse_monitored_pid(cmd: &[String]) -> Option<u32> {
    let mut args = cmd.iter();
    while let Some(arg) = args.next() {
        if arg == "--pid" {
            return args.next().and_then(|value| value.parse().ok());
        }
        if let Some(value) = arg.strip_prefix("--pid=") {
            return value.parse().ok();
        }
    }
    None
}

#[cfg(unix)]
fn terminate(pid: u32) -> std::io::Result<()> {
    let raw = i32::try_from(pid)
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    // SAFETY: SIGTERM delivery to a pid taken from the process table. A pid
    // that has exited since the scan yields ESRCH.
    let result = unsafe { libc::kill(raw, libc::SIGTERM) };
    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
}
