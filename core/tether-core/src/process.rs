//! Process liveness and identity checks.
//!
//! Everything that asks the OS about a pid goes through [`ProcessProbe`] so the
//! lock store, the session store, and the shell registry can be exercised
//! deterministically with [`StaticProbe`].

use std::collections::HashMap;
use std::sync::Arc;

use sysinfo::{Pid, ProcessRefreshKind, System};

/// Start times may differ slightly between the value recorded by the hook and
/// the one sysinfo reports later.
pub const START_TIME_TOLERANCE_SECS: u64 = 2;

/// Result of a non-destructive liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
    /// The process exists but we may not signal it (EPERM). Treated as alive.
    Unknown,
}

impl Liveness {
    pub fn is_alive(self) -> bool {
        !matches!(self, Liveness::Dead)
    }
}

pub trait ProcessProbe: Send + Sync {
    fn liveness(&self, pid: u32) -> Liveness;

    /// Process start time as a Unix timestamp in seconds.
    fn start_time(&self, pid: u32) -> Option<u64>;

    /// Alive, and (when `expected_start` is known) still the same process.
    ///
    /// A recycled pid shows up as a start-time mismatch and counts as dead.
    /// When the start time cannot be read (permission-restricted processes)
    /// the liveness answer stands.
    fn is_alive_verified(&self, pid: u32, expected_start: Option<u64>) -> bool {
        if pid == 0 || !self.liveness(pid).is_alive() {
            return false;
        }
        match (expected_start, self.start_time(pid)) {
            (Some(expected), Some(actual)) => {
                actual.abs_diff(expected) <= START_TIME_TOLERANCE_SECS
            }
            _ => true,
        }
    }
}

pub type SharedProbe = Arc<dyn ProcessProbe>;

/// Probe backed by `kill(pid, 0)` and sysinfo.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl SystemProbe {
    pub fn shared() -> SharedProbe {
        Arc::new(SystemProbe)
    }
}

impl ProcessProbe for SystemProbe {
    fn liveness(&self, pid: u32) -> Liveness {
        signal_probe(pid)
    }

    fn start_time(&self, pid: u32) -> Option<u64> {
        get_process_start_time(pid)
    }
}

#[cfg(unix)]
fn signal_probe(pid: u32) -> Liveness {
    let Ok(raw) = i32::try_from(pid) else {
        return Liveness::Dead;
    };
    if raw <= 0 {
        return Liveness::Dead;
    }
    // SAFETY: signal 0 performs permission and existence checks only.
    let result = unsafe { libc::kill(raw, 0) };
    if result == 0 {
        return Liveness::Alive;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(code) if code == libc::EPERM => Liveness::Unknown,
        _ => Liveness::Dead,
    }
}

#[cfg(not(unix))]
fn signal_probe(pid: u32) -> Liveness {
    if get_process_start_time(pid).is_some() {
        Liveness::Alive
    } else {
        Liveness::Dead
    }
}

/// Per-pid refresh, O(1) rather than a full process scan.
pub fn get_process_start_time(pid: u32) -> Option<u64> {
    let mut sys = System::new();
    let sys_pid = Pid::from(pid as usize);
    sys.refresh_process_specifics(sys_pid, ProcessRefreshKind::new());
    sys.process(sys_pid).map(|process| process.start_time())
}

/// Deterministic probe for tests and dry runs. Unlisted pids are dead.
#[derive(Debug, Default, Clone)]
pub struct StaticProbe {
    processes: HashMap<u32, (Liveness, Option<u64>)>,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alive(mut self, pid: u32) -> Self {
        self.processes.insert(pid, (Liveness::Alive, None));
        self
    }

    pub fn with_started(mut self, pid: u32, started: u64) -> Self {
        self.processes.insert(pid, (Liveness::Alive, Some(started)));
        self
    }

    pub fn with_unknown(mut self, pid: u32) -> Self {
        self.processes.insert(pid, (Liveness::Unknown, None));
        self
    }

    pub fn into_shared(self) -> SharedProbe {
        Arc::new(self)
    }
}

impl ProcessProbe for StaticProbe {
    fn liveness(&self, pid: u32) -> Liveness {
        self.processes
            .get(&pid)
            .map(|(liveness, _)| *liveness)
            .unwrap_or(Liveness::Dead)
    }

    fn start_time(&self, pid: u32) -> Option<u64> {
        self.processes.get(&pid).and_then(|(_, started)| *started)
    }
}
