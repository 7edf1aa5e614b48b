//! Lock holder for one agent session.
//!
//! Spawned detached by `handle` when an event creates a session lock. It polls
//! the agent pid once per second and removes the lock when the agent exits.
//!
//! ## Lifecycle
//!
//! 1. Spawned after `SessionStart`/`UserPromptSubmit` created a lock
//! 2. Polls the agent pid (start-time verified, so a recycled pid counts as exited)
//! 3. Exits quietly if the lock directory vanishes or another pid takes it over
//! 4. When the agent exits: releases the lock if it is still ours

use std::path::Path;
use std::thread;
use std::time::Duration;

use tether_core::{LockStore, ProcessProbe};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Why a holder stopped watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderExit {
    AgentExited { released: bool },
    LockRemoved,
    TakenOver { pid: u32 },
}

pub fn run(
    locks: &LockStore,
    probe: &dyn ProcessProbe,
    session_id: &str,
    cwd: &str,
    pid: u32,
    lock_dir: &Path,
) -> HolderExit {
    let exit = watch(locks, probe, session_id, pid, lock_dir, POLL_INTERVAL);
    match exit {
        HolderExit::AgentExited { released } => {
            tracing::info!(session_id, pid, cwd, released, "Agent exited, lock released")
        }
        HolderExit::LockRemoved => {
            tracing::info!(session_id, pid, cwd, "Lock directory removed externally")
        }
        HolderExit::TakenOver { pid: new_pid } => {
            tracing::info!(session_id, pid, new_pid, cwd, "Lock taken over by another process")
        }
    }
    exit
}

pub(crate) fn watch(
    locks: &LockStore,
    probe: &dyn ProcessProbe,
    session_id: &str,
    pid: u32,
    lock_dir: &Path,
    poll: Duration,
) -> HolderExit {
    let expected_start = locks
        .read_lock(session_id)
        .filter(|record| record.pid == pid)
        .and_then(|record| record.proc_started);

    while probe.is_alive_verified(pid, expected_start) {
        if !lock_dir.exists() {
            return HolderExit::LockRemoved;
        }
        if let Some(holder) = read_lock_pid(lock_dir) {
            if holder != pid {
                return HolderExit::TakenOver { pid: holder };
            }
        }
        thread::sleep(poll);
    }

    let released = match locks.release_lock_if_owner(session_id, pid) {
        Ok(released) => released,
        Err(err) => {
            tracing::warn!(error = %err, session_id, pid, "Failed to release lock");
            false
        }
    };
    HolderExit::AgentExited { released }
}

fn read_lock_pid(lock_dir: &Path) -> Option<u32> {
    let contents = fs_err::read_to_string(lock_dir.join("pid")).ok()?;
    contents.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tether_core::StaticProbe;

    const AGENT: u32 = 4242;

    fn store(temp: &TempDir, probe: &StaticProbe) -> LockStore {
        LockStore::new(temp.path().join("locks"), probe.clone().into_shared())
    }

    #[test]
    fn releases_lock_once_agent_is_gone() {
        let temp = TempDir::new().unwrap();
        let alive = StaticProbe::new().with_alive(AGENT);
        let handle = store(&temp, &alive)
            .create_lock("s", "/nowhere/app", AGENT)
            .unwrap();

        let dead = StaticProbe::new();
        let locks = store(&temp, &dead);
        let exit = watch(&locks, &dead, "s", AGENT, &handle.dir, Duration::ZERO);

        assert_eq!(exit, HolderExit::AgentExited { released: true });
        assert!(!handle.dir.exists());
    }

    #[test]
    fn stops_when_lock_directory_disappears() {
        let temp = TempDir::new().unwrap();
        let probe = StaticProbe::new().with_alive(AGENT);
        let locks = store(&temp, &probe);
        let handle = locks.create_lock("s", "/nowhere/app", AGENT).unwrap();
        locks.release_lock("s").unwrap();

        let exit = watch(&locks, &probe, "s", AGENT, &handle.dir, Duration::ZERO);
        assert_eq!(exit, HolderExit::LockRemoved);
    }

    #[test]
    fn stops_when_another_pid_owns_the_lock() {
        let temp = TempDir::new().unwrap();
        let probe = StaticProbe::new().with_alive(AGENT);
        let locks = store(&temp, &probe);
        let handle = locks.create_lock("s", "/nowhere/app", AGENT).unwrap();
        fs_err::write(handle.dir.join("pid"), "777").unwrap();

        let exit = watch(&locks, &probe, "s", AGENT, &handle.dir, Duration::ZERO);
        assert_eq!(exit, HolderExit::TakenOver { pid: 777 });
        assert!(handle.dir.exists());
    }
}
