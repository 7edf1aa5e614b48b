//! Lock directories for agent sessions.
//!
//! A lock asserts that one session is running. The hook creates it on the
//! first lifecycle event; a background lock holder removes it when the agent
//! exits. Locks are keyed by session id, never by path, so any number of
//! sessions can be active in the same project.
//!
//! # Lock Directory Structure
//!
//! Location: `<root>/locks/{key}.lock/` where `{key}` is the session id when it
//! is filesystem-safe, else the MD5 of it.
//!
//! ```text
//! {key}.lock/
//! ├── pid          # Plain text: the agent process ID
//! └── meta.json    # { session_id, path, pid, proc_started, created_at }
//! ```
//!
//! # PID Verification
//!
//! Operating systems reuse PIDs. Locks record the agent's start time; if the
//! live process behind a pid started at a different time, the pid was recycled
//! and the lock is stale.
//!
//! # Path Matching
//!
//! Strictly exact (normalized). A lock at `/project/src` says nothing about
//! `/project`, and vice versa.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tempfile::NamedTempFile;

use crate::config::DEFAULT_LOCK_GRACE_SECS;
use crate::error::{Result, TetherError};
use crate::process::SharedProbe;

use super::path_utils::normalize_path_for_matching;
use super::types::LockRecord;

const LOCK_SUFFIX: &str = "lock";
const PID_FILE: &str = "pid";
const META_FILE: &str = "meta.json";

static SAFE_SESSION_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]{1,128}$").unwrap());

/// Computes the lock directory name for a session id.
fn lock_key(session_id: &str) -> String {
    if SAFE_SESSION_ID.is_match(session_id) {
        session_id.to_string()
    } else {
        format!("{:x}", md5::compute(session_id))
    }
}

/// A successfully created (or refreshed) lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub dir: PathBuf,
    pub record: LockRecord,
}

/// What a lock directory on disk currently says.
enum LockSlot {
    Missing,
    Readable(LockRecord),
    /// Exists but metadata is missing or corrupt. Carries the directory age.
    Unreadable(Duration),
}

pub struct LockStore {
    lock_dir: PathBuf,
    probe: SharedProbe,
    grace: Duration,
}

impl LockStore {
    pub fn new(lock_dir: PathBuf, probe: SharedProbe) -> Self {
        Self {
            lock_dir,
            probe,
            grace: Duration::from_secs(DEFAULT_LOCK_GRACE_SECS),
        }
    }

    /// Overrides how long an unreadable lock is assumed to be mid-creation.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    /// Lock directory path for a session (without checking if it exists).
    pub fn lock_path(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self
            .lock_dir
            .join(format!("{}.{}", lock_key(session_id), LOCK_SUFFIX)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Creation / release
    // ─────────────────────────────────────────────────────────────────────────

    /// Creates the lock for `session_id`, owned by agent process `pid`.
    ///
    /// - Same pid already holds it: metadata is refreshed.
    /// - A live foreign pid holds it: [`TetherError::LockHeld`].
    /// - The holder is dead: the lock is taken over.
    /// - Unreadable and younger than the grace window: [`TetherError::LockPending`].
    pub fn create_lock(&self, session_id: &str, path: &str, pid: u32) -> Result<LockHandle> {
        let dir = self.lock_path(session_id)?;
        fs_err::create_dir_all(&self.lock_dir)
            .map_err(|err| TetherError::io("create lock base directory", err))?;

        match fs_err::create_dir(&dir) {
            Ok(()) => self.write_fresh(&dir, session_id, path, pid, None),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                self.resolve_existing(&dir, session_id, path, pid)
            }
            Err(err) => Err(TetherError::io("create lock directory", err)),
        }
    }

    fn resolve_existing(
        &self,
        dir: &Path,
        session_id: &str,
        path: &str,
        pid: u32,
    ) -> Result<LockHandle> {
        match read_slot(dir) {
            LockSlot::Readable(existing) if existing.pid == pid => {
                tracing::debug!(session_id, pid, "Refreshing own lock");
                self.write_fresh(dir, session_id, path, pid, Some(existing.created_at))
            }
            LockSlot::Readable(existing) if self.is_record_live(&existing) => {
                Err(TetherError::LockHeld {
                    session_id: session_id.to_string(),
                    pid: existing.pid,
                })
            }
            LockSlot::Unreadable(age) if age < self.grace => Err(TetherError::LockPending {
                session_id: session_id.to_string(),
            }),
            LockSlot::Readable(_) | LockSlot::Unreadable(_) | LockSlot::Missing => {
                tracing::info!(session_id, pid, "Taking over stale lock");
                self.take_over(dir, session_id, path, pid)
            }
        }
    }

    /// Moves the stale directory aside before recreating it, then checks what
    /// was actually moved. A concurrent taker may have replaced the stale lock
    /// after we read it; such a lock is put back instead of being deleted.
    fn take_over(&self, dir: &Path, session_id: &str, path: &str, pid: u32) -> Result<LockHandle> {
        let aside = aside_path(dir, pid);
        match fs_err::rename(dir, &aside) {
            Ok(()) => self.discard_aside(dir, &aside, session_id, pid)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(TetherError::io("move stale lock directory", err)),
        }

        match fs_err::create_dir(dir) {
            Ok(()) => self.write_fresh(dir, session_id, path, pid, None),
            // Another writer won the race between our remove and create.
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => match read_slot(dir) {
                LockSlot::Readable(existing) if existing.pid == pid => Ok(LockHandle {
                    dir: dir.to_path_buf(),
                    record: existing,
                }),
                LockSlot::Readable(existing) => Err(TetherError::LockHeld {
                    session_id: session_id.to_string(),
                    pid: existing.pid,
                }),
                _ => Err(TetherError::LockPending {
                    session_id: session_id.to_string(),
                }),
            },
            Err(err) => Err(TetherError::io("recreate lock directory", err)),
        }
    }

    fn discard_aside(&self, dir: &Path, aside: &Path, session_id: &str, pid: u32) -> Result<()> {
        let contested = match read_slot(aside) {
            LockSlot::Readable(moved) if moved.pid != pid && self.is_record_live(&moved) => {
                Some(TetherError::LockHeld {
                    session_id: session_id.to_string(),
                    pid: moved.pid,
                })
            }
            LockSlot::Unreadable(age) if age < self.grace => Some(TetherError::LockPending {
                session_id: session_id.to_string(),
            }),
            _ => None,
        };

        match contested {
            Some(err) => {
                tracing::debug!(session_id, pid, "Lock changed hands during takeover, restoring");
                if let Err(restore) = fs_err::rename(aside, dir) {
                    tracing::warn!(error = %restore, lock = %dir.display(), "Failed to restore lock");
                    remove_lock_dir(aside)?;
                }
                Err(err)
            }
            None => remove_lock_dir(aside),
        }
    }

    fn write_fresh(
        &self,
        dir: &Path,
        session_id: &str,
        path: &str,
        pid: u32,
        created_at: Option<u64>,
    ) -> Result<LockHandle> {
        let record = LockRecord {
            session_id: session_id.to_string(),
            path: path.to_string(),
            pid,
            proc_started: self.probe.start_time(pid),
            created_at: created_at.unwrap_or_else(now_millis),
        };
        if let Err(err) = write_lock_metadata(dir, &record) {
            if created_at.is_none() {
                // Leave no half-written lock behind.
                let _ = fs_err::remove_dir_all(dir);
            }
            return Err(err);
        }
        Ok(LockHandle {
            dir: dir.to_path_buf(),
            record,
        })
    }

    /// Removes the lock unconditionally. Returns whether a lock existed.
    pub fn release_lock(&self, session_id: &str) -> Result<bool> {
        let dir = self.lock_path(session_id)?;
        if !dir.exists() {
            return Ok(false);
        }
        remove_lock_dir(&dir)?;
        Ok(true)
    }

    /// Removes the lock only if `pid` is its recorded holder.
    pub fn release_lock_if_owner(&self, session_id: &str, pid: u32) -> Result<bool> {
        let dir = self.lock_path(session_id)?;
        match read_slot(&dir) {
            LockSlot::Readable(record) if record.pid == pid => {
                remove_lock_dir(&dir)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn read_lock(&self, session_id: &str) -> Option<LockRecord> {
        let dir = self.lock_path(session_id).ok()?;
        match read_slot(&dir) {
            LockSlot::Readable(record) => Some(record),
            _ => None,
        }
    }

    /// Lock exists and its holder is alive (and not a recycled pid).
    pub fn is_live(&self, session_id: &str) -> bool {
        self.read_lock(session_id)
            .is_some_and(|record| self.is_record_live(&record))
    }

    pub fn is_record_live(&self, record: &LockRecord) -> bool {
        self.probe
            .is_alive_verified(record.pid, record.proc_started)
    }

    /// Every readable lock, live or not.
    pub fn all_locks(&self) -> Vec<LockRecord> {
        self.lock_dirs()
            .into_iter()
            .filter_map(|dir| match read_slot(&dir) {
                LockSlot::Readable(record) => Some(record),
                _ => None,
            })
            .collect()
    }

    /// Every readable lock whose owning path equals `path` (normalized).
    pub fn find_all_locks_for_path(&self, path: &str) -> Vec<LockRecord> {
        let target = normalize_path_for_matching(path);
        self.all_locks()
            .into_iter()
            .filter(|record| normalize_path_for_matching(&record.path) == target)
            .collect()
    }

    /// Like [`find_all_locks_for_path`](Self::find_all_locks_for_path), live only.
    pub fn find_live_locks_for_path(&self, path: &str) -> Vec<LockRecord> {
        self.find_all_locks_for_path(path)
            .into_iter()
            .filter(|record| self.is_record_live(record))
            .collect()
    }

    /// Removes locks with a dead holder, or unreadable past the grace window.
    pub fn cleanup_stale(&self) -> usize {
        let mut removed = 0;
        for dir in self.lock_dirs() {
            let stale = match read_slot(&dir) {
                LockSlot::Missing => false,
                LockSlot::Readable(record) => !self.is_record_live(&record),
                LockSlot::Unreadable(age) => age >= self.grace,
            };
            if !stale {
                continue;
            }
            match remove_lock_dir(&dir) {
                Ok(()) => {
                    tracing::debug!(lock = %dir.display(), "Removed stale lock");
                    removed += 1;
                }
                Err(err) => {
                    tracing::warn!(error = %err, lock = %dir.display(), "Failed to remove stale lock");
                }
            }
        }
        removed
    }

    fn lock_dirs(&self) -> Vec<PathBuf> {
        if !self.lock_dir.is_dir() {
            return Vec::new();
        }
        walkdir::WalkDir::new(&self.lock_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|ext| ext == LOCK_SUFFIX))
            .collect()
    }
}

fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.trim().is_empty() || session_id.contains('\0') {
        return Err(TetherError::InvalidSessionId(session_id.to_string()));
    }
    Ok(())
}

fn read_slot(dir: &Path) -> LockSlot {
    if !dir.is_dir() {
        return LockSlot::Missing;
    }
    match read_lock_record(dir) {
        Some(record) => LockSlot::Readable(record),
        None => LockSlot::Unreadable(dir_age(dir)),
    }
}

fn read_lock_record(dir: &Path) -> Option<LockRecord> {
    let content = fs_err::read_to_string(dir.join(META_FILE)).ok()?;
    serde_json::from_str::<LockRecord>(&content).ok()
}

fn dir_age(dir: &Path) -> Duration {
    fs_err::metadata(dir)
        .ok()
        .and_then(|meta| meta.modified().ok())
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .unwrap_or_default()
}

/// Writes `pid` and then `meta.json`; meta is replaced atomically.
fn write_lock_metadata(dir: &Path, record: &LockRecord) -> Result<()> {
    fs_err::write(dir.join(PID_FILE), record.pid.to_string())
        .map_err(|err| TetherError::io("write lock pid", err))?;

    let content = serde_json::to_string_pretty(record)
        .map_err(|err| TetherError::json("serialize lock metadata", err))?;
    let mut temp_file =
        NamedTempFile::new_in(dir).map_err(|err| TetherError::io("create lock temp file", err))?;
    temp_file
        .write_all(content.as_bytes())
        .map_err(|err| TetherError::io("write lock metadata", err))?;
    temp_file
        .persist(dir.join(META_FILE))
        .map_err(|err| TetherError::io("persist lock metadata", err.error))?;
    Ok(())
}

fn remove_lock_dir(dir: &Path) -> Result<()> {
    match fs_err::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(TetherError::io("remove lock directory", err)),
    }
}

/// Sibling of `dir` that scans ignore (its extension is not `lock`).
fn aside_path(dir: &Path, pid: u32) -> PathBuf {
    let mut name = dir.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    name.push(format!(".stale-{pid}-{}", now_millis()));
    dir.with_file_name(name)
}

fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}
