//! File-backed session record persistence (`<root>/sessions.json`).
//!
//! # File Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "sessions": {
//!     "session-abc": { ... SessionRecord fields ... }
//!   }
//! }
//! ```
//!
//! # Load Behavior
//!
//! Several processes write this file. Loading never fails:
//! - Missing or empty file: empty store
//! - Corrupt JSON: empty store, logged warning
//! - Version mismatch: empty store, logged warning
//!
//! Saves go through a temp file in the same directory plus rename, so readers
//! never observe a partial write.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{Result, TetherError};
use crate::process::ProcessProbe;

use super::path_utils::normalize_path_for_matching;
use super::types::SessionRecord;

pub const STORE_VERSION: u32 = 1;

/// The on-disk JSON structure for the session file.
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    sessions: HashMap<String, SessionRecord>,
}

/// In-memory copy of the session records, optionally backed by a file.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: HashMap<String, SessionRecord>,
    file_path: Option<PathBuf>,
}

impl SessionStore {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    pub fn new(file_path: &Path) -> Self {
        Self {
            sessions: HashMap::new(),
            file_path: Some(file_path.to_path_buf()),
        }
    }

    pub fn load(file_path: &Path) -> Self {
        let content = match fs_err::read_to_string(file_path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Self::new(file_path);
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    path = %file_path.display(),
                    "Failed to read session store, returning empty store"
                );
                return Self::new(file_path);
            }
        };

        if content.trim().is_empty() {
            return Self::new(file_path);
        }

        match serde_json::from_str::<StoreFile>(&content) {
            Ok(store_file) if store_file.version == STORE_VERSION => Self {
                sessions: store_file.sessions,
                file_path: Some(file_path.to_path_buf()),
            },
            Ok(store_file) => {
                tracing::warn!(
                    version = store_file.version,
                    expected = STORE_VERSION,
                    path = %file_path.display(),
                    "Unsupported session store version, returning empty store"
                );
                Self::new(file_path)
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    path = %file_path.display(),
                    "Failed to parse session store, returning empty store"
                );
                Self::new(file_path)
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let file_path = self.file_path.as_ref().ok_or_else(|| {
            TetherError::io(
                "save session store",
                std::io::Error::other("no file path set for in-memory store"),
            )
        })?;

        let store_file = StoreFile {
            version: STORE_VERSION,
            sessions: self.sessions.clone(),
        };
        let content = serde_json::to_string_pretty(&store_file)
            .map_err(|err| TetherError::json("serialize session store", err))?;

        write_atomically(file_path, content.as_bytes())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    pub fn upsert(&mut self, record: SessionRecord) {
        self.sessions.insert(record.session_id.clone(), record);
    }

    pub fn delete(&mut self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.remove(session_id)
    }

    /// Drops records whose pid is known and no longer alive. Returns the
    /// removed session ids.
    pub fn prune_dead(&mut self, probe: &dyn ProcessProbe) -> Vec<String> {
        let dead: Vec<String> = self
            .sessions
            .values()
            .filter(|record| record.pid.is_some_and(|pid| !probe.liveness(pid).is_alive()))
            .map(|record| record.session_id.clone())
            .collect();
        for session_id in &dead {
            self.sessions.remove(session_id);
        }
        dead
    }

    /// Drops records older than `threshold` that `is_backed` does not vouch
    /// for (typically: no live lock for the session).
    pub fn prune_stale<F>(&mut self, now: DateTime<Utc>, threshold: Duration, is_backed: F) -> Vec<String>
    where
        F: Fn(&SessionRecord) -> bool,
    {
        let stale: Vec<String> = self
            .sessions
            .values()
            .filter(|record| record.is_stale_at(now, threshold) && !is_backed(record))
            .map(|record| record.session_id.clone())
            .collect();
        for session_id in &stale {
            self.sessions.remove(session_id);
        }
        stale
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get(&self, session_id: &str) -> Option<&SessionRecord> {
        self.sessions.get(session_id)
    }

    pub fn all_records(&self) -> impl Iterator<Item = &SessionRecord> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn find_by_pid(&self, pid: u32) -> Vec<&SessionRecord> {
        let mut records: Vec<&SessionRecord> = self
            .sessions
            .values()
            .filter(|record| record.pid == Some(pid))
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        records
    }

    /// Most recently updated record whose owning path (or cwd) equals `path`.
    /// Ties go to the lexicographically larger session id.
    pub fn freshest_for_path(&self, path: &str) -> Option<&SessionRecord> {
        let target = normalize_path_for_matching(path);
        self.sessions
            .values()
            .filter(|record| {
                normalize_path_for_matching(&record.project_path) == target
                    || normalize_path_for_matching(&record.cwd) == target
            })
            .max_by(|a, b| {
                a.updated_at
                    .cmp(&b.updated_at)
                    .then_with(|| a.session_id.cmp(&b.session_id))
            })
    }
}

/// Temp file in the destination directory, then rename over the target.
pub(crate) fn write_atomically(file_path: &Path, content: &[u8]) -> Result<()> {
    let parent_dir = file_path.parent().ok_or_else(|| {
        TetherError::io(
            format!("{} has no parent directory", file_path.display()),
            std::io::Error::from(std::io::ErrorKind::InvalidInput),
        )
    })?;
    fs_err::create_dir_all(parent_dir)
        .map_err(|err| TetherError::io("create state directory", err))?;

    let mut temp_file = NamedTempFile::new_in(parent_dir)
        .map_err(|err| TetherError::io("create temp file", err))?;
    temp_file
        .write_all(content)
        .map_err(|err| TetherError::io("write temp file", err))?;
    temp_file
        .flush()
        .map_err(|err| TetherError::io("flush temp file", err))?;
    temp_file
        .persist(file_path)
        .map_err(|err| TetherError::io(format!("persist {}", file_path.display()), err.error))?;
    Ok(())
}
