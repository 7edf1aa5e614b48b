//! Shell working-directory registry (`<root>/shell-cwd.json`).
//!
//! Each interactive shell reports its cwd from a precmd hook. Reports are
//! keyed by shell pid, so concurrent reports from different shells touch
//! different entries; the file itself is replaced atomically. A report lost
//! to a concurrent write is repaired by that shell's next prompt.
//!
//! `is_live` is stored for diagnostics only. [`ShellCwdTracker::snapshot`]
//! recomputes it from the process probe every time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_protocol::{EventEnvelope, EventType};

use crate::error::{Result, TetherError};
use crate::process::SharedProbe;
use crate::state::path_utils::normalize_path_for_matching;
use crate::state::store::write_atomically;
use crate::types::ParentApp;

pub const SHELL_REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ShellEntry {
    pub pid: u32,
    pub cwd: String,
    pub tty: String,
    #[serde(default)]
    pub parent_app: ParentApp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_client_tty: Option<String>,
    #[serde(default)]
    pub is_live: bool,
    /// RFC3339. Kept as a string so a malformed value ranks last instead of
    /// failing the whole registry.
    pub updated_at: String,
}

impl ShellEntry {
    pub fn new(pid: u32, cwd: &str, tty: &str, parent_app: ParentApp, at: DateTime<Utc>) -> Self {
        Self {
            pid,
            cwd: normalize_path_for_matching(cwd),
            tty: tty.to_string(),
            parent_app,
            tmux_session: None,
            tmux_client_tty: None,
            is_live: true,
            updated_at: at.to_rfc3339(),
        }
    }

    pub fn from_event(event: &EventEnvelope) -> Result<Self> {
        if event.event_type != EventType::ShellCwd {
            return Err(tether_protocol::ErrorInfo::new(
                "invalid_event_type",
                format!("expected shell_cwd, got {}", event.event_type.as_str()),
            )
            .into());
        }
        event.validate()?;

        let (Some(pid), Some(cwd), Some(tty)) =
            (event.pid, event.cwd.as_deref(), event.tty.as_deref())
        else {
            return Err(tether_protocol::ErrorInfo::new(
                "missing_field",
                "pid, cwd and tty are required",
            )
            .into());
        };

        let parent_app = event
            .parent_app
            .as_deref()
            .map(ParentApp::from_identifier)
            .unwrap_or_default();
        let mut entry = Self::new(pid, cwd, tty, parent_app, Utc::now());
        entry.updated_at = event.recorded_at.clone();
        entry.tmux_session = event.tmux_session.clone().filter(|s| !s.is_empty());
        entry.tmux_client_tty = event.tmux_client_tty.clone().filter(|s| !s.is_empty());
        Ok(entry)
    }

    pub fn updated_at_utc(&self) -> Option<DateTime<Utc>> {
        tether_protocol::parse_rfc3339(&self.updated_at)
    }

    pub fn has_tmux(&self) -> bool {
        self.tmux_session.is_some() || self.parent_app == ParentApp::Tmux
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ShellRegistry {
    pub version: u32,
    #[serde(default)]
    pub shells: BTreeMap<String, ShellEntry>,
}

impl Default for ShellRegistry {
    fn default() -> Self {
        Self {
            version: SHELL_REGISTRY_VERSION,
            shells: BTreeMap::new(),
        }
    }
}

impl ShellRegistry {
    pub fn entries(&self) -> impl Iterator<Item = &ShellEntry> {
        self.shells.values()
    }

    pub fn insert(&mut self, entry: ShellEntry) {
        self.shells.insert(entry.pid.to_string(), entry);
    }
}

pub struct ShellCwdTracker {
    file: PathBuf,
    probe: SharedProbe,
}

impl ShellCwdTracker {
    pub fn new(file: PathBuf, probe: SharedProbe) -> Self {
        Self { file, probe }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Upserts one shell's report, drops dead shells, and saves.
    pub fn record(&self, entry: ShellEntry) -> Result<()> {
        let mut registry = load_registry(&self.file);
        registry.insert(entry);
        self.retain_live(&mut registry);
        save_registry(&self.file, &registry)
    }

    pub fn record_event(&self, event: &EventEnvelope) -> Result<()> {
        self.record(ShellEntry::from_event(event)?)
    }

    /// Current registry with `is_live` verified against the OS.
    pub fn snapshot(&self) -> ShellRegistry {
        let mut registry = load_registry(&self.file);
        for entry in registry.shells.values_mut() {
            entry.is_live = self.probe.liveness(entry.pid).is_alive();
        }
        registry
    }

    /// Removes entries whose pid is dead. Returns how many were removed.
    pub fn prune_dead(&self) -> Result<usize> {
        let mut registry = load_registry(&self.file);
        let before = registry.shells.len();
        self.retain_live(&mut registry);
        let removed = before - registry.shells.len();
        if removed > 0 {
            save_registry(&self.file, &registry)?;
        }
        Ok(removed)
    }

    fn retain_live(&self, registry: &mut ShellRegistry) {
        registry.shells.retain(|_, entry| {
            let alive = self.probe.liveness(entry.pid).is_alive();
            entry.is_live = alive;
            alive
        });
    }
}

pub fn load_registry(file: &Path) -> ShellRegistry {
    let content = match fs_err::read_to_string(file) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return ShellRegistry::default(),
        Err(err) => {
            tracing::warn!(error = %err, path = %file.display(), "Failed to read shell registry");
            return ShellRegistry::default();
        }
    };
    if content.trim().is_empty() {
        return ShellRegistry::default();
    }
    match serde_json::from_str::<ShellRegistry>(&content) {
        Ok(registry) if registry.version == SHELL_REGISTRY_VERSION => registry,
        Ok(registry) => {
            tracing::warn!(
                version = registry.version,
                path = %file.display(),
                "Unsupported shell registry version, starting empty"
            );
            ShellRegistry::default()
        }
        Err(err) => {
            tracing::warn!(error = %err, path = %file.display(), "Corrupt shell registry, starting empty");
            ShellRegistry::default()
        }
    }
}

fn save_registry(file: &Path, registry: &ShellRegistry) -> Result<()> {
    let content = serde_json::to_string_pretty(registry)
        .map_err(|err| TetherError::json("serialize shell registry", err))?;
    write_atomically(file, content.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::StaticProbe;
    use tempfile::tempdir;

    fn tracker(root: &Path, probe: StaticProbe) -> ShellCwdTracker {
        ShellCwdTracker::new(root.join("shell-cwd.json"), probe.into_shared())
    }

    #[test]
    fn record_then_snapshot() {
        let temp = tempdir().unwrap();
        let shells = tracker(temp.path(), StaticProbe::new().with_alive(10));
        shells
            .record(ShellEntry::new(10, "/repo/", "/dev/ttys001", ParentApp::Ghostty, Utc::now()))
            .unwrap();

        let snapshot = shells.snapshot();
        let entry = &snapshot.shells["10"];
        assert_eq!(entry.cwd, "/repo");
        assert!(entry.is_live);
    }

    #[test]
    fn recording_prunes_dead_shells() {
        let temp = tempdir().unwrap();
        let shells = tracker(temp.path(), StaticProbe::new().with_alive(10).with_alive(20));
        shells
            .record(ShellEntry::new(20, "/a", "/dev/ttys002", ParentApp::Unknown, Utc::now()))
            .unwrap();

        let after = tracker(temp.path(), StaticProbe::new().with_alive(10));
        after
            .record(ShellEntry::new(10, "/b", "/dev/ttys001", ParentApp::Unknown, Utc::now()))
            .unwrap();
        let snapshot = after.snapshot();
        assert_eq!(snapshot.shells.len(), 1);
        assert!(snapshot.shells.contains_key("10"));
    }

    #[test]
    fn snapshot_never_trusts_stored_liveness() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("shell-cwd.json");
        let mut registry = ShellRegistry::default();
        let mut entry = ShellEntry::new(30, "/a", "/dev/ttys003", ParentApp::Unknown, Utc::now());
        entry.is_live = true;
        registry.insert(entry);
        save_registry(&file, &registry).unwrap();

        let shells = ShellCwdTracker::new(file, StaticProbe::new().into_shared());
        assert!(!shells.snapshot().shells["30"].is_live);
        assert_eq!(shells.prune_dead().unwrap(), 1);
        assert!(shells.snapshot().shells.is_empty());
    }

    #[test]
    fn corrupt_registry_reads_empty() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("shell-cwd.json");
        std::fs::write(&file, "not json").unwrap();
        assert!(load_registry(&file).shells.is_empty());
    }

    #[test]
    fn entry_from_shell_cwd_event() {
        let event = EventEnvelope::shell_cwd(
            42,
            "/repo",
            "/dev/ttys004",
            Some("tmux"),
            Some("main".to_string()),
            Some("/dev/ttys000".to_string()),
            Utc::now(),
        );
        let entry = ShellEntry::from_event(&event).unwrap();
        assert_eq!(entry.parent_app, ParentApp::Tmux);
        assert_eq!(entry.tmux_session.as_deref(), Some("main"));
        assert!(entry.has_tmux());
        assert_eq!(entry.updated_at, event.recorded_at);
    }

    #[test]
    fn non_shell_event_is_rejected() {
        let event = EventEnvelope::new(EventType::SessionStart, Utc::now());
        assert!(matches!(
            ShellEntry::from_event(&event),
            Err(TetherError::InvalidEvent(_))
        ));
    }
}
