//! TetherEngine - the entry point for hooks and front ends.
//!
//! The engine owns nothing but paths, tunables and a process probe. Every
//! call re-reads the files it needs, so any number of engines in different
//! processes can operate on the same storage root.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use tether_core::TetherEngine;
//!
//! let engine = TetherEngine::new()?;
//! let state = engine.resolve("/Users/pete/Code/app")?;
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use tether_protocol::{EventEnvelope, EventType};

use crate::activation::{resolve_activation, ActivationDecision, TmuxContext};
use crate::config::TetherConfig;
use crate::error::{Result, TetherError};
use crate::process::{SharedProbe, SystemProbe};
use crate::shell::{ShellCwdTracker, ShellRegistry};
use crate::state::path_utils::normalize_path_for_matching;
use crate::state::reducer::{apply_auto_ready, reduce_session_with};
use crate::state::{
    run_startup_cleanup, CleanupStats, LockHandle, LockStore, ResolvedState, SessionStore,
    SessionUpdate, StateResolver,
};
use crate::storage::StorageConfig;
use crate::types::SessionState;

/// What happened to one ingested event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Record created or its state changed.
    Applied {
        session_id: String,
        state: SessionState,
    },
    /// Same state; tracked fields or the heartbeat refreshed.
    Refreshed { session_id: String },
    /// Record removed (session ended).
    Deleted {
        session_id: String,
        lock_released: bool,
    },
    ShellRecorded { pid: u32 },
    /// No-op, stale, or not a session event.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub outcome: IngestOutcome,
    /// Set when this event created a lock that needs a holder process.
    pub new_lock: Option<LockHandle>,
    /// Set when the session's live lock was re-pointed at a new project
    /// path. The lock directory is keyed by session id, so the running
    /// holder keeps watching it.
    pub moved_lock: Option<LockHandle>,
}

impl IngestReport {
    fn new(outcome: IngestOutcome) -> Self {
        Self {
            outcome,
            new_lock: None,
            moved_lock: None,
        }
    }
}

enum LockChange {
    Unchanged,
    Created(LockHandle),
    Moved(LockHandle),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickStats {
    /// Sessions moved from Working to Ready by the inactivity rule.
    pub auto_ready: Vec<String>,
    /// Records dropped because their agent pid is gone.
    pub dead_removed: Vec<String>,
}

pub struct TetherEngine {
    storage: StorageConfig,
    config: TetherConfig,
    probe: SharedProbe,
}

impl TetherEngine {
    /// Engine over `TETHER_HOME` (or `~/.tether`) with the real process probe.
    pub fn new() -> Result<Self> {
        Ok(Self::with_storage(StorageConfig::from_env()?))
    }

    /// Loads `config.toml` from the storage root; defaults if absent or bad.
    pub fn with_storage(storage: StorageConfig) -> Self {
        let config = TetherConfig::load_or_default(&storage.config_file());
        Self::with_parts(storage, config, SystemProbe::shared())
    }

    pub fn with_parts(storage: StorageConfig, config: TetherConfig, probe: SharedProbe) -> Self {
        Self {
            storage,
            config,
            probe,
        }
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    pub fn probe(&self) -> &SharedProbe {
        &self.probe
    }

    pub fn lock_store(&self) -> LockStore {
        LockStore::new(self.storage.locks_dir(), self.probe.clone())
            .with_grace(self.config.lock_grace())
    }

    pub fn shell_tracker(&self) -> ShellCwdTracker {
        ShellCwdTracker::new(self.storage.shell_registry_file(), self.probe.clone())
    }

    pub fn load_sessions(&self) -> SessionStore {
        SessionStore::load(&self.storage.sessions_file())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Event Ingest
    // ─────────────────────────────────────────────────────────────────────────────

    /// Validates an event and applies it.
    ///
    /// Session events go through the reducer and are persisted. `SessionStart`
    /// and `UserPromptSubmit` also create the session's lock when it has no
    /// live one; the returned [`IngestReport::new_lock`] tells the caller to
    /// start a holder for it. `SessionEnd` releases the lock.
    pub fn ingest(&self, event: &EventEnvelope) -> Result<IngestReport> {
        event.validate()?;

        if event.event_type == EventType::ShellCwd {
            let pid = self.report_shell(event)?;
            return Ok(IngestReport::new(IngestOutcome::ShellRecorded { pid }));
        }

        let mut store = self.load_sessions();
        let current = event
            .session_id
            .as_deref()
            .and_then(|session_id| store.get(session_id));
        let update = reduce_session_with(current, event, self.config.heartbeat_interval());

        let outcome = match update {
            SessionUpdate::Upsert(record) => {
                let outcome = IngestOutcome::Applied {
                    session_id: record.session_id.clone(),
                    state: record.state,
                };
                store.upsert(record);
                store.save()?;
                outcome
            }
            SessionUpdate::Heartbeat(record) => {
                let outcome = IngestOutcome::Refreshed {
                    session_id: record.session_id.clone(),
                };
                store.upsert(record);
                store.save()?;
                outcome
            }
            SessionUpdate::Delete { session_id } => {
                store.delete(&session_id);
                store.save()?;
                let locks = self.lock_store();
                let lock_released = match event.pid {
                    Some(pid) => locks.release_lock_if_owner(&session_id, pid)?,
                    None => locks.release_lock(&session_id)?,
                };
                IngestOutcome::Deleted {
                    session_id,
                    lock_released,
                }
            }
            SessionUpdate::Skip => IngestOutcome::Skipped,
        };

        tracing::debug!(
            event_type = event.event_type.as_str(),
            session_id = ?event.session_id,
            outcome = ?outcome,
            "Ingested event"
        );

        let mut report = IngestReport::new(outcome);
        match self.ensure_lock(event, &store)? {
            LockChange::Unchanged => {}
            LockChange::Created(handle) => report.new_lock = Some(handle),
            LockChange::Moved(handle) => report.moved_lock = Some(handle),
        }
        Ok(report)
    }

    /// Creates the session's lock if the event starts activity and no live
    /// lock for the same agent pid exists. A live own lock whose path no
    /// longer matches the record's project path is re-pointed.
    fn ensure_lock(&self, event: &EventEnvelope, store: &SessionStore) -> Result<LockChange> {
        if !matches!(
            event.event_type,
            EventType::SessionStart | EventType::UserPromptSubmit
        ) {
            return Ok(LockChange::Unchanged);
        }
        let (Some(session_id), Some(pid)) = (event.session_id.as_deref(), event.pid) else {
            return Ok(LockChange::Unchanged);
        };
        let Some(record) = store.get(session_id) else {
            return Ok(LockChange::Unchanged);
        };

        let locks = self.lock_store();
        let own_live_lock = locks
            .read_lock(session_id)
            .filter(|existing| existing.pid == pid && locks.is_record_live(existing));
        if let Some(existing) = &own_live_lock {
            if normalize_path_for_matching(&existing.path)
                == normalize_path_for_matching(&record.project_path)
            {
                return Ok(LockChange::Unchanged);
            }
        }

        match locks.create_lock(session_id, &record.project_path, pid) {
            Ok(handle) if own_live_lock.is_some() => {
                tracing::debug!(
                    session_id,
                    path = %handle.record.path,
                    "Moved lock to new project path"
                );
                Ok(LockChange::Moved(handle))
            }
            Ok(handle) => Ok(LockChange::Created(handle)),
            Err(TetherError::LockHeld { pid: holder, .. }) => {
                tracing::debug!(session_id, holder, "Lock held by another live process");
                Ok(LockChange::Unchanged)
            }
            Err(TetherError::LockPending { .. }) => Ok(LockChange::Unchanged),
            Err(err) => Err(err),
        }
    }

    /// Records a shell cwd report. Returns the shell pid.
    pub fn report_shell(&self, event: &EventEnvelope) -> Result<u32> {
        let entry = crate::shell::ShellEntry::from_event(event)?;
        let pid = entry.pid;
        self.shell_tracker().record(entry)?;
        Ok(pid)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Scheduled Re-evaluation
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn tick(&self) -> Result<TickStats> {
        self.tick_at(Utc::now())
    }

    /// Applies the inactivity rule and drops records whose agent is gone.
    pub fn tick_at(&self, now: DateTime<Utc>) -> Result<TickStats> {
        let mut store = self.load_sessions();
        let mut stats = TickStats {
            dead_removed: store.prune_dead(self.probe.as_ref()),
            ..TickStats::default()
        };

        let promoted: Vec<_> = store
            .all_records()
            .filter_map(|record| apply_auto_ready(record, now, self.config.auto_ready_after()))
            .collect();
        for record in promoted {
            stats.auto_ready.push(record.session_id.clone());
            store.upsert(record);
        }

        if !stats.auto_ready.is_empty() || !stats.dead_removed.is_empty() {
            store.save()?;
        }
        Ok(stats)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn resolve(&self, project_path: &str) -> Result<ResolvedState> {
        self.resolve_at(project_path, Utc::now())
    }

    pub fn resolve_at(&self, project_path: &str, now: DateTime<Utc>) -> Result<ResolvedState> {
        let locks = self.lock_store();
        let store = self.load_sessions();
        StateResolver::new(&locks, &store)
            .with_thresholds(self.config.stale_threshold(), self.config.auto_ready_after())
            .resolve_at(project_path, now)
    }

    /// Shell registry with liveness re-verified.
    pub fn shells(&self) -> ShellRegistry {
        self.shell_tracker().snapshot()
    }

    pub fn activation(&self, project_path: &str, tmux_context: &TmuxContext) -> ActivationDecision {
        let home = dirs::home_dir().map(|home| home.to_string_lossy().into_owned());
        self.activation_with_home(project_path, tmux_context, home.as_deref())
    }

    pub fn activation_with_home(
        &self,
        project_path: &str,
        tmux_context: &TmuxContext,
        home_dir: Option<&str>,
    ) -> ActivationDecision {
        resolve_activation(project_path, &self.shells(), tmux_context, home_dir)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn cleanup(&self) -> CleanupStats {
        let locks = self.lock_store();
        let mut store = self.load_sessions();
        run_startup_cleanup(
            &locks,
            &mut store,
            &self.shell_tracker(),
            self.probe.as_ref(),
            self.config.stale_threshold(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::StaticProbe;
    use chrono::Duration;
    use tempfile::TempDir;

    const AGENT_PID: u32 = 4242;

    fn engine(temp: &TempDir, probe: StaticProbe) -> TetherEngine {
        TetherEngine::with_parts(
            StorageConfig::with_root(temp.path().to_path_buf()),
            TetherConfig::default(),
            probe.into_shared(),
        )
    }

    fn event(event_type: EventType, session_id: &str, cwd: &str, at: DateTime<Utc>) -> EventEnvelope {
        let mut event = EventEnvelope::new(event_type, at);
        event.session_id = Some(session_id.to_string());
        event.cwd = Some(cwd.to_string());
        event.pid = Some(AGENT_PID);
        event
    }

    #[test]
    fn session_start_creates_record_and_lock() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp, StaticProbe::new().with_alive(AGENT_PID));
        let now = Utc::now();

        let report = engine
            .ingest(&event(EventType::SessionStart, "s1", "/nowhere/repo", now))
            .unwrap();
        assert_eq!(
            report.outcome,
            IngestOutcome::Applied {
                session_id: "s1".to_string(),
                state: SessionState::Ready
            }
        );
        let lock = report.new_lock.expect("lock created");
        assert_eq!(lock.record.pid, AGENT_PID);

        let resolved = engine.resolve("/nowhere/repo").unwrap();
        assert_eq!(resolved.state, SessionState::Ready);
        assert_eq!(resolved.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn live_lock_is_not_recreated() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp, StaticProbe::new().with_alive(AGENT_PID));
        let now = Utc::now();

        engine
            .ingest(&event(EventType::SessionStart, "s1", "/nowhere/repo", now))
            .unwrap();
        let report = engine
            .ingest(&event(
                EventType::UserPromptSubmit,
                "s1",
                "/nowhere/repo",
                now + Duration::seconds(1),
            ))
            .unwrap();
        assert!(report.new_lock.is_none());
        assert_eq!(
            engine.resolve("/nowhere/repo").unwrap().state,
            SessionState::Working
        );
    }

    #[test]
    fn lock_follows_session_into_new_directory() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp, StaticProbe::new().with_alive(AGENT_PID));
        let now = Utc::now();

        engine
            .ingest(&event(EventType::SessionStart, "s1", "/nowhere/repo", now))
            .unwrap();
        let report = engine
            .ingest(&event(
                EventType::UserPromptSubmit,
                "s1",
                "/nowhere/other",
                now + Duration::seconds(1),
            ))
            .unwrap();

        assert!(report.new_lock.is_none());
        let moved = report.moved_lock.expect("lock re-pointed");
        assert_eq!(moved.record.path, "/nowhere/other");
        assert_eq!(
            engine.lock_store().read_lock("s1").unwrap().path,
            "/nowhere/other"
        );

        let old = engine.resolve("/nowhere/repo").unwrap();
        assert_eq!(old.session_count, 0);
        assert_eq!(old.source, crate::state::StateSource::None);
        let new = engine.resolve("/nowhere/other").unwrap();
        assert_eq!(new.state, SessionState::Working);
        assert_eq!(new.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn session_end_removes_record_and_lock() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp, StaticProbe::new().with_alive(AGENT_PID));
        let now = Utc::now();

        engine
            .ingest(&event(EventType::SessionStart, "s1", "/nowhere/repo", now))
            .unwrap();
        let report = engine
            .ingest(&event(
                EventType::SessionEnd,
                "s1",
                "/nowhere/repo",
                now + Duration::seconds(1),
            ))
            .unwrap();
        assert_eq!(
            report.outcome,
            IngestOutcome::Deleted {
                session_id: "s1".to_string(),
                lock_released: true
            }
        );
        assert!(engine.load_sessions().is_empty());
        assert_eq!(
            engine.resolve("/nowhere/repo").unwrap().state,
            SessionState::Idle
        );
    }

    #[test]
    fn unknown_events_are_skipped() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp, StaticProbe::new());
        let report = engine
            .ingest(&event(EventType::Unknown, "s1", "/nowhere/repo", Utc::now()))
            .unwrap();
        assert_eq!(report.outcome, IngestOutcome::Skipped);
        assert!(engine.load_sessions().is_empty());
    }

    #[test]
    fn shell_reports_flow_into_activation() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp, StaticProbe::new().with_alive(77));
        let report = engine
            .ingest(&EventEnvelope::shell_cwd(
                77,
                "/nowhere/repo",
                "/dev/ttys077",
                Some("iTerm.app"),
                None,
                None,
                Utc::now(),
            ))
            .unwrap();
        assert_eq!(report.outcome, IngestOutcome::ShellRecorded { pid: 77 });

        let decision =
            engine.activation_with_home("/nowhere/repo", &TmuxContext::default(), None);
        assert_eq!(decision.trace.selected_pid, Some(77));
    }

    #[test]
    fn tick_promotes_idle_working_sessions() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp, StaticProbe::new().with_alive(AGENT_PID));
        let start = Utc::now() - Duration::minutes(3);

        engine
            .ingest(&event(EventType::UserPromptSubmit, "s1", "/nowhere/repo", start))
            .unwrap();
        let stats = engine.tick_at(start + Duration::seconds(90)).unwrap();
        assert_eq!(stats.auto_ready, vec!["s1".to_string()]);

        let record = engine.load_sessions().get("s1").cloned().unwrap();
        assert_eq!(record.state, SessionState::Ready);
        assert_eq!(record.updated_at.timestamp(), start.timestamp());
    }

    #[test]
    fn busy_session_is_not_promoted_with_long_heartbeat() {
        let temp = TempDir::new().unwrap();
        let engine = TetherEngine::with_parts(
            StorageConfig::with_root(temp.path().to_path_buf()),
            TetherConfig {
                heartbeat_secs: 300,
                ..TetherConfig::default()
            },
            StaticProbe::new().with_alive(AGENT_PID).into_shared(),
        );
        let start = Utc::now() - Duration::minutes(5);

        for offset in [0, 40, 80] {
            engine
                .ingest(&event(
                    EventType::UserPromptSubmit,
                    "s1",
                    "/nowhere/repo",
                    start + Duration::seconds(offset),
                ))
                .unwrap();
        }
        let stats = engine.tick_at(start + Duration::seconds(100)).unwrap();

        assert!(stats.auto_ready.is_empty());
        let record = engine.load_sessions().get("s1").cloned().unwrap();
        assert_eq!(record.state, SessionState::Working);
    }

    #[test]
    fn tick_drops_sessions_whose_agent_died() {
        let temp = TempDir::new().unwrap();
        let now = Utc::now();
        let writer = engine(&temp, StaticProbe::new().with_alive(AGENT_PID));
        writer
            .ingest(&event(EventType::SessionStart, "s1", "/nowhere/repo", now))
            .unwrap();

        let reader = engine(&temp, StaticProbe::new());
        let stats = reader.tick_at(now).unwrap();
        assert_eq!(stats.dead_removed, vec!["s1".to_string()]);
        assert!(reader.load_sessions().is_empty());
    }

    #[test]
    fn invalid_event_is_rejected() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp, StaticProbe::new());
        let mut bad = event(EventType::SessionStart, "s1", "/nowhere/repo", Utc::now());
        bad.recorded_at = "not a time".to_string();
        assert!(matches!(
            engine.ingest(&bad),
            Err(TetherError::InvalidEvent(_))
        ));
    }
}
