//! Fuses lock liveness and session records into one state per project path.
//!
//! Priority order:
//! 1. Live locks whose owning path equals the query path. A lock is paired
//!    only with the record of the same session id *and* the same pid, so
//!    state text from one session is never shown with another's liveness.
//!    Unpaired live locks read as Ready.
//! 2. The freshest record for the path, if younger than the staleness
//!    threshold.
//! 3. Idle.
//!
//! Matching is exact. Parents never inherit child activity and children never
//! inherit parent activity.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::{DEFAULT_AUTO_READY_SECS, DEFAULT_STALE_THRESHOLD_SECS};
use crate::error::{Result, TetherError};
use crate::types::SessionState;

use super::lock::LockStore;
use super::path_utils::{is_resolvable_path, normalize_path_for_matching};
use super::reducer::reevaluate;
use super::store::SessionStore;
use super::types::{LockRecord, SessionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateSource {
    Lock,
    Record,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedState {
    pub path: String,
    pub state: SessionState,
    pub session_id: Option<String>,
    pub working_on: Option<String>,
    pub state_changed_at: Option<DateTime<Utc>>,
    pub source: StateSource,
    /// Number of live sessions at this exact path.
    pub session_count: usize,
}

impl ResolvedState {
    fn idle(path: String) -> Self {
        Self {
            path,
            state: SessionState::Idle,
            session_id: None,
            working_on: None,
            state_changed_at: None,
            source: StateSource::None,
            session_count: 0,
        }
    }
}

pub struct StateResolver<'a> {
    locks: &'a LockStore,
    store: &'a SessionStore,
    stale_threshold: Duration,
    auto_ready_after: Option<Duration>,
}

impl<'a> StateResolver<'a> {
    pub fn new(locks: &'a LockStore, store: &'a SessionStore) -> Self {
        Self {
            locks,
            store,
            stale_threshold: Duration::seconds(DEFAULT_STALE_THRESHOLD_SECS as i64),
            auto_ready_after: Some(Duration::seconds(DEFAULT_AUTO_READY_SECS as i64)),
        }
    }

    pub fn with_thresholds(mut self, stale: Duration, auto_ready_after: Option<Duration>) -> Self {
        self.stale_threshold = stale;
        self.auto_ready_after = auto_ready_after;
        self
    }

    pub fn resolve(&self, project_path: &str) -> Result<ResolvedState> {
        self.resolve_at(project_path, Utc::now())
    }

    pub fn resolve_at(&self, project_path: &str, now: DateTime<Utc>) -> Result<ResolvedState> {
        if !is_resolvable_path(project_path) {
            return Err(TetherError::NotResolvable {
                path: project_path.to_string(),
                reason: "path must be absolute and non-empty".to_string(),
            });
        }
        let path = normalize_path_for_matching(project_path.trim());

        let live_locks = self.locks.find_live_locks_for_path(&path);
        if !live_locks.is_empty() {
            return Ok(self.resolve_from_locks(path, &live_locks, now));
        }

        if let Some(record) = self.store.freshest_for_path(&path) {
            if !record.is_stale_at(now, self.stale_threshold) {
                return Ok(ResolvedState {
                    path,
                    state: self.effective_state(record, now),
                    session_id: Some(record.session_id.clone()),
                    working_on: record.working_on.clone(),
                    state_changed_at: Some(record.state_changed_at),
                    source: StateSource::Record,
                    session_count: 0,
                });
            }
        }

        Ok(ResolvedState::idle(path))
    }

    fn resolve_from_locks(
        &self,
        path: String,
        live_locks: &[LockRecord],
        now: DateTime<Utc>,
    ) -> ResolvedState {
        let best = live_locks
            .iter()
            .map(|lock| (lock, self.paired_record(lock)))
            .map(|(lock, record)| {
                let state = record
                    .map(|record| self.effective_state(record, now))
                    .unwrap_or(SessionState::Ready);
                (lock, record, state)
            })
            .max_by(|(a_lock, _, a_state), (b_lock, _, b_state)| {
                a_state
                    .display_priority()
                    .cmp(&b_state.display_priority())
                    .then_with(|| a_lock.created_at.cmp(&b_lock.created_at))
                    .then_with(|| a_lock.session_id.cmp(&b_lock.session_id))
            });

        let Some((lock, record, state)) = best else {
            return ResolvedState::idle(path);
        };

        ResolvedState {
            path,
            state,
            session_id: Some(lock.session_id.clone()),
            working_on: record.and_then(|record| record.working_on.clone()),
            state_changed_at: record.map(|record| record.state_changed_at),
            source: StateSource::Lock,
            session_count: live_locks.len(),
        }
    }

    fn paired_record(&self, lock: &LockRecord) -> Option<&'a SessionRecord> {
        self.store
            .get(&lock.session_id)
            .filter(|record| record.pid == Some(lock.pid))
    }

    fn effective_state(&self, record: &SessionRecord, now: DateTime<Utc>) -> SessionState {
        reevaluate(record, now, self.auto_ready_after).unwrap_or(record.state)
    }
}
