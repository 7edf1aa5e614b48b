//! Serialized state types shared by the store, the lock directory, and the
//! resolver. On-disk format is v1.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::SessionState;

pub const DEFAULT_AGENT: &str = "claude";

fn default_agent() -> String {
    DEFAULT_AGENT.to_string()
}

// -----------------------------------------------------------------------------
// Canonical event→state mapping (see reducer.rs)
//
// SessionStart (not active)   -> ready
// UserPromptSubmit            -> working
// PreToolUse / PostToolUse*   -> working
// PermissionRequest           -> waiting
// PreCompact                  -> compacting
// Notification idle_prompt|auth_success           -> ready
// Notification permission_prompt|elicitation_dialog -> waiting
// Stop (stop_hook_active=true or subagent) -> no state change
// Stop (otherwise)            -> ready
// TaskCompleted (main agent)  -> ready
// SessionEnd                  -> remove session record
// Subagent*/TeammateIdle      -> no state change
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(default = "default_agent")]
    pub agent: String,
    #[serde(default)]
    pub pid: Option<u32>,
    pub state: SessionState,
    pub cwd: String,
    /// Owning project path: the detected boundary of `cwd`, else `cwd`.
    pub project_path: String,
    #[serde(default)]
    pub working_on: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub state_changed_at: DateTime<Utc>,
    #[serde(default)]
    pub last_event: Option<String>,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tools_in_flight: u32,
    #[serde(default)]
    pub ready_reason: Option<String>,
}

impl SessionRecord {
    pub fn new(session_id: &str, state: SessionState, cwd: &str, at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            agent: default_agent(),
            pid: None,
            state,
            cwd: cwd.to_string(),
            project_path: cwd.to_string(),
            working_on: None,
            updated_at: at,
            state_changed_at: at,
            last_event: None,
            last_activity_at: None,
            tools_in_flight: 0,
            ready_reason: None,
        }
    }

    /// True when the record has not been updated within `threshold` of `now`.
    pub fn is_stale_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now.signed_duration_since(self.updated_at) > threshold
    }

    /// Most recent evidence the agent did something.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_activity_at
            .map_or(self.updated_at, |activity| activity.max(self.updated_at))
    }
}

/// Contents of a lock directory's `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub session_id: String,
    /// Owning project path, stored as given (compare via normalization).
    pub path: String,
    /// The agent process the lock holder is watching.
    pub pid: u32,
    /// Process start time (Unix seconds) for PID identity verification.
    #[serde(default)]
    pub proc_started: Option<u64>,
    /// Lock creation time (Unix milliseconds) for "newest lock wins".
    pub created_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_STALE_THRESHOLD_SECS;

    fn threshold() -> Duration {
        Duration::seconds(DEFAULT_STALE_THRESHOLD_SECS as i64)
    }

    #[test]
    fn fresh_record_is_not_stale() {
        let now = Utc::now();
        let record = SessionRecord::new("test", SessionState::Ready, "/test", now);
        assert!(!record.is_stale_at(now, threshold()));
    }

    #[test]
    fn old_record_is_stale() {
        let now = Utc::now();
        let old = now - threshold() - Duration::seconds(1);
        let record = SessionRecord::new("test", SessionState::Ready, "/test", old);
        assert!(record.is_stale_at(now, threshold()));
    }

    #[test]
    fn threshold_boundary_is_not_stale() {
        let now = Utc::now();
        let record = SessionRecord::new("test", SessionState::Ready, "/test", now - threshold());
        assert!(!record.is_stale_at(now, threshold()));
    }

    #[test]
    fn record_without_agent_defaults_to_claude() {
        let json = r#"{
            "session_id": "s1",
            "state": "working",
            "cwd": "/repo",
            "project_path": "/repo",
            "updated_at": "2026-01-30T12:00:00Z",
            "state_changed_at": "2026-01-30T12:00:00Z"
        }"#;
        let record: SessionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.agent, DEFAULT_AGENT);
        assert_eq!(record.pid, None);
        assert_eq!(record.tools_in_flight, 0);
    }
}
