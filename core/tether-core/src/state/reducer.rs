//! Session state machine.
//!
//! [`reduce_state`] is the pure transition table. [`reduce_session`] wraps it
//! with record bookkeeping (staleness, tool counter, owning path, heartbeat)
//! and decides what, if anything, must be written. Neither ever fails.

use chrono::{DateTime, Duration, Utc};
use tether_protocol::{EventEnvelope, EventType};

use crate::boundaries::find_project_boundary;
use crate::config::DEFAULT_HEARTBEAT_SECS;
use crate::types::SessionState;

use super::types::SessionRecord;

/// `working_on` is the first prompt line, capped at this many characters.
pub const WORKING_ON_MAX_CHARS: usize = 80;

/// Outcome of the pure transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(SessionState),
    Delete,
    NoOp,
}

/// What the caller should persist for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum SessionUpdate {
    /// State changed (or the session is new).
    Upsert(SessionRecord),
    /// Same state, refreshed bookkeeping.
    Heartbeat(SessionRecord),
    Delete { session_id: String },
    Skip,
}

pub fn reduce_state(current: SessionState, event: &EventEnvelope) -> Transition {
    match event.event_type {
        EventType::SessionStart => {
            if current.is_active() {
                Transition::NoOp
            } else {
                Transition::To(SessionState::Ready)
            }
        }
        EventType::UserPromptSubmit
        | EventType::PreToolUse
        | EventType::PostToolUse
        | EventType::PostToolUseFailure => Transition::To(SessionState::Working),
        EventType::PermissionRequest => Transition::To(SessionState::Waiting),
        EventType::PreCompact => Transition::To(SessionState::Compacting),
        EventType::Notification => match event.notification_type.as_deref() {
            Some("idle_prompt") | Some("auth_success") => Transition::To(SessionState::Ready),
            Some("permission_prompt") | Some("elicitation_dialog") => {
                Transition::To(SessionState::Waiting)
            }
            _ => Transition::NoOp,
        },
        EventType::Stop => {
            if event.stop_hook_active == Some(true) || event.agent_id().is_some() {
                Transition::NoOp
            } else {
                Transition::To(SessionState::Ready)
            }
        }
        EventType::TaskCompleted => {
            if event.is_auxiliary() {
                Transition::NoOp
            } else {
                Transition::To(SessionState::Ready)
            }
        }
        EventType::SessionEnd => Transition::Delete,
        EventType::SubagentStart
        | EventType::SubagentStop
        | EventType::TeammateIdle
        | EventType::ShellCwd
        | EventType::Unknown => Transition::NoOp,
    }
}

/// [`reduce_session_with`] using the default heartbeat interval.
pub fn reduce_session(current: Option<&SessionRecord>, event: &EventEnvelope) -> SessionUpdate {
    reduce_session_with(
        current,
        event,
        Duration::seconds(DEFAULT_HEARTBEAT_SECS as i64),
    )
}

pub fn reduce_session_with(
    current: Option<&SessionRecord>,
    event: &EventEnvelope,
    heartbeat: Duration,
) -> SessionUpdate {
    if !event.event_type.is_session_event() {
        return SessionUpdate::Skip;
    }
    let Some(session_id) = event.session_id.as_deref().filter(|id| !id.is_empty()) else {
        return SessionUpdate::Skip;
    };
    let Some(event_time) = event.recorded_at_utc() else {
        return SessionUpdate::Skip;
    };
    if current.is_some_and(|record| event_time < record.updated_at) {
        tracing::debug!(
            session_id,
            event_type = event.event_type.as_str(),
            "Skipping stale event"
        );
        return SessionUpdate::Skip;
    }

    let current_state = current.map(|record| record.state).unwrap_or_default();
    match reduce_state(current_state, event) {
        Transition::Delete => SessionUpdate::Delete {
            session_id: session_id.to_string(),
        },
        Transition::NoOp => SessionUpdate::Skip,
        Transition::To(next) => {
            let record = build_record(current, event, session_id, next, event_time);
            match current {
                None => SessionUpdate::Upsert(record),
                Some(existing) if existing.state != next => SessionUpdate::Upsert(record),
                Some(existing) => {
                    let tracked_changed = existing.tools_in_flight != record.tools_in_flight
                        || existing.cwd != record.cwd
                        || existing.working_on != record.working_on;
                    let due = event_time.signed_duration_since(existing.updated_at) >= heartbeat;
                    if tracked_changed || due {
                        SessionUpdate::Heartbeat(record)
                    } else {
                        SessionUpdate::Skip
                    }
                }
            }
        }
    }
}

/// Scheduled re-evaluation: a Working session with nothing in flight that
/// has been quiet for `auto_ready_after` is considered Ready.
pub fn reevaluate(
    record: &SessionRecord,
    now: DateTime<Utc>,
    auto_ready_after: Option<Duration>,
) -> Option<SessionState> {
    let threshold = auto_ready_after?;
    if record.state != SessionState::Working || record.tools_in_flight > 0 {
        return None;
    }
    (now.signed_duration_since(record.last_seen()) >= threshold).then_some(SessionState::Ready)
}

/// Applies [`reevaluate`] to a copy of the record. `updated_at` is left
/// alone so that late-arriving events are not mistaken for stale ones.
pub fn apply_auto_ready(
    record: &SessionRecord,
    now: DateTime<Utc>,
    auto_ready_after: Option<Duration>,
) -> Option<SessionRecord> {
    let next = reevaluate(record, now, auto_ready_after)?;
    let mut updated = record.clone();
    updated.state = next;
    updated.state_changed_at = now;
    updated.ready_reason = Some("inactivity".to_string());
    Some(updated)
}

fn build_record(
    current: Option<&SessionRecord>,
    event: &EventEnvelope,
    session_id: &str,
    next: SessionState,
    event_time: DateTime<Utc>,
) -> SessionRecord {
    let cwd = event
        .cwd
        .clone()
        .filter(|cwd| !cwd.trim().is_empty())
        .or_else(|| current.map(|record| record.cwd.clone()))
        .unwrap_or_default();

    let project_path = match current {
        Some(record) if record.cwd == cwd && !record.project_path.is_empty() => {
            record.project_path.clone()
        }
        _ => owning_path(&cwd),
    };

    let state_changed_at = match current {
        Some(record) if record.state == next => record.state_changed_at,
        _ => event_time,
    };

    let mut last_activity_at = current.and_then(|record| record.last_activity_at);
    if counts_as_activity(event.event_type) {
        last_activity_at = Some(event_time);
    }

    let working_on = match event.event_type {
        EventType::UserPromptSubmit => event
            .prompt
            .as_deref()
            .and_then(summarize_prompt)
            .or_else(|| current.and_then(|record| record.working_on.clone())),
        _ => current.and_then(|record| record.working_on.clone()),
    };

    let ready_reason = if next == SessionState::Ready {
        ready_reason_for(event).or_else(|| current.and_then(|record| record.ready_reason.clone()))
    } else {
        None
    };

    SessionRecord {
        session_id: session_id.to_string(),
        agent: current
            .map(|record| record.agent.clone())
            .unwrap_or_else(|| super::types::DEFAULT_AGENT.to_string()),
        pid: event.pid.or_else(|| current.and_then(|record| record.pid)),
        state: next,
        cwd,
        project_path,
        working_on,
        updated_at: event_time,
        state_changed_at,
        last_event: Some(event.event_type.as_str().to_string()),
        last_activity_at,
        tools_in_flight: adjust_tools_in_flight(
            current.map(|record| record.tools_in_flight).unwrap_or(0),
            event.event_type,
        ),
        ready_reason,
    }
}

fn owning_path(cwd: &str) -> String {
    if cwd.trim().is_empty() {
        return String::new();
    }
    find_project_boundary(cwd)
        .map(|boundary| boundary.path)
        .unwrap_or_else(|| cwd.to_string())
}

fn counts_as_activity(event_type: EventType) -> bool {
    matches!(
        event_type,
        EventType::UserPromptSubmit
            | EventType::PreToolUse
            | EventType::PostToolUse
            | EventType::PostToolUseFailure
            | EventType::PreCompact
    )
}

fn adjust_tools_in_flight(current: u32, event_type: EventType) -> u32 {
    match event_type {
        EventType::PreToolUse => current.saturating_add(1),
        EventType::PostToolUse | EventType::PostToolUseFailure => current.saturating_sub(1),
        EventType::SessionStart
        | EventType::PreCompact
        | EventType::Stop
        | EventType::TaskCompleted => 0,
        _ => current,
    }
}

fn ready_reason_for(event: &EventEnvelope) -> Option<String> {
    match event.event_type {
        EventType::SessionStart => Some("session_start".to_string()),
        EventType::Stop => Some("stop".to_string()),
        EventType::TaskCompleted => Some("task_completed".to_string()),
        EventType::Notification => event.notification_type.clone(),
        _ => None,
    }
}

fn summarize_prompt(prompt: &str) -> Option<String> {
    let line = prompt.lines().map(str::trim).find(|line| !line.is_empty())?;
    if line.chars().count() <= WORKING_ON_MAX_CHARS {
        return Some(line.to_string());
    }
    let mut truncated: String = line.chars().take(WORKING_ON_MAX_CHARS - 3).collect();
    truncated.push_str("...");
    Some(truncated)
}
