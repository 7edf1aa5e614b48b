//! Canonical lifecycle event types for Tether.
//!
//! Every signal that reaches the state machine (agent hook notifications and
//! shell cwd reports) is normalized into one [`EventEnvelope`]. The envelope
//! is versioned and validated here so that the hook relay, the state
//! reducer, and any future client agree on a single schema.
//!
//! Unknown `event_type` values are accepted and deserialize to
//! [`EventType::Unknown`]; the reducer treats them as no-ops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod hook;

pub use hook::HookInput;

pub const SCHEMA_VERSION: u32 = 1;
pub const MAX_EVENT_ID_LEN: usize = 128;
pub const MAX_SESSION_ID_LEN: usize = 256;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorInfo {}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStart,
    UserPromptSubmit,
    PreToolUse,
    PostToolUse,
    PostToolUseFailure,
    PermissionRequest,
    PreCompact,
    Notification,
    Stop,
    TaskCompleted,
    SubagentStart,
    SubagentStop,
    TeammateIdle,
    SessionEnd,
    ShellCwd,
    #[serde(other)]
    Unknown,
}

impl EventType {
    /// Event types that belong to a session (everything except shell reports
    /// and unrecognized input).
    pub fn is_session_event(self) -> bool {
        !matches!(self, EventType::ShellCwd | EventType::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::SessionStart => "session_start",
            EventType::UserPromptSubmit => "user_prompt_submit",
            EventType::PreToolUse => "pre_tool_use",
            EventType::PostToolUse => "post_tool_use",
            EventType::PostToolUseFailure => "post_tool_use_failure",
            EventType::PermissionRequest => "permission_request",
            EventType::PreCompact => "pre_compact",
            EventType::Notification => "notification",
            EventType::Stop => "stop",
            EventType::TaskCompleted => "task_completed",
            EventType::SubagentStart => "subagent_start",
            EventType::SubagentStop => "subagent_stop",
            EventType::TeammateIdle => "teammate_idle",
            EventType::SessionEnd => "session_end",
            EventType::ShellCwd => "shell_cwd",
            EventType::Unknown => "unknown",
        }
    }
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EventEnvelope {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub event_id: String,
    pub recorded_at: String,
    pub event_type: EventType,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub stop_hook_active: Option<bool>,
    /// Subagent id when the event was emitted by a subagent.
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub parent_app: Option<String>,
    #[serde(default)]
    pub tty: Option<String>,
    #[serde(default)]
    pub tmux_session: Option<String>,
    #[serde(default)]
    pub tmux_client_tty: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl EventEnvelope {
    /// Builds an envelope with a fresh event id and no optional fields set.
    pub fn new(event_type: EventType, recorded_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            event_id: make_event_id(),
            recorded_at: recorded_at.to_rfc3339(),
            event_type,
            session_id: None,
            pid: None,
            cwd: None,
            tool: None,
            file_path: None,
            prompt: None,
            notification_type: None,
            stop_hook_active: None,
            agent_id: None,
            parent_app: None,
            tty: None,
            tmux_session: None,
            tmux_client_tty: None,
            metadata: None,
        }
    }

    /// Envelope for a shell working-directory report.
    pub fn shell_cwd(
        pid: u32,
        cwd: &str,
        tty: &str,
        parent_app: Option<&str>,
        tmux_session: Option<String>,
        tmux_client_tty: Option<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        let mut envelope = Self::new(EventType::ShellCwd, recorded_at);
        envelope.pid = Some(pid);
        envelope.cwd = Some(cwd.to_string());
        envelope.tty = Some(tty.to_string());
        envelope.parent_app = parent_app.map(str::to_string);
        envelope.tmux_session = tmux_session;
        envelope.tmux_client_tty = tmux_client_tty;
        envelope
    }

    pub fn recorded_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_rfc3339(&self.recorded_at)
    }

    /// Returns a non-empty string value from the metadata object.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|value| value.get(key))
            .and_then(|value| value.as_str())
            .filter(|value| !value.is_empty())
    }

    /// Subagent id from the envelope field, else from metadata.
    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or_else(|| self.metadata_str("agent_id"))
    }

    /// True when the event was emitted on behalf of a subagent or teammate
    /// rather than the main session.
    pub fn is_auxiliary(&self) -> bool {
        self.agent_id().is_some() || self.metadata_str("teammate_name").is_some()
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ErrorInfo::new(
                "unsupported_version",
                format!(
                    "envelope schema_version {} cannot be read (this build reads {})",
                    self.schema_version, SCHEMA_VERSION
                ),
            ));
        }

        if self.event_id.trim().is_empty() {
            return Err(ErrorInfo::new("invalid_event_id", "envelope has no event_id"));
        }
        if self.event_id.len() > MAX_EVENT_ID_LEN {
            return Err(ErrorInfo::new(
                "invalid_event_id",
                format!("envelope event_id is longer than {} characters", MAX_EVENT_ID_LEN),
            ));
        }

        if DateTime::parse_from_rfc3339(&self.recorded_at).is_err() {
            return Err(ErrorInfo::new(
                "invalid_timestamp",
                "envelope recorded_at is not an RFC3339 timestamp",
            ));
        }

        let kind = self.event_type.as_str();
        match self.event_type {
            EventType::ShellCwd => {
                require_pid(kind, self.pid)?;
                require_text(kind, &self.cwd, "cwd")?;
                require_text(kind, &self.tty, "tty")?;
            }
            EventType::Notification => {
                require_session_fields(self)?;
                require_text(kind, &self.notification_type, "notification_type")?;
            }
            EventType::Stop => {
                require_session_fields(self)?;
                if self.stop_hook_active.is_none() {
                    return Err(missing(kind, "stop_hook_active"));
                }
            }
            EventType::SessionEnd => {
                require_session_id(kind, &self.session_id)?;
            }
            EventType::SessionStart
            | EventType::UserPromptSubmit
            | EventType::PreToolUse
            | EventType::PostToolUse
            | EventType::PostToolUseFailure
            | EventType::PermissionRequest
            | EventType::PreCompact
            | EventType::TaskCompleted
            | EventType::SubagentStart
            | EventType::SubagentStop
            | EventType::TeammateIdle => {
                require_session_fields(self)?;
            }
            EventType::Unknown => {}
        }

        Ok(())
    }
}

/// Parses and validates an envelope from untyped JSON.
pub fn parse_event(params: Value) -> Result<EventEnvelope, ErrorInfo> {
    let envelope: EventEnvelope = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("not an event envelope: {}", err),
        )
    })?;
    envelope.validate()?;
    Ok(envelope)
}

pub fn make_event_id() -> String {
    ulid::Ulid::new().to_string()
}

pub fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Every session event names its session, the agent pid and a cwd.
fn require_session_fields(event: &EventEnvelope) -> Result<(), ErrorInfo> {
    let kind = event.event_type.as_str();
    require_session_id(kind, &event.session_id)?;
    require_pid(kind, event.pid)?;
    require_text(kind, &event.cwd, "cwd")?;
    Ok(())
}

fn require_session_id(kind: &str, value: &Option<String>) -> Result<(), ErrorInfo> {
    require_text(kind, value, "session_id")?;
    if value.as_ref().is_some_and(|id| id.len() > MAX_SESSION_ID_LEN) {
        return Err(ErrorInfo::new(
            "invalid_session_id",
            format!(
                "{} event has a session_id longer than {} characters",
                kind, MAX_SESSION_ID_LEN
            ),
        ));
    }
    Ok(())
}

/// Blank strings count as missing.
fn require_text(kind: &str, value: &Option<String>, field: &str) -> Result<(), ErrorInfo> {
    match value {
        Some(text) if !text.trim().is_empty() => Ok(()),
        _ => Err(missing(kind, field)),
    }
}

fn require_pid(kind: &str, pid: Option<u32>) -> Result<(), ErrorInfo> {
    match pid {
        Some(0) | None => Err(ErrorInfo::new(
            "invalid_pid",
            format!("{} event has no agent pid", kind),
        )),
        Some(_) => Ok(()),
    }
}

fn missing(kind: &str, field: &str) -> ErrorInfo {
    ErrorInfo::new("missing_field", format!("{} event has no {}", kind, field))
}
