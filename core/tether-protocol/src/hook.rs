//! Normalization of raw agent hook payloads.
//!
//! Claude Code hooks deliver a JSON object on stdin whose shape varies per
//! event. [`HookInput`] accepts all of them leniently (unknown fields are
//! ignored, every field is optional) and [`HookInput::into_envelope`] turns it
//! into the canonical, validated [`EventEnvelope`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ErrorInfo, EventEnvelope, EventType};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub permission_mode: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<Value>,
    #[serde(default)]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stop_hook_active: Option<bool>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub teammate_name: Option<String>,
}

impl HookInput {
    /// Maps the hook's PascalCase event name onto the canonical event type.
    pub fn event_type(&self) -> EventType {
        match self.hook_event_name.as_deref() {
            Some("SessionStart") => EventType::SessionStart,
            Some("UserPromptSubmit") => EventType::UserPromptSubmit,
            Some("PreToolUse") => EventType::PreToolUse,
            Some("PostToolUse") => EventType::PostToolUse,
            Some("PostToolUseFailure") => EventType::PostToolUseFailure,
            Some("PermissionRequest") => EventType::PermissionRequest,
            Some("PreCompact") => EventType::PreCompact,
            Some("Notification") => EventType::Notification,
            Some("Stop") => EventType::Stop,
            Some("TaskCompleted") => EventType::TaskCompleted,
            Some("SubagentStart") => EventType::SubagentStart,
            Some("SubagentStop") => EventType::SubagentStop,
            Some("TeammateIdle") => EventType::TeammateIdle,
            Some("SessionEnd") => EventType::SessionEnd,
            _ => EventType::Unknown,
        }
    }

    /// Working directory reported by the hook, falling back to `fallback`
    /// (typically `CLAUDE_PROJECT_DIR`) when the payload omits it.
    pub fn resolve_cwd(&self, fallback: Option<&str>) -> Option<String> {
        self.cwd
            .as_deref()
            .or(fallback)
            .map(str::trim)
            .filter(|cwd| !cwd.is_empty())
            .map(str::to_string)
    }

    /// File touched by the tool call, if the tool input names one.
    pub fn file_path(&self) -> Option<String> {
        let input = self.tool_input.as_ref()?;
        ["file_path", "notebook_path", "path"]
            .iter()
            .find_map(|key| input.get(*key).and_then(Value::as_str))
            .filter(|path| !path.is_empty())
            .map(str::to_string)
    }

    /// Converts the payload into a validated envelope.
    ///
    /// `pid` is the agent process that invoked the hook (the hook's parent).
    pub fn into_envelope(
        self,
        pid: Option<u32>,
        fallback_cwd: Option<&str>,
        recorded_at: DateTime<Utc>,
    ) -> Result<EventEnvelope, ErrorInfo> {
        let event_type = self.event_type();
        let mut envelope = EventEnvelope::new(event_type, recorded_at);

        envelope.cwd = self.resolve_cwd(fallback_cwd);
        envelope.file_path = self.file_path();
        envelope.metadata = self.metadata();
        envelope.session_id = self.session_id.filter(|id| !id.trim().is_empty());
        envelope.pid = pid;
        envelope.tool = self.tool_name;
        envelope.prompt = self.prompt;
        envelope.notification_type = self.notification_type;
        envelope.agent_id = self.agent_id.filter(|id| !id.is_empty());
        envelope.stop_hook_active = match event_type {
            EventType::Stop | EventType::SubagentStop => {
                Some(self.stop_hook_active.unwrap_or(false))
            }
            _ => self.stop_hook_active,
        };

        envelope.validate()?;
        Ok(envelope)
    }

    fn metadata(&self) -> Option<Value> {
        let mut map = Map::new();
        let fields = [
            ("agent_id", &self.agent_id),
            ("agent_type", &self.agent_type),
            ("teammate_name", &self.teammate_name),
            ("tool_use_id", &self.tool_use_id),
            ("transcript_path", &self.transcript_path),
            ("permission_mode", &self.permission_mode),
            ("trigger", &self.trigger),
            ("source", &self.source),
            ("reason", &self.reason),
        ];
        for (key, value) in fields {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                map.insert(key.to_string(), Value::String(value.to_string()));
            }
        }
        if map.is_empty() {
            None
        } else {
            Some(Value::Object(map))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> HookInput {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn maps_known_event_names() {
        let input = parse(r#"{"hook_event_name":"PreCompact","session_id":"s"}"#);
        assert_eq!(input.event_type(), EventType::PreCompact);
    }

    #[test]
    fn unrecognized_event_name_is_unknown() {
        let input = parse(r#"{"hook_event_name":"WorktreeCreate","session_id":"s"}"#);
        assert_eq!(input.event_type(), EventType::Unknown);

        let envelope = input.into_envelope(Some(42), None, Utc::now()).unwrap();
        assert_eq!(envelope.event_type, EventType::Unknown);
    }

    #[test]
    fn ignores_unexpected_fields() {
        let input = parse(
            r#"{"hook_event_name":"Stop","session_id":"s","cwd":"/p","brand_new_field":[1,2]}"#,
        );
        assert_eq!(input.event_type(), EventType::Stop);
    }

    #[test]
    fn stop_defaults_hook_active_to_false() {
        let input = parse(r#"{"hook_event_name":"Stop","session_id":"s","cwd":"/p"}"#);
        let envelope = input.into_envelope(Some(42), None, Utc::now()).unwrap();
        assert_eq!(envelope.stop_hook_active, Some(false));
    }

    #[test]
    fn extracts_file_path_from_tool_input() {
        let input = parse(
            r#"{"hook_event_name":"PreToolUse","session_id":"s","cwd":"/p",
                "tool_name":"Edit","tool_input":{"file_path":"/p/src/lib.rs"}}"#,
        );
        let envelope = input.into_envelope(Some(42), None, Utc::now()).unwrap();
        assert_eq!(envelope.tool.as_deref(), Some("Edit"));
        assert_eq!(envelope.file_path.as_deref(), Some("/p/src/lib.rs"));
    }

    #[test]
    fn falls_back_to_provided_cwd() {
        let input = parse(r#"{"hook_event_name":"UserPromptSubmit","session_id":"s"}"#);
        let envelope = input
            .into_envelope(Some(42), Some("/fallback"), Utc::now())
            .unwrap();
        assert_eq!(envelope.cwd.as_deref(), Some("/fallback"));
    }

    #[test]
    fn missing_session_id_is_rejected() {
        let input = parse(r#"{"hook_event_name":"UserPromptSubmit","cwd":"/p"}"#);
        let err = input.into_envelope(Some(42), None, Utc::now()).unwrap_err();
        assert_eq!(err.code, "missing_field");
    }

    #[test]
    fn subagent_fields_land_in_metadata() {
        let input = parse(
            r#"{"hook_event_name":"TaskCompleted","session_id":"s","cwd":"/p","agent_id":"sub-1"}"#,
        );
        let envelope = input.into_envelope(Some(42), None, Utc::now()).unwrap();
        assert!(envelope.is_auxiliary());
        assert_eq!(envelope.agent_id.as_deref(), Some("sub-1"));
        assert_eq!(envelope.metadata_str("agent_id"), Some("sub-1"));
    }
}
