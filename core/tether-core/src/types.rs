//! Core types shared across Tether clients.
//!
//! Anything that crosses a persistence or process boundary (session states,
//! parent applications) lives here so the hook binary, the resolver, and any
//! future UI agree on one serialized form.

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// Session State Types
// ═══════════════════════════════════════════════════════════════════════════════

/// The current state of an agent session.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Working,
    Ready,
    #[default]
    Idle,
    Compacting,
    Waiting,
}

impl SessionState {
    /// Whether this state indicates the agent needs attention.
    pub fn needs_attention(&self) -> bool {
        matches!(self, Self::Ready | Self::Waiting)
    }

    /// Whether this state indicates the agent is busy.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Working | Self::Compacting)
    }

    /// Mid-turn states. A `SessionStart` arriving while active does not reset
    /// the session back to Ready.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Working | Self::Waiting | Self::Compacting)
    }

    /// Ordering used when several live sessions share one project path.
    pub fn display_priority(&self) -> u8 {
        match self {
            Self::Working => 4,
            Self::Waiting => 3,
            Self::Compacting => 2,
            Self::Ready => 1,
            Self::Idle => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Ready => "ready",
            Self::Idle => "idle",
            Self::Compacting => "compacting",
            Self::Waiting => "waiting",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Shell Parent Applications
// ═══════════════════════════════════════════════════════════════════════════════

/// The application hosting a shell (terminal emulator, IDE, or multiplexer).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParentApp {
    #[serde(rename = "iterm2")]
    ITerm,
    Terminal,
    Ghostty,
    Alacritty,
    Kitty,
    Warp,
    #[serde(rename = "vscode")]
    VSCode,
    #[serde(rename = "vscode_insiders")]
    VSCodeInsiders,
    Cursor,
    Zed,
    Tmux,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ParentApp {
    pub fn is_ide(&self) -> bool {
        matches!(
            self,
            Self::VSCode | Self::VSCodeInsiders | Self::Cursor | Self::Zed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ITerm | Self::Terminal | Self::Ghostty | Self::Alacritty | Self::Kitty | Self::Warp
        )
    }

    pub fn is_known(&self) -> bool {
        *self != Self::Unknown
    }

    /// Parses the loose identifiers shells report (`TERM_PROGRAM` values and
    /// our own snake_case names). Unrecognized input maps to `Unknown`.
    pub fn from_identifier(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "iterm2" | "iterm" | "iterm.app" => Self::ITerm,
            "terminal" | "apple_terminal" | "terminal.app" => Self::Terminal,
            "ghostty" => Self::Ghostty,
            "alacritty" => Self::Alacritty,
            "kitty" | "xterm-kitty" => Self::Kitty,
            "warp" | "warpterminal" => Self::Warp,
            "vscode" | "code" => Self::VSCode,
            "vscode_insiders" | "vscode-insiders" | "code-insiders" => Self::VSCodeInsiders,
            "cursor" => Self::Cursor,
            "zed" => Self::Zed,
            "tmux" => Self::Tmux,
            _ => Self::Unknown,
        }
    }

    /// Serialized identifier; round-trips through [`Self::from_identifier`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ITerm => "iterm2",
            Self::Terminal => "terminal",
            Self::Ghostty => "ghostty",
            Self::Alacritty => "alacritty",
            Self::Kitty => "kitty",
            Self::Warp => "warp",
            Self::VSCode => "vscode",
            Self::VSCodeInsiders => "vscode_insiders",
            Self::Cursor => "cursor",
            Self::Zed => "zed",
            Self::Tmux => "tmux",
            Self::Unknown => "unknown",
        }
    }

    /// Human-facing application name, as used when activating the app.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ITerm => "iTerm",
            Self::Terminal => "Terminal",
            Self::Ghostty => "Ghostty",
            Self::Alacritty => "Alacritty",
            Self::Kitty => "kitty",
            Self::Warp => "Warp",
            Self::VSCode => "Visual Studio Code",
            Self::VSCodeInsiders => "Visual Studio Code - Insiders",
            Self::Cursor => "Cursor",
            Self::Zed => "Zed",
            Self::Tmux => "tmux",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_serializes_lowercase() {
        let json = serde_json::to_string(&SessionState::Compacting).unwrap();
        assert_eq!(json, "\"compacting\"");
        let parsed: SessionState = serde_json::from_str("\"waiting\"").unwrap();
        assert_eq!(parsed, SessionState::Waiting);
    }

    #[test]
    fn priority_orders_working_first() {
        let mut states = vec![
            SessionState::Ready,
            SessionState::Compacting,
            SessionState::Working,
            SessionState::Waiting,
        ];
        states.sort_by_key(|s| std::cmp::Reverse(s.display_priority()));
        assert_eq!(
            states,
            vec![
                SessionState::Working,
                SessionState::Waiting,
                SessionState::Compacting,
                SessionState::Ready,
            ]
        );
    }

    #[test]
    fn parent_app_parses_term_program_values() {
        assert_eq!(ParentApp::from_identifier("iTerm.app"), ParentApp::ITerm);
        assert_eq!(
            ParentApp::from_identifier("Apple_Terminal"),
            ParentApp::Terminal
        );
        assert_eq!(ParentApp::from_identifier("vscode"), ParentApp::VSCode);
        assert_eq!(ParentApp::from_identifier("st-256color"), ParentApp::Unknown);
    }

    #[test]
    fn parent_app_unknown_strings_deserialize_to_unknown() {
        let parsed: ParentApp = serde_json::from_str("\"wezterm\"").unwrap();
        assert_eq!(parsed, ParentApp::Unknown);
        let parsed: ParentApp = serde_json::from_str("\"iterm2\"").unwrap();
        assert_eq!(parsed, ParentApp::ITerm);
    }

    #[test]
    fn parent_app_identifier_round_trips() {
        for app in [ParentApp::ITerm, ParentApp::VSCodeInsiders, ParentApp::Tmux, ParentApp::Unknown] {
            assert_eq!(ParentApp::from_identifier(app.as_str()), app);
            let json = serde_json::to_string(&app).unwrap();
            assert_eq!(json, format!("\"{}\"", app.as_str()));
        }
    }
}
