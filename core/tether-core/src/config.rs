//! Runtime tunables loaded from `<root>/config.toml`.
//!
//! Every key is optional. A missing file yields the defaults; a malformed file
//! is reported by [`load_config`] and downgraded to the defaults (with a
//! warning) by [`TetherConfig::load_or_default`].

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TetherError};

pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 300;
pub const DEFAULT_AUTO_READY_SECS: u64 = 60;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 10;
pub const DEFAULT_LOCK_GRACE_SECS: u64 = 5;

fn default_stale_threshold_secs() -> u64 {
    DEFAULT_STALE_THRESHOLD_SECS
}

fn default_auto_ready_secs() -> u64 {
    DEFAULT_AUTO_READY_SECS
}

fn default_heartbeat_secs() -> u64 {
    DEFAULT_HEARTBEAT_SECS
}

fn default_lock_grace_secs() -> u64 {
    DEFAULT_LOCK_GRACE_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TetherConfig {
    /// Records older than this are not trusted without a live lock.
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: u64,
    /// Working sessions with no tools in flight become Ready after this long.
    /// Zero disables the heuristic.
    #[serde(default = "default_auto_ready_secs")]
    pub auto_ready_secs: u64,
    /// Minimum spacing between same-state record refreshes. Kept below
    /// `auto_ready_secs` so a busy session is refreshed before it can be
    /// promoted.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// How long an unreadable lock directory is assumed to be mid-creation.
    #[serde(default = "default_lock_grace_secs")]
    pub lock_grace_secs: u64,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            stale_threshold_secs: DEFAULT_STALE_THRESHOLD_SECS,
            auto_ready_secs: DEFAULT_AUTO_READY_SECS,
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            lock_grace_secs: DEFAULT_LOCK_GRACE_SECS,
        }
    }
}

impl TetherConfig {
    pub fn stale_threshold(&self) -> Duration {
        secs(self.stale_threshold_secs)
    }

    /// `None` when auto-ready is disabled.
    pub fn auto_ready_after(&self) -> Option<Duration> {
        (self.auto_ready_secs > 0).then(|| secs(self.auto_ready_secs))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        secs(self.effective_heartbeat_secs())
    }

    /// Heartbeat spacing capped at half the auto-ready window.
    fn effective_heartbeat_secs(&self) -> u64 {
        match self.auto_ready_secs {
            0 => self.heartbeat_secs,
            window if self.heartbeat_secs >= window => window / 2,
            _ => self.heartbeat_secs,
        }
    }

    fn clamped(mut self) -> Self {
        let heartbeat_secs = self.effective_heartbeat_secs();
        if heartbeat_secs != self.heartbeat_secs {
            tracing::warn!(
                heartbeat_secs = self.heartbeat_secs,
                auto_ready_secs = self.auto_ready_secs,
                clamped_to = heartbeat_secs,
                "Clamping heartbeat_secs below auto_ready_secs"
            );
            self.heartbeat_secs = heartbeat_secs;
        }
        self
    }

    pub fn lock_grace(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lock_grace_secs)
    }

    /// Loads the config, falling back to defaults on any error.
    pub fn load_or_default(path: &Path) -> Self {
        match load_config(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    path = %path.display(),
                    "Ignoring unreadable config file, using defaults"
                );
                Self::default()
            }
        }
    }
}

/// Clamped so absurd config values cannot overflow `chrono::Duration`.
fn secs(value: u64) -> Duration {
    Duration::seconds(value.min(u64::from(u32::MAX)) as i64)
}

pub fn load_config(path: &Path) -> Result<TetherConfig> {
    if !path.exists() {
        return Ok(TetherConfig::default());
    }

    let content = fs_err::read_to_string(path)
        .map_err(|err| TetherError::io(format!("read {}", path.display()), err))?;
    toml::from_str::<TetherConfig>(&content)
        .map(TetherConfig::clamped)
        .map_err(|err| TetherError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = load_config(&temp_dir.path().join("config.toml")).expect("load config");
        assert_eq!(config, TetherConfig::default());
        assert_eq!(config.auto_ready_after(), Some(Duration::seconds(60)));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "auto_ready_secs = 0\nstale_threshold_secs = 120\n")
            .expect("write config");

        let config = load_config(&path).expect("load config");
        assert_eq!(config.stale_threshold_secs, 120);
        assert_eq!(config.auto_ready_after(), None);
        assert_eq!(config.heartbeat_secs, DEFAULT_HEARTBEAT_SECS);
    }

    #[test]
    fn heartbeat_is_clamped_below_auto_ready() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "auto_ready_secs = 60\nheartbeat_secs = 90\n").expect("write config");

        let config = load_config(&path).expect("load config");
        assert_eq!(config.heartbeat_secs, 30);
        assert!(config.heartbeat_interval() < config.auto_ready_after().unwrap());
    }

    #[test]
    fn heartbeat_interval_respects_auto_ready_without_loading() {
        let equal = TetherConfig {
            heartbeat_secs: 60,
            ..TetherConfig::default()
        };
        assert_eq!(equal.heartbeat_interval(), Duration::seconds(30));

        let disabled = TetherConfig {
            auto_ready_secs: 0,
            heartbeat_secs: 600,
            ..TetherConfig::default()
        };
        assert_eq!(disabled.heartbeat_interval(), Duration::seconds(600));
    }

    #[test]
    fn malformed_file_is_an_error_but_load_or_default_recovers() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "auto_ready_secs = \"soon\"").expect("write config");

        assert!(matches!(
            load_config(&path),
            Err(TetherError::ConfigMalformed { .. })
        ));
        assert_eq!(TetherConfig::load_or_default(&path), TetherConfig::default());
    }
}
