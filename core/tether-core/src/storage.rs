//! Storage configuration and path management for Tether.
//!
//! All file locations are derived from a single [`StorageConfig`] value that
//! callers pass in explicitly. Production code uses [`StorageConfig::from_env`]
//! (honoring `TETHER_HOME`, defaulting to `~/.tether`); tests point
//! [`StorageConfig::with_root`] at a temporary directory.

use std::path::{Path, PathBuf};

use crate::error::{Result, TetherError};

pub const ROOT_ENV: &str = "TETHER_HOME";
const DEFAULT_DIR_NAME: &str = ".tether";

/// Central configuration for all Tether storage paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    /// Resolves the storage root from `TETHER_HOME`, else `~/.tether`.
    pub fn from_env() -> Result<Self> {
        if let Some(root) = std::env::var_os(ROOT_ENV).filter(|value| !value.is_empty()) {
            return Ok(Self::with_root(PathBuf::from(root)));
        }
        let home = dirs::home_dir().ok_or(TetherError::HomeDirNotFound)?;
        Ok(Self::with_root(home.join(DEFAULT_DIR_NAME)))
    }

    /// Creates a StorageConfig with a custom root directory.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Returns the root directory for Tether data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to sessions.json (persisted session records).
    pub fn sessions_file(&self) -> PathBuf {
        self.root.join("sessions.json")
    }

    /// Path to shell-cwd.json (shell registry).
    pub fn shell_registry_file(&self) -> PathBuf {
        self.root.join("shell-cwd.json")
    }

    /// Path to config.toml (tunables).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Directories
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to locks/ (one `<session>.lock` directory per active session).
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Path to logs/ (hook and lock-holder logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}
