//! # tether-core
//!
//! Session state tracking and terminal activation for coding agents.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency.
//! - **Multi-process**: Hooks, lock holders and front ends share files under
//!   one storage root. Writes are atomic replaces; reads never fail.
//! - **Graceful degradation**: Missing or corrupt files read as empty.
//! - **Injectable**: Paths come from [`StorageConfig`], liveness from a
//!   [`ProcessProbe`]. Nothing reaches for global state.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tether_core::TetherEngine;
//!
//! let engine = TetherEngine::new()?;
//! engine.ingest(&event)?;
//! let state = engine.resolve("/Users/pete/Code/app")?;
//! ```

pub mod activation;
pub mod boundaries;
pub mod config;
pub mod engine;
pub mod error;
pub mod process;
pub mod shell;
pub mod state;
pub mod storage;
pub mod types;

pub use activation::{
    format_decision_trace, resolve_activation, ActivationAction, ActivationDecision,
    DecisionTrace, IdeType, TerminalType, TmuxContext,
};
pub use boundaries::{find_project_boundary, ProjectBoundary};
pub use config::{load_config, TetherConfig};
pub use engine::{IngestOutcome, IngestReport, TetherEngine, TickStats};
pub use error::{Result, TetherError};
pub use process::{Liveness, ProcessProbe, SharedProbe, StaticProbe, SystemProbe};
pub use shell::{ShellCwdTracker, ShellEntry, ShellRegistry};
pub use state::{
    CleanupStats, LockHandle, LockRecord, LockStore, ResolvedState, SessionRecord, SessionStore,
    StateResolver, StateSource,
};
pub use storage::StorageConfig;
pub use types::{ParentApp, SessionState};

pub use tether_protocol::{EventEnvelope, EventType, HookInput};
