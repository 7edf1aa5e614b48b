//! Session state tracking.
//!
//! Answers "what is the agent doing in this project?" from two independent
//! signals:
//!
//! ```text
//! hook events ──► reducer ──► sessions.json ─┐
//!                                            ├──► resolver ──► ResolvedState
//! lock holder ──► locks/{key}.lock/ ─────────┘
//! ```
//!
//! 1. **Locks** (primary): a lock directory with a live holder pid means the
//!    session is running. A background lock holder removes it when the agent
//!    exits.
//! 2. **Records**: the reducer's last known state and `working_on` text. A
//!    record without a live lock is trusted only until it goes stale.
//!
//! # Module Structure
//!
//! - [`reducer`]: pure event → state transitions
//! - [`store`]: `sessions.json` persistence
//! - [`lock`]: lock directories and holder verification
//! - [`resolver`]: fuses locks and records per path
//! - [`cleanup`]: removes orphaned locks, records, shells and holders
//! - [`path_utils`]: path normalization shared by all of the above

pub mod cleanup;
pub mod lock;
pub mod path_utils;
pub mod reducer;
pub mod resolver;
pub mod store;
pub mod types;

#[cfg(test)]
mod integration_tests;

pub use cleanup::{run_startup_cleanup, CleanupStats};
pub use lock::{LockHandle, LockStore};
pub use path_utils::{normalize_path_for_comparison, normalize_path_for_matching};
pub use reducer::{reduce_session, reduce_state, SessionUpdate, Transition};
pub use resolver::{ResolvedState, StateResolver, StateSource};
pub use store::SessionStore;
pub use types::{LockRecord, SessionRecord};
