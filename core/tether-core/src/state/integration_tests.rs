//! Integration coverage for reducer/store/lock/resolver behavior.

use chrono::{DateTime, Duration, Utc};
use tempfile::tempdir;
use tether_protocol::{EventEnvelope, EventType};

use super::lock::LockStore;
use super::reducer::{reduce_session, SessionUpdate};
use super::resolver::{StateResolver, StateSource};
use super::store::SessionStore;
use crate::process::StaticProbe;
use crate::types::SessionState;

const PID: u32 = 5150;
const CWD: &str = "/nowhere/project";

fn apply(store: &mut SessionStore, event: &EventEnvelope) {
    let current = event.session_id.as_deref().and_then(|id| store.get(id));
    match reduce_session(current, event) {
        SessionUpdate::Upsert(record) | SessionUpdate::Heartbeat(record) => store.upsert(record),
        SessionUpdate::Delete { session_id } => {
            store.delete(&session_id);
        }
        SessionUpdate::Skip => {}
    }
}

fn event(event_type: EventType, session_id: &str, at: DateTime<Utc>) -> EventEnvelope {
    let mut event = EventEnvelope::new(event_type, at);
    event.session_id = Some(session_id.to_string());
    event.cwd = Some(CWD.to_string());
    event.pid = Some(PID);
    if event_type == EventType::Stop {
        event.stop_hook_active = Some(false);
    }
    event
}

fn state_at(locks: &LockStore, store: &SessionStore, now: DateTime<Utc>) -> SessionState {
    StateResolver::new(locks, store)
        .with_thresholds(Duration::minutes(5), None)
        .resolve_at(CWD, now)
        .unwrap()
        .state
}

#[test]
fn full_session_lifecycle() {
    let temp = tempdir().unwrap();
    let locks = LockStore::new(temp.path().join("locks"), StaticProbe::new().with_alive(PID).into_shared());
    let mut store = SessionStore::new_in_memory();
    let t0 = Utc::now();

    locks.create_lock("s1", CWD, PID).unwrap();

    apply(&mut store, &event(EventType::SessionStart, "s1", t0));
    assert_eq!(state_at(&locks, &store, t0), SessionState::Ready);

    apply(&mut store, &event(EventType::UserPromptSubmit, "s1", t0 + Duration::seconds(1)));
    assert_eq!(state_at(&locks, &store, t0), SessionState::Working);

    apply(&mut store, &event(EventType::PreToolUse, "s1", t0 + Duration::seconds(2)));
    apply(&mut store, &event(EventType::PostToolUse, "s1", t0 + Duration::seconds(3)));
    assert_eq!(state_at(&locks, &store, t0), SessionState::Working);

    apply(&mut store, &event(EventType::Stop, "s1", t0 + Duration::seconds(4)));
    assert_eq!(state_at(&locks, &store, t0), SessionState::Ready);

    apply(&mut store, &event(EventType::SessionEnd, "s1", t0 + Duration::seconds(5)));
    assert!(store.get("s1").is_none());
}

#[test]
fn permission_wait_then_resume() {
    let temp = tempdir().unwrap();
    let locks = LockStore::new(temp.path().join("locks"), StaticProbe::new().with_alive(PID).into_shared());
    let mut store = SessionStore::new_in_memory();
    let t0 = Utc::now();
    locks.create_lock("s2", CWD, PID).unwrap();

    apply(&mut store, &event(EventType::UserPromptSubmit, "s2", t0));
    apply(&mut store, &event(EventType::PermissionRequest, "s2", t0 + Duration::seconds(1)));
    assert_eq!(state_at(&locks, &store, t0), SessionState::Waiting);

    apply(&mut store, &event(EventType::PostToolUse, "s2", t0 + Duration::seconds(2)));
    assert_eq!(state_at(&locks, &store, t0), SessionState::Working);
}

#[test]
fn compaction_shows_until_next_prompt() {
    let temp = tempdir().unwrap();
    let locks = LockStore::new(temp.path().join("locks"), StaticProbe::new().with_alive(PID).into_shared());
    let mut store = SessionStore::new_in_memory();
    let t0 = Utc::now();
    locks.create_lock("s3", CWD, PID).unwrap();

    apply(&mut store, &event(EventType::SessionStart, "s3", t0));
    apply(&mut store, &event(EventType::PreCompact, "s3", t0 + Duration::seconds(1)));
    assert_eq!(state_at(&locks, &store, t0), SessionState::Compacting);

    apply(&mut store, &event(EventType::UserPromptSubmit, "s3", t0 + Duration::seconds(2)));
    assert_eq!(state_at(&locks, &store, t0), SessionState::Working);
}

#[test]
fn out_of_order_events_do_not_rewind_state() {
    let mut store = SessionStore::new_in_memory();
    let t0 = Utc::now();

    apply(&mut store, &event(EventType::UserPromptSubmit, "s4", t0 + Duration::seconds(10)));
    apply(&mut store, &event(EventType::Stop, "s4", t0));
    assert_eq!(store.get("s4").unwrap().state, SessionState::Working);
}

#[test]
fn dead_holder_falls_back_to_fresh_record_then_idle() {
    let temp = tempdir().unwrap();
    let lock_dir = temp.path().join("locks");
    let writer = LockStore::new(lock_dir.clone(), StaticProbe::new().with_alive(PID).into_shared());
    writer.create_lock("s5", CWD, PID).unwrap();

    let mut store = SessionStore::new_in_memory();
    let t0 = Utc::now();
    apply(&mut store, &event(EventType::UserPromptSubmit, "s5", t0));

    let reader = LockStore::new(lock_dir, StaticProbe::new().into_shared());
    let fresh = StateResolver::new(&reader, &store)
        .with_thresholds(Duration::minutes(5), None)
        .resolve_at(CWD, t0 + Duration::seconds(30))
        .unwrap();
    assert_eq!(fresh.state, SessionState::Working);
    assert_eq!(fresh.source, StateSource::Record);

    let stale = StateResolver::new(&reader, &store)
        .with_thresholds(Duration::minutes(5), None)
        .resolve_at(CWD, t0 + Duration::minutes(6))
        .unwrap();
    assert_eq!(stale.state, SessionState::Idle);
}

#[test]
fn concurrent_sessions_in_one_project_stay_distinct() {
    let temp = tempdir().unwrap();
    let probe = StaticProbe::new().with_alive(PID).with_alive(PID + 1);
    let locks = LockStore::new(temp.path().join("locks"), probe.into_shared());
    let mut store = SessionStore::new_in_memory();
    let t0 = Utc::now();

    locks.create_lock("a", CWD, PID).unwrap();
    locks.create_lock("b", CWD, PID + 1).unwrap();

    apply(&mut store, &event(EventType::SessionStart, "a", t0));
    let mut working = event(EventType::UserPromptSubmit, "b", t0);
    working.pid = Some(PID + 1);
    apply(&mut store, &working);

    let resolved = StateResolver::new(&locks, &store)
        .with_thresholds(Duration::minutes(5), None)
        .resolve_at(CWD, t0)
        .unwrap();
    assert_eq!(resolved.state, SessionState::Working);
    assert_eq!(resolved.session_id.as_deref(), Some("b"));
    assert_eq!(resolved.session_count, 2);

    locks.release_lock("b").unwrap();
    assert_eq!(state_at(&locks, &store, t0), SessionState::Ready);
}
