//! Property-Based Tests for Table Locks
//!
//! **Property 1: Lock mutual exclusion**
//!
//! For any interleaving of local lock calls and lock broadcasts, this
//! client SHALL never send a lock request for a table it already claims
//! or knows another user holds, SHALL never clear another user's lock by
//! unlocking, SHALL only accept a grant for a pending request (handing any
//! other grant back with `table-unlock`), and the published held set SHALL
//! contain a table exactly when its state is `LockedBySelf`.
//!
//! **Property 2: Idempotent unlock**
//!
//! Unlocking a table in any state SHALL be safe to repeat and SHALL send
//! at most one `table-unlock`.
//!
//! **Property 3: Heartbeat cessation**
//!
//! Once a held lock is released, no further heartbeat for that table SHALL
//! be sent, even when a late grant or our own unlock echo arrives.

#[path = "support/session.rs"]
mod session_support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use erdsync_client::document::DocumentHandle;
use erdsync_client::locks::{LockCoordinator, LockError, LockStatus};
use erdsync_client::notifications::{NotificationKind, Notifier};
use erdsync_client::realtime::{RealtimePublisher, VersionClock};
use erdsync_client::session::SessionUser;
use erdsync_core::{DocumentStore, LockHolder};
use erdsync_test_utils::fixtures::{
    envelope, synced_table, two_table_project, PEER_EMAIL, PEER_NAME, PEER_USER_KEY,
    PROJECT_KEY, SELF_EMAIL, SELF_NAME, SELF_USER_KEY,
};
use erdsync_test_utils::{FakeBackend, RecordingPublisher, RemoteKey, TableLock, WsEvent};
use proptest::prelude::*;
use session_support::{table_id, test_session, TestSession};

// ============================================================================
// PROPERTY TEST STRATEGIES
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum LockOp {
    Lock,
    Unlock,
    Grant,
    PeerLock,
    PeerUnlock,
    UnlockEcho,
    Reject,
    Expire,
    ReleaseAll,
}

fn lock_op_strategy() -> impl Strategy<Value = LockOp> {
    prop_oneof![
        Just(LockOp::Lock),
        Just(LockOp::Unlock),
        Just(LockOp::Grant),
        Just(LockOp::PeerLock),
        Just(LockOp::PeerUnlock),
        Just(LockOp::UnlockEcho),
        Just(LockOp::Reject),
        Just(LockOp::Expire),
        Just(LockOp::ReleaseAll),
    ]
}

fn peer() -> LockHolder {
    LockHolder::new(PEER_EMAIL, PEER_NAME)
}

fn me() -> LockHolder {
    LockHolder::new(SELF_EMAIL, SELF_NAME)
}

struct Coordinator {
    locks: LockCoordinator,
    document: DocumentHandle,
    sink: Arc<RecordingPublisher>,
}

fn coordinator() -> Coordinator {
    let mut store = DocumentStore::new();
    store.replace_tables(vec![synced_table(1, "Users")], true);
    let document = DocumentHandle::new(store);
    let user = SessionUser {
        email: SELF_EMAIL.to_string(),
        name: SELF_NAME.to_string(),
        user_key: Some(SELF_USER_KEY),
    };
    let sink = Arc::new(RecordingPublisher::new());
    let publisher = RealtimePublisher::new(
        sink.clone(),
        VersionClock::new(Some(SELF_USER_KEY)),
        PROJECT_KEY,
        user.clone(),
        Duration::from_millis(50),
    );
    let (notifier, _notices) = Notifier::channel();
    let locks = LockCoordinator::new(
        document.clone(),
        publisher,
        user,
        Duration::from_secs(5),
        notifier,
    );
    Coordinator {
        locks,
        document,
        sink,
    }
}

fn state_of(c: &Coordinator) -> TableLock {
    c.locks.status(&table_id(1)).unwrap()
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// **Property 1: Lock mutual exclusion**
    #[test]
    fn prop_lock_mutual_exclusion(ops in prop::collection::vec(lock_op_strategy(), 1..40)) {
        let c = coordinator();
        let users = table_id(1);
        let key = RemoteKey::new(1);

        for op in ops {
            let before = state_of(&c);
            let sent_before = c.sink.events_of("table-lock").len();
            let unlocks_before = c.sink.events_of("table-unlock").len();

            match op {
                LockOp::Lock => {
                    let result = c.locks.lock_table(&users);
                    let sent = c.sink.events_of("table-lock").len() - sent_before;
                    match &before {
                        TableLock::Unlocked => {
                            prop_assert_eq!(result, Ok(LockStatus::Pending));
                            prop_assert_eq!(sent, 1);
                        }
                        TableLock::Requested { .. } => {
                            prop_assert_eq!(result, Ok(LockStatus::Pending));
                            prop_assert_eq!(sent, 0);
                        }
                        TableLock::LockedBySelf => {
                            prop_assert_eq!(result, Ok(LockStatus::Held));
                            prop_assert_eq!(sent, 0);
                        }
                        TableLock::LockedByOther(holder) => {
                            prop_assert_eq!(
                                result,
                                Err(LockError::HeldByOther { holder: holder.clone() })
                            );
                            prop_assert_eq!(sent, 0);
                        }
                    }
                }
                LockOp::Unlock => {
                    c.locks.unlock_table(&users);
                    let after = state_of(&c);
                    if matches!(before, TableLock::LockedByOther(_)) {
                        prop_assert_eq!(after, before);
                    } else {
                        prop_assert_eq!(after, TableLock::Unlocked);
                    }
                }
                LockOp::Grant => {
                    c.locks.apply_remote_lock(key, Some(me()));
                    let handed_back = c.sink.events_of("table-unlock").len() - unlocks_before;
                    match &before {
                        TableLock::Requested { .. } | TableLock::LockedBySelf => {
                            prop_assert_eq!(state_of(&c), TableLock::LockedBySelf);
                            prop_assert_eq!(handed_back, 0);
                        }
                        TableLock::Unlocked | TableLock::LockedByOther(_) => {
                            prop_assert_eq!(state_of(&c), TableLock::Unlocked);
                            prop_assert_eq!(handed_back, 1);
                        }
                    }
                }
                LockOp::PeerLock => {
                    c.locks.apply_remote_lock(key, Some(peer()));
                    prop_assert_eq!(state_of(&c), TableLock::LockedByOther(peer()));
                }
                LockOp::PeerUnlock => {
                    c.locks.apply_remote_unlock(key, Some(PEER_EMAIL));
                    if matches!(before, TableLock::LockedByOther(_)) {
                        prop_assert_eq!(state_of(&c), TableLock::Unlocked);
                    } else {
                        prop_assert_eq!(state_of(&c), before);
                    }
                }
                LockOp::UnlockEcho => {
                    c.locks.apply_remote_unlock(key, Some(SELF_EMAIL));
                    if before == TableLock::LockedBySelf {
                        prop_assert_eq!(state_of(&c), TableLock::Unlocked);
                    } else {
                        prop_assert_eq!(state_of(&c), before);
                    }
                }
                LockOp::Reject => {
                    c.locks.apply_lock_rejected(key, Some(peer()));
                    prop_assert_eq!(state_of(&c), TableLock::LockedByOther(peer()));
                }
                LockOp::Expire => {
                    c.locks.sweep_pending(Utc::now() + chrono::Duration::hours(1));
                    if matches!(before, TableLock::Requested { .. }) {
                        prop_assert_eq!(state_of(&c), TableLock::Unlocked);
                    } else {
                        prop_assert_eq!(state_of(&c), before);
                    }
                }
                LockOp::ReleaseAll => {
                    c.locks.release_all();
                    prop_assert!(!state_of(&c).is_claimed_by_self());
                }
            }

            let held = c.document.held_tables().borrow().contains(&key);
            prop_assert_eq!(held, state_of(&c) == TableLock::LockedBySelf);
        }
    }

    /// **Property 2: Idempotent unlock**
    #[test]
    fn prop_unlock_is_idempotent(
        setup in prop::collection::vec(lock_op_strategy(), 0..10),
        repeats in 2usize..5,
    ) {
        let c = coordinator();
        let users = table_id(1);
        let key = RemoteKey::new(1);
        for op in setup {
            match op {
                LockOp::Lock => { let _ = c.locks.lock_table(&users); }
                LockOp::Grant => { c.locks.apply_remote_lock(key, Some(me())); }
                LockOp::PeerLock => { c.locks.apply_remote_lock(key, Some(peer())); }
                _ => {}
            }
        }
        let unlocks_before = c.sink.events_of("table-unlock").len();
        let before = state_of(&c);

        for _ in 0..repeats {
            c.locks.unlock_table(&users);
        }

        let sent = c.sink.events_of("table-unlock").len() - unlocks_before;
        prop_assert!(sent <= 1);
        prop_assert_eq!(sent == 1, before.is_claimed_by_self());
        prop_assert!(!state_of(&c).is_claimed_by_self());
    }
}

// ============================================================================
// SESSION-LEVEL LOCK FLOWS
// ============================================================================

async fn loaded() -> TestSession {
    let test = test_session(FakeBackend::new().with_project(two_table_project()));
    test.session.workspace().load().await.unwrap();
    test
}

fn lock_broadcast(holder_email: &str, holder_name: &str, sender: i64) -> String {
    envelope(
        WsEvent::TableLock {
            table_key: 1,
            user_email: Some(holder_email.to_string()),
            user_name: Some(holder_name.to_string()),
        },
        Some(sender),
    )
}

/// **Property 3: Heartbeat cessation**
#[tokio::test(start_paused = true)]
async fn test_heartbeats_stop_after_unlock() {
    let test = loaded().await;
    let users = table_id(1);

    assert_eq!(test.session.locks().lock_table(&users), Ok(LockStatus::Pending));
    test.session
        .dispatcher()
        .handle_message(&lock_broadcast(SELF_EMAIL, SELF_NAME, SELF_USER_KEY));
    assert_eq!(test.session.locks().status(&users), Some(TableLock::LockedBySelf));

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(test.backend.heartbeats(), vec![RemoteKey::new(1)]);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(test.backend.heartbeats().len(), 2);

    test.session.locks().unlock_table(&users);
    let sent = test.backend.heartbeats().len();
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(test.backend.heartbeats().len(), sent);

    // Releasing again changes nothing.
    test.session.locks().unlock_table(&users);
    assert_eq!(test.sink.events_of("table-unlock").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_release_during_slow_heartbeat_skips_released_table() {
    let test = test_session(
        FakeBackend::new()
            .with_project(two_table_project())
            .with_latency(Duration::from_secs(2)),
    );
    test.session.workspace().load().await.unwrap();
    let (users, orders) = (table_id(1), table_id(2));

    for (table, key) in [(&users, 1), (&orders, 2)] {
        test.session.locks().lock_table(table).unwrap();
        test.session.dispatcher().handle_message(&envelope(
            WsEvent::TableLock {
                table_key: key,
                user_email: Some(SELF_EMAIL.to_string()),
                user_name: Some(SELF_NAME.to_string()),
            },
            Some(SELF_USER_KEY),
        ));
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(test.backend.heartbeats(), vec![RemoteKey::new(1)]);

    test.session.locks().unlock_table(&orders);
    tokio::time::sleep(Duration::from_secs(35)).await;

    let heartbeats = test.backend.heartbeats();
    assert!(!heartbeats.contains(&RemoteKey::new(2)));
    assert!(heartbeats.len() > 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_grant_after_unlock_stays_released() {
    let test = loaded().await;
    let users = table_id(1);

    test.session.locks().lock_table(&users).unwrap();
    test.session.locks().unlock_table(&users);
    test.session
        .dispatcher()
        .handle_message(&lock_broadcast(SELF_EMAIL, SELF_NAME, SELF_USER_KEY));
    test.session.dispatcher().handle_message(&envelope(
        WsEvent::TableUnlock {
            table_key: 1,
            user_email: Some(SELF_EMAIL.to_string()),
        },
        Some(SELF_USER_KEY),
    ));

    assert_eq!(test.session.locks().status(&users), Some(TableLock::Unlocked));
    assert_eq!(test.sink.events_of("table-unlock").len(), 2);
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert!(test.backend.heartbeats().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_grant_after_timeout_is_handed_back() {
    let test = loaded().await;
    let users = table_id(1);
    test.session.locks().lock_table(&users).unwrap();
    test.session
        .locks()
        .sweep_pending(Utc::now() + chrono::Duration::seconds(6));

    test.session
        .dispatcher()
        .handle_message(&lock_broadcast(SELF_EMAIL, SELF_NAME, SELF_USER_KEY));

    assert_eq!(test.session.locks().status(&users), Some(TableLock::Unlocked));
    assert_eq!(test.sink.events_of("table-unlock").len(), 1);
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert!(test.backend.heartbeats().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_own_unlock_from_elsewhere_ends_hold() {
    let test = loaded().await;
    let users = table_id(1);
    test.session.locks().lock_table(&users).unwrap();
    test.session
        .dispatcher()
        .handle_message(&lock_broadcast(SELF_EMAIL, SELF_NAME, SELF_USER_KEY));
    tokio::time::sleep(Duration::from_millis(1)).await;
    let sent = test.backend.heartbeats().len();

    test.session.dispatcher().handle_message(&envelope(
        WsEvent::TableUnlock {
            table_key: 1,
            user_email: Some(SELF_EMAIL.to_string()),
        },
        Some(SELF_USER_KEY),
    ));

    assert_eq!(test.session.locks().status(&users), Some(TableLock::Unlocked));
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(test.backend.heartbeats().len(), sent);
}

#[tokio::test(start_paused = true)]
async fn test_peer_lock_blocks_request_and_notifies() {
    let mut test = loaded().await;
    let users = table_id(1);

    test.session
        .dispatcher()
        .handle_message(&lock_broadcast(PEER_EMAIL, PEER_NAME, PEER_USER_KEY));
    let err = test.session.locks().lock_table(&users).unwrap_err();
    assert_eq!(err.to_string(), "Kim is editing this table");
    assert!(test.sink.events_of("table-lock").is_empty());

    let notices = test.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NotificationKind::LockContention);
}

#[tokio::test(start_paused = true)]
async fn test_rejection_reverts_pending_request() {
    let mut test = loaded().await;
    let users = table_id(1);
    test.session.locks().lock_table(&users).unwrap();

    test.session.dispatcher().handle_message(&envelope(
        WsEvent::TableLockRejected {
            table_key: 1,
            user_email: Some(PEER_EMAIL.to_string()),
            user_name: Some(PEER_NAME.to_string()),
        },
        None,
    ));

    assert_eq!(
        test.session.locks().status(&users),
        Some(TableLock::LockedByOther(peer()))
    );
    let notices = test.notices();
    assert_eq!(notices[0].kind, NotificationKind::LockContention);
}

#[tokio::test(start_paused = true)]
async fn test_takeover_revokes_and_stops_heartbeats() {
    let mut test = loaded().await;
    let users = table_id(1);
    test.session.locks().lock_table(&users).unwrap();
    test.session
        .dispatcher()
        .handle_message(&lock_broadcast(SELF_EMAIL, SELF_NAME, SELF_USER_KEY));
    tokio::time::sleep(Duration::from_millis(1)).await;
    let sent = test.backend.heartbeats().len();

    test.session
        .dispatcher()
        .handle_message(&lock_broadcast(PEER_EMAIL, PEER_NAME, PEER_USER_KEY));
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(test.backend.heartbeats().len(), sent);
    assert!(test
        .notices()
        .iter()
        .any(|n| n.kind == NotificationKind::LockRevoked));
}

#[tokio::test(start_paused = true)]
async fn test_ungranted_request_times_out() {
    let mut test = loaded().await;
    let users = table_id(1);
    test.session.locks().lock_table(&users).unwrap();

    let expired = test
        .session
        .locks()
        .sweep_pending(Utc::now() + chrono::Duration::seconds(6));
    assert_eq!(expired, vec![users.clone()]);
    assert_eq!(test.session.locks().status(&users), Some(TableLock::Unlocked));
    assert!(test
        .notices()
        .iter()
        .any(|n| n.kind == NotificationKind::LockTimeout));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_claims() {
    let test = loaded().await;
    test.session.locks().lock_table(&table_id(1)).unwrap();
    test.session
        .dispatcher()
        .handle_message(&lock_broadcast(SELF_EMAIL, SELF_NAME, SELF_USER_KEY));
    test.session.locks().lock_table(&table_id(2)).unwrap();

    test.session.shutdown();

    assert_eq!(test.sink.events_of("table-unlock").len(), 2);
    assert_eq!(
        test.session.locks().status(&table_id(1)),
        Some(TableLock::Unlocked)
    );
    assert_eq!(
        test.session.locks().status(&table_id(2)),
        Some(TableLock::Unlocked)
    );
}
