//! Realtime event channel between editors of one project.
//!
//! - `connection`: STOMP-over-WebSocket manager with reconnect backoff
//! - `publisher`: outbound events, stamped and throttled
//! - `dispatcher`: inbound events, version-checked and routed
//! - `presence`: peer cursors
//!
//! Every mutation event carries a per-entity version from [`VersionClock`].
//! Versions are hybrid logical: `max(last + 1, wall clock millis)`, so a
//! client that joins late still produces versions newer than what peers
//! have seen. Ties are broken by the sender's user key.

pub mod connection;
pub mod dispatcher;
pub mod presence;
pub mod publisher;

pub use connection::{spawn_connection, ConnectionHandle, RealtimeEvent};
pub use dispatcher::{Dispatch, Dispatcher};
pub use presence::{PeerCursor, Presence};
pub use publisher::RealtimePublisher;

use chrono::Utc;
use erdsync_events::{VersionedEntity, WsEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Outbound half of the realtime channel.
pub trait RealtimeSink: Send + Sync {
    /// Hand an event to the live connection. Returns false when there is
    /// none and the event was dropped.
    fn send(&self, event: WsEvent) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    version: u64,
    writer: Option<i64>,
}

/// Last applied version per entity, shared by publisher and dispatcher.
#[derive(Debug, Clone, Default)]
pub struct VersionClock {
    self_key: Option<i64>,
    stamps: Arc<Mutex<HashMap<VersionedEntity, Stamp>>>,
}

impl VersionClock {
    pub fn new(self_key: Option<i64>) -> Self {
        Self {
            self_key,
            stamps: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<VersionedEntity, Stamp>> {
        self.stamps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Version for a local mutation of `entity`. Recorded as applied.
    pub fn next(&self, entity: VersionedEntity) -> u64 {
        let mut stamps = self.lock();
        let last = stamps.get(&entity).map_or(0, |s| s.version);
        let version = last.saturating_add(1).max(unix_millis());
        stamps.insert(
            entity,
            Stamp {
                version,
                writer: self.self_key,
            },
        );
        version
    }

    /// Record a remote version. Returns false when it is not newer than
    /// the last applied one and the event must be dropped.
    pub fn observe(&self, entity: VersionedEntity, version: u64, writer: Option<i64>) -> bool {
        let mut stamps = self.lock();
        if let Some(current) = stamps.get(&entity) {
            let newer = version > current.version
                || (version == current.version && writer > current.writer);
            if !newer {
                return false;
            }
        }
        stamps.insert(entity, Stamp { version, writer });
        true
    }

    pub fn current(&self, entity: VersionedEntity) -> Option<u64> {
        self.lock().get(&entity).map(|s| s.version)
    }
}

fn unix_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_is_monotonic() {
        let clock = VersionClock::new(Some(1));
        let entity = VersionedEntity::table(4);
        let first = clock.next(entity);
        let second = clock.next(entity);
        assert!(second > first);
        assert_eq!(clock.current(entity), Some(second));
    }

    #[test]
    fn test_next_outruns_observed_versions() {
        let clock = VersionClock::new(Some(1));
        let entity = VersionedEntity::column(9);
        let far_future = unix_millis() + 1_000_000;
        assert!(clock.observe(entity, far_future, Some(2)));
        assert_eq!(clock.next(entity), far_future + 1);
    }

    #[test]
    fn test_observe_rejects_stale_and_duplicate() {
        let clock = VersionClock::new(None);
        let entity = VersionedEntity::relation(3);
        assert!(clock.observe(entity, 10, Some(5)));
        assert!(!clock.observe(entity, 9, Some(5)));
        assert!(!clock.observe(entity, 10, Some(5)));
        assert!(clock.observe(entity, 11, Some(5)));
    }

    #[test]
    fn test_equal_versions_break_ties_by_writer() {
        let clock = VersionClock::new(None);
        let entity = VersionedEntity::table(1);
        assert!(clock.observe(entity, 10, Some(2)));
        assert!(!clock.observe(entity, 10, Some(1)));
        assert!(clock.observe(entity, 10, Some(3)));
        assert!(!clock.observe(entity, 10, None));
    }

    #[test]
    fn test_entities_are_independent() {
        let clock = VersionClock::new(None);
        assert!(clock.observe(VersionedEntity::table(1), 10, None));
        assert!(clock.observe(VersionedEntity::column(1), 5, None));
        assert!(clock.observe(VersionedEntity::table(2), 1, None));
    }
}
