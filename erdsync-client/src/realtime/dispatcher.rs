//! Inbound realtime events.
//!
//! Each STOMP MESSAGE body is one [`WsEnvelope`]. The dispatcher drops
//! echoes of our own mutations and anything older than the last applied
//! version of its entity, then routes the event into the document, the
//! lock coordinator or the presence map. Nothing here fails: a bad message
//! is logged and the channel carries on.

use super::{PeerCursor, Presence, VersionClock};
use crate::document::DocumentHandle;
use crate::locks::LockCoordinator;
use erdsync_core::{AbsorbPolicy, Absorbed, DocumentStore, EntityRef, Point, RemoteKey, StoreResult};
use erdsync_events::{decode_envelope, WsEnvelope, WsEvent};
use tracing::{debug, trace, warn};

/// What became of one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Applied,
    /// Not newer than the last applied version of its entity.
    Stale,
    /// Our own broadcast coming back.
    OwnEcho,
    /// Valid, but nothing local matched or changed.
    Ignored,
    Malformed,
}

#[derive(Clone)]
pub struct Dispatcher {
    document: DocumentHandle,
    locks: LockCoordinator,
    clock: VersionClock,
    presence: Presence,
    project_key: i64,
    self_user_key: Option<i64>,
    self_email: String,
}

impl Dispatcher {
    pub fn new(
        document: DocumentHandle,
        locks: LockCoordinator,
        clock: VersionClock,
        presence: Presence,
        project_key: i64,
        self_user_key: Option<i64>,
        self_email: String,
    ) -> Self {
        Self {
            document,
            locks,
            clock,
            presence,
            project_key,
            self_user_key,
            self_email,
        }
    }

    pub fn handle_message(&self, body: &str) -> Dispatch {
        match decode_envelope(body) {
            Ok(envelope) => self.apply(envelope),
            Err(err) => {
                warn!(error = %err, "Malformed realtime message ignored");
                Dispatch::Malformed
            }
        }
    }

    pub fn apply(&self, envelope: WsEnvelope) -> Dispatch {
        let event_type = envelope.event.event_type();
        if envelope.project_key != self.project_key {
            debug!(
                event_type,
                project_key = envelope.project_key,
                "Event for another project ignored"
            );
            return Dispatch::Ignored;
        }

        let is_lock_event = matches!(
            envelope.event,
            WsEvent::TableLock { .. } | WsEvent::TableLockRejected { .. } | WsEvent::TableUnlock { .. }
        );
        if !is_lock_event && self.self_user_key.is_some() && envelope.user_key == self.self_user_key
        {
            trace!(event_type, "Own echo skipped");
            return Dispatch::OwnEcho;
        }

        if let (Some(entity), Some(version)) =
            (envelope.event.versioned_entity(), envelope.event.version())
        {
            if !self.clock.observe(entity, version, envelope.user_key) {
                debug!(
                    event_type,
                    key = entity.key,
                    version,
                    "Stale realtime event dropped"
                );
                return Dispatch::Stale;
            }
        }

        if self.route(envelope.event) {
            trace!(event_type, "Realtime event applied");
            Dispatch::Applied
        } else {
            Dispatch::Ignored
        }
    }

    fn route(&self, event: WsEvent) -> bool {
        let holder = event.lock_holder();
        match event {
            WsEvent::TableMove {
                table_key,
                x_position,
                y_position,
                ..
            }
            | WsEvent::TableMoveEnd {
                table_key,
                x_position,
                y_position,
                ..
            } => self.document.update(|store| {
                store
                    .find_table_by_remote_key(RemoteKey::new(table_key))
                    .is_some_and(|id| {
                        store.update_table_position(&id, Point::new(x_position, y_position))
                    })
            }),

            WsEvent::TableLock { table_key, .. } => {
                self.locks.apply_remote_lock(RemoteKey::new(table_key), holder)
            }
            WsEvent::TableLockRejected { table_key, .. } => {
                self.locks.apply_lock_rejected(RemoteKey::new(table_key), holder)
            }
            WsEvent::TableUnlock {
                table_key,
                user_email,
            } => self
                .locks
                .apply_remote_unlock(RemoteKey::new(table_key), user_email.as_deref()),

            WsEvent::TableCreate { table, .. } => self.absorb("table-create", |store| {
                store.confirm_table(&table.to_confirmed(), AbsorbPolicy::InsertMissing)
            }),
            WsEvent::TableUpdate { table, .. } => self.absorb("table-update", |store| {
                if store
                    .find_table_by_remote_key(RemoteKey::new(table.table_key))
                    .is_none()
                {
                    return Ok(None);
                }
                store.confirm_table(&table.to_confirmed(), AbsorbPolicy::ExistingOnly)
            }),
            WsEvent::TableDelete { table_key, .. } => self.document.update(|store| {
                store
                    .find_table_by_remote_key(RemoteKey::new(table_key))
                    .is_some_and(|id| store.purge(&EntityRef::Table(id)))
            }),

            WsEvent::ColumnCreate { column, .. } => self.absorb("column-create", |store| {
                store.confirm_column(&column.to_confirmed(), AbsorbPolicy::InsertMissing)
            }),
            WsEvent::ColumnUpdate { column, .. } => self.absorb("column-update", |store| {
                if store
                    .find_column_by_remote_key(RemoteKey::new(column.column_key))
                    .is_none()
                {
                    return Ok(None);
                }
                store.confirm_column(&column.to_confirmed(), AbsorbPolicy::ExistingOnly)
            }),
            WsEvent::ColumnDelete { column_key, .. } => self.document.update(|store| {
                store
                    .find_column_by_remote_key(RemoteKey::new(column_key))
                    .is_some_and(|(table, column)| {
                        store.purge(&EntityRef::Column { table, column })
                    })
            }),
            WsEvent::ColumnReorder {
                column_key,
                column_order,
                ..
            } => self.document.update(|store| {
                store
                    .find_column_by_remote_key(RemoteKey::new(column_key))
                    .is_some_and(|(table, column)| {
                        store.reorder_column(&table, &column, column_order)
                    })
            }),

            WsEvent::RelationCreate { relation, .. } => self.absorb("relation-create", |store| {
                store.confirm_relation(&relation.to_confirmed(), AbsorbPolicy::InsertMissing)
            }),
            WsEvent::RelationUpdate { relation, .. } => self.absorb("relation-update", |store| {
                if store
                    .find_relation_by_remote_key(RemoteKey::new(relation.relation_key))
                    .is_none()
                {
                    return Ok(None);
                }
                store.confirm_relation(&relation.to_confirmed(), AbsorbPolicy::ExistingOnly)
            }),
            WsEvent::RelationDelete { relation_key, .. } => self.document.update(|store| {
                store
                    .find_relation_by_remote_key(RemoteKey::new(relation_key))
                    .is_some_and(|id| store.purge(&EntityRef::Relation(id)))
            }),

            WsEvent::CursorMove {
                x_position,
                y_position,
                user_email,
                user_name,
                user_color,
                ..
            } => match user_email {
                Some(email) if email != self.self_email => {
                    self.presence.update(PeerCursor {
                        user_email: email,
                        user_name,
                        color: user_color,
                        position: Point::new(x_position, y_position),
                        seen_at: chrono::Utc::now(),
                    });
                    true
                }
                _ => false,
            },
        }
    }

    fn absorb(
        &self,
        event_type: &'static str,
        f: impl FnOnce(&mut DocumentStore) -> StoreResult<Option<Absorbed>>,
    ) -> bool {
        match self.document.update(f) {
            Ok(Some(absorbed)) => {
                debug!(event_type, id = %absorbed.id(), "Remote change absorbed");
                true
            }
            Ok(None) => {
                debug!(event_type, "Remote change matched nothing locally");
                false
            }
            Err(err) => {
                warn!(event_type, error = %err, "Remote change rejected by the document");
                false
            }
        }
    }
}
