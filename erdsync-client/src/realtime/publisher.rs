//! Outbound realtime events.

use super::{RealtimeSink, VersionClock};
use crate::session::SessionUser;
use erdsync_core::{Column, Point, RemoteKey, Table};
use erdsync_events::{ColumnPayload, RelationPayload, TablePayload, WsEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{trace, warn};

/// Publishes local changes to the other editors of the project.
///
/// Cheap to clone. Mutation events are stamped with the next version of
/// their entity before they leave.
#[derive(Clone)]
pub struct RealtimePublisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    sink: Arc<dyn RealtimeSink>,
    clock: VersionClock,
    project_key: i64,
    user: SessionUser,
    move_throttle: Duration,
    last_move: Mutex<HashMap<RemoteKey, Instant>>,
}

impl RealtimePublisher {
    pub fn new(
        sink: Arc<dyn RealtimeSink>,
        clock: VersionClock,
        project_key: i64,
        user: SessionUser,
        move_throttle: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                sink,
                clock,
                project_key,
                user,
                move_throttle,
                last_move: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn clock(&self) -> &VersionClock {
        &self.inner.clock
    }

    fn publish(&self, event: WsEvent) -> bool {
        let event = match event.versioned_entity() {
            Some(entity) => {
                let version = self.inner.clock.next(entity);
                event.with_version(version)
            }
            None => event,
        };
        let event_type = event.event_type();
        if self.inner.sink.send(event) {
            trace!(event_type, "Realtime event published");
            true
        } else {
            warn!(event_type, "Realtime channel disconnected, event dropped");
            false
        }
    }

    // ========================================================================
    // POSITION
    // ========================================================================

    /// Continuous drag update. Returns false when throttled or dropped.
    pub fn table_move(&self, table_key: RemoteKey, position: Point) -> bool {
        let now = Instant::now();
        {
            let mut last_move = self
                .inner
                .last_move
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(last) = last_move.get(&table_key) {
                if now.duration_since(*last) < self.inner.move_throttle {
                    return false;
                }
            }
            last_move.insert(table_key, now);
        }
        let position = position.rounded();
        self.publish(WsEvent::TableMove {
            table_key: table_key.get(),
            x_position: position.x,
            y_position: position.y,
            version: None,
        })
    }

    /// Final position of a drag. Never throttled.
    pub fn table_move_end(&self, table_key: RemoteKey, position: Point) -> bool {
        self.inner
            .last_move
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&table_key);
        let position = position.rounded();
        self.publish(WsEvent::TableMoveEnd {
            table_key: table_key.get(),
            x_position: position.x,
            y_position: position.y,
            version: None,
        })
    }

    // ========================================================================
    // LOCKS
    // ========================================================================

    /// Lock request. The server answers with a `table-lock` naming the
    /// holder or a `table-lock-rejected`.
    pub fn table_lock(&self, table_key: RemoteKey) -> bool {
        self.publish(WsEvent::TableLock {
            table_key: table_key.get(),
            user_email: None,
            user_name: None,
        })
    }

    pub fn table_unlock(&self, table_key: RemoteKey) -> bool {
        self.publish(WsEvent::TableUnlock {
            table_key: table_key.get(),
            user_email: Some(self.inner.user.email.clone()),
        })
    }

    // ========================================================================
    // STRUCTURE
    // ========================================================================

    pub fn table_created(&self, table: &Table, table_key: RemoteKey) -> bool {
        self.publish(WsEvent::TableCreate {
            table: self.table_payload(table, table_key),
            version: None,
        })
    }

    pub fn table_updated(&self, table: &Table, table_key: RemoteKey) -> bool {
        self.publish(WsEvent::TableUpdate {
            table: self.table_payload(table, table_key),
            version: None,
        })
    }

    pub fn table_deleted(&self, table_key: RemoteKey) -> bool {
        self.publish(WsEvent::TableDelete {
            table_key: table_key.get(),
            version: None,
        })
    }

    fn table_payload(&self, table: &Table, table_key: RemoteKey) -> TablePayload {
        let mut payload = TablePayload::from_table(table, table_key);
        payload.project_key = Some(self.inner.project_key);
        payload
    }

    pub fn column_created(&self, column: &Column, key: RemoteKey, table_key: RemoteKey) -> bool {
        self.publish(WsEvent::ColumnCreate {
            column: ColumnPayload::from_column(column, key, table_key),
            version: None,
        })
    }

    pub fn column_updated(&self, column: &Column, key: RemoteKey, table_key: RemoteKey) -> bool {
        self.publish(WsEvent::ColumnUpdate {
            column: ColumnPayload::from_column(column, key, table_key),
            version: None,
        })
    }

    pub fn column_deleted(&self, column_key: RemoteKey) -> bool {
        self.publish(WsEvent::ColumnDelete {
            column_key: column_key.get(),
            version: None,
        })
    }

    pub fn column_reordered(&self, column_key: RemoteKey, column_order: usize) -> bool {
        self.publish(WsEvent::ColumnReorder {
            column_key: column_key.get(),
            column_order,
            version: None,
        })
    }

    pub fn relation_created(&self, relation: RelationPayload) -> bool {
        self.publish(WsEvent::RelationCreate {
            relation,
            version: None,
        })
    }

    pub fn relation_deleted(&self, relation_key: RemoteKey) -> bool {
        self.publish(WsEvent::RelationDelete {
            relation_key: relation_key.get(),
            version: None,
        })
    }

    // ========================================================================
    // PRESENCE
    // ========================================================================

    pub fn cursor_moved(&self, position: Point) -> bool {
        let position = position.rounded();
        self.publish(WsEvent::CursorMove {
            project_key: Some(self.inner.project_key),
            x_position: position.x,
            y_position: position.y,
            user_email: Some(self.inner.user.email.clone()),
            user_name: Some(self.inner.user.name.clone()),
            user_color: None,
        })
    }
}
