//! WebSocket Event Types
//!
//! Events exchanged between editors of one project over the STOMP channel.
//! Inbound messages arrive wrapped in a [`WsEnvelope`]; outbound messages
//! are sent bare to the destination returned by [`WsEvent::destination`].
//!
//! Mutation events carry an optional per-entity `version`. Receivers keep
//! the last applied version per entity and drop anything not newer.

use crate::payload::{ColumnPayload, RelationPayload, TablePayload};
use erdsync_core::{EntityKind, LockHolder};
use serde::{Deserialize, Serialize};

/// Topic every editor of a project subscribes to.
pub fn project_topic(project_key: i64) -> String {
    format!("/topic/project/{}", project_key)
}

/// Inbound broadcast wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsEnvelope {
    pub project_key: i64,
    /// Sender. Missing for server-originated events.
    #[serde(default)]
    pub user_key: Option<i64>,
    pub event: WsEvent,
}

/// Realtime events. Legacy upper-case tags are accepted on input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WsEvent {
    // ========================================================================
    // POSITION EVENTS
    // ========================================================================
    /// Continuous move while dragging.
    #[serde(alias = "TABLE_MOVE", rename_all = "camelCase")]
    TableMove {
        table_key: i64,
        x_position: f64,
        y_position: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },

    /// Final position once the drag ends.
    #[serde(alias = "TABLE_MOVE_END", rename_all = "camelCase")]
    TableMoveEnd {
        table_key: i64,
        x_position: f64,
        y_position: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },

    // ========================================================================
    // LOCK EVENTS
    // ========================================================================
    /// Lock request (outbound) or grant broadcast naming the holder (inbound).
    #[serde(alias = "TABLE_LOCK", rename_all = "camelCase")]
    TableLock {
        table_key: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_email: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },

    /// The server refused a lock request; names the current holder.
    #[serde(alias = "TABLE_LOCK_REJECTED", rename_all = "camelCase")]
    TableLockRejected {
        table_key: i64,
        #[serde(default)]
        user_email: Option<String>,
        #[serde(default)]
        user_name: Option<String>,
    },

    #[serde(alias = "TABLE_UNLOCK", rename_all = "camelCase")]
    TableUnlock {
        table_key: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_email: Option<String>,
    },

    // ========================================================================
    // TABLE EVENTS
    // ========================================================================
    #[serde(alias = "TABLE_NEW", alias = "TABLE_CREATE", rename_all = "camelCase")]
    TableCreate {
        table: TablePayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },

    #[serde(alias = "TABLE_UPDATE", alias = "TABLE_UPDATED", rename_all = "camelCase")]
    TableUpdate {
        table: TablePayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },

    #[serde(alias = "TABLE_DEL", alias = "TABLE_DELETE", rename_all = "camelCase")]
    TableDelete {
        table_key: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },

    // ========================================================================
    // COLUMN EVENTS
    // ========================================================================
    #[serde(alias = "COLUMN_NEW", alias = "COLUMN_CREATE", rename_all = "camelCase")]
    ColumnCreate {
        column: ColumnPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },

    #[serde(alias = "COLUMN_UPDATED", alias = "COLUMN_UPDATE", rename_all = "camelCase")]
    ColumnUpdate {
        column: ColumnPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },

    #[serde(alias = "COLUMN_DEL", alias = "COLUMN_DELETE", rename_all = "camelCase")]
    ColumnDelete {
        column_key: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },

    /// Column moved to a new zero-based position within its table.
    #[serde(alias = "COLUMN_REORDER", rename_all = "camelCase")]
    ColumnReorder {
        column_key: i64,
        column_order: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },

    // ========================================================================
    // RELATION EVENTS
    // ========================================================================
    #[serde(alias = "RELATION_NEW", alias = "RELATION_CREATE", rename_all = "camelCase")]
    RelationCreate {
        relation: RelationPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },

    #[serde(alias = "RELATION_UPDATE", rename_all = "camelCase")]
    RelationUpdate {
        relation: RelationPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },

    #[serde(alias = "RELATION_DELETE", alias = "RELATION_DEL", rename_all = "camelCase")]
    RelationDelete {
        relation_key: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },

    // ========================================================================
    // PRESENCE
    // ========================================================================
    #[serde(alias = "CURSOR_MOVE", rename_all = "camelCase")]
    CursorMove {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_key: Option<i64>,
        x_position: f64,
        y_position: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_email: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_color: Option<String>,
    },
}

/// Entity a versioned event applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionedEntity {
    pub kind: EntityKind,
    pub key: i64,
}

impl VersionedEntity {
    pub fn table(key: i64) -> Self {
        Self {
            kind: EntityKind::Table,
            key,
        }
    }

    pub fn column(key: i64) -> Self {
        Self {
            kind: EntityKind::Column,
            key,
        }
    }

    pub fn relation(key: i64) -> Self {
        Self {
            kind: EntityKind::Relation,
            key,
        }
    }
}

impl WsEvent {
    /// Get the event type as a string for logging/debugging.
    pub fn event_type(&self) -> &'static str {
        match self {
            WsEvent::TableMove { .. } => "table-move",
            WsEvent::TableMoveEnd { .. } => "table-move-end",
            WsEvent::TableLock { .. } => "table-lock",
            WsEvent::TableLockRejected { .. } => "table-lock-rejected",
            WsEvent::TableUnlock { .. } => "table-unlock",
            WsEvent::TableCreate { .. } => "table-create",
            WsEvent::TableUpdate { .. } => "table-update",
            WsEvent::TableDelete { .. } => "table-delete",
            WsEvent::ColumnCreate { .. } => "column-create",
            WsEvent::ColumnUpdate { .. } => "column-update",
            WsEvent::ColumnDelete { .. } => "column-delete",
            WsEvent::ColumnReorder { .. } => "column-reorder",
            WsEvent::RelationCreate { .. } => "relation-create",
            WsEvent::RelationUpdate { .. } => "relation-update",
            WsEvent::RelationDelete { .. } => "relation-delete",
            WsEvent::CursorMove { .. } => "cursor-move",
        }
    }

    /// STOMP destination an outbound event is sent to.
    pub fn destination(&self) -> &'static str {
        match self {
            WsEvent::TableMove { .. } => "/pub/erd/table/move",
            WsEvent::TableMoveEnd { .. } => "/pub/erd/table/move/end",
            WsEvent::TableLock { .. } => "/pub/erd/table/lock",
            WsEvent::TableLockRejected { .. } => "/pub/erd/table/lock/rejected",
            WsEvent::TableUnlock { .. } => "/pub/erd/table/unlock",
            WsEvent::TableCreate { .. } => "/pub/erd/table/create",
            WsEvent::TableUpdate { .. } => "/pub/erd/table/update",
            WsEvent::TableDelete { .. } => "/pub/erd/table/delete",
            WsEvent::ColumnCreate { .. } => "/pub/erd/column/create",
            WsEvent::ColumnUpdate { .. } => "/pub/erd/column/update",
            WsEvent::ColumnDelete { .. } => "/pub/erd/column/delete",
            WsEvent::ColumnReorder { .. } => "/pub/erd/column/reorder",
            WsEvent::RelationCreate { .. } => "/pub/erd/relation/create",
            WsEvent::RelationUpdate { .. } => "/pub/erd/relation/update",
            WsEvent::RelationDelete { .. } => "/pub/erd/relation/delete",
            WsEvent::CursorMove { .. } => "/pub/erd/cursor",
        }
    }

    /// Entity whose version this event advances, if it is a mutation.
    pub fn versioned_entity(&self) -> Option<VersionedEntity> {
        match self {
            WsEvent::TableMove { table_key, .. }
            | WsEvent::TableMoveEnd { table_key, .. }
            | WsEvent::TableDelete { table_key, .. } => Some(VersionedEntity::table(*table_key)),
            WsEvent::TableCreate { table, .. } | WsEvent::TableUpdate { table, .. } => {
                Some(VersionedEntity::table(table.table_key))
            }
            WsEvent::ColumnCreate { column, .. } | WsEvent::ColumnUpdate { column, .. } => {
                Some(VersionedEntity::column(column.column_key))
            }
            WsEvent::ColumnDelete { column_key, .. }
            | WsEvent::ColumnReorder { column_key, .. } => {
                Some(VersionedEntity::column(*column_key))
            }
            WsEvent::RelationCreate { relation, .. } | WsEvent::RelationUpdate { relation, .. } => {
                Some(VersionedEntity::relation(relation.relation_key))
            }
            WsEvent::RelationDelete { relation_key, .. } => {
                Some(VersionedEntity::relation(*relation_key))
            }
            WsEvent::TableLock { .. }
            | WsEvent::TableLockRejected { .. }
            | WsEvent::TableUnlock { .. }
            | WsEvent::CursorMove { .. } => None,
        }
    }

    pub fn version(&self) -> Option<u64> {
        match self {
            WsEvent::TableMove { version, .. }
            | WsEvent::TableMoveEnd { version, .. }
            | WsEvent::TableCreate { version, .. }
            | WsEvent::TableUpdate { version, .. }
            | WsEvent::TableDelete { version, .. }
            | WsEvent::ColumnCreate { version, .. }
            | WsEvent::ColumnUpdate { version, .. }
            | WsEvent::ColumnDelete { version, .. }
            | WsEvent::ColumnReorder { version, .. }
            | WsEvent::RelationCreate { version, .. }
            | WsEvent::RelationUpdate { version, .. }
            | WsEvent::RelationDelete { version, .. } => *version,
            _ => None,
        }
    }

    /// Stamp a version onto a mutation event. No-op for other events.
    pub fn with_version(mut self, stamped: u64) -> Self {
        match &mut self {
            WsEvent::TableMove { version, .. }
            | WsEvent::TableMoveEnd { version, .. }
            | WsEvent::TableCreate { version, .. }
            | WsEvent::TableUpdate { version, .. }
            | WsEvent::TableDelete { version, .. }
            | WsEvent::ColumnCreate { version, .. }
            | WsEvent::ColumnUpdate { version, .. }
            | WsEvent::ColumnDelete { version, .. }
            | WsEvent::ColumnReorder { version, .. }
            | WsEvent::RelationCreate { version, .. }
            | WsEvent::RelationUpdate { version, .. }
            | WsEvent::RelationDelete { version, .. } => *version = Some(stamped),
            _ => {}
        }
        self
    }

    /// Lock holder named by a lock event, when both fields allow it.
    pub fn lock_holder(&self) -> Option<LockHolder> {
        match self {
            WsEvent::TableLock {
                user_email: Some(email),
                user_name,
                ..
            }
            | WsEvent::TableLockRejected {
                user_email: Some(email),
                user_name,
                ..
            } => Some(LockHolder::new(
                email.clone(),
                user_name.clone().unwrap_or_default(),
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kebab_tag_roundtrip() {
        let event = WsEvent::TableMove {
            table_key: 4,
            x_position: 10.25,
            y_position: 3.0,
            version: Some(2),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "table-move");
        assert_eq!(json["tableKey"], 4);
        assert_eq!(json["xPosition"], 10.25);
        let back: WsEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_legacy_tags_accepted() {
        let envelope: WsEnvelope = serde_json::from_value(json!({
            "projectKey": 1,
            "userKey": 9,
            "event": {"type": "TABLE_DEL", "tableKey": 42}
        }))
        .unwrap();
        assert_eq!(
            envelope.event,
            WsEvent::TableDelete {
                table_key: 42,
                version: None
            }
        );

        let event: WsEvent = serde_json::from_value(json!({
            "type": "COLUMN_UPDATED",
            "column": {"columnKey": 3, "tableKey": 1, "logicalName": "Name"}
        }))
        .unwrap();
        assert_eq!(event.event_type(), "column-update");
    }

    #[test]
    fn test_lock_request_omits_holder() {
        let event = WsEvent::TableLock {
            table_key: 8,
            user_email: None,
            user_name: None,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "table-lock", "tableKey": 8})
        );
        assert_eq!(event.destination(), "/pub/erd/table/lock");
        assert!(event.lock_holder().is_none());
    }

    #[test]
    fn test_versioning() {
        let event = WsEvent::ColumnReorder {
            column_key: 5,
            column_order: 1,
            version: None,
        }
        .with_version(7);
        assert_eq!(event.version(), Some(7));
        assert_eq!(event.versioned_entity(), Some(VersionedEntity::column(5)));

        let cursor = WsEvent::CursorMove {
            project_key: None,
            x_position: 0.0,
            y_position: 0.0,
            user_email: None,
            user_name: None,
            user_color: None,
        }
        .with_version(3);
        assert_eq!(cursor.version(), None);
        assert_eq!(cursor.versioned_entity(), None);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result: Result<WsEvent, _> =
            serde_json::from_value(json!({"type": "TABLE_EXPLODE", "tableKey": 1}));
        assert!(result.is_err());
    }
}
