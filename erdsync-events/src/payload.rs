//! Entity payloads shared by REST responses and realtime broadcasts.
//!
//! The backend speaks camelCase JSON with integer keys. These types mirror
//! that shape and convert into the core model.

use erdsync_core::{
    schema::{join_args, parse_data_type},
    Cardinality, Column, ConfirmedColumn, ConfirmedRelation, ConfirmedTable, CorrelationId,
    EntityKind, LocalId, Point, Relation, RelationKind, RelationType, RemoteKey, SyncState, Table,
    TableColor, TableLock, TypeArg, DEFAULT_COLUMN_LOGICAL_NAME, DEFAULT_COLUMN_PHYSICAL_NAME,
    DEFAULT_DATA_TYPE,
};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

// ============================================================================
// TABLES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePayload {
    pub table_key: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_key: Option<i64>,
    #[serde(default)]
    pub logical_name: String,
    #[serde(default)]
    pub physical_name: String,
    /// Project listings spell these `xposition` / `yposition`.
    #[serde(default, alias = "xposition")]
    pub x_position: f64,
    #[serde(default, alias = "yposition")]
    pub y_position: f64,
    #[serde(default)]
    pub color_hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_request_id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<ColumnPayload>>,
}

impl TablePayload {
    /// Payload describing a local table that already has a remote key.
    pub fn from_table(table: &Table, key: RemoteKey) -> Self {
        Self {
            table_key: key.get(),
            project_key: None,
            logical_name: table.logical_name.clone(),
            physical_name: table.physical_name.clone(),
            x_position: table.position.x,
            y_position: table.position.y,
            color_hex: Some(table.color.hex().to_string()),
            client_request_id: table.correlation,
            columns: None,
        }
    }

    pub fn position(&self) -> Point {
        Point::new(self.x_position, self.y_position)
    }

    pub fn to_confirmed(&self) -> ConfirmedTable {
        ConfirmedTable {
            remote_key: RemoteKey::new(self.table_key),
            correlation: self.client_request_id,
            logical_name: self.logical_name.clone(),
            physical_name: self.physical_name.clone(),
            position: self.position(),
            color: TableColor::from_hex(self.color_hex.as_deref()),
            columns: self
                .columns
                .as_ref()
                .map(|cols| cols.iter().map(ColumnPayload::to_confirmed).collect()),
        }
    }

    /// Synced table with its columns, identified as `table-{key}`.
    pub fn to_table(&self, columns: Vec<Column>) -> Table {
        let key = RemoteKey::new(self.table_key);
        Table {
            id: LocalId::for_remote(EntityKind::Table, key),
            remote_key: Some(key),
            correlation: self.client_request_id,
            sync: SyncState::Synced,
            logical_name: self.logical_name.clone(),
            physical_name: self.physical_name.clone(),
            position: self.position(),
            color: TableColor::from_hex(self.color_hex.as_deref()),
            columns,
            lock: TableLock::Unlocked,
        }
    }

    /// Convert a self-contained payload (columns nested) into a table.
    pub fn to_table_with_nested(&self) -> Table {
        let mut columns: Vec<Column> = self
            .columns
            .iter()
            .flatten()
            .map(ColumnPayload::to_column)
            .collect();
        columns.sort_by_key(|c| c.display_order);
        let mut table = self.to_table(columns);
        table.renumber_columns();
        table
    }
}

// ============================================================================
// COLUMNS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnPayload {
    pub column_key: i64,
    pub table_key: i64,
    #[serde(default)]
    pub logical_name: String,
    #[serde(default)]
    pub physical_name: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub data_detail: Option<Vec<TypeArg>>,
    #[serde(default = "default_true")]
    pub is_nullable: bool,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_foreign_key: bool,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default)]
    pub is_incremental: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub column_order: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_request_id: Option<CorrelationId>,
}

fn or_default(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

impl ColumnPayload {
    /// Payload describing a synced column.
    pub fn from_column(column: &Column, key: RemoteKey, table_key: RemoteKey) -> Self {
        let (data_type, args) = parse_data_type(&column.data_type, column.data_detail.as_deref());
        Self {
            column_key: key.get(),
            table_key: table_key.get(),
            logical_name: column.logical_name.clone(),
            physical_name: column.physical_name.clone(),
            data_type,
            data_detail: (!args.is_empty()).then_some(args),
            is_nullable: column.nullable,
            is_primary_key: column.is_primary_key,
            is_foreign_key: column.is_foreign_key,
            is_unique: column.is_primary_key,
            is_incremental: false,
            default_value: Some(column.default_value.clone()).filter(|v| !v.is_empty()),
            comment: Some(column.comment.clone()).filter(|v| !v.is_empty()),
            column_order: Some(column.display_order),
            client_request_id: column.correlation,
        }
    }

    pub fn to_confirmed(&self) -> ConfirmedColumn {
        ConfirmedColumn {
            remote_key: RemoteKey::new(self.column_key),
            correlation: self.client_request_id,
            table_key: RemoteKey::new(self.table_key),
            logical_name: or_default(&self.logical_name, DEFAULT_COLUMN_LOGICAL_NAME),
            physical_name: or_default(&self.physical_name, DEFAULT_COLUMN_PHYSICAL_NAME),
            data_type: or_default(&self.data_type, DEFAULT_DATA_TYPE),
            data_detail: self.data_detail.as_deref().and_then(join_args),
            nullable: self.is_nullable,
            is_primary_key: self.is_primary_key,
            is_foreign_key: self.is_foreign_key,
            default_value: self.default_value.clone(),
            comment: self.comment.clone(),
            display_order: self.column_order,
        }
    }

    pub fn to_column(&self) -> Column {
        let mut column = self.to_confirmed().to_column();
        column.display_order = self.column_order.unwrap_or(usize::MAX);
        column
    }
}

// ============================================================================
// RELATIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationPayload {
    pub relation_key: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_key: Option<i64>,
    pub from_table_key: i64,
    #[serde(default)]
    pub from_column_key: Option<i64>,
    pub to_table_key: i64,
    #[serde(default)]
    pub to_column_key: Option<i64>,
    #[serde(default)]
    pub relation_type: String,
    #[serde(default)]
    pub constraint_name: Option<String>,
    #[serde(default)]
    pub on_delete_action: Option<String>,
    #[serde(default)]
    pub on_update_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_request_id: Option<CorrelationId>,
}

impl RelationPayload {
    /// Unknown relation types render as one-or-many.
    pub fn cardinality(&self) -> Cardinality {
        self.relation_type
            .parse::<RelationType>()
            .map(Cardinality::from_relation_type)
            .unwrap_or(Cardinality::OneOrMany)
    }

    pub fn kind(&self) -> RelationKind {
        self.constraint_name
            .as_deref()
            .map(RelationKind::from_constraint_label)
            .unwrap_or(RelationKind::NonIdentifying)
    }

    pub fn to_confirmed(&self) -> ConfirmedRelation {
        ConfirmedRelation {
            remote_key: RemoteKey::new(self.relation_key),
            correlation: self.client_request_id,
            source_table_key: RemoteKey::new(self.from_table_key),
            source_column_key: self.from_column_key.map(RemoteKey::new),
            target_table_key: RemoteKey::new(self.to_table_key),
            kind: self.kind(),
            cardinality: self.cardinality(),
        }
    }
}

// ============================================================================
// PROJECT LISTING
// ============================================================================

/// Full project listing: tables, a flat column list and relations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectErd {
    #[serde(default)]
    pub project_key: i64,
    #[serde(default)]
    pub tables: Vec<TablePayload>,
    #[serde(default)]
    pub columns: Vec<ColumnPayload>,
    #[serde(default)]
    pub relations: Vec<RelationPayload>,
}

impl ProjectErd {
    /// Convert into document tables and relations.
    ///
    /// Columns are grouped under their table by key and ordered by
    /// `columnOrder`; relations whose source table has no primary key are
    /// dropped.
    pub fn into_document(self) -> (Vec<Table>, Vec<Relation>) {
        let tables: Vec<Table> = self
            .tables
            .iter()
            .map(|payload| {
                let mut columns: Vec<Column> = self
                    .columns
                    .iter()
                    .filter(|c| c.table_key == payload.table_key)
                    .map(ColumnPayload::to_column)
                    .collect();
                columns.sort_by_key(|c| c.display_order);
                let mut table = payload.to_table(columns);
                table.renumber_columns();
                table
            })
            .collect();

        let relations = self
            .relations
            .iter()
            .filter_map(|payload| {
                let source = tables
                    .iter()
                    .find(|t| t.remote_key == Some(RemoteKey::new(payload.from_table_key)))?;
                let source_column = payload
                    .from_column_key
                    .and_then(|key| {
                        source
                            .columns
                            .iter()
                            .find(|c| c.remote_key == Some(RemoteKey::new(key)))
                    })
                    .or_else(|| source.primary_key())?
                    .id
                    .clone();
                let key = RemoteKey::new(payload.relation_key);
                Some(Relation {
                    id: LocalId::for_remote(EntityKind::Relation, key),
                    remote_key: Some(key),
                    correlation: None,
                    sync: SyncState::Synced,
                    source_table: source.id.clone(),
                    source_column,
                    target_table: LocalId::for_remote(
                        EntityKind::Table,
                        RemoteKey::new(payload.to_table_key),
                    ),
                    kind: payload.kind(),
                    cardinality: payload.cardinality(),
                })
            })
            .collect();

        (tables, relations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing() -> ProjectErd {
        serde_json::from_value(json!({
            "projectKey": 7,
            "tables": [
                {"tableKey": 1, "logicalName": "Users", "physicalName": "users",
                 "xposition": 10.5, "yposition": 20.0, "colorHex": "16A34A"},
                {"tableKey": 2, "logicalName": "Orders", "physicalName": "orders",
                 "xposition": 300.0, "yposition": 20.0, "colorHex": null}
            ],
            "columns": [
                {"columnKey": 12, "tableKey": 1, "logicalName": "Email", "physicalName": "email",
                 "dataType": "VARCHAR", "dataDetail": ["255"], "isNullable": false,
                 "isPrimaryKey": false, "isForeignKey": false, "defaultValue": null,
                 "comment": "", "columnOrder": 1},
                {"columnKey": 11, "tableKey": 1, "logicalName": "Id", "physicalName": "id",
                 "dataType": "BIGINT", "dataDetail": null, "isNullable": false,
                 "isPrimaryKey": true, "isForeignKey": false, "columnOrder": 0}
            ],
            "relations": [
                {"relationKey": 5, "fromTableKey": 1, "fromColumnKey": 11, "toTableKey": 2,
                 "relationType": "OPTIONAL_ONE_TO_MANY", "constraintName": "식별"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_listing_into_document() {
        let (tables, relations) = listing().into_document();
        assert_eq!(tables.len(), 2);
        let users = &tables[0];
        assert_eq!(users.id.as_str(), "table-1");
        assert_eq!(users.position, Point::new(10.5, 20.0));
        assert_eq!(users.color, TableColor::User2);
        assert_eq!(tables[1].color, TableColor::Blue);
        assert_eq!(users.columns[0].physical_name, "id");
        assert_eq!(users.columns[1].data_detail.as_deref(), Some("255"));
        assert_eq!(users.columns[1].display_order, 1);
        assert!(!users.columns[1].nullable);

        let relation = &relations[0];
        assert_eq!(relation.id.as_str(), "relation-5");
        assert_eq!(relation.source_column.as_str(), "column-11");
        assert_eq!(relation.target_table.as_str(), "table-2");
        assert_eq!(relation.cardinality, Cardinality::ZeroOrMany);
        assert_eq!(relation.kind, RelationKind::Identifying);
    }

    #[test]
    fn test_create_response_uses_camel_positions() {
        let payload: TablePayload = serde_json::from_value(json!({
            "tableKey": 42, "projectKey": 7, "logicalName": "Orders",
            "physicalName": "Untitled", "xPosition": 200.0, "yPosition": 140.0,
            "colorHex": "2563eb"
        }))
        .unwrap();
        let confirmed = payload.to_confirmed();
        assert_eq!(confirmed.remote_key, RemoteKey::new(42));
        assert_eq!(confirmed.position, Point::new(200.0, 140.0));
        assert!(confirmed.correlation.is_none());
    }

    #[test]
    fn test_column_payload_blank_names_get_defaults() {
        let payload: ColumnPayload = serde_json::from_value(json!({
            "columnKey": 3, "tableKey": 1, "logicalName": "", "physicalName": "",
            "dataType": ""
        }))
        .unwrap();
        let column = payload.to_column();
        assert_eq!(column.logical_name, "Logical Name");
        assert_eq!(column.data_type, "VARCHAR");
        assert!(column.nullable);
    }

    #[test]
    fn test_unknown_relation_type_defaults() {
        let payload: RelationPayload = serde_json::from_value(json!({
            "relationKey": 1, "fromTableKey": 1, "toTableKey": 2, "relationType": "WEIRD"
        }))
        .unwrap();
        assert_eq!(payload.cardinality(), Cardinality::OneOrMany);
        assert_eq!(payload.kind(), RelationKind::NonIdentifying);
    }
}
