//! Schema conversions.
//!
//! Two directions are supported:
//! - document → version schema, the payload stored when saving a version;
//! - drafted schema (as produced by import validation) → preview tables.

use crate::{
    entities::{Column, Point, Table},
    store::DocumentStore,
    Cardinality, EntityKind, LocalId, ReferentialAction, RelationType, SyncState, TableColor,
    TableLock,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

static SIZED_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*([A-Z_ ]+?)\s*\((.*)\)\s*$").expect("static regex"));

// ============================================================================
// DATA TYPES
// ============================================================================

/// One argument of a sized data type, e.g. the `255` in `VARCHAR(255)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeArg {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for TypeArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeArg::Number(n) => write!(f, "{}", n),
            TypeArg::Text(s) => f.write_str(s),
        }
    }
}

/// Join type arguments back into the `10,2` form kept on columns.
pub fn join_args(args: &[TypeArg]) -> Option<String> {
    if args.is_empty() {
        return None;
    }
    Some(
        args.iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn parse_args(raw: &str) -> Vec<TypeArg> {
    raw.split(',')
        .map(str::trim)
        .filter(|arg| !arg.is_empty())
        .map(|arg| match arg.parse::<i64>() {
            Ok(n) => TypeArg::Number(n),
            Err(_) => TypeArg::Text(arg.to_string()),
        })
        .collect()
}

/// Split a data type into its base name and arguments.
///
/// `detail` wins when present; it may be a full sized type (`DECIMAL(10,2)`)
/// or a bare argument list (`10,2`).
pub fn parse_data_type(data_type: &str, detail: Option<&str>) -> (String, Vec<TypeArg>) {
    if let Some(detail) = detail.map(str::trim).filter(|d| !d.is_empty()) {
        if let Some(caps) = SIZED_TYPE.captures(detail) {
            return (caps[1].trim().to_uppercase(), parse_args(&caps[2]));
        }
        let (base, _) = parse_data_type(data_type, None);
        return (base, parse_args(detail));
    }
    match SIZED_TYPE.captures(data_type) {
        Some(caps) => (caps[1].trim().to_uppercase(), parse_args(&caps[2])),
        None => (data_type.trim().to_uppercase(), Vec::new()),
    }
}

// ============================================================================
// VERSION SCHEMA
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionColumn {
    pub column_key: i64,
    pub physical_name: String,
    pub logical_name: String,
    pub data_type: String,
    pub data_detail: Vec<TypeArg>,
    pub is_primary_key: bool,
    pub is_nullable: bool,
    pub is_unique: bool,
    pub is_foreign_key: bool,
    pub is_incremental: bool,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionTable {
    pub table_key: i64,
    pub physical_name: String,
    pub logical_name: String,
    pub columns: Vec<VersionColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRelation {
    pub from_table_key: i64,
    pub to_table_key: i64,
    pub relation_type: RelationType,
    pub constraint_name: String,
    pub on_delete_action: ReferentialAction,
    pub on_update_action: ReferentialAction,
}

/// Frozen schema stored with a saved version.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VersionSchema {
    pub tables: Vec<VersionTable>,
    pub relations: Vec<VersionRelation>,
}

fn version_column(column: &Column) -> Option<VersionColumn> {
    let Some(key) = column.remote_key else {
        warn!(column_id = %column.id, "Skipping unsynced column in version");
        return None;
    };
    let (data_type, data_detail) = parse_data_type(&column.data_type, column.data_detail.as_deref());
    let default_value = Some(column.default_value.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    Some(VersionColumn {
        column_key: key.get(),
        physical_name: column.physical_name.clone(),
        logical_name: column.logical_name.clone(),
        data_type,
        data_detail,
        is_primary_key: column.is_primary_key,
        is_nullable: column.nullable,
        is_unique: column.is_primary_key,
        is_foreign_key: column.is_foreign_key,
        is_incremental: false,
        default_value,
    })
}

fn version_table(table: &Table) -> Option<VersionTable> {
    let Some(key) = table.remote_key else {
        warn!(table_id = %table.id, "Skipping unsynced table in version");
        return None;
    };
    let columns: Vec<_> = table.columns.iter().filter_map(version_column).collect();
    if columns.is_empty() {
        warn!(table_id = %table.id, "Skipping table without synced columns in version");
        return None;
    }
    Some(VersionTable {
        table_key: key.get(),
        physical_name: table.physical_name.clone(),
        logical_name: table.logical_name.clone(),
        columns,
    })
}

/// Relation type recorded in a version. One-to-many relations become
/// optional when any foreign key in the child matching the parent's key is
/// nullable.
pub fn version_relation_type(cardinality: Cardinality, fk_nullable: bool) -> RelationType {
    match cardinality {
        Cardinality::One
        | Cardinality::ExactlyOne
        | Cardinality::ZeroOrOne
        | Cardinality::ZeroOrOneToOne => RelationType::OneToOne,
        Cardinality::OneOrMany if fk_nullable => RelationType::OptionalOneToMany,
        Cardinality::OneOrMany => RelationType::StrictOneToMany,
        Cardinality::ZeroOrMany => RelationType::OptionalOneToMany,
    }
}

/// Convert the synced part of the document into a version schema.
pub fn to_version_schema(store: &DocumentStore) -> VersionSchema {
    let tables = store.tables().iter().filter_map(version_table).collect();

    let relations = store
        .relations()
        .iter()
        .filter_map(|relation| {
            let source = store.table(&relation.source_table)?;
            let target = store.table(&relation.target_table)?;
            let (Some(from), Some(to)) = (source.remote_key, target.remote_key) else {
                warn!(relation_id = %relation.id, "Skipping relation between unsynced tables");
                return None;
            };
            let parent_keys: Vec<&str> = source
                .columns
                .iter()
                .filter(|c| c.is_primary_key)
                .map(|c| c.physical_name.as_str())
                .collect();
            let fk_nullable = target
                .columns
                .iter()
                .filter(|c| c.is_foreign_key && parent_keys.contains(&c.physical_name.as_str()))
                .any(|c| c.nullable);
            let relation_type = version_relation_type(relation.cardinality, fk_nullable);
            let (on_delete, on_update) = relation_type.constraint_actions();
            Some(VersionRelation {
                from_table_key: from.get(),
                to_table_key: to.get(),
                relation_type,
                constraint_name: format!("fk_{}_{}", source.physical_name, target.physical_name),
                on_delete_action: on_delete,
                on_update_action: on_update,
            })
        })
        .collect();

    VersionSchema { tables, relations }
}

// ============================================================================
// DRAFTED SCHEMA PREVIEW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub constraints: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftTable {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<DraftColumn>,
}

/// Schema drafted outside the editor, e.g. a corrected import.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DraftSchema {
    #[serde(default)]
    pub tables: Vec<DraftTable>,
}

/// Canvas slot of the n-th preview table: a zig-zag row.
pub fn preview_position(index: usize) -> Point {
    Point::new(200.0 + index as f64 * 280.0, 150.0 + (index % 2) as f64 * 220.0)
}

fn default_from_constraints(constraints: &[String]) -> String {
    constraints
        .iter()
        .find(|c| c.trim_start().to_uppercase().starts_with("DEFAULT"))
        .map(|c| {
            c.trim_start()[7..]
                .trim()
                .trim_matches(|ch| ch == '\'' || ch == '"')
                .to_string()
        })
        .unwrap_or_default()
}

fn has_constraint(constraints: &[String], name: &str) -> bool {
    constraints.iter().any(|c| c.trim().eq_ignore_ascii_case(name))
}

/// Build unsynced preview tables from a drafted schema.
pub fn preview_tables(draft: &DraftSchema) -> Vec<Table> {
    draft
        .tables
        .iter()
        .enumerate()
        .map(|(index, drafted)| {
            let columns = drafted
                .columns
                .iter()
                .enumerate()
                .map(|(order, col)| {
                    let constraints = col.constraints.as_deref().unwrap_or_default();
                    let (data_type, args) = parse_data_type(&col.data_type, None);
                    Column {
                        id: LocalId::generate(EntityKind::Column),
                        remote_key: None,
                        correlation: None,
                        sync: SyncState::Provisional,
                        is_primary_key: has_constraint(constraints, "PRIMARY KEY"),
                        is_foreign_key: has_constraint(constraints, "FOREIGN KEY"),
                        logical_name: col.name.clone(),
                        physical_name: col.name.clone(),
                        data_type,
                        data_detail: (!args.is_empty()).then(|| col.data_type.trim().to_string()),
                        nullable: !has_constraint(constraints, "NOT NULL"),
                        default_value: default_from_constraints(constraints),
                        comment: String::new(),
                        display_order: order,
                    }
                })
                .collect();
            Table {
                id: LocalId::generate(EntityKind::Table),
                remote_key: None,
                correlation: None,
                sync: SyncState::Provisional,
                logical_name: drafted.name.clone(),
                physical_name: drafted.name.clone(),
                position: preview_position(index),
                color: TableColor::cycle(index),
                columns,
                lock: TableLock::Unlocked,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ColumnKind, EntityRef, RelationKind, RemoteKey};

    #[test]
    fn test_parse_data_type() {
        assert_eq!(
            parse_data_type("VARCHAR(255)", None),
            ("VARCHAR".to_string(), vec![TypeArg::Number(255)])
        );
        assert_eq!(
            parse_data_type("decimal(10, 2)", None),
            (
                "DECIMAL".to_string(),
                vec![TypeArg::Number(10), TypeArg::Number(2)]
            )
        );
        assert_eq!(parse_data_type("int", None), ("INT".to_string(), vec![]));
        assert_eq!(
            parse_data_type("VARCHAR", Some("VARCHAR(64)")),
            ("VARCHAR".to_string(), vec![TypeArg::Number(64)])
        );
        assert_eq!(
            parse_data_type("ENUM", Some("'a','b'")),
            (
                "ENUM".to_string(),
                vec![TypeArg::Text("'a'".into()), TypeArg::Text("'b'".into())]
            )
        );
    }

    fn synced_store() -> DocumentStore {
        let mut store = DocumentStore::new();
        let users = store.create_table("Users").unwrap();
        store.update_table_identifier(&users, "users");
        let orders = store.create_table("Orders").unwrap();
        store.update_table_identifier(&orders, "orders");
        let draft = store.create_table("Draft").unwrap();
        store.add_column(&draft, ColumnKind::Regular).unwrap();

        store
            .attach_remote_key(&EntityRef::Table(users.clone()), RemoteKey::new(1))
            .unwrap();
        store
            .attach_remote_key(&EntityRef::Table(orders.clone()), RemoteKey::new(2))
            .unwrap();

        let pk = store.add_column(&users, ColumnKind::PrimaryKey).unwrap();
        store
            .update_column(
                &users,
                &pk,
                &crate::ColumnPatch {
                    physical_name: Some("user_id".into()),
                    data_type: Some("BIGINT".into()),
                    nullable: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .attach_remote_key(
                &EntityRef::Column {
                    table: users.clone(),
                    column: pk,
                },
                RemoteKey::new(10),
            )
            .unwrap();

        let fk = store.add_column(&orders, ColumnKind::Regular).unwrap();
        store
            .update_column(
                &orders,
                &fk,
                &crate::ColumnPatch {
                    physical_name: Some("user_id".into()),
                    is_foreign_key: Some(true),
                    nullable: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .attach_remote_key(
                &EntityRef::Column {
                    table: orders.clone(),
                    column: fk,
                },
                RemoteKey::new(20),
            )
            .unwrap();

        store
            .create_relation(&users, &orders, RelationKind::NonIdentifying, Cardinality::OneOrMany)
            .unwrap();
        store
    }

    #[test]
    fn test_version_schema_skips_unsynced() {
        let schema = to_version_schema(&synced_store());
        let keys: Vec<_> = schema.tables.iter().map(|t| t.table_key).collect();
        assert_eq!(keys, vec![1, 2]);
        assert!(schema.tables[0].columns[0].is_unique);
        assert_eq!(schema.tables[0].columns[0].data_type, "BIGINT");
    }

    #[test]
    fn test_version_relation_uses_fk_nullability() {
        let schema = to_version_schema(&synced_store());
        let relation = &schema.relations[0];
        assert_eq!(relation.constraint_name, "fk_users_orders");
        assert_eq!(relation.relation_type, RelationType::OptionalOneToMany);
        assert_eq!(relation.on_delete_action, ReferentialAction::SetNull);
        assert_eq!(relation.on_update_action, ReferentialAction::Cascade);
    }

    #[test]
    fn test_version_schema_serializes_camel_case() {
        let json = serde_json::to_value(to_version_schema(&synced_store())).unwrap();
        assert_eq!(json["tables"][0]["tableKey"], 1);
        assert_eq!(json["tables"][0]["columns"][0]["defaultValue"], serde_json::Value::Null);
        assert_eq!(json["relations"][0]["onDeleteAction"], "SET NULL");
    }

    #[test]
    fn test_preview_tables_layout_and_constraints() {
        let draft: DraftSchema = serde_json::from_value(serde_json::json!({
            "tables": [
                {"name": "users", "columns": [
                    {"name": "id", "type": "BIGINT", "constraints": ["PRIMARY KEY", "NOT NULL"]},
                    {"name": "email", "type": "VARCHAR(255)", "constraints": ["NOT NULL"]},
                    {"name": "created_at", "type": "TIMESTAMP", "constraints": ["DEFAULT 'now'"]}
                ]},
                {"name": "orders", "columns": [
                    {"name": "user_id", "type": "BIGINT", "constraints": ["FOREIGN KEY"]},
                    {"name": "memo", "type": "TEXT", "constraints": null}
                ]}
            ]
        }))
        .unwrap();
        let tables = preview_tables(&draft);
        assert_eq!(tables[0].position, Point::new(200.0, 150.0));
        assert_eq!(tables[1].position, Point::new(480.0, 370.0));
        assert_eq!(tables[1].color, TableColor::User2);

        let users = &tables[0].columns;
        assert!(users[0].is_primary_key && !users[0].nullable);
        assert_eq!(users[1].data_type, "VARCHAR");
        assert_eq!(users[1].data_detail.as_deref(), Some("VARCHAR(255)"));
        assert_eq!(users[2].default_value, "now");
        assert!(tables[1].columns[0].is_foreign_key);
        assert!(tables[1].columns[1].nullable);
    }
}
