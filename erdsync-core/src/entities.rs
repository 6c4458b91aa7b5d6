//! Document entity structures

use crate::{
    Cardinality, ColumnKind, CorrelationId, EntityKind, LocalId, RelationKind, RemoteKey,
    SyncState, TableColor, TableLock, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Physical name given to tables created without one.
pub const DEFAULT_IDENTIFIER: &str = "Untitled";
/// Where new tables appear on the canvas.
pub const DEFAULT_TABLE_POSITION: Point = Point { x: 200.0, y: 140.0 };
pub const DEFAULT_COLUMN_LOGICAL_NAME: &str = "Logical Name";
pub const DEFAULT_COLUMN_PHYSICAL_NAME: &str = "Physical Name";
pub const DEFAULT_DATA_TYPE: &str = "VARCHAR";

/// Canvas coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Round both coordinates to two decimals, the precision used on the wire.
    pub fn rounded(&self) -> Self {
        Self {
            x: (self.x * 100.0).round() / 100.0,
            y: (self.y * 100.0).round() / 100.0,
        }
    }

    pub fn offset(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// Column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: LocalId,
    pub remote_key: Option<RemoteKey>,
    pub correlation: Option<CorrelationId>,
    pub sync: SyncState,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub logical_name: String,
    pub physical_name: String,
    pub data_type: String,
    pub data_detail: Option<String>,
    pub nullable: bool,
    pub default_value: String,
    pub comment: String,
    /// Dense zero-based position within the owning table.
    pub display_order: usize,
}

impl Column {
    /// Fresh provisional column with editor defaults.
    pub fn provisional(kind: ColumnKind) -> Self {
        Self {
            id: LocalId::generate(EntityKind::Column),
            remote_key: None,
            correlation: Some(CorrelationId::new()),
            sync: SyncState::Provisional,
            is_primary_key: kind == ColumnKind::PrimaryKey,
            is_foreign_key: false,
            logical_name: DEFAULT_COLUMN_LOGICAL_NAME.to_string(),
            physical_name: DEFAULT_COLUMN_PHYSICAL_NAME.to_string(),
            data_type: DEFAULT_DATA_TYPE.to_string(),
            data_detail: None,
            nullable: true,
            default_value: String::new(),
            comment: String::new(),
            display_order: 0,
        }
    }

    pub fn kind(&self) -> ColumnKind {
        if self.is_primary_key {
            ColumnKind::PrimaryKey
        } else {
            ColumnKind::Regular
        }
    }

    /// Apply a partial update, returning which fields actually changed.
    pub fn apply(&mut self, patch: &ColumnPatch) -> Vec<ColumnField> {
        let mut changed = Vec::new();
        macro_rules! set {
            ($field:ident, $tag:expr) => {
                if let Some(value) = &patch.$field {
                    if &self.$field != value {
                        self.$field = value.clone();
                        changed.push($tag);
                    }
                }
            };
        }
        set!(logical_name, ColumnField::LogicalName);
        set!(physical_name, ColumnField::PhysicalName);
        set!(data_type, ColumnField::DataType);
        set!(nullable, ColumnField::Nullable);
        set!(is_primary_key, ColumnField::PrimaryKey);
        set!(is_foreign_key, ColumnField::ForeignKey);
        set!(default_value, ColumnField::DefaultValue);
        set!(comment, ColumnField::Comment);
        if let Some(detail) = &patch.data_detail {
            if &self.data_detail != detail {
                self.data_detail = detail.clone();
                changed.push(ColumnField::DataDetail);
            }
        }
        changed
    }

    /// Patch carrying the current value of each listed field.
    pub fn patch_for(&self, fields: &[ColumnField]) -> ColumnPatch {
        let mut patch = ColumnPatch::default();
        for field in fields {
            match field {
                ColumnField::LogicalName => patch.logical_name = Some(self.logical_name.clone()),
                ColumnField::PhysicalName => {
                    patch.physical_name = Some(self.physical_name.clone())
                }
                ColumnField::DataType => patch.data_type = Some(self.data_type.clone()),
                ColumnField::DataDetail => patch.data_detail = Some(self.data_detail.clone()),
                ColumnField::Nullable => patch.nullable = Some(self.nullable),
                ColumnField::PrimaryKey => patch.is_primary_key = Some(self.is_primary_key),
                ColumnField::ForeignKey => patch.is_foreign_key = Some(self.is_foreign_key),
                ColumnField::DefaultValue => {
                    patch.default_value = Some(self.default_value.clone())
                }
                ColumnField::Comment => patch.comment = Some(self.comment.clone()),
            }
        }
        patch
    }
}

/// Editable column field, used to track which fields a commit must send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ColumnField {
    LogicalName,
    PhysicalName,
    DataType,
    DataDetail,
    Nullable,
    PrimaryKey,
    ForeignKey,
    DefaultValue,
    Comment,
}

/// Partial column update. `None` leaves the field untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnPatch {
    pub logical_name: Option<String>,
    pub physical_name: Option<String>,
    pub data_type: Option<String>,
    pub data_detail: Option<Option<String>>,
    pub nullable: Option<bool>,
    pub is_primary_key: Option<bool>,
    pub is_foreign_key: Option<bool>,
    pub default_value: Option<String>,
    pub comment: Option<String>,
}

impl ColumnPatch {
    pub fn is_empty(&self) -> bool {
        *self == ColumnPatch::default()
    }
}

/// Table on the diagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: LocalId,
    pub remote_key: Option<RemoteKey>,
    pub correlation: Option<CorrelationId>,
    pub sync: SyncState,
    pub logical_name: String,
    pub physical_name: String,
    pub position: Point,
    pub color: TableColor,
    pub columns: Vec<Column>,
    pub lock: TableLock,
}

impl Table {
    /// Fresh provisional table with editor defaults.
    pub fn provisional(logical_name: impl Into<String>) -> Self {
        Self {
            id: LocalId::generate(EntityKind::Table),
            remote_key: None,
            correlation: Some(CorrelationId::new()),
            sync: SyncState::Provisional,
            logical_name: logical_name.into(),
            physical_name: DEFAULT_IDENTIFIER.to_string(),
            position: DEFAULT_TABLE_POSITION,
            color: TableColor::default(),
            columns: Vec::new(),
            lock: TableLock::Unlocked,
        }
    }

    pub fn column(&self, id: &LocalId) -> Option<&Column> {
        self.columns.iter().find(|c| &c.id == id)
    }

    pub fn column_mut(&mut self, id: &LocalId) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| &c.id == id)
    }

    /// First primary-key column, the source of any relation from this table.
    pub fn primary_key(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.is_primary_key)
    }

    /// Rewrite display orders so they are dense and match vector order.
    pub fn renumber_columns(&mut self) {
        for (index, column) in self.columns.iter_mut().enumerate() {
            column.display_order = index;
        }
    }
}

/// Relation between two tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: LocalId,
    pub remote_key: Option<RemoteKey>,
    pub correlation: Option<CorrelationId>,
    pub sync: SyncState,
    pub source_table: LocalId,
    /// Primary-key column of the source table.
    pub source_column: LocalId,
    pub target_table: LocalId,
    pub kind: RelationKind,
    pub cardinality: Cardinality,
}

/// Free-floating annotation. Never persisted remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: LocalId,
    pub position: Point,
    pub content: String,
    pub color: TableColor,
}

/// Partial note update.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NotePatch {
    pub position: Option<Point>,
    pub content: Option<String>,
    pub color: Option<TableColor>,
}

/// Canvas pan and zoom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewTransform {
    pub pan: Point,
    pub zoom: f64,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            pan: Point::default(),
            zoom: 1.0,
        }
    }
}

/// Who captured a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotAuthor {
    pub id: String,
    pub name: String,
}

/// Immutable copy of the document used for manual version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: LocalId,
    pub name: String,
    pub created_at: Timestamp,
    pub tables: Vec<Table>,
    pub notes: Vec<Note>,
    pub relations: Vec<Relation>,
    pub view: ViewTransform,
    pub author: Option<SnapshotAuthor>,
}

/// Address of a structural entity inside the document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    Table(LocalId),
    Column { table: LocalId, column: LocalId },
    Relation(LocalId),
}

impl EntityRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Table(_) => EntityKind::Table,
            EntityRef::Column { .. } => EntityKind::Column,
            EntityRef::Relation(_) => EntityKind::Relation,
        }
    }
}

// ============================================================================
// SERVER-CONFIRMED SHAPES
// ============================================================================

/// Table as confirmed by the backend (create response or broadcast).
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedTable {
    pub remote_key: RemoteKey,
    pub correlation: Option<CorrelationId>,
    pub logical_name: String,
    pub physical_name: String,
    pub position: Point,
    pub color: TableColor,
    /// Present when the confirmation carries the full column list.
    pub columns: Option<Vec<ConfirmedColumn>>,
}

/// Column as confirmed by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedColumn {
    pub remote_key: RemoteKey,
    pub correlation: Option<CorrelationId>,
    pub table_key: RemoteKey,
    pub logical_name: String,
    pub physical_name: String,
    pub data_type: String,
    pub data_detail: Option<String>,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub default_value: Option<String>,
    pub comment: Option<String>,
    pub display_order: Option<usize>,
}

impl ConfirmedColumn {
    /// Build a synced column from the confirmation.
    pub fn to_column(&self) -> Column {
        let mut column = Column {
            id: LocalId::for_remote(EntityKind::Column, self.remote_key),
            remote_key: Some(self.remote_key),
            correlation: self.correlation,
            sync: SyncState::Synced,
            is_primary_key: false,
            is_foreign_key: false,
            logical_name: String::new(),
            physical_name: String::new(),
            data_type: String::new(),
            data_detail: None,
            nullable: true,
            default_value: String::new(),
            comment: String::new(),
            display_order: 0,
        };
        self.merge_into(&mut column);
        column
    }

    /// Overwrite server-normalized fields on an existing column.
    pub fn merge_into(&self, column: &mut Column) {
        column.is_primary_key = self.is_primary_key;
        column.is_foreign_key = self.is_foreign_key;
        column.logical_name = self.logical_name.clone();
        column.physical_name = self.physical_name.clone();
        column.data_type = self.data_type.clone();
        column.data_detail = self.data_detail.clone();
        column.nullable = self.nullable;
        column.default_value = self.default_value.clone().unwrap_or_default();
        column.comment = self.comment.clone().unwrap_or_default();
    }
}

/// Relation as confirmed by the backend, addressed by remote keys.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedRelation {
    pub remote_key: RemoteKey,
    pub correlation: Option<CorrelationId>,
    pub source_table_key: RemoteKey,
    pub source_column_key: Option<RemoteKey>,
    pub target_table_key: RemoteKey,
    pub kind: RelationKind,
    pub cardinality: Cardinality,
}

/// How a confirmation landed in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Absorbed {
    /// A provisional entity took the confirmed identity.
    Reconciled(LocalId),
    /// An entity with the same remote key was refreshed.
    Refreshed(LocalId),
    /// No local counterpart existed; a new synced entity was inserted.
    Inserted(LocalId),
}

impl Absorbed {
    pub fn id(&self) -> &LocalId {
        match self {
            Absorbed::Reconciled(id) | Absorbed::Refreshed(id) | Absorbed::Inserted(id) => id,
        }
    }
}

/// Whether confirmations without a local counterpart are inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsorbPolicy {
    /// Only attach to an existing entity (create-response path).
    ExistingOnly,
    /// Insert when nothing matches (remote broadcast path).
    InsertMissing,
}
