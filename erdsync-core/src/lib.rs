//! ERDSYNC Core - Document Model
//!
//! Identity types, the diagram entities and the local document store every
//! other crate mutates. Pure and synchronous: no I/O, no async.

pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;
pub mod lock;
pub mod schema;
pub mod store;

pub use entities::{
    Absorbed, AbsorbPolicy, Column, ColumnField, ColumnPatch, ConfirmedColumn, ConfirmedRelation,
    ConfirmedTable, EntityRef, Note, NotePatch, Point, Relation, Snapshot, SnapshotAuthor, Table,
    ViewTransform, DEFAULT_COLUMN_LOGICAL_NAME, DEFAULT_COLUMN_PHYSICAL_NAME, DEFAULT_DATA_TYPE,
    DEFAULT_IDENTIFIER, DEFAULT_TABLE_POSITION,
};
pub use enums::{
    Cardinality, ColumnKind, ReferentialAction, RelationKind, RelationType, SqlDialect, SyncState,
    TableColor, UnknownVariant,
};
pub use error::{StoreError, StoreResult};
pub use identity::{CorrelationId, EntityKind, LocalId, RemoteKey, Timestamp};
pub use lock::{LockHolder, LockStateError, TableLock};
pub use schema::{DraftSchema, TypeArg, VersionSchema};
pub use store::DocumentStore;
