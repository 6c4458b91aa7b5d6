//! Error types for document store operations

use crate::{LocalId, RemoteKey};
use thiserror::Error;

/// Local document store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("table not found: {0}")]
    TableNotFound(LocalId),

    #[error("column {column} not found in table {table}")]
    ColumnNotFound { table: LocalId, column: LocalId },

    #[error("relation not found: {0}")]
    RelationNotFound(LocalId),

    #[error("table {0} has no primary key column to relate from")]
    MissingPrimaryKey(LocalId),

    #[error("{id} already carries remote key {existing}, refusing {offered}")]
    RemoteKeyConflict {
        id: LocalId,
        existing: RemoteKey,
        offered: RemoteKey,
    },

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(LocalId),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
