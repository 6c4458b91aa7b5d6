//! Identity types for ERDSYNC entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Kind of document entity an identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Table,
    Column,
    Relation,
    Note,
    Snapshot,
}

impl EntityKind {
    /// Prefix used when rendering local identifiers.
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityKind::Table => "table",
            EntityKind::Column => "column",
            EntityKind::Relation => "relation",
            EntityKind::Note => "note",
            EntityKind::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Client-generated identifier, stable for the lifetime of a session and
/// independent of any backend identity.
///
/// Entities created locally get a UUIDv7 body (`table-0191…`); entities
/// loaded from the backend reuse their remote key (`table-42`) so that
/// position-only patches addressed by key can find them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(String);

impl LocalId {
    /// Generate a fresh identifier for a locally created entity.
    pub fn generate(kind: EntityKind) -> Self {
        Self(format!("{}-{}", kind.prefix(), Uuid::now_v7()))
    }

    /// Identifier for an entity first seen through the backend.
    pub fn for_remote(kind: EntityKind, key: RemoteKey) -> Self {
        Self(format!("{}-{}", kind.prefix(), key.get()))
    }

    /// Wrap an existing identifier string.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocalId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Backend-assigned identifier, attached once creation is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteKey(i64);

impl RemoteKey {
    pub const fn new(key: i64) -> Self {
        Self(key)
    }

    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RemoteKey {
    fn from(key: i64) -> Self {
        Self(key)
    }
}

/// Token attached to every create request and echoed back by the server,
/// pairing a provisional entity with its confirmed counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CorrelationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
