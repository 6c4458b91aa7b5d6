//! Enum types for ERDSYNC documents

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// TABLE COLOR
// ============================================================================

/// Palette entry for table and note headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TableColor {
    #[default]
    Blue,
    User2,
    User3,
    User4,
    User5,
    User6,
    User7,
    User8,
}

impl TableColor {
    pub const PALETTE: [TableColor; 8] = [
        TableColor::Blue,
        TableColor::User2,
        TableColor::User3,
        TableColor::User4,
        TableColor::User5,
        TableColor::User6,
        TableColor::User7,
        TableColor::User8,
    ];

    /// Hex value sent to the backend (lowercase, no `#`).
    pub fn hex(&self) -> &'static str {
        match self {
            TableColor::Blue => "2563eb",
            TableColor::User2 => "16a34a",
            TableColor::User3 => "dc2626",
            TableColor::User4 => "9333ea",
            TableColor::User5 => "ea580c",
            TableColor::User6 => "0891b2",
            TableColor::User7 => "ca8a04",
            TableColor::User8 => "db2777",
        }
    }

    /// Map a backend hex value back onto the palette; unknown or missing
    /// values fall back to `Blue`.
    pub fn from_hex(hex: Option<&str>) -> Self {
        let Some(hex) = hex else {
            return TableColor::Blue;
        };
        let normalized = hex.trim_start_matches('#').to_ascii_lowercase();
        Self::PALETTE
            .into_iter()
            .find(|color| color.hex() == normalized)
            .unwrap_or_default()
    }

    /// Palette entry for the n-th generated table.
    pub fn cycle(index: usize) -> Self {
        Self::PALETTE[index % Self::PALETTE.len()]
    }
}

// ============================================================================
// RELATIONS
// ============================================================================

/// Whether the child's key includes the parent's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationKind {
    Identifying,
    NonIdentifying,
}

impl RelationKind {
    /// Constraint label the backend uses to carry the kind.
    pub fn constraint_label(&self) -> &'static str {
        match self {
            RelationKind::Identifying => "IDENTIFYING",
            RelationKind::NonIdentifying => "NON_IDENTIFYING",
        }
    }

    pub fn from_constraint_label(label: &str) -> Self {
        if label.eq_ignore_ascii_case("IDENTIFYING") || label == "식별" {
            RelationKind::Identifying
        } else {
            RelationKind::NonIdentifying
        }
    }
}

/// Crow's-foot notation drawn at the target end of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    /// `1`
    One,
    /// `11`
    ExactlyOne,
    /// `13` - one or many
    OneOrMany,
    /// `01`
    ZeroOrOne,
    /// `01-1`
    ZeroOrOneToOne,
    /// `013` - zero, one or many
    ZeroOrMany,
}

impl Cardinality {
    /// Backend relation type for this notation.
    pub fn relation_type(&self) -> RelationType {
        match self {
            Cardinality::One | Cardinality::ExactlyOne => RelationType::StrictOneToOne,
            Cardinality::OneOrMany => RelationType::StrictOneToMany,
            Cardinality::ZeroOrOne | Cardinality::ZeroOrOneToOne => {
                RelationType::OptionalOneToOne
            }
            Cardinality::ZeroOrMany => RelationType::OptionalOneToMany,
        }
    }

    pub fn from_relation_type(relation_type: RelationType) -> Self {
        match relation_type {
            RelationType::StrictOneToOne | RelationType::OneToOne => Cardinality::ExactlyOne,
            RelationType::OptionalOneToOne => Cardinality::ZeroOrOne,
            RelationType::OptionalOneToMany => Cardinality::ZeroOrMany,
            _ => Cardinality::OneOrMany,
        }
    }

    /// Short notation used by the canvas.
    pub fn notation(&self) -> &'static str {
        match self {
            Cardinality::One => "1",
            Cardinality::ExactlyOne => "11",
            Cardinality::OneOrMany => "13",
            Cardinality::ZeroOrOne => "01",
            Cardinality::ZeroOrOneToOne => "01-1",
            Cardinality::ZeroOrMany => "013",
        }
    }
}

/// Relation type vocabulary shared with the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    StrictOneToOne,
    OptionalOneToOne,
    StrictOneToMany,
    OptionalOneToMany,
    StrictManyToOne,
    OptionalManyToOne,
    OneToOne,
    ManyToMany,
}

impl RelationType {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            RelationType::StrictOneToOne => "STRICT_ONE_TO_ONE",
            RelationType::OptionalOneToOne => "OPTIONAL_ONE_TO_ONE",
            RelationType::StrictOneToMany => "STRICT_ONE_TO_MANY",
            RelationType::OptionalOneToMany => "OPTIONAL_ONE_TO_MANY",
            RelationType::StrictManyToOne => "STRICT_MANY_TO_ONE",
            RelationType::OptionalManyToOne => "OPTIONAL_MANY_TO_ONE",
            RelationType::OneToOne => "ONE_TO_ONE",
            RelationType::ManyToMany => "MANY_TO_MANY",
        }
    }

    /// Referential actions applied on delete / update for this type.
    pub fn constraint_actions(&self) -> (ReferentialAction, ReferentialAction) {
        match self {
            RelationType::OptionalOneToMany | RelationType::OptionalManyToOne => {
                (ReferentialAction::SetNull, ReferentialAction::Cascade)
            }
            _ => (ReferentialAction::Cascade, ReferentialAction::Cascade),
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

impl FromStr for RelationType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STRICT_ONE_TO_ONE" => Ok(RelationType::StrictOneToOne),
            "OPTIONAL_ONE_TO_ONE" => Ok(RelationType::OptionalOneToOne),
            "STRICT_ONE_TO_MANY" => Ok(RelationType::StrictOneToMany),
            "OPTIONAL_ONE_TO_MANY" => Ok(RelationType::OptionalOneToMany),
            "STRICT_MANY_TO_ONE" => Ok(RelationType::StrictManyToOne),
            "OPTIONAL_MANY_TO_ONE" => Ok(RelationType::OptionalManyToOne),
            "ONE_TO_ONE" => Ok(RelationType::OneToOne),
            "MANY_TO_MANY" => Ok(RelationType::ManyToMany),
            _ => Err(UnknownVariant {
                kind: "relation type",
                value: s.to_string(),
            }),
        }
    }
}

/// ON DELETE / ON UPDATE action for a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferentialAction {
    #[serde(rename = "CASCADE")]
    Cascade,
    #[serde(rename = "SET NULL")]
    SetNull,
    #[serde(rename = "RESTRICT")]
    Restrict,
    #[serde(rename = "NO ACTION")]
    NoAction,
}

// ============================================================================
// COLUMNS / SYNC
// ============================================================================

/// Which kind of column `add_column` appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    Regular,
    PrimaryKey,
}

/// Where an entity stands relative to the backend of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SyncState {
    /// Created locally, create request not yet acknowledged.
    #[default]
    Provisional,
    /// Acknowledged by the backend.
    Synced,
    /// Delete requested, waiting for the backend to acknowledge.
    Deleting,
}

/// SQL dialect accepted by the export endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SqlDialect {
    #[default]
    Postgresql,
    Mysql,
}

impl SqlDialect {
    pub fn as_query_str(&self) -> &'static str {
        match self {
            SqlDialect::Postgresql => "POSTGRESQL",
            SqlDialect::Mysql => "MYSQL",
        }
    }
}

impl FromStr for SqlDialect {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "POSTGRESQL" | "POSTGRES" => Ok(SqlDialect::Postgresql),
            "MYSQL" => Ok(SqlDialect::Mysql),
            _ => Err(UnknownVariant {
                kind: "sql dialect",
                value: s.to_string(),
            }),
        }
    }
}

/// Error when parsing an unknown enum string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}
