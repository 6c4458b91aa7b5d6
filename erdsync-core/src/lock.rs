//! Table lock state and its transitions.
//!
//! Locks are cooperative: the backend arbitrates, clients only display and
//! request. A table moves through these states:
//!
//! ```text
//!            request()            grant()
//! Unlocked ───────────→ Requested ───────→ LockedBySelf
//!    ↑  ↑                   │                   │
//!    │  └─── expire() ──────┘                   │
//!    └──────────────────── release() ───────────┘
//!
//! any state ── remote lock by another user ──→ LockedByOther
//! LockedByOther ── remote unlock ──→ Unlocked
//! LockedBySelf ── own unlock echoed back ──→ Unlocked
//! ```
//!
//! Only a pending request can be granted. A grant for a table this client
//! no longer claims is stale and must be handed back.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// User currently holding a table lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockHolder {
    pub user_email: String,
    pub user_name: String,
}

impl LockHolder {
    pub fn new(user_email: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            user_email: user_email.into(),
            user_name: user_name.into(),
        }
    }

    /// Display name, falling back to the email when no name is known.
    pub fn display_name(&self) -> &str {
        if self.user_name.trim().is_empty() {
            &self.user_email
        } else {
            &self.user_name
        }
    }
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Lock state of one table as known by this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TableLock {
    #[default]
    Unlocked,
    /// Lock requested, waiting for the server grant.
    Requested { since: Timestamp },
    LockedBySelf,
    LockedByOther(LockHolder),
}

impl TableLock {
    pub fn is_locked(&self) -> bool {
        matches!(self, TableLock::LockedBySelf | TableLock::LockedByOther(_))
    }

    pub fn is_held_by_self(&self) -> bool {
        matches!(self, TableLock::LockedBySelf)
    }

    /// Holder to show on the table, if someone else is editing it.
    pub fn locked_by(&self) -> Option<&LockHolder> {
        match self {
            TableLock::LockedByOther(holder) => Some(holder),
            _ => None,
        }
    }

    /// Whether this client has an outstanding claim (requested or held).
    pub fn is_claimed_by_self(&self) -> bool {
        matches!(self, TableLock::Requested { .. } | TableLock::LockedBySelf)
    }

    /// Start a lock request.
    pub fn request(&self, now: Timestamp) -> Result<TableLock, LockStateError> {
        match self {
            TableLock::Unlocked => Ok(TableLock::Requested { since: now }),
            TableLock::Requested { .. } => Err(LockStateError::AlreadyRequested),
            TableLock::LockedBySelf => Err(LockStateError::AlreadyHeld),
            TableLock::LockedByOther(holder) => Err(LockStateError::HeldByOther {
                holder: holder.clone(),
            }),
        }
    }

    /// Apply a server grant.
    pub fn grant(&self) -> Result<TableLock, LockStateError> {
        match self {
            TableLock::Requested { .. } => Ok(TableLock::LockedBySelf),
            TableLock::Unlocked => Err(LockStateError::NotRequested),
            TableLock::LockedBySelf => Err(LockStateError::AlreadyHeld),
            TableLock::LockedByOther(holder) => Err(LockStateError::HeldByOther {
                holder: holder.clone(),
            }),
        }
    }

    /// Whether a pending request is older than the allowed grant window.
    pub fn is_request_expired(&self, now: Timestamp, window: chrono::Duration) -> bool {
        match self {
            TableLock::Requested { since } => now - *since >= window,
            _ => false,
        }
    }
}

/// Invalid lock state transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockStateError {
    #[error("lock already requested")]
    AlreadyRequested,
    #[error("lock already held")]
    AlreadyHeld,
    #[error("lock was not requested")]
    NotRequested,
    #[error("{holder} is editing this table")]
    HeldByOther { holder: LockHolder },
}
