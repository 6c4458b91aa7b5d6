//! Peer cursor positions.

use chrono::{DateTime, Utc};
use erdsync_core::Point;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq)]
pub struct PeerCursor {
    pub user_email: String,
    pub user_name: Option<String>,
    pub color: Option<String>,
    pub position: Point,
    pub seen_at: DateTime<Utc>,
}

/// Cursors of other editors, keyed by email.
#[derive(Debug, Clone, Default)]
pub struct Presence {
    cursors: Arc<Mutex<HashMap<String, PeerCursor>>>,
}

impl Presence {
    pub fn update(&self, cursor: PeerCursor) {
        self.cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cursor.user_email.clone(), cursor);
    }

    pub fn get(&self, user_email: &str) -> Option<PeerCursor> {
        self.cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_email)
            .cloned()
    }

    /// All cursors, ordered by email.
    pub fn cursors(&self) -> Vec<PeerCursor> {
        let mut cursors: Vec<PeerCursor> = self
            .cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        cursors.sort_by(|a, b| a.user_email.cmp(&b.user_email));
        cursors
    }
}
