//! User-facing notices raised by background components.

use chrono::{DateTime, Utc};
use erdsync_core::{LocalId, LockHolder};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    /// Someone else holds the lock we asked for.
    LockContention,
    /// A lock we held or requested went to another user.
    LockRevoked,
    /// A lock request was never granted.
    LockTimeout,
    General,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub kind: NotificationKind,
    pub message: String,
    pub table: Option<LocalId>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            kind: NotificationKind::General,
            message: message.into(),
            table: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_kind(mut self, kind: NotificationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn for_table(mut self, table: LocalId) -> Self {
        self.table = Some(table);
        self
    }

    pub fn lock_contention(table: LocalId, holder: &LockHolder) -> Self {
        Self::new(
            NotificationLevel::Warning,
            format!("{} is editing this table", holder),
        )
        .with_kind(NotificationKind::LockContention)
        .for_table(table)
    }

    pub fn lock_revoked(table: LocalId, holder: &LockHolder) -> Self {
        Self::new(
            NotificationLevel::Warning,
            format!("{} took over this table", holder),
        )
        .with_kind(NotificationKind::LockRevoked)
        .for_table(table)
    }

    pub fn lock_timeout(table: LocalId) -> Self {
        Self::new(NotificationLevel::Info, "Lock request timed out")
            .with_kind(NotificationKind::LockTimeout)
            .for_table(table)
    }
}

/// Sending half of the notice channel. Notices are dropped when nobody
/// listens.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn notify(&self, notification: Notification) {
        let _ = self.sender.send(notification);
    }
}
