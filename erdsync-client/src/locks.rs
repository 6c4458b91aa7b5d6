//! Table lock coordination.
//!
//! The backend arbitrates locks. This client asks with `table-lock`, learns
//! the outcome from the broadcast that names the holder, and keeps its
//! local view in [`TableLock`]. Heartbeats for held tables run separately
//! (see [`crate::heartbeat`]) off the held set the document publishes.

use crate::document::DocumentHandle;
use crate::notifications::{Notification, NotificationKind, NotificationLevel, Notifier};
use crate::realtime::RealtimePublisher;
use crate::session::SessionUser;
use erdsync_core::{LocalId, LockHolder, LockStateError, RemoteKey, TableLock, Timestamp};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// Request sent, waiting for the grant.
    Pending,
    Held,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("{holder} is editing this table")]
    HeldByOther { holder: LockHolder },
    #[error("table {0} is not saved yet")]
    NotSynced(LocalId),
    #[error("table not found: {0}")]
    TableNotFound(LocalId),
}

enum RequestOutcome {
    Sent(RemoteKey),
    AlreadyPending,
    AlreadyHeld,
}

enum GrantOutcome {
    Granted(LocalId),
    /// Granted to us although we no longer ask for it.
    Unclaimed { table: LocalId, cleared: bool },
}

#[derive(Clone)]
pub struct LockCoordinator {
    document: DocumentHandle,
    publisher: RealtimePublisher,
    user: SessionUser,
    grant_timeout: Duration,
    notifier: Notifier,
}

impl LockCoordinator {
    pub fn new(
        document: DocumentHandle,
        publisher: RealtimePublisher,
        user: SessionUser,
        grant_timeout: Duration,
        notifier: Notifier,
    ) -> Self {
        Self {
            document,
            publisher,
            user,
            grant_timeout,
            notifier,
        }
    }

    pub fn status(&self, table: &LocalId) -> Option<TableLock> {
        self.document
            .read(|store| store.table(table).map(|t| t.lock.clone()))
    }

    /// Ask for the lock on `table`.
    ///
    /// Fails without a round-trip when someone else is known to hold it.
    pub fn lock_table(&self, table: &LocalId) -> Result<LockStatus, LockError> {
        let now = chrono::Utc::now();
        let outcome = self.document.update(|store| {
            let current = store
                .table(table)
                .ok_or_else(|| LockError::TableNotFound(table.clone()))?;
            let key = current
                .remote_key
                .ok_or_else(|| LockError::NotSynced(table.clone()))?;
            match current.lock.request(now) {
                Ok(next) => {
                    store.set_table_lock(table, next);
                    Ok(RequestOutcome::Sent(key))
                }
                Err(LockStateError::AlreadyRequested | LockStateError::NotRequested) => {
                    Ok(RequestOutcome::AlreadyPending)
                }
                Err(LockStateError::AlreadyHeld) => Ok(RequestOutcome::AlreadyHeld),
                Err(LockStateError::HeldByOther { holder }) => {
                    Err(LockError::HeldByOther { holder })
                }
            }
        });

        match outcome {
            Ok(RequestOutcome::Sent(key)) => {
                debug!(table_id = %table, table_key = %key, "Lock requested");
                self.publisher.table_lock(key);
                Ok(LockStatus::Pending)
            }
            Ok(RequestOutcome::AlreadyPending) => Ok(LockStatus::Pending),
            Ok(RequestOutcome::AlreadyHeld) => Ok(LockStatus::Held),
            Err(err) => {
                if let LockError::HeldByOther { holder } = &err {
                    self.notifier
                        .notify(Notification::lock_contention(table.clone(), holder));
                }
                Err(err)
            }
        }
    }

    /// Give up any claim this client has on `table`. Safe to call on a
    /// table in any state.
    pub fn unlock_table(&self, table: &LocalId) {
        let released = self.document.update(|store| {
            let current = store.table(table)?;
            if !current.lock.is_claimed_by_self() {
                return None;
            }
            let key = current.remote_key;
            store.set_table_lock(table, TableLock::Unlocked);
            Some(key)
        });
        if let Some(key) = released {
            debug!(table_id = %table, "Lock released");
            if let Some(key) = key {
                self.publisher.table_unlock(key);
            }
        }
    }

    /// Release every lock held or requested by this client.
    pub fn release_all(&self) {
        let claimed: Vec<LocalId> = self.document.read(|store| {
            store
                .tables()
                .iter()
                .filter(|t| t.lock.is_claimed_by_self())
                .map(|t| t.id.clone())
                .collect()
        });
        for table in &claimed {
            self.unlock_table(table);
        }
    }

    /// Revert requests older than the grant window. Returns the tables
    /// that timed out.
    pub fn sweep_pending(&self, now: Timestamp) -> Vec<LocalId> {
        let window =
            chrono::Duration::from_std(self.grant_timeout).unwrap_or(chrono::Duration::MAX);
        let expired = self.document.update(|store| {
            let expired: Vec<LocalId> = store
                .tables()
                .iter()
                .filter(|t| t.lock.is_request_expired(now, window))
                .map(|t| t.id.clone())
                .collect();
            for table in &expired {
                store.set_table_lock(table, TableLock::Unlocked);
            }
            expired
        });
        for table in &expired {
            info!(table_id = %table, "Lock request timed out");
            self.notifier.notify(Notification::lock_timeout(table.clone()));
        }
        expired
    }

    // ========================================================================
    // REMOTE EVENTS
    // ========================================================================

    /// A `table-lock` broadcast. Naming this user grants a pending request;
    /// naming anyone else means they hold the table now, whatever we
    /// thought before.
    pub fn apply_remote_lock(&self, table_key: RemoteKey, holder: Option<LockHolder>) -> bool {
        let Some(holder) = holder else {
            debug!(table_key = %table_key, "Lock broadcast without a holder");
            return false;
        };
        if holder.user_email == self.user.email {
            return self.apply_grant(table_key);
        }

        let applied = self.document.update(|store| {
            let table = store.find_table_by_remote_key(table_key)?;
            let previous = store.table(&table)?.lock.clone();
            let next = TableLock::LockedByOther(holder.clone());
            if previous == next {
                return None;
            }
            store.set_table_lock(&table, next);
            Some((table, previous))
        });
        let Some((table, previous)) = applied else {
            return false;
        };

        if previous.is_claimed_by_self() {
            warn!(
                table_id = %table,
                table_key = %table_key,
                holder = %holder,
                "Lock taken over by another user"
            );
            self.notifier
                .notify(Notification::lock_revoked(table, &holder));
        } else {
            debug!(table_key = %table_key, holder = %holder, "Peer locked table");
        }
        true
    }

    fn apply_grant(&self, table_key: RemoteKey) -> bool {
        let outcome = self.document.update(|store| {
            let table = store.find_table_by_remote_key(table_key)?;
            let current = store.table(&table)?.lock.clone();
            match current.grant() {
                Ok(next) => {
                    store.set_table_lock(&table, next);
                    Some(GrantOutcome::Granted(table))
                }
                Err(LockStateError::AlreadyHeld | LockStateError::AlreadyRequested) => None,
                Err(LockStateError::NotRequested | LockStateError::HeldByOther { .. }) => {
                    let cleared = current.is_locked();
                    if cleared {
                        store.set_table_lock(&table, TableLock::Unlocked);
                    }
                    Some(GrantOutcome::Unclaimed { table, cleared })
                }
            }
        });

        match outcome {
            Some(GrantOutcome::Granted(table)) => {
                info!(table_id = %table, table_key = %table_key, "Lock granted");
                true
            }
            Some(GrantOutcome::Unclaimed { table, cleared }) => {
                info!(table_id = %table, table_key = %table_key, "Stale grant handed back");
                self.publisher.table_unlock(table_key);
                cleared
            }
            None => false,
        }
    }

    /// A `table-lock-rejected` broadcast. Only a pending request of ours
    /// is affected; anyone else just learns the holder.
    pub fn apply_lock_rejected(&self, table_key: RemoteKey, holder: Option<LockHolder>) -> bool {
        let applied = self.document.update(|store| {
            let table = store.find_table_by_remote_key(table_key)?;
            let pending = matches!(store.table(&table)?.lock, TableLock::Requested { .. });
            let next = match &holder {
                Some(holder) => TableLock::LockedByOther(holder.clone()),
                None if pending => TableLock::Unlocked,
                None => return None,
            };
            store.set_table_lock(&table, next);
            Some((table, pending))
        });
        let Some((table, pending)) = applied else {
            return false;
        };
        if pending {
            warn!(table_id = %table, table_key = %table_key, "Lock request rejected");
            let notice = match &holder {
                Some(holder) => Notification::lock_contention(table, holder),
                None => Notification::new(
                    NotificationLevel::Warning,
                    "Another user is editing this table",
                )
                .with_kind(NotificationKind::LockContention)
                .for_table(table),
            };
            self.notifier.notify(notice);
        }
        true
    }

    /// A `table-unlock` broadcast. Clears the named peer's lock, or our own
    /// hold when the unlock carries our email. A pending request of ours is
    /// left alone: the unlock predates it.
    pub fn apply_remote_unlock(&self, table_key: RemoteKey, user_email: Option<&str>) -> bool {
        self.document.update(|store| {
            let Some(table) = store.find_table_by_remote_key(table_key) else {
                return false;
            };
            let clears = match store.table(&table).map(|t| &t.lock) {
                Some(TableLock::LockedByOther(holder)) => {
                    user_email.map_or(true, |email| email == holder.user_email)
                }
                Some(TableLock::LockedBySelf) => user_email == Some(self.user.email.as_str()),
                _ => false,
            };
            if clears {
                store.set_table_lock(&table, TableLock::Unlocked);
                debug!(table_key = %table_key, "Remote unlock applied");
            }
            clears
        })
    }
}
