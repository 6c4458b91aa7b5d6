//! Shared handle over the local document store.
//!
//! Local edits, WebSocket broadcasts and SSE updates all mutate the same
//! store through [`DocumentHandle::update`]. The guard is a plain mutex and
//! is never held across an `.await`: callers copy what they need out of the
//! closure before suspending.

use erdsync_core::{DocumentStore, RemoteKey};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Remote keys of the tables this client holds the lock for.
pub type HeldTables = BTreeSet<RemoteKey>;

#[derive(Debug, Clone)]
pub struct DocumentHandle {
    store: Arc<Mutex<DocumentStore>>,
    held: Arc<watch::Sender<HeldTables>>,
}

impl Default for DocumentHandle {
    fn default() -> Self {
        Self::new(DocumentStore::new())
    }
}

impl DocumentHandle {
    pub fn new(store: DocumentStore) -> Self {
        let held: HeldTables = store.held_table_keys().into_iter().collect();
        let (sender, _) = watch::channel(held);
        Self {
            store: Arc::new(Mutex::new(store)),
            held: Arc::new(sender),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DocumentStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a read-only closure against the store.
    pub fn read<R>(&self, f: impl FnOnce(&DocumentStore) -> R) -> R {
        f(&self.lock())
    }

    /// Run a mutation and republish the held-lock set if it changed.
    pub fn update<R>(&self, f: impl FnOnce(&mut DocumentStore) -> R) -> R {
        let (result, held) = {
            let mut store = self.lock();
            let result = f(&mut store);
            let held: HeldTables = store.held_table_keys().into_iter().collect();
            (result, held)
        };
        self.held.send_if_modified(|current| {
            if *current == held {
                false
            } else {
                *current = held;
                true
            }
        });
        result
    }

    /// Clone of the whole store, for rendering or export.
    pub fn snapshot(&self) -> DocumentStore {
        self.lock().clone()
    }

    /// Watch the set of tables locked by this client.
    pub fn held_tables(&self) -> watch::Receiver<HeldTables> {
        self.held.subscribe()
    }
}
