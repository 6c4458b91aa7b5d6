//! Lock heartbeats.
//!
//! The backend expires a table lock unless its holder checks in. While this
//! client holds any lock, one task posts a heartbeat per held table right
//! away and then once per interval. The held set arrives on a watch
//! channel; every change restarts the cycle and an empty set parks the
//! task until something is locked again.

use crate::api_client::ErdBackend;
use crate::document::HeldTables;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Owns the heartbeat task. Dropping it stops the heartbeats.
#[derive(Debug)]
pub struct HeartbeatHandle {
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn spawn_heartbeat(
    backend: Arc<dyn ErdBackend>,
    email: String,
    interval: Duration,
    mut held: watch::Receiver<HeldTables>,
) -> HeartbeatHandle {
    let task = tokio::spawn(async move {
        loop {
            let tables = held.borrow_and_update().clone();
            if tables.is_empty() {
                if held.changed().await.is_err() {
                    return;
                }
                continue;
            }

            debug!(tables = tables.len(), "Heartbeat cycle started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for table_key in &tables {
                            // Released while an earlier heartbeat was in flight.
                            if !held.borrow().contains(table_key) {
                                continue;
                            }
                            if let Err(err) = backend.heartbeat(*table_key, &email).await {
                                warn!(table_key = %table_key, error = %err, "Heartbeat failed");
                            }
                        }
                    }
                    changed = held.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        break;
                    }
                }
            }
        }
    });
    HeartbeatHandle { task }
}
