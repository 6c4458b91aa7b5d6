//! Read-only viewer propagation.
//!
//! In view mode the client follows `/api/v1/viewer/{viewerKey}/stream`
//! instead of editing. Moves patch one table's position; any structural
//! change replaces the whole table list. The stream reconnects after a
//! fixed delay for as long as view mode stays on.

use crate::api_client::ApiClientError;
use crate::document::DocumentHandle;
use crate::sse_client::{SseConnector, StreamTask};
use erdsync_core::{EntityKind, LocalId, RemoteKey};
use erdsync_events::{SseEvent, ViewerUpdate};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Apply one viewer update to the document.
pub fn apply_viewer_update(document: &DocumentHandle, update: ViewerUpdate) -> bool {
    match update {
        ViewerUpdate::Move {
            table_key,
            position,
        } => {
            let key = RemoteKey::new(table_key);
            document.update(|store| {
                let id = store
                    .find_table_by_remote_key(key)
                    .unwrap_or_else(|| LocalId::for_remote(EntityKind::Table, key));
                store.update_table_position(&id, position)
            })
        }
        ViewerUpdate::ReplaceTables(tables) => {
            debug!(tables = tables.len(), "Viewer table list replaced");
            document.update(|store| store.replace_tables(tables, false));
            true
        }
    }
}

/// Follow the viewer stream whenever `viewer` holds a key. `None` means
/// view mode is off.
pub fn spawn_viewer_stream(
    connector: Arc<dyn SseConnector>,
    document: DocumentHandle,
    mut viewer: watch::Receiver<Option<String>>,
    reconnect_delay: Duration,
) -> StreamTask {
    let task = tokio::spawn(async move {
        loop {
            let key = viewer.borrow_and_update().clone();
            let Some(key) = key else {
                if viewer.changed().await.is_err() {
                    return;
                }
                continue;
            };

            let mode_changed = async {
                viewer
                    .wait_for(|current| current.as_deref() != Some(key.as_str()))
                    .await
                    .map(|_| ())
            };
            let rejected = tokio::select! {
                _ = follow_viewer(connector.as_ref(), &document, &key, reconnect_delay) => true,
                changed = mode_changed => {
                    if changed.is_err() {
                        return;
                    }
                    debug!(viewer_key = %key, "View mode left, viewer stream torn down");
                    false
                }
            };
            if rejected && viewer.changed().await.is_err() {
                return;
            }
        }
    });
    StreamTask::new(task)
}

/// Returns only when the session is rejected.
async fn follow_viewer(
    connector: &dyn SseConnector,
    document: &DocumentHandle,
    viewer_key: &str,
    reconnect_delay: Duration,
) {
    let path = format!("/api/v1/viewer/{viewer_key}/stream");
    loop {
        match connector.connect(&path).await {
            Ok(mut stream) => {
                info!(viewer_key, "Viewer stream opened");
                while let Some(frame) = stream.next().await {
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!(viewer_key, error = %err, "Viewer stream transport error");
                            break;
                        }
                    };
                    match SseEvent::decode(&frame) {
                        Ok(SseEvent::ErdUpdate(update)) => match update.into_viewer_update() {
                            Ok(update) => {
                                apply_viewer_update(document, update);
                            }
                            Err(err) => warn!(viewer_key, error = %err, "Incomplete viewer update skipped"),
                        },
                        Ok(SseEvent::Connected) => debug!(viewer_key, "Viewer stream connected"),
                        Ok(other) => debug!(viewer_key, event = ?other, "Viewer event ignored"),
                        Err(err) => warn!(viewer_key, error = %err, "Malformed viewer event skipped"),
                    }
                }
                debug!(viewer_key, "Viewer stream ended");
            }
            Err(ApiClientError::Unauthorized) => return,
            Err(err) => warn!(viewer_key, error = %err, "Viewer stream connect failed"),
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse_client::test_connector::{frame, ScriptedStreams};
    use erdsync_core::{DocumentStore, Point, Table};

    const DELAY: Duration = Duration::from_secs(3);

    fn document_with(key: i64) -> DocumentHandle {
        let mut table = Table::provisional("users");
        table.id = LocalId::for_remote(EntityKind::Table, RemoteKey::new(key));
        table.remote_key = Some(RemoteKey::new(key));
        let mut store = DocumentStore::new();
        store.replace_tables(vec![table], true);
        DocumentHandle::new(store)
    }

    fn position_of(document: &DocumentHandle, key: i64) -> Option<Point> {
        document.read(|store| {
            store
                .find_table_by_remote_key(RemoteKey::new(key))
                .and_then(|id| store.table(&id).map(|t| t.position))
        })
    }

    #[test]
    fn test_move_finds_locally_created_table_by_key() {
        let document = DocumentHandle::default();
        let id = document.update(|s| s.create_table("Orders")).unwrap();
        document
            .update(|s| s.attach_remote_key(&erdsync_core::EntityRef::Table(id.clone()), RemoteKey::new(5)))
            .unwrap();

        let moved = apply_viewer_update(
            &document,
            ViewerUpdate::Move {
                table_key: 5,
                position: Point::new(12.0, 34.0),
            },
        );
        assert!(moved);
        assert_eq!(
            document.read(|s| s.table(&id).map(|t| t.position)),
            Some(Point::new(12.0, 34.0))
        );
    }

    #[test]
    fn test_move_patches_position_only() {
        let document = document_with(3);
        let moved = apply_viewer_update(
            &document,
            ViewerUpdate::Move {
                table_key: 3,
                position: Point::new(40.0, 50.0),
            },
        );
        assert!(moved);
        assert_eq!(position_of(&document, 3), Some(Point::new(40.0, 50.0)));
        assert_eq!(
            document.read(|s| s.tables()[0].logical_name.clone()),
            "users"
        );

        let unknown = apply_viewer_update(
            &document,
            ViewerUpdate::Move {
                table_key: 99,
                position: Point::new(1.0, 1.0),
            },
        );
        assert!(!unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_applies_updates_and_skips_malformed() {
        let script = ScriptedStreams::new(vec![vec![
            frame("connected", "ok"),
            frame("erd-update", "{\"eventType\": "),
            frame(
                "erd-update",
                r#"{"eventType": "TABLE_MOVE", "tableKey": 3, "xPosition": 7.5, "yPosition": 8.0}"#,
            ),
            frame(
                "erd-update",
                r#"{"eventType": "TABLE_CREATE", "tables": [
                    {"tableKey": 3, "logicalName": "users", "physicalName": "users",
                     "xPosition": 7.5, "yPosition": 8.0},
                    {"tableKey": 4, "logicalName": "orders", "physicalName": "orders",
                     "xPosition": 100.0, "yPosition": 8.0}
                ]}"#,
            ),
        ]]);
        let document = document_with(3);
        let (_mode, viewer) = watch::channel(Some("view-1".to_string()));
        let _task = spawn_viewer_stream(script.clone(), document.clone(), viewer, DELAY);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(script.paths()[0], "/api/v1/viewer/view-1/stream");
        assert_eq!(document.read(|s| s.tables().len()), 2);
        assert_eq!(position_of(&document, 3), Some(Point::new(7.5, 8.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_until_view_mode_ends() {
        let script = ScriptedStreams::new(vec![vec![], vec![]]);
        let (mode, viewer) = watch::channel(None);
        let _task = spawn_viewer_stream(script.clone(), DocumentHandle::default(), viewer, DELAY);

        tokio::time::sleep(DELAY).await;
        assert_eq!(script.connects(), 0);

        mode.send_replace(Some("view-2".to_string()));
        tokio::time::sleep(DELAY + DELAY / 2).await;
        assert_eq!(script.connects(), 2);

        tokio::time::sleep(DELAY).await;
        assert_eq!(script.connects(), 3);

        mode.send_replace(None);
        tokio::time::sleep(DELAY * 4).await;
        assert_eq!(script.connects(), 3);
    }
}
