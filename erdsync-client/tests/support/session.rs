use std::sync::Arc;

use erdsync_client::config::ErdsyncConfig;
use erdsync_client::notifications::{Notification, Notifier};
use erdsync_client::session::Session;
use erdsync_core::{EntityKind, LocalId, RemoteKey};
use erdsync_test_utils::fixtures::{test_config, PEER_EMAIL, PEER_NAME, PEER_USER_KEY};
use erdsync_test_utils::{FakeBackend, RecordingPublisher, ScriptedConnector};
use tokio::sync::mpsc::UnboundedReceiver;

/// One assembled session over in-memory transports.
pub struct TestSession {
    pub session: Session,
    pub backend: Arc<FakeBackend>,
    pub sink: Arc<RecordingPublisher>,
    pub streams: Arc<ScriptedConnector>,
    pub notices: UnboundedReceiver<Notification>,
}

impl TestSession {
    pub fn notices(&mut self) -> Vec<Notification> {
        let mut drained = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            drained.push(notice);
        }
        drained
    }
}

pub fn test_session(backend: FakeBackend) -> TestSession {
    test_session_with(test_config(), backend, ScriptedConnector::new())
}

pub fn test_session_with(
    config: ErdsyncConfig,
    backend: FakeBackend,
    streams: ScriptedConnector,
) -> TestSession {
    let backend = Arc::new(backend);
    let sink = Arc::new(RecordingPublisher::new());
    let streams = Arc::new(streams);
    let (notifier, notices) = Notifier::channel();
    let session = Session::assemble(
        config,
        backend.clone(),
        streams.clone(),
        sink.clone(),
        notifier,
    );
    TestSession {
        session,
        backend,
        sink,
        streams,
        notices,
    }
}

/// Configuration of the second editor in two-client scenarios.
pub fn peer_config() -> ErdsyncConfig {
    let mut config = test_config();
    config.user.email = PEER_EMAIL.to_string();
    config.user.name = PEER_NAME.to_string();
    config.user.user_key = Some(PEER_USER_KEY);
    config
}

pub fn table_id(key: i64) -> LocalId {
    LocalId::for_remote(EntityKind::Table, RemoteKey::new(key))
}

pub fn column_id(key: i64) -> LocalId {
    LocalId::for_remote(EntityKind::Column, RemoteKey::new(key))
}
