//! Composition root.
//!
//! A [`Session`] wires one open project together: the shared document, the
//! mutation layer, the lock coordinator with its heartbeat, the realtime
//! channel and both event streams. The navigator is injected here once and
//! handed to every network component that needs it.

use crate::api_client::{ErdBackend, RestClient};
use crate::config::ErdsyncConfig;
use crate::document::DocumentHandle;
use crate::error::ClientError;
use crate::heartbeat::{spawn_heartbeat, HeartbeatHandle};
use crate::job_stream::{spawn_job_stream, ImportJobs};
use crate::locks::LockCoordinator;
use crate::mutation::Workspace;
use crate::navigation::Navigator;
use crate::notifications::{Notification, Notifier};
use crate::realtime::connection::StompSettings;
use crate::realtime::{
    spawn_connection, Dispatch, Dispatcher, Presence, RealtimeEvent, RealtimePublisher,
    RealtimeSink, VersionClock,
};
use crate::sse_client::{HttpSseConnector, SseConnector, StreamTask};
use crate::viewer_stream::spawn_viewer_stream;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const REALTIME_BUFFER: usize = 256;
const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(100);

/// The signed-in user as the collaboration layer sees them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub email: String,
    pub name: String,
    /// Backend user key, when known.
    pub user_key: Option<i64>,
}

pub struct Session {
    config: ErdsyncConfig,
    document: DocumentHandle,
    workspace: Workspace,
    locks: LockCoordinator,
    publisher: RealtimePublisher,
    dispatcher: Dispatcher,
    presence: Presence,
    jobs: ImportJobs,
    active: watch::Sender<bool>,
    viewer: watch::Sender<Option<String>>,
    tasks: Vec<JoinHandle<()>>,
    _heartbeat: HeartbeatHandle,
    _job_stream: StreamTask,
    _viewer_stream: StreamTask,
}

impl Session {
    /// Wire a session over the given transports. Must run inside a tokio
    /// runtime.
    pub fn assemble(
        config: ErdsyncConfig,
        backend: Arc<dyn ErdBackend>,
        sse: Arc<dyn SseConnector>,
        sink: Arc<dyn RealtimeSink>,
        notifier: Notifier,
    ) -> Self {
        let user = config.session_user();
        let document = DocumentHandle::default();
        let clock = VersionClock::new(user.user_key);
        let presence = Presence::default();

        let publisher = RealtimePublisher::new(
            sink,
            clock.clone(),
            config.project_key,
            user.clone(),
            config.move_throttle(),
        );
        let locks = LockCoordinator::new(
            document.clone(),
            publisher.clone(),
            user.clone(),
            config.grant_timeout(),
            notifier,
        );
        let dispatcher = Dispatcher::new(
            document.clone(),
            locks.clone(),
            clock,
            presence.clone(),
            config.project_key,
            user.user_key,
            user.email.clone(),
        );
        let workspace = Workspace::new(
            document.clone(),
            backend.clone(),
            publisher.clone(),
            config.project_key,
        );

        let heartbeat = spawn_heartbeat(
            backend,
            user.email,
            config.heartbeat_interval(),
            document.held_tables(),
        );

        let (active, active_rx) = watch::channel(true);
        let jobs = ImportJobs::new();
        let job_stream = spawn_job_stream(
            sse.clone(),
            jobs.clone(),
            active_rx,
            config.stream_reconnect_delay(),
        );

        let (viewer, viewer_rx) = watch::channel(None);
        let viewer_stream = spawn_viewer_stream(
            sse,
            document.clone(),
            viewer_rx,
            config.stream_reconnect_delay(),
        );

        let sweeper = spawn_lock_sweeper(locks.clone(), config.grant_timeout());

        Self {
            config,
            document,
            workspace,
            locks,
            publisher,
            dispatcher,
            presence,
            jobs,
            active,
            viewer,
            tasks: vec![sweeper],
            _heartbeat: heartbeat,
            _job_stream: job_stream,
            _viewer_stream: viewer_stream,
        }
    }

    /// Open a live session: REST, event streams and the realtime channel.
    pub fn connect(
        config: ErdsyncConfig,
        navigator: Arc<dyn Navigator>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Notification>), ClientError> {
        let backend = Arc::new(RestClient::from_config(&config, navigator.clone())?);
        let sse = Arc::new(HttpSseConnector::from_config(&config, navigator)?);
        let (events_tx, events_rx) = mpsc::channel(REALTIME_BUFFER);
        let (connection, connection_task) =
            spawn_connection(StompSettings::from_config(&config), events_tx);
        let (notifier, notices) = Notifier::channel();

        let mut session = Self::assemble(config, backend, sse, Arc::new(connection), notifier);
        let router = spawn_router(session.dispatcher.clone(), events_rx);
        session.tasks.push(connection_task);
        session.tasks.push(router);
        info!(project_key = session.config.project_key, "Session started");
        Ok((session, notices))
    }

    pub fn config(&self) -> &ErdsyncConfig {
        &self.config
    }

    pub fn document(&self) -> &DocumentHandle {
        &self.document
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn locks(&self) -> &LockCoordinator {
        &self.locks
    }

    pub fn publisher(&self) -> &RealtimePublisher {
        &self.publisher
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    pub fn jobs(&self) -> &ImportJobs {
        &self.jobs
    }

    /// Turn read-only view mode on or off. View mode needs a configured
    /// viewer key; returns whether view mode is now on.
    pub fn set_view_mode(&self, enabled: bool) -> bool {
        let key = match (&self.config.viewer, enabled) {
            (Some(viewer), true) => Some(viewer.viewer_key.clone()),
            (None, true) => {
                warn!("View mode requested without a viewer key");
                None
            }
            _ => None,
        };
        let on = key.is_some();
        self.viewer.send_if_modified(|current| {
            if *current == key {
                false
            } else {
                *current = key;
                true
            }
        });
        on
    }

    pub fn is_view_mode(&self) -> bool {
        self.viewer.borrow().is_some()
    }

    /// Release every lock and stop the streams. The session stays usable
    /// for local reads.
    pub fn shutdown(&self) {
        self.locks.release_all();
        self.active.send_replace(false);
        self.viewer.send_replace(None);
        info!(project_key = self.config.project_key, "Session shut down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Feed realtime messages to the dispatcher.
pub fn spawn_router(
    dispatcher: Dispatcher,
    mut events: mpsc::Receiver<RealtimeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                RealtimeEvent::Connected => info!("Realtime updates flowing"),
                RealtimeEvent::Disconnected { reason } => {
                    warn!(reason = %reason, "Realtime updates paused")
                }
                RealtimeEvent::Message(body) => {
                    if dispatcher.handle_message(&body) == Dispatch::Malformed {
                        debug!(bytes = body.len(), "Realtime message dropped");
                    }
                }
            }
        }
    })
}

/// Periodically expire lock requests that were never granted.
fn spawn_lock_sweeper(locks: LockCoordinator, grant_timeout: Duration) -> JoinHandle<()> {
    let period = (grant_timeout / 2).max(MIN_SWEEP_PERIOD);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let expired = locks.sweep_pending(Utc::now());
            if !expired.is_empty() {
                debug!(tables = expired.len(), "Expired lock requests cleared");
            }
        }
    })
}
