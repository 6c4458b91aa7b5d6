//! STOMP-over-WebSocket connection manager with reconnect backoff.
//!
//! One task owns the socket. It connects, performs the STOMP handshake,
//! subscribes to the project topic and then multiplexes three sources:
//! inbound frames (forwarded as [`RealtimeEvent`]s), outbound events from
//! [`ConnectionHandle`]s (sent as SEND frames) and the heart-beat tick.
//! Lost connections are retried with exponential backoff. Nothing is
//! queued across a reconnect; events sent while disconnected are dropped.

use super::RealtimeSink;
use crate::api_client::{build_auth_headers, ApiClientError};
use crate::config::{ErdsyncConfig, ReconnectConfig};
use erdsync_events::{project_topic, StompCommand, StompFrame, WsEvent};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBSCRIPTION_ID: &str = "sub-0";

/// What the manager reports to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    Connected,
    Disconnected { reason: String },
    /// Body of a STOMP MESSAGE on the project topic.
    Message(String),
}

/// Sending side of the connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    outbound: mpsc::UnboundedSender<WsEvent>,
    connected: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl RealtimeSink for ConnectionHandle {
    fn send(&self, event: WsEvent) -> bool {
        self.is_connected() && self.outbound.send(event).is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct StompSettings {
    pub endpoint: String,
    pub access_token: String,
    pub project_key: i64,
    pub heartbeat: Duration,
    /// Longest wait for the server's CONNECTED frame.
    pub handshake_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl StompSettings {
    pub fn from_config(config: &ErdsyncConfig) -> Self {
        Self {
            endpoint: config.ws_endpoint.clone(),
            access_token: config.auth.access_token.clone(),
            project_key: config.project_key,
            heartbeat: Duration::from_millis(config.realtime.stomp_heartbeat_ms),
            handshake_timeout: config.request_timeout(),
            reconnect: config.reconnect.clone(),
        }
    }
}

enum SessionEnd {
    Lost(String),
    Shutdown,
}

/// Start the connection manager. The task ends once every
/// [`ConnectionHandle`] is dropped or `events` is closed.
pub fn spawn_connection(
    settings: StompSettings,
    events: mpsc::Sender<RealtimeEvent>,
) -> (ConnectionHandle, JoinHandle<()>) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let connected = Arc::new(AtomicBool::new(false));
    let handle = ConnectionHandle {
        outbound: outbound_tx,
        connected: connected.clone(),
    };

    let task = tokio::spawn(async move {
        let reconnect = settings.reconnect.clone();
        let mut backoff = reconnect.initial_ms;
        loop {
            match connect(&settings).await {
                Ok(mut stream) => {
                    info!(project_key = settings.project_key, "Realtime channel connected");
                    backoff = reconnect.initial_ms;
                    while outbound_rx.try_recv().is_ok() {}
                    connected.store(true, Ordering::Release);
                    if events.send(RealtimeEvent::Connected).await.is_err() {
                        return;
                    }

                    let end =
                        run_session(&mut stream, &mut outbound_rx, &events, settings.heartbeat)
                            .await;
                    connected.store(false, Ordering::Release);
                    match end {
                        SessionEnd::Shutdown => {
                            let _ = stream.close(None).await;
                            debug!("Realtime channel shut down");
                            return;
                        }
                        SessionEnd::Lost(reason) => {
                            warn!(reason = %reason, "Realtime channel lost");
                            if events
                                .send(RealtimeEvent::Disconnected { reason })
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, backoff_ms = backoff, "Realtime connect failed");
                }
            }

            if events.is_closed() {
                return;
            }
            let delay = jittered_backoff(backoff, reconnect.jitter_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            let next = (backoff as f64 * reconnect.multiplier) as u64;
            backoff = next.min(reconnect.max_ms);
        }
    });

    (handle, task)
}

fn protocol_error(message: impl Into<String>) -> ApiClientError {
    ApiClientError::InvalidResponse(message.into())
}

async fn connect(settings: &StompSettings) -> Result<WsStream, ApiClientError> {
    let mut request = settings.endpoint.as_str().into_client_request()?;
    let host = request.uri().host().unwrap_or_default().to_string();
    for (name, value) in build_auth_headers(&settings.access_token)?.iter() {
        request.headers_mut().insert(name, value.clone());
    }
    let (mut stream, _) = tokio_tungstenite::connect_async(request).await?;

    let heartbeat_ms = settings.heartbeat.as_millis() as u64;
    let connect = StompFrame::connect(&host, &settings.access_token, (heartbeat_ms, heartbeat_ms));
    stream.send(Message::Text(connect.encode())).await?;

    await_connected(&mut stream, settings.handshake_timeout).await?;

    let topic = project_topic(settings.project_key);
    let subscribe = StompFrame::subscribe(SUBSCRIPTION_ID, &topic);
    stream.send(Message::Text(subscribe.encode())).await?;
    debug!(topic = %topic, "Subscribed to project topic");
    Ok(stream)
}

/// Wait for the server's CONNECTED frame, giving up after `limit`.
async fn await_connected<S>(stream: &mut S, limit: Duration) -> Result<(), ApiClientError>
where
    S: futures_util::Stream<Item = Result<Message, WsError>> + Unpin,
{
    let handshake = async {
        loop {
            let message = stream
                .next()
                .await
                .ok_or_else(|| protocol_error("socket closed during STOMP handshake"))??;
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(protocol_error("socket closed during STOMP handshake"))
                }
                _ => continue,
            };
            let frame = StompFrame::decode(&text).map_err(|e| protocol_error(e.to_string()))?;
            match frame {
                Some(frame) if frame.command == StompCommand::Connected => return Ok(()),
                Some(frame) if frame.command == StompCommand::Error => {
                    return Err(protocol_error(format!(
                        "STOMP connect refused: {}",
                        frame.get("message").unwrap_or("no reason given")
                    )));
                }
                _ => {}
            }
        }
    };
    tokio::time::timeout(limit, handshake)
        .await
        .map_err(|_| protocol_error(format!("no STOMP CONNECTED within {}ms", limit.as_millis())))?
}

async fn run_session(
    stream: &mut WsStream,
    outbound: &mut mpsc::UnboundedReceiver<WsEvent>,
    events: &mpsc::Sender<RealtimeEvent>,
    heartbeat: Duration,
) -> SessionEnd {
    let start = tokio::time::Instant::now() + heartbeat;
    let mut ticker = tokio::time::interval_at(start, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => match StompFrame::decode(&text) {
                    Ok(Some(frame)) => match frame.command {
                        StompCommand::Message => {
                            if events.send(RealtimeEvent::Message(frame.body)).await.is_err() {
                                return SessionEnd::Shutdown;
                            }
                        }
                        StompCommand::Error => {
                            return SessionEnd::Lost(format!(
                                "STOMP error: {}",
                                frame.get("message").unwrap_or("no reason given")
                            ));
                        }
                        _ => {}
                    },
                    Ok(None) => {}
                    Err(err) => warn!(error = %err, "Undecodable STOMP frame skipped"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return SessionEnd::Lost("connection closed".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return SessionEnd::Lost(err.to_string()),
            },
            outgoing = outbound.recv() => match outgoing {
                Some(event) => {
                    let body = match serde_json::to_string(&event) {
                        Ok(body) => body,
                        Err(err) => {
                            warn!(event_type = event.event_type(), error = %err, "Unserializable event dropped");
                            continue;
                        }
                    };
                    let frame = StompFrame::send(event.destination(), body);
                    if let Err(err) = stream.send(Message::Text(frame.encode())).await {
                        return SessionEnd::Lost(err.to_string());
                    }
                }
                None => {
                    let _ = stream
                        .send(Message::Text(StompFrame::disconnect().encode()))
                        .await;
                    return SessionEnd::Shutdown;
                }
            },
            _ = ticker.tick() => {
                if let Err(err) = stream.send(Message::Text("\n".to_string())).await {
                    return SessionEnd::Lost(err.to_string());
                }
            }
        }
    }
}

fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    base_ms.saturating_add(nanos % jitter_ms)
}
