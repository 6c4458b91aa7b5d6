//! Server-Sent Event transport.
//!
//! Streams are opened through the [`SseConnector`] trait so the job and
//! viewer streams can be driven by scripted frames in tests.

use crate::api_client::{build_auth_headers, ApiClientError};
use crate::config::ErdsyncConfig;
use crate::navigation::{Navigator, Route};
use async_trait::async_trait;
use erdsync_events::{SseDecoder, SseFrame};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::{debug, warn};

/// Frames of one open event stream. Ends when the server closes it.
pub type SseStream = Pin<Box<dyn Stream<Item = Result<SseFrame, ApiClientError>> + Send>>;

#[async_trait]
pub trait SseConnector: Send + Sync {
    /// Open the stream at `path`, relative to the API base URL.
    async fn connect(&self, path: &str) -> Result<SseStream, ApiClientError>;
}

/// `text/event-stream` over reqwest.
#[derive(Clone)]
pub struct HttpSseConnector {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
    navigator: Arc<dyn Navigator>,
}

impl HttpSseConnector {
    /// No total timeout: streams stay open for as long as the server allows.
    pub fn new(
        base_url: &str,
        access_token: &str,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ApiClientError> {
        let mut headers = build_auth_headers(access_token)?;
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
            navigator,
        })
    }

    pub fn from_config(
        config: &ErdsyncConfig,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ApiClientError> {
        Self::new(&config.api_base_url, &config.auth.access_token, navigator)
    }
}

#[async_trait]
impl SseConnector for HttpSseConnector {
    async fn connect(&self, path: &str) -> Result<SseStream, ApiClientError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .headers(self.headers.clone())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!(path, "Event stream rejected the session token");
            self.navigator.navigate(Route::Login);
            return Err(ApiClientError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ApiClientError::InvalidResponse(format!(
                "event stream {path} answered {status}"
            )));
        }
        debug!(path, "Event stream opened");

        let mut body = Box::pin(response.bytes_stream());
        let frames = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(chunk) => {
                        for frame in decoder.push(&chunk) {
                            yield Ok::<SseFrame, ApiClientError>(frame);
                        }
                    }
                    Err(err) => {
                        yield Err(ApiClientError::from(err));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(frames))
    }
}

/// Owns a stream-consuming task. Dropping it tears the stream down.
#[derive(Debug)]
pub struct StreamTask {
    task: tokio::task::JoinHandle<()>,
}

impl StreamTask {
    pub(crate) fn new(task: tokio::task::JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for StreamTask {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
pub(crate) mod test_connector {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Hands out one scripted stream per connect. Once the script runs out,
    /// streams stay open without sending anything.
    #[derive(Default)]
    pub(crate) struct ScriptedStreams {
        streams: Mutex<VecDeque<Vec<SseFrame>>>,
        paths: Mutex<Vec<String>>,
        connects: AtomicUsize,
    }

    impl ScriptedStreams {
        pub(crate) fn new(streams: Vec<Vec<SseFrame>>) -> Arc<Self> {
            Arc::new(Self {
                streams: Mutex::new(streams.into()),
                ..Default::default()
            })
        }

        pub(crate) fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        pub(crate) fn paths(&self) -> Vec<String> {
            self.paths.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SseConnector for ScriptedStreams {
        async fn connect(&self, path: &str) -> Result<SseStream, ApiClientError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.paths.lock().unwrap().push(path.to_string());
            let next = self.streams.lock().unwrap().pop_front();
            match next {
                Some(frames) => Ok(Box::pin(futures_util::stream::iter(
                    frames.into_iter().map(Ok::<SseFrame, ApiClientError>),
                ))),
                None => Ok(Box::pin(futures_util::stream::pending::<
                    Result<SseFrame, ApiClientError>,
                >())),
            }
        }
    }

    pub(crate) fn frame(event: &str, data: &str) -> SseFrame {
        SseFrame {
            event: event.to_string(),
            data: data.to_string(),
            id: None,
            retry: None,
        }
    }
}
