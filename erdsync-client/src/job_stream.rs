//! Async import-validation job stream.
//!
//! A job is started with an id handed out by the backend. While the id is
//! set and the session is active, one task keeps an event stream open on
//! `/api/v1/async-jobs/{id}/subscribe`. The terminal `import-validation`
//! event stores the result and the client closes the stream itself; a
//! malformed terminal payload closes it too, with no result. Transport
//! errors and early ends reconnect after a fixed delay. Clearing the job,
//! replacing it or losing the session cancels the stream and any pending
//! reconnect.

use crate::api_client::ApiClientError;
use crate::sse_client::{SseConnector, StreamTask};
use erdsync_core::schema::preview_tables;
use erdsync_core::Table;
use erdsync_events::sse::EVENT_IMPORT_VALIDATION;
use erdsync_events::{SseEvent, ValidationResponse};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobStreamState {
    #[default]
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImportJobState {
    pub job_id: Option<String>,
    pub loading: bool,
    pub result: Option<ValidationResponse>,
    pub stream: JobStreamState,
}

/// Shared state of the current import job.
#[derive(Debug, Clone)]
pub struct ImportJobs {
    state: Arc<watch::Sender<ImportJobState>>,
}

impl Default for ImportJobs {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportJobs {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(ImportJobState::default());
        Self {
            state: Arc::new(sender),
        }
    }

    /// Track a new job. Any stream of the previous job is torn down.
    pub fn start(&self, job_id: impl Into<String>) {
        let job_id = job_id.into();
        info!(job_id = %job_id, "Import job started");
        self.state.send_replace(ImportJobState {
            job_id: Some(job_id),
            loading: true,
            result: None,
            stream: JobStreamState::Idle,
        });
    }

    pub fn clear(&self) {
        self.state.send_replace(ImportJobState::default());
    }

    pub fn state(&self) -> ImportJobState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ImportJobState> {
        self.state.subscribe()
    }

    /// Preview of the corrected schema, once a result arrived.
    pub fn preview_tables(&self) -> Option<Vec<Table>> {
        self.state
            .borrow()
            .result
            .as_ref()
            .map(|response| preview_tables(&response.validation_result.corrected_schema))
    }

    /// Update `job_id`'s state; ignored once another job took over.
    fn modify(&self, job_id: &str, f: impl FnOnce(&mut ImportJobState)) {
        self.state.send_if_modified(|state| {
            if state.job_id.as_deref() != Some(job_id) {
                return false;
            }
            let before = state.clone();
            f(state);
            *state != before
        });
    }

    fn set_stream(&self, job_id: &str, stream: JobStreamState) {
        self.modify(job_id, |state| state.stream = stream);
    }

    fn finish(&self, job_id: &str, result: Option<ValidationResponse>) {
        self.modify(job_id, |state| {
            state.loading = false;
            state.result = result;
            state.stream = JobStreamState::Closed;
        });
    }
}

/// Drive the stream of whatever job `jobs` tracks while `session_active`
/// is true.
pub fn spawn_job_stream(
    connector: Arc<dyn SseConnector>,
    jobs: ImportJobs,
    mut session_active: watch::Receiver<bool>,
    reconnect_delay: Duration,
) -> StreamTask {
    let task = tokio::spawn(async move {
        let mut job_rx = jobs.subscribe();
        loop {
            let active = *session_active.borrow_and_update();
            let target = {
                let state = job_rx.borrow_and_update();
                match &state.job_id {
                    Some(id) if active && state.stream != JobStreamState::Closed => {
                        Some(id.clone())
                    }
                    _ => None,
                }
            };

            let Some(job_id) = target else {
                tokio::select! {
                    changed = session_active.changed() => if changed.is_err() { return },
                    changed = job_rx.changed() => if changed.is_err() { return },
                }
                continue;
            };

            let session_lost = async {
                session_active.wait_for(|active| !*active).await.map(|_| ())
            };
            let job_replaced = async {
                job_rx
                    .wait_for(|state| state.job_id.as_deref() != Some(job_id.as_str()))
                    .await
                    .map(|_| ())
            };
            tokio::select! {
                _ = follow_job(connector.as_ref(), &jobs, &job_id, reconnect_delay) => {}
                lost = session_lost => {
                    if lost.is_err() {
                        return;
                    }
                    debug!(job_id = %job_id, "Session inactive, job stream torn down");
                    jobs.set_stream(&job_id, JobStreamState::Idle);
                }
                replaced = job_replaced => {
                    if replaced.is_err() {
                        return;
                    }
                    debug!(job_id = %job_id, "Job replaced, stream torn down");
                }
            }
        }
    });
    StreamTask::new(task)
}

/// Run one job's stream until its terminal event.
async fn follow_job(
    connector: &dyn SseConnector,
    jobs: &ImportJobs,
    job_id: &str,
    reconnect_delay: Duration,
) {
    let path = format!("/api/v1/async-jobs/{job_id}/subscribe");
    loop {
        jobs.set_stream(job_id, JobStreamState::Connecting);
        match connector.connect(&path).await {
            Ok(mut stream) => {
                jobs.set_stream(job_id, JobStreamState::Open);
                while let Some(frame) = stream.next().await {
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!(job_id, error = %err, "Job stream transport error");
                            break;
                        }
                    };
                    match SseEvent::decode(&frame) {
                        Ok(SseEvent::Connected) => info!(job_id, "Job stream connected"),
                        Ok(SseEvent::ImportValidation(response)) => {
                            info!(
                                job_id,
                                status = ?response.status,
                                has_errors = response.has_errors,
                                "Import validation finished"
                            );
                            jobs.finish(job_id, Some(response));
                            return;
                        }
                        Ok(other) => debug!(job_id, event = ?other, "Job stream event ignored"),
                        Err(err) if frame.event == EVENT_IMPORT_VALIDATION => {
                            warn!(job_id, error = %err, "Malformed import validation result, job closed");
                            jobs.finish(job_id, None);
                            return;
                        }
                        Err(err) => warn!(job_id, error = %err, "Malformed job event skipped"),
                    }
                }
                debug!(job_id, "Job stream ended before a result");
            }
            Err(ApiClientError::Unauthorized) => {
                jobs.finish(job_id, None);
                return;
            }
            Err(err) => warn!(job_id, error = %err, "Job stream connect failed"),
        }
        jobs.set_stream(job_id, JobStreamState::Reconnecting);
        tokio::time::sleep(reconnect_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse_client::test_connector::{frame, ScriptedStreams};

    const DELAY: Duration = Duration::from_secs(3);

    const RESULT: &str = r#"{
        "requestId": "job-1", "status": "success", "hasErrors": false,
        "processedAt": "2025-11-20T10:00:00",
        "validationResult": {
            "userFriendlyMessage": "Looks good",
            "correctedSchema": {"tables": [{"name": "users", "columns": [
                {"name": "id", "type": "BIGINT", "constraints": ["PRIMARY KEY"]}
            ]}]}
        }
    }"#;

    async fn wait_closed(jobs: &ImportJobs) -> ImportJobState {
        jobs.subscribe()
            .wait_for(|s| s.stream == JobStreamState::Closed)
            .await
            .unwrap()
            .clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_closes_stream() {
        let script = ScriptedStreams::new(vec![vec![
            frame("connected", "ok"),
            frame("import-validation", RESULT),
        ]]);
        let jobs = ImportJobs::new();
        let (_session, active) = watch::channel(true);
        let _task = spawn_job_stream(script.clone(), jobs.clone(), active, DELAY);

        jobs.start("job-1");
        let state = wait_closed(&jobs).await;
        assert!(!state.loading);
        assert_eq!(state.result.unwrap().request_id, "job-1");
        assert_eq!(script.paths()[0], "/api/v1/async-jobs/job-1/subscribe");

        tokio::time::sleep(DELAY * 3).await;
        assert_eq!(script.connects(), 1);
        assert_eq!(jobs.preview_tables().unwrap()[0].logical_name, "users");
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_result_closes_without_reconnect() {
        let script = ScriptedStreams::new(vec![vec![
            frame("connected", "ok"),
            frame("import-validation", "{\"requestId\": "),
        ]]);
        let jobs = ImportJobs::new();
        let (_session, active) = watch::channel(true);
        let _task = spawn_job_stream(script.clone(), jobs.clone(), active, DELAY);

        jobs.start("job-2");
        let state = wait_closed(&jobs).await;
        assert!(!state.loading);
        assert!(state.result.is_none());

        tokio::time::sleep(DELAY * 3).await;
        assert_eq!(script.connects(), 1);
        assert_eq!(jobs.state().stream, JobStreamState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_end_reconnects_after_delay() {
        let script = ScriptedStreams::new(vec![vec![frame("connected", "ok")]]);
        let jobs = ImportJobs::new();
        let (_session, active) = watch::channel(true);
        let _task = spawn_job_stream(script.clone(), jobs.clone(), active, DELAY);

        jobs.start("job-3");
        tokio::time::sleep(DELAY / 2).await;
        assert_eq!(script.connects(), 1);
        assert_eq!(jobs.state().stream, JobStreamState::Reconnecting);

        tokio::time::sleep(DELAY).await;
        assert_eq!(script.connects(), 2);
        assert_eq!(jobs.state().stream, JobStreamState::Open);
        assert!(jobs.state().loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_session_and_cancels_reconnect() {
        let script = ScriptedStreams::new(vec![vec![frame("connected", "ok")]]);
        let jobs = ImportJobs::new();
        let (session, active) = watch::channel(false);
        let _task = spawn_job_stream(script.clone(), jobs.clone(), active, DELAY);

        jobs.start("job-4");
        tokio::time::sleep(DELAY).await;
        assert_eq!(script.connects(), 0);

        session.send_replace(true);
        tokio::time::sleep(DELAY / 2).await;
        assert_eq!(script.connects(), 1);

        session.send_replace(false);
        tokio::time::sleep(DELAY * 3).await;
        assert_eq!(script.connects(), 1);
        assert_eq!(jobs.state().stream, JobStreamState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_job_replaces_stream() {
        let script = ScriptedStreams::new(vec![]);
        let jobs = ImportJobs::new();
        let (_session, active) = watch::channel(true);
        let _task = spawn_job_stream(script.clone(), jobs.clone(), active, DELAY);

        jobs.start("a");
        tokio::time::sleep(Duration::from_millis(10)).await;
        jobs.start("b");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let paths = script.paths();
        assert_eq!(
            paths,
            vec![
                "/api/v1/async-jobs/a/subscribe".to_string(),
                "/api/v1/async-jobs/b/subscribe".to_string()
            ]
        );
    }
}
