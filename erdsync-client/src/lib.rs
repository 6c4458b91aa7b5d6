//! ERDSYNC client: the sync core of a collaborative ERD editor.
//!
//! Local edits apply to the document at once and are pushed to the backend
//! through [`mutation::Workspace`]. Table locks, realtime broadcasts between
//! editors and the two server-sent event streams keep every open editor of
//! a project converging on the same diagram.

pub mod api_client;
pub mod config;
pub mod document;
pub mod error;
pub mod heartbeat;
pub mod job_stream;
pub mod locks;
pub mod mutation;
pub mod navigation;
pub mod notifications;
pub mod realtime;
pub mod session;
pub mod sse_client;
pub mod telemetry;
pub mod viewer_stream;
