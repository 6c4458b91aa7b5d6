//! ERDSYNC Events - Wire Vocabulary
//!
//! Everything that crosses the network as text, with no I/O of its own:
//!
//! - `payload`: table / column / relation shapes shared by REST and realtime
//! - `ws`: the editor-to-editor event enum and its envelope
//! - `stomp`: STOMP 1.2 framing of the WebSocket channel
//! - `sse_frame` / `sse`: event-stream framing and the SSE event payloads

mod error;
pub mod payload;
pub mod sse;
mod sse_frame;
pub mod stomp;
pub mod ws;

pub use error::CodecError;
pub use payload::{ColumnPayload, ProjectErd, RelationPayload, TablePayload};
pub use sse::{ErdUpdate, SseEvent, ValidationResponse, ValidationStatus, ViewerUpdate};
pub use sse_frame::{SseDecoder, SseFrame};
pub use stomp::{StompCommand, StompFrame};
pub use ws::{project_topic, VersionedEntity, WsEnvelope, WsEvent};

/// Decode the body of a STOMP MESSAGE into a realtime envelope.
pub fn decode_envelope(body: &str) -> Result<WsEnvelope, CodecError> {
    Ok(serde_json::from_str(body)?)
}
