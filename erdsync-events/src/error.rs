//! Codec errors.

use thiserror::Error;

/// Failure to decode or encode a wire message.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid {event} payload: {source}")]
    Payload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{event} payload is missing {field}")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },

    #[error("invalid websocket envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("stomp framing error: {0}")]
    Stomp(String),
}

impl CodecError {
    pub fn payload(event: &'static str, source: serde_json::Error) -> Self {
        CodecError::Payload { event, source }
    }
}
