//! Error types for the sync client.

use crate::api_client::ApiClientError;
use crate::config::ConfigError;
use crate::locks::LockError;
use erdsync_core::StoreError;
use erdsync_events::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiClientError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("Failed to initialise logging: {0}")]
    Telemetry(String),
}
