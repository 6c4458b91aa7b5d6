//! Log output for the headless client.

use crate::error::ClientError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` overrides the default level.
pub fn init_tracing(json: bool) -> Result<(), ClientError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("erdsync_client=debug,info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    installed.map_err(|e| ClientError::Telemetry(e.to_string()))?;

    tracing::info!(json, "Logging initialized");
    Ok(())
}
