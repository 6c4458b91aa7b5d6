//! ERDSYNC headless client: joins a project and follows it until Ctrl-C.

use erdsync_client::config::ErdsyncConfig;
use erdsync_client::error::ClientError;
use erdsync_client::navigation::LogNavigator;
use erdsync_client::notifications::{Notification, NotificationLevel};
use erdsync_client::session::Session;
use erdsync_client::telemetry;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let config = ErdsyncConfig::load()?;
    telemetry::init_tracing(config.logging.json)?;

    let (session, mut notices) = Session::connect(config, Arc::new(LogNavigator))?;
    if let Err(err) = session.workspace().load().await {
        error!(error = %err, "Initial project load failed");
        session.shutdown();
        return Err(err.into());
    }
    let tables = session.document().read(|store| store.tables().len());
    info!(tables, "Following project, Ctrl-C to leave");

    loop {
        tokio::select! {
            Some(notice) = notices.recv() => log_notice(&notice),
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    session.shutdown();
    Ok(())
}

fn log_notice(notice: &Notification) {
    let table = notice.table.as_ref().map(|t| t.as_str().to_string());
    match notice.level {
        NotificationLevel::Error => error!(kind = ?notice.kind, table = ?table, "{}", notice.message),
        NotificationLevel::Warning => warn!(kind = ?notice.kind, table = ?table, "{}", notice.message),
        NotificationLevel::Info | NotificationLevel::Success => {
            info!(kind = ?notice.kind, table = ?table, "{}", notice.message)
        }
    }
}
