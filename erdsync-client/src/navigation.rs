//! Navigation capability injected into the network layer.
//!
//! The client never routes pages itself. Whoever hosts it hands a
//! [`Navigator`] to the session, and the REST client calls it when the
//! backend rejects the session token.

use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Login,
    Home,
    Project { project_key: i64 },
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

/// Navigator for headless hosts: records the request in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, route: Route) {
        warn!(?route, "Navigation requested");
    }
}
