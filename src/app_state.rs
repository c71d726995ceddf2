//! Shared application state handed to every connection task.

use std::sync::Arc;

use crate::config::{EngineConfig, HttpLimits, WsLimits};
use crate::connection::Handler;
use crate::http::{SpoolFactory, TempFileSpool};
use crate::pubsub::Hub;
use crate::server::DemoApp;

/// Everything a connection task needs, cloned once per accepted socket.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Pub/sub hub shared by all connections.
    pub hub: Arc<Hub>,
    /// Application callbacks.
    pub handler: Arc<dyn Handler>,
    /// Overflow storage for large request bodies.
    pub spool: Arc<dyn SpoolFactory>,
    /// HTTP parser limits.
    pub http: HttpLimits,
    /// WebSocket limits.
    pub ws: WsLimits,
}

impl AppState {
    /// Builds state for the demo application over `hub`, spooling bodies
    /// into `config.spool_dir`.
    #[must_use]
    pub fn new(config: &EngineConfig, hub: Arc<Hub>) -> Self {
        let handler: Arc<dyn Handler> = Arc::new(DemoApp::new(Arc::clone(&hub)));
        Self::with_handler(config, hub, handler)
    }

    /// Builds state with a custom handler.
    #[must_use]
    pub fn with_handler(config: &EngineConfig, hub: Arc<Hub>, handler: Arc<dyn Handler>) -> Self {
        Self {
            hub,
            handler,
            spool: Arc::new(TempFileSpool::new(config.spool_dir.clone())),
            http: config.http,
            ws: config.ws,
        }
    }
}
