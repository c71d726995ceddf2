//! Tokio host: accept loop, per-connection tasks and the demo application.
//!
//! Each accepted socket is owned by one task, which drives its
//! [`Connection`] from three sources: socket readiness, the connection's
//! pub/sub mailbox and the WebSocket ping timer. Only that task touches the
//! connection, so its parser and session state need no locking.

pub mod app;
pub mod messages;
pub mod transport;

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, MissedTickBehavior};

pub use app::DemoApp;
pub use transport::TokioTransport;

use crate::app_state::AppState;
use crate::config::EngineConfig;
use crate::connection::Connection;
use crate::http::HttpParser;
use crate::pubsub::{FanoutBus, FanoutChannel, Hub, MailboxSubscriber, ProcessRole, SubscriberId};

/// Builds the root hub on an in-process [`FanoutBus`] and the demo
/// application state.
///
/// Spawns the hub's fan-out pump, so it must run inside a tokio runtime.
#[must_use]
pub fn build_state(config: &EngineConfig) -> AppState {
    let bus = Arc::new(FanoutBus::new(config.fanout_capacity));
    let hub = Arc::new(Hub::with_fanout(
        Arc::clone(&bus) as Arc<dyn FanoutChannel>,
        ProcessRole::Root,
    ));
    tokio::spawn(Arc::clone(&hub).pump(bus.subscribe()));
    AppState::new(config, hub)
}

/// Accepts connections forever, one task per socket.
pub async fn serve(listener: TcpListener, state: AppState) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "set_nodelay failed");
        }
        let state = state.clone();
        tokio::spawn(async move {
            tracing::trace!(%peer, "connection accepted");
            run_connection(stream, state).await;
        });
    }
}

/// Drives one connection until it closes, then removes its subscriptions.
pub async fn run_connection(stream: TcpStream, state: AppState) {
    let (mailbox, mut publications) = MailboxSubscriber::channel(SubscriberId::new());
    let parser = HttpParser::new(state.http, Arc::clone(&state.spool));
    let mut conn = Connection::new(
        parser,
        state.ws,
        Arc::clone(&state.handler),
        Arc::new(mailbox),
    );
    let mut transport = TokioTransport::new(stream);

    let period = state.ws.ping_interval;
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            ready = transport.readable() => match ready {
                Ok(()) => conn.on_readable(&mut transport),
                Err(e) => {
                    tracing::debug!(conn = %conn.id(), error = %e, "socket error");
                    conn.close(None, &mut transport);
                }
            },
            Some(publication) = publications.recv() => conn.deliver(&publication, &mut transport),
            _ = heartbeat.tick(), if conn.is_websocket() => conn.ping(&mut transport),
        }

        if let Err(e) = transport.flush().await {
            tracing::debug!(conn = %conn.id(), error = %e, "write failed");
            conn.close(None, &mut transport);
            break;
        }
        if conn.is_closed() {
            break;
        }
    }

    transport.shutdown().await;
    state.hub.unsubscribe_all(conn.id());
}
