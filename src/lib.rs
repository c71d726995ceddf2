//! # relay-engine
//!
//! Protocol engine for event-driven network servers: an incremental
//! HTTP/1.x request parser, an RFC6455 WebSocket framer and a pub/sub hub
//! with pluggable backends.
//!
//! The protocol cores are sans-io. They consume byte slices and produce
//! explicit outcomes ([`http::Feed`], [`ws::WsEvent`]); the host reactor
//! owns the sockets and talks to a [`connection::Connection`] through the
//! [`transport::Transport`] primitives.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, WebSocket)
//!     │
//!     ├── Host reactor (server/)          tokio task per connection
//!     │
//!     ├── Connection (connection)         HTTP → upgrade → WebSocket
//!     │     ├── HttpParser (http/)        head, body, overflow spool
//!     │     └── WsSession (ws/)           frames, ping/pong, close
//!     │
//!     ├── Handler (server/app)            application callbacks
//!     │
//!     └── Hub (pubsub/)                   exact + pattern registry
//!           ├── EngineAdapter             external backends
//!           └── FanoutChannel             other workers
//! ```

pub mod app_state;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod pubsub;
pub mod server;
pub mod transport;
pub mod ws;
