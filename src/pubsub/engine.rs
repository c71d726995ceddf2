//! External pub/sub backends.
//!
//! An [`EngineAdapter`] mirrors the hub's subscription state into some
//! other system (a broker, a cluster bus) and carries publications there.
//! Messages the backend receives come back through
//! [`super::Hub::deliver_inbound`].

use std::fmt;

use super::fanout::FanoutScope;

/// Identifier returned by [`super::Hub::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(uuid::Uuid);

impl EngineId {
    /// Creates a new random `EngineId`.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for EngineId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend integration contract.
///
/// Callbacks run outside the hub's registry lock but on the caller's
/// thread, so implementations that do network I/O should hand the work to
/// their own task and return promptly.
pub trait EngineAdapter: Send + Sync + fmt::Debug {
    /// A channel gained its first local subscriber (or is being replayed).
    /// Returning `false` is logged; local delivery is unaffected.
    fn on_subscribe(&self, channel: &str, is_pattern: bool) -> bool;

    /// A channel lost its last local subscriber.
    fn on_unsubscribe(&self, channel: &str, is_pattern: bool);

    /// Publishes through the backend. The return value is handed back to
    /// the publisher.
    fn on_publish(&self, channel: &str, payload: &[u8]) -> bool;

    /// Called once when the adapter is detached.
    fn on_detach(&self) {}
}

/// Target of a publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// Whatever [`super::Hub::default_engine`] currently is.
    Default,
    /// One of the built-in fan-out scopes.
    Scope(FanoutScope),
    /// An attached adapter.
    Adapter(EngineId),
}

impl Default for Engine {
    fn default() -> Self {
        Self::Scope(FanoutScope::Cluster)
    }
}
