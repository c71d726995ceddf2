//! Publish/subscribe hub.
//!
//! - [`subscription`]: channel keys and compiled glob patterns.
//! - [`registry`]: exact and pattern subscription tables.
//! - [`subscriber`]: subscriber identity and delivery.
//! - [`engine`]: external backend adapters.
//! - [`fanout`]: scopes and cross-worker forwarding.
//! - [`hub`]: the [`Hub`] tying them together.

pub mod engine;
pub mod fanout;
pub mod hub;
pub mod registry;
pub mod subscriber;
pub mod subscription;

pub use engine::{Engine, EngineAdapter, EngineId};
pub use fanout::{Envelope, FanoutBus, FanoutChannel, FanoutScope, NoPeers, ProcessRole};
pub use hub::Hub;
pub use subscriber::{MailboxSubscriber, Publication, Subscriber, SubscriberId};
pub use subscription::{ChannelKey, ChannelPattern};

/// Errors returned by hub operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// A pattern subscription whose glob does not compile.
    #[error("invalid channel pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The pattern text.
        pattern: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// No adapter is attached under this id.
    #[error("unknown engine {0}")]
    UnknownEngine(EngineId),

    /// [`Engine::Default`] cannot be its own default.
    #[error("default engine must be a scope or an attached adapter")]
    InvalidDefault,
}
