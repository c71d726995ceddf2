//! Subscriber identity and delivery.
//!
//! A [`Subscriber`] is anything the hub can hand a [`Publication`] to: a
//! connection's mailbox, a process-scope callback, a test recorder. The hub
//! keys its registries by [`SubscriberId`] so a subscriber reached through
//! several channels or patterns receives each publication once.

use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Unique identifier for a subscriber.
///
/// Wraps a UUID v4 generated when the subscriber (usually a connection) is
/// created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(uuid::Uuid);

impl SubscriberId {
    /// Creates a new random `SubscriberId`.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<uuid::Uuid> for SubscriberId {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}

/// A message published on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    /// Channel the message was published on.
    pub channel: String,
    /// Opaque message bytes.
    pub payload: Bytes,
}

impl Publication {
    /// Creates a publication.
    #[must_use]
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Receiver of publications.
///
/// `deliver` is called outside the hub's registry lock and must not block.
pub trait Subscriber: Send + Sync + fmt::Debug {
    /// Stable identity used for de-duplication and teardown.
    fn id(&self) -> SubscriberId;

    /// Hands over one publication.
    fn deliver(&self, publication: &Publication);
}

/// Subscriber that forwards publications into an unbounded channel, read
/// by the task that owns the connection.
#[derive(Debug, Clone)]
pub struct MailboxSubscriber {
    id: SubscriberId,
    sender: mpsc::UnboundedSender<Publication>,
}

impl MailboxSubscriber {
    /// Creates a subscriber and the receiving end of its mailbox.
    #[must_use]
    pub fn channel(id: SubscriberId) -> (Self, mpsc::UnboundedReceiver<Publication>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { id, sender }, receiver)
    }
}

impl Subscriber for MailboxSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn deliver(&self, publication: &Publication) {
        if self.sender.send(publication.clone()).is_err() {
            tracing::trace!(subscriber = %self.id, "mailbox closed, dropping publication");
        }
    }
}
