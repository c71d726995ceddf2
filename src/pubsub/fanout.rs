//! Cross-process fan-out.
//!
//! The hub only knows how to deliver to its own subscribers. Reaching other
//! workers goes through a [`FanoutChannel`]; [`FanoutBus`] is the in-process
//! implementation, a [`tokio::sync::broadcast`] channel shared by a group of
//! hubs (one per worker).

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::subscriber::Publication;

/// How far a publication travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutScope {
    /// This hub's subscribers only.
    Process,
    /// Every other worker, not this one.
    Siblings,
    /// This hub and every other worker.
    Cluster,
    /// The root worker only.
    Root,
}

impl FanoutScope {
    /// Returns `true` if a hub with `role` delivers to its own subscribers
    /// when it publishes with this scope.
    #[must_use]
    pub const fn delivers_locally(self, role: ProcessRole) -> bool {
        match self {
            Self::Process | Self::Cluster => true,
            Self::Siblings => false,
            Self::Root => matches!(role, ProcessRole::Root),
        }
    }

    /// Returns `true` if a publication with this scope leaves a hub with
    /// `role`.
    #[must_use]
    pub const fn forwards(self, role: ProcessRole) -> bool {
        match self {
            Self::Process => false,
            Self::Siblings | Self::Cluster => true,
            Self::Root => matches!(role, ProcessRole::Worker),
        }
    }

    /// Returns `true` if a hub with `role` accepts a forwarded publication
    /// with this scope.
    #[must_use]
    pub const fn accepts_forwarded(self, role: ProcessRole) -> bool {
        match self {
            Self::Process => false,
            Self::Siblings | Self::Cluster => true,
            Self::Root => matches!(role, ProcessRole::Root),
        }
    }
}

impl fmt::Display for FanoutScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Process => "process",
            Self::Siblings => "siblings",
            Self::Cluster => "cluster",
            Self::Root => "root",
        };
        f.write_str(s)
    }
}

/// Position of a hub within its worker group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessRole {
    /// The coordinator; receives [`FanoutScope::Root`] publications.
    #[default]
    Root,
    /// Any other worker.
    Worker,
}

/// A publication in transit between hubs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Id of the hub that published it.
    pub origin: uuid::Uuid,
    /// Requested breadth.
    pub scope: FanoutScope,
    /// The publication itself.
    pub publication: Publication,
}

/// Carries envelopes to the other hubs of a group.
pub trait FanoutChannel: Send + Sync + fmt::Debug {
    /// Hands an envelope to the group. Returns `false` if it could not be
    /// sent.
    fn forward(&self, envelope: Envelope) -> bool;
}

/// Fan-out for a hub that has no peers. Forwarding always succeeds and goes
/// nowhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPeers;

impl FanoutChannel for NoPeers {
    fn forward(&self, _envelope: Envelope) -> bool {
        true
    }
}

/// Broadcast bus for [`Envelope`]s shared by in-process workers.
///
/// Backed by a `tokio::broadcast` channel with a configurable capacity
/// (default 10 000). When the ring buffer is full, the oldest envelopes are
/// dropped for lagging receivers.
#[derive(Debug, Clone)]
pub struct FanoutBus {
    sender: broadcast::Sender<Envelope>,
}

impl FanoutBus {
    /// Creates a new `FanoutBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Sends an envelope to every receiver, returning how many got it.
    pub fn send(&self, envelope: Envelope) -> usize {
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Creates a new receiver that will receive all future envelopes.
    ///
    /// Each hub in the group should call this once and pass the receiver to
    /// [`super::Hub::pump`].
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl FanoutChannel for FanoutBus {
    fn forward(&self, envelope: Envelope) -> bool {
        // No receivers means no peers, which is not a failure.
        self.send(envelope);
        true
    }
}
