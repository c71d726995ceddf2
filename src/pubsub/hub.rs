//! The pub/sub hub.
//!
//! [`Hub`] owns the subscription [`Registry`] and the table of attached
//! [`EngineAdapter`]s. Registry access is serialized by a mutex; subscriber
//! deliveries and adapter callbacks always run after the lock is released,
//! on a snapshot taken under it.
//!
//! Membership changes hold a second, outer lock across the registry update
//! and the adapter notifications it triggers, so adapters observe first and
//! last transitions in the order the registry applied them. Publishing
//! never takes it. Adapters must not call back into subscribe or
//! unsubscribe from a notification.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use super::HubError;
use super::engine::{Engine, EngineAdapter, EngineId};
use super::fanout::{Envelope, FanoutChannel, FanoutScope, NoPeers, ProcessRole};
use super::registry::Registry;
use super::subscriber::{Publication, Subscriber, SubscriberId};
use super::subscription::ChannelKey;

#[derive(Debug)]
struct EngineTable {
    adapters: Vec<(EngineId, Arc<dyn EngineAdapter>)>,
    default: Engine,
}

/// Channel registry plus engine fan-out.
#[derive(Debug)]
pub struct Hub {
    id: uuid::Uuid,
    role: ProcessRole,
    registry: Mutex<Registry>,
    membership: Mutex<()>,
    engines: RwLock<EngineTable>,
    fanout: Arc<dyn FanoutChannel>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    /// Creates a standalone root hub with no peers.
    #[must_use]
    pub fn new() -> Self {
        Self::with_fanout(Arc::new(NoPeers), ProcessRole::Root)
    }

    /// Creates a hub that reaches its peers through `fanout`.
    #[must_use]
    pub fn with_fanout(fanout: Arc<dyn FanoutChannel>, role: ProcessRole) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            role,
            registry: Mutex::new(Registry::new()),
            membership: Mutex::new(()),
            engines: RwLock::new(EngineTable {
                adapters: Vec::new(),
                default: Engine::default(),
            }),
            fanout,
        }
    }

    /// Identity stamped on forwarded envelopes.
    #[must_use]
    pub const fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Role of this hub in its worker group.
    #[must_use]
    pub const fn role(&self) -> ProcessRole {
        self.role
    }

    /// Subscribes to a channel or pattern.
    ///
    /// Attached adapters are told when the channel gains its first
    /// subscriber. Subscribing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidPattern`] if `is_pattern` is set and the
    /// pattern does not compile.
    pub fn subscribe(&self, channel: &str, is_pattern: bool, subscriber: Arc<dyn Subscriber>) -> Result<(), HubError> {
        let key = ChannelKey::new(channel, is_pattern);
        let subscriber_id = subscriber.id();
        let _membership = self.membership.lock();
        let inserted = self.registry.lock().insert(&key, subscriber)?;
        tracing::trace!(channel = %key, subscriber = %subscriber_id, added = inserted.added, "subscribe");

        if inserted.channel_created {
            self.notify_subscribe(&key);
        }
        Ok(())
    }

    /// Removes one subscription. Returns `false` if it did not exist.
    pub fn unsubscribe(&self, channel: &str, is_pattern: bool, subscriber: SubscriberId) -> bool {
        let key = ChannelKey::new(channel, is_pattern);
        let _membership = self.membership.lock();
        let removed = self.registry.lock().remove(&key, subscriber);
        if removed.channel_emptied {
            self.notify_unsubscribe(&key);
        }
        removed.removed
    }

    /// Removes every subscription held by `subscriber`. Used on connection
    /// teardown.
    pub fn unsubscribe_all(&self, subscriber: SubscriberId) {
        let _membership = self.membership.lock();
        let emptied = self.registry.lock().remove_subscriber(subscriber);
        for key in &emptied {
            self.notify_unsubscribe(key);
        }
    }

    /// Publishes `payload` on `channel` through `engine`.
    ///
    /// For built-in scopes the result is `false` only if the fan-out
    /// channel refused the envelope. For adapters it is whatever
    /// [`EngineAdapter::on_publish`] returned, or `false` if the adapter is
    /// not attached.
    pub fn publish(&self, channel: &str, payload: impl Into<Bytes>, engine: Engine) -> bool {
        let engine = match engine {
            Engine::Default => self.default_engine(),
            other => other,
        };
        match engine {
            Engine::Scope(scope) => self.publish_scoped(Publication::new(channel, payload), scope),
            Engine::Adapter(id) => {
                let Some(adapter) = self.adapter(id) else {
                    tracing::warn!(engine = %id, channel, "publish to unknown engine");
                    return false;
                };
                let payload = payload.into();
                let ok = adapter.on_publish(channel, &payload);
                if !ok {
                    tracing::warn!(engine = %id, channel, "engine adapter rejected publish");
                }
                ok
            }
            Engine::Default => false,
        }
    }

    /// Delivers a message received by an adapter to local subscribers.
    /// Returns the number of subscribers reached.
    pub fn deliver_inbound(&self, channel: &str, payload: impl Into<Bytes>) -> usize {
        self.deliver_local(&Publication::new(channel, payload))
    }

    /// Delivers a forwarded envelope if its scope targets this hub.
    ///
    /// Envelopes this hub sent itself are ignored.
    pub fn accept_forwarded(&self, envelope: &Envelope) -> usize {
        if envelope.origin == self.id || !envelope.scope.accepts_forwarded(self.role) {
            return 0;
        }
        self.deliver_local(&envelope.publication)
    }

    /// Feeds envelopes from a [`super::FanoutBus`] receiver into this hub
    /// until the bus closes.
    pub async fn pump(self: Arc<Self>, mut receiver: broadcast::Receiver<Envelope>) {
        loop {
            match receiver.recv().await {
                Ok(envelope) => {
                    self.accept_forwarded(&envelope);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, hub = %self.id, "hub lagged behind fan-out bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!(hub = %self.id, "fan-out pump stopped");
    }

    /// Attaches an adapter and replays every active subscription to it.
    pub fn attach(&self, adapter: Arc<dyn EngineAdapter>) -> EngineId {
        let id = EngineId::new();
        let _membership = self.membership.lock();
        self.engines.write().adapters.push((id, Arc::clone(&adapter)));
        tracing::info!(engine = %id, "engine adapter attached");
        self.replay(id, adapter.as_ref());
        id
    }

    /// Detaches an adapter and runs its teardown. If it was the default
    /// engine, the default reverts to [`FanoutScope::Cluster`].
    pub fn detach(&self, id: EngineId) -> bool {
        let removed = {
            let mut table = self.engines.write();
            let position = table.adapters.iter().position(|(eid, _)| *eid == id);
            let removed = position.map(|p| table.adapters.remove(p).1);
            if removed.is_some() && table.default == Engine::Adapter(id) {
                table.default = Engine::default();
            }
            removed
        };
        let Some(adapter) = removed else {
            return false;
        };
        adapter.on_detach();
        tracing::info!(engine = %id, "engine adapter detached");
        true
    }

    /// Replays every active subscription to an attached adapter, typically
    /// after it reconnected to its backend.
    pub fn reset(&self, id: EngineId) -> bool {
        let Some(adapter) = self.adapter(id) else {
            return false;
        };
        tracing::debug!(engine = %id, "replaying subscriptions");
        let _membership = self.membership.lock();
        self.replay(id, adapter.as_ref());
        true
    }

    /// Sets the engine used by [`Engine::Default`] publishes.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidDefault`] for [`Engine::Default`] itself
    /// and [`HubError::UnknownEngine`] for an adapter that is not attached.
    pub fn set_default(&self, engine: Engine) -> Result<(), HubError> {
        let mut table = self.engines.write();
        match engine {
            Engine::Default => return Err(HubError::InvalidDefault),
            Engine::Adapter(id) if !table.adapters.iter().any(|(eid, _)| *eid == id) => {
                return Err(HubError::UnknownEngine(id));
            }
            _ => {}
        }
        table.default = engine;
        Ok(())
    }

    /// Engine that [`Engine::Default`] resolves to.
    #[must_use]
    pub fn default_engine(&self) -> Engine {
        self.engines.read().default
    }

    /// Every channel and pattern with at least one subscriber.
    #[must_use]
    pub fn channels(&self) -> Vec<ChannelKey> {
        self.registry.lock().channels()
    }

    /// Number of subscribers on a channel or pattern.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str, is_pattern: bool) -> usize {
        self.registry
            .lock()
            .subscriber_count(&ChannelKey::new(channel, is_pattern))
    }

    /// Channels and patterns `subscriber` is on.
    #[must_use]
    pub fn subscriptions_of(&self, subscriber: SubscriberId) -> Vec<ChannelKey> {
        self.registry.lock().subscriptions_of(subscriber)
    }

    fn publish_scoped(&self, publication: Publication, scope: FanoutScope) -> bool {
        if scope.delivers_locally(self.role) {
            self.deliver_local(&publication);
        }
        if !scope.forwards(self.role) {
            return true;
        }
        let channel = publication.channel.clone();
        let ok = self.fanout.forward(Envelope {
            origin: self.id,
            scope,
            publication,
        });
        if !ok {
            tracing::warn!(%scope, channel = %channel, "fan-out channel refused publication");
        }
        ok
    }

    fn deliver_local(&self, publication: &Publication) -> usize {
        let targets = self.registry.lock().matching(&publication.channel);
        for subscriber in &targets {
            subscriber.deliver(publication);
        }
        targets.len()
    }

    fn adapter(&self, id: EngineId) -> Option<Arc<dyn EngineAdapter>> {
        self.engines
            .read()
            .adapters
            .iter()
            .find(|(eid, _)| *eid == id)
            .map(|(_, adapter)| Arc::clone(adapter))
    }

    fn adapters(&self) -> Vec<(EngineId, Arc<dyn EngineAdapter>)> {
        self.engines.read().adapters.clone()
    }

    fn notify_subscribe(&self, key: &ChannelKey) {
        for (id, adapter) in self.adapters() {
            if !adapter.on_subscribe(key.name(), key.is_pattern()) {
                tracing::warn!(engine = %id, channel = %key, "engine adapter failed to subscribe");
            }
        }
    }

    fn notify_unsubscribe(&self, key: &ChannelKey) {
        for (_, adapter) in self.adapters() {
            adapter.on_unsubscribe(key.name(), key.is_pattern());
        }
    }

    fn replay(&self, id: EngineId, adapter: &dyn EngineAdapter) {
        let channels = self.registry.lock().channels();
        for key in &channels {
            if !adapter.on_subscribe(key.name(), key.is_pattern()) {
                tracing::warn!(engine = %id, channel = %key, "engine adapter failed to replay subscription");
            }
        }
    }
}
