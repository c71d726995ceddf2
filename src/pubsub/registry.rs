//! Subscription registry: exact channels, ordered patterns and a reverse
//! index per subscriber.
//!
//! The registry itself is not synchronized; [`super::Hub`] wraps it in a
//! mutex and never calls out (deliveries, adapter callbacks) while holding
//! it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::HubError;
use super::subscriber::{Subscriber, SubscriberId};
use super::subscription::{ChannelKey, ChannelPattern};

type Members = HashMap<SubscriberId, Arc<dyn Subscriber>>;

#[derive(Debug)]
struct PatternEntry {
    pattern: ChannelPattern,
    members: Members,
}

/// Result of [`Registry::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inserted {
    /// The subscriber was not already on this channel.
    pub added: bool,
    /// The channel had no subscribers before this call.
    pub channel_created: bool,
}

/// Result of [`Registry::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removed {
    /// The subscriber was on this channel.
    pub removed: bool,
    /// The channel has no subscribers left.
    pub channel_emptied: bool,
}

/// Exact and pattern subscription tables.
#[derive(Debug, Default)]
pub struct Registry {
    exact: HashMap<String, Members>,
    patterns: Vec<PatternEntry>,
    by_subscriber: HashMap<SubscriberId, HashSet<ChannelKey>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `subscriber` to `key`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidPattern`] if `key` is a pattern that does
    /// not compile.
    pub fn insert(&mut self, key: &ChannelKey, subscriber: Arc<dyn Subscriber>) -> Result<Inserted, HubError> {
        let id = subscriber.id();
        let members = if key.is_pattern() {
            let position = self
                .patterns
                .iter()
                .position(|e| e.pattern.as_str() == key.name());
            let index = match position {
                Some(index) => index,
                None => {
                    let pattern = ChannelPattern::compile(key.name())?;
                    self.patterns.push(PatternEntry {
                        pattern,
                        members: Members::new(),
                    });
                    self.patterns.len() - 1
                }
            };
            match self.patterns.get_mut(index) {
                Some(entry) => &mut entry.members,
                None => return Err(HubError::InvalidPattern {
                    pattern: key.name().to_string(),
                    reason: "pattern slot vanished".to_string(),
                }),
            }
        } else {
            self.exact.entry(key.name().to_string()).or_default()
        };

        let channel_created = members.is_empty();
        let added = members.insert(id, subscriber).is_none();
        self.by_subscriber.entry(id).or_default().insert(key.clone());
        Ok(Inserted {
            added,
            channel_created,
        })
    }

    /// Removes subscriber `id` from `key`.
    pub fn remove(&mut self, key: &ChannelKey, id: SubscriberId) -> Removed {
        let outcome = self.detach_member(key, id);
        if outcome.removed
            && let Some(keys) = self.by_subscriber.get_mut(&id)
        {
            keys.remove(key);
            if keys.is_empty() {
                self.by_subscriber.remove(&id);
            }
        }
        outcome
    }

    /// Removes every subscription held by `id`, returning the channels that
    /// became empty.
    pub fn remove_subscriber(&mut self, id: SubscriberId) -> Vec<ChannelKey> {
        let Some(keys) = self.by_subscriber.remove(&id) else {
            return Vec::new();
        };
        let mut emptied: Vec<ChannelKey> = keys
            .into_iter()
            .filter(|key| self.detach_member(key, id).channel_emptied)
            .collect();
        emptied.sort();
        emptied
    }

    /// Returns every subscriber matching `channel`, each exactly once.
    ///
    /// Exact subscribers come first, then pattern subscribers in pattern
    /// registration order.
    #[must_use]
    pub fn matching(&self, channel: &str) -> Vec<Arc<dyn Subscriber>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let exact = self.exact.get(channel).into_iter().flat_map(|m| m.iter());
        let patterns = self
            .patterns
            .iter()
            .filter(|e| e.pattern.matches(channel))
            .flat_map(|e| e.members.iter());
        for (id, subscriber) in exact.chain(patterns) {
            if seen.insert(*id) {
                out.push(Arc::clone(subscriber));
            }
        }
        out
    }

    /// Every channel and pattern with at least one subscriber.
    #[must_use]
    pub fn channels(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<ChannelKey> = self.exact.keys().map(ChannelKey::exact).collect();
        keys.sort();
        keys.extend(
            self.patterns
                .iter()
                .map(|e| ChannelKey::pattern(e.pattern.as_str())),
        );
        keys
    }

    /// Number of subscribers on `key`.
    #[must_use]
    pub fn subscriber_count(&self, key: &ChannelKey) -> usize {
        if key.is_pattern() {
            self.patterns
                .iter()
                .find(|e| e.pattern.as_str() == key.name())
                .map_or(0, |e| e.members.len())
        } else {
            self.exact.get(key.name()).map_or(0, HashMap::len)
        }
    }

    /// Channels `id` is subscribed to.
    #[must_use]
    pub fn subscriptions_of(&self, id: SubscriberId) -> Vec<ChannelKey> {
        let mut keys: Vec<ChannelKey> = self
            .by_subscriber
            .get(&id)
            .map(|k| k.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Returns `true` if nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.patterns.is_empty()
    }

    fn detach_member(&mut self, key: &ChannelKey, id: SubscriberId) -> Removed {
        if key.is_pattern() {
            let Some(index) = self
                .patterns
                .iter()
                .position(|e| e.pattern.as_str() == key.name())
            else {
                return Removed {
                    removed: false,
                    channel_emptied: false,
                };
            };
            let Some(entry) = self.patterns.get_mut(index) else {
                return Removed {
                    removed: false,
                    channel_emptied: false,
                };
            };
            let removed = entry.members.remove(&id).is_some();
            let channel_emptied = removed && entry.members.is_empty();
            if channel_emptied {
                self.patterns.remove(index);
            }
            Removed {
                removed,
                channel_emptied,
            }
        } else {
            let Some(members) = self.exact.get_mut(key.name()) else {
                return Removed {
                    removed: false,
                    channel_emptied: false,
                };
            };
            let removed = members.remove(&id).is_some();
            let channel_emptied = removed && members.is_empty();
            if channel_emptied {
                self.exact.remove(key.name());
            }
            Removed {
                removed,
                channel_emptied,
            }
        }
    }
}
