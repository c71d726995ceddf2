//! WebSocket message types for the demo application: envelope, commands
//! and events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pubsub::FanoutScope;

/// Top-level WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    /// Client-provided ID for requests; server-generated for events.
    pub id: String,
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub msg_type: WsMessageType,
    /// ISO-8601 timestamp.
    pub timestamp: DateTime<Utc>,
    /// Variant-specific payload.
    pub payload: serde_json::Value,
}

impl WsMessage {
    /// Builds a server-originated message stamped with the current time.
    #[must_use]
    pub fn new(id: impl Into<String>, msg_type: WsMessageType, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            msg_type,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Builds an error reply.
    #[must_use]
    pub fn error(id: impl Into<String>, code: u16, message: &str) -> Self {
        Self::new(
            id,
            WsMessageType::Error,
            serde_json::json!({ "code": code, "message": message }),
        )
    }

    /// Serializes to a JSON string, or `None` if serialization fails.
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

/// Discriminator for WebSocket message types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WsMessageType {
    /// Client → Server command.
    Command,
    /// Server → Client response to a command.
    Response,
    /// Server → Client publication.
    Event,
    /// Server → Client error.
    Error,
}

/// Commands that a client can send in the payload of a
/// [`WsMessageType::Command`] message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WsCommand {
    /// Subscribe to a channel or glob pattern.
    Subscribe {
        /// Channel name or pattern.
        channel: String,
        /// Treat `channel` as a glob pattern.
        #[serde(default)]
        pattern: bool,
    },
    /// Drop a subscription.
    Unsubscribe {
        /// Channel name or pattern.
        channel: String,
        /// Treat `channel` as a glob pattern.
        #[serde(default)]
        pattern: bool,
    },
    /// Publish a message.
    Publish {
        /// Target channel.
        channel: String,
        /// Message text.
        data: String,
        /// Fan-out breadth. Uses the hub's default engine when omitted.
        #[serde(default)]
        scope: Option<FanoutScope>,
    },
    /// List this connection's subscriptions.
    ListSubscriptions,
}

/// Payload of a [`WsMessageType::Event`] message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationEvent {
    /// Channel the message was published on.
    pub channel: String,
    /// Message text (lossy UTF-8).
    pub data: String,
}
