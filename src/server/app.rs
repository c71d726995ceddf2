//! Demo application: health check, HTTP publish and JSON pub/sub commands
//! over WebSocket.
//!
//! | Route            | Behavior                                         |
//! |------------------|--------------------------------------------------|
//! | `GET /health`    | service status and active channel count          |
//! | `POST /publish`  | publishes the body on `?channel=<name>`          |
//! | `GET /ws`        | WebSocket upgrade; speaks [`WsCommand`]s         |

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use super::messages::{PublicationEvent, WsCommand, WsMessage, WsMessageType};
use crate::connection::{Handler, Reply, WsContext};
use crate::http::{Request, Response};
use crate::pubsub::{Engine, Hub, Publication, SubscriberId};
use crate::ws::Message;

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
    channels: usize,
}

/// JSON error body for HTTP routes.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    code: u16,
    message: &'a str,
}

/// HTTP publish result.
#[derive(Debug, Serialize)]
struct PublishResponse<'a> {
    channel: &'a str,
    accepted: bool,
}

/// [`Handler`] wired to a [`Hub`].
#[derive(Debug)]
pub struct DemoApp {
    hub: Arc<Hub>,
}

impl DemoApp {
    /// Creates the application over `hub`.
    #[must_use]
    pub const fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    fn health(&self) -> Response {
        json_response(
            200,
            &HealthResponse {
                status: "healthy".to_string(),
                timestamp: Utc::now().to_rfc3339(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                channels: self.hub.channels().len(),
            },
        )
    }

    fn publish_http(&self, request: Request) -> Response {
        let Some(channel) = request.query().and_then(|q| query_param(q, "channel")) else {
            return error_response(400, "missing channel query parameter");
        };
        let body = match request.body.into_bytes() {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, channel = %channel, "failed to read request body");
                return error_response(502, "failed to read request body");
            }
        };
        let accepted = self.hub.publish(&channel, body, Engine::Default);
        json_response(
            if accepted { 202 } else { 503 },
            &PublishResponse {
                channel: &channel,
                accepted,
            },
        )
    }

    fn handle_command(&self, ws: &WsContext<'_>, text: &str) -> WsMessage {
        let Ok(msg) = serde_json::from_str::<WsMessage>(text) else {
            return WsMessage::error("", 400, "malformed JSON");
        };
        let Ok(command) = serde_json::from_value::<WsCommand>(msg.payload) else {
            return WsMessage::error(msg.id, 404, "unknown command");
        };

        match command {
            WsCommand::Subscribe { channel, pattern } => {
                match self.hub.subscribe(&channel, pattern, ws.subscriber()) {
                    Ok(()) => WsMessage::new(
                        msg.id,
                        WsMessageType::Response,
                        serde_json::json!({
                            "subscribed": channel,
                            "pattern": pattern,
                            "count": self.hub.subscriptions_of(ws.id()).len(),
                        }),
                    ),
                    Err(e) => WsMessage::error(msg.id, 400, &e.to_string()),
                }
            }
            WsCommand::Unsubscribe { channel, pattern } => {
                let removed = self.hub.unsubscribe(&channel, pattern, ws.id());
                WsMessage::new(
                    msg.id,
                    WsMessageType::Response,
                    serde_json::json!({
                        "unsubscribed": channel,
                        "removed": removed,
                        "remaining_count": self.hub.subscriptions_of(ws.id()).len(),
                    }),
                )
            }
            WsCommand::Publish {
                channel,
                data,
                scope,
            } => {
                let engine = scope.map_or(Engine::Default, Engine::Scope);
                let accepted = self.hub.publish(&channel, data, engine);
                WsMessage::new(
                    msg.id,
                    WsMessageType::Response,
                    serde_json::json!({ "published": channel, "accepted": accepted }),
                )
            }
            WsCommand::ListSubscriptions => {
                let subscriptions: Vec<String> = self
                    .hub
                    .subscriptions_of(ws.id())
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                WsMessage::new(
                    msg.id,
                    WsMessageType::Response,
                    serde_json::json!({ "subscriptions": subscriptions }),
                )
            }
        }
    }
}

impl Handler for DemoApp {
    fn on_request(&self, request: Request) -> Reply {
        let response = match (request.method(), request.path()) {
            ("GET", "/health") => self.health(),
            ("GET", "/ws") => return Reply::Upgrade,
            ("POST", "/publish") => self.publish_http(request),
            _ => error_response(404, "not found"),
        };
        Reply::Response(response)
    }

    fn on_open(&self, ws: &mut WsContext<'_>) {
        tracing::debug!(conn = %ws.id(), "ws client connected");
    }

    fn on_message(&self, ws: &mut WsContext<'_>, message: Message) {
        let reply = match message.as_text() {
            Some(text) => self.handle_command(ws, text),
            None => WsMessage::error("", 400, "expected a text message"),
        };
        if let Some(json) = reply.to_json() {
            ws.send(json.as_bytes(), true);
        }
    }

    fn on_publication(&self, ws: &mut WsContext<'_>, publication: &Publication) {
        let event = PublicationEvent {
            channel: publication.channel.clone(),
            data: String::from_utf8_lossy(&publication.payload).into_owned(),
        };
        let msg = WsMessage::new(
            uuid::Uuid::new_v4().to_string(),
            WsMessageType::Event,
            serde_json::to_value(&event).unwrap_or_default(),
        );
        if let Some(json) = msg.to_json() {
            ws.send(json.as_bytes(), true);
        }
    }

    fn on_close(&self, id: SubscriberId) {
        self.hub.unsubscribe_all(id);
        tracing::debug!(conn = %id, "connection closed");
    }
}

fn json_response<T: Serialize>(status: u16, value: &T) -> Response {
    Response::json(status, value).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to serialize response");
        Response::text(500, "Internal Server Error")
    })
}

fn error_response(status: u16, message: &str) -> Response {
    json_response(
        status,
        &ErrorBody {
            code: status,
            message,
        },
    )
}

/// Returns the percent-decoded value of `name` in a form-encoded query.
fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find_map(|(k, v)| (k == name && !v.is_empty()).then(|| v.into_owned()))
}
