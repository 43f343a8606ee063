// ABOUTME: HTTP edge: webhook intake, health, and metrics endpoints
// ABOUTME: Translates platform payloads into pipeline events and acks immediately

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use confab_core::event::{InboundEvent, MessageEvent, MessageKind, SourceRef};
use confab_core::metrics;
use confab_core::traits::BotIdentity;

pub struct AppState {
    pub intake: mpsc::Sender<InboundEvent>,
    pub identity: BotIdentity,
    pub metrics: PrometheusHandle,
}

/// Verified webhook payload. Signature checking happens upstream of this
/// process; by the time a payload lands here it is trusted.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<WireEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub source: Option<WireSource>,
    #[serde(default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub message: Option<WireMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSource {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub quoted_message_id: Option<String>,
    #[serde(default)]
    pub mention: Option<WireMention>,
}

#[derive(Debug, Deserialize)]
pub struct WireMention {
    #[serde(default)]
    pub mentionees: Vec<WireMentionee>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMentionee {
    #[serde(default)]
    pub user_id: Option<String>,
}

fn kind_label(event_type: &str) -> &'static str {
    match event_type {
        "message" => "message",
        "follow" => "follow",
        "unfollow" => "unfollow",
        "join" => "join",
        "leave" => "leave",
        _ => "other",
    }
}

/// Translates one wire event into a pipeline event. Returns None for event
/// types the pipeline ignores.
pub fn translate_event(event: WireEvent, identity: &BotIdentity) -> Option<InboundEvent> {
    let source = event
        .source
        .map(|source| SourceRef {
            user_id: source.user_id,
            group_id: source.group_id,
            room_id: source.room_id,
        })
        .unwrap_or_default();

    match event.event_type.as_str() {
        "message" => {
            let message = event.message?;
            let kind = match message.message_type.as_str() {
                "text" => MessageKind::Text,
                "image" => MessageKind::Image,
                _ => MessageKind::Other,
            };

            // Mention detection compares against the identity resolved once
            // at startup
            let mentions_self = message
                .mention
                .as_ref()
                .map(|mention| {
                    mention.mentionees.iter().any(|mentionee| {
                        mentionee.user_id.as_deref() == Some(identity.user_id.as_str())
                    })
                })
                .unwrap_or(false);

            let received_at = event
                .timestamp
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .unwrap_or_else(Utc::now);

            Some(InboundEvent::Message(MessageEvent {
                attachment_id: (kind == MessageKind::Image).then(|| message.id.clone()),
                message_id: message.id,
                source,
                kind,
                text: message.text,
                quoted_message_id: message.quoted_message_id,
                reply_handle: event.reply_token,
                mentions_self,
                write_authorized: false,
                received_at,
            }))
        }
        "follow" => Some(InboundEvent::Follow(source)),
        "unfollow" => Some(InboundEvent::Unfollow(source)),
        "join" => Some(InboundEvent::Join(source)),
        "leave" => Some(InboundEvent::Leave(source)),
        _ => None,
    }
}

async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WebhookPayload>,
) -> (StatusCode, Json<serde_json::Value>) {
    let received = payload.events.len();
    debug!(
        events = received,
        destination = payload.destination.as_deref().unwrap_or(""),
        "webhook payload received"
    );

    for event in payload.events {
        metrics::record_event_received(kind_label(&event.event_type));
        match translate_event(event, &state.identity) {
            Some(event) => {
                if let Err(error) = state.intake.send(event).await {
                    warn!(error = %error, "intake channel closed, dropping event");
                }
            }
            None => debug!("ignoring unsupported event type"),
        }
    }

    (StatusCode::OK, Json(json!({ "received": received })))
}

async fn health_handler() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": env!("CARGO_PKG_NAME") })),
    )
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.metrics.render()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> Result<()> {
    let app = router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "webhook server listening");
    axum::serve(listener, app)
        .await
        .context("webhook server terminated")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> BotIdentity {
        BotIdentity {
            user_id: "BOT1".to_string(),
            display_name: "confab".to_string(),
        }
    }

    fn wire_event(json_text: &str) -> WireEvent {
        serde_json::from_str(json_text).unwrap()
    }

    #[test]
    fn test_text_message_translation() {
        let event = wire_event(
            r#"{
                "type": "message",
                "timestamp": 1625665242211,
                "source": { "type": "group", "groupId": "G1", "userId": "U1" },
                "replyToken": "rt-1",
                "message": { "id": "m1", "type": "text", "text": "hello" }
            }"#,
        );

        let translated = translate_event(event, &identity()).unwrap();
        let InboundEvent::Message(message) = translated else {
            panic!("expected a message event");
        };
        assert_eq!(message.message_id, "m1");
        assert_eq!(message.kind, MessageKind::Text);
        assert_eq!(message.text.as_deref(), Some("hello"));
        assert_eq!(message.reply_handle.as_deref(), Some("rt-1"));
        assert_eq!(message.source.group_id.as_deref(), Some("G1"));
        assert!(message.attachment_id.is_none());
        assert!(!message.mentions_self);
        assert_eq!(message.received_at.timestamp_millis(), 1625665242211);
    }

    #[test]
    fn test_image_message_carries_its_id_as_attachment() {
        let event = wire_event(
            r#"{
                "type": "message",
                "source": { "type": "user", "userId": "U1" },
                "replyToken": "rt-1",
                "message": { "id": "m2", "type": "image" }
            }"#,
        );

        let InboundEvent::Message(message) = translate_event(event, &identity()).unwrap() else {
            panic!("expected a message event");
        };
        assert_eq!(message.kind, MessageKind::Image);
        assert_eq!(message.attachment_id.as_deref(), Some("m2"));
    }

    #[test]
    fn test_unsupported_message_type_becomes_other() {
        let event = wire_event(
            r#"{
                "type": "message",
                "source": { "type": "user", "userId": "U1" },
                "message": { "id": "m3", "type": "sticker" }
            }"#,
        );

        let InboundEvent::Message(message) = translate_event(event, &identity()).unwrap() else {
            panic!("expected a message event");
        };
        assert_eq!(message.kind, MessageKind::Other);
        assert!(message.attachment_id.is_none());
    }

    #[test]
    fn test_mention_of_the_bot_is_detected() {
        let event = wire_event(
            r#"{
                "type": "message",
                "source": { "type": "group", "groupId": "G1", "userId": "U1" },
                "message": {
                    "id": "m4",
                    "type": "text",
                    "text": "@confab hi",
                    "mention": { "mentionees": [ { "userId": "U7" }, { "userId": "BOT1" } ] }
                }
            }"#,
        );

        let InboundEvent::Message(message) = translate_event(event, &identity()).unwrap() else {
            panic!("expected a message event");
        };
        assert!(message.mentions_self);
    }

    #[test]
    fn test_mention_of_someone_else_is_not_self() {
        let event = wire_event(
            r#"{
                "type": "message",
                "source": { "type": "group", "groupId": "G1", "userId": "U1" },
                "message": {
                    "id": "m5",
                    "type": "text",
                    "text": "@other hi",
                    "mention": { "mentionees": [ { "userId": "U7" } ] }
                }
            }"#,
        );

        let InboundEvent::Message(message) = translate_event(event, &identity()).unwrap() else {
            panic!("expected a message event");
        };
        assert!(!message.mentions_self);
    }

    #[test]
    fn test_lifecycle_events_translate_by_type() {
        let follow = wire_event(r#"{ "type": "follow", "source": { "userId": "U1" } }"#);
        assert!(matches!(
            translate_event(follow, &identity()),
            Some(InboundEvent::Follow(_))
        ));

        let join = wire_event(r#"{ "type": "join", "source": { "groupId": "G1" } }"#);
        assert!(matches!(
            translate_event(join, &identity()),
            Some(InboundEvent::Join(_))
        ));
    }

    #[test]
    fn test_unknown_event_types_are_ignored() {
        let unknown = wire_event(r#"{ "type": "videoPlayComplete" }"#);
        assert!(translate_event(unknown, &identity()).is_none());

        // Malformed message events are ignored rather than crashing intake
        let no_body = wire_event(r#"{ "type": "message" }"#);
        assert!(translate_event(no_body, &identity()).is_none());
    }

    #[test]
    fn test_kind_labels_are_stable() {
        assert_eq!(kind_label("message"), "message");
        assert_eq!(kind_label("beacon"), "other");
    }
}
