//! Discord gateway frames: parsing, identify/heartbeat payloads and dispatch routing.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::discord_payloads::{DiscordInteraction, DiscordMessage, InboundInteraction};
use crate::transport::ChatMessage;

pub(super) const GATEWAY_VERSION: u8 = 10;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
pub(super) const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 15);

#[derive(Debug, Clone, Deserialize, Serialize)]
pub(super) struct GatewayFrame {
    pub(super) op: u8,
    #[serde(default)]
    pub(super) d: Value,
    #[serde(default)]
    pub(super) s: Option<u64>,
    #[serde(default)]
    pub(super) t: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum GatewayEvent {
    Hello { heartbeat_interval: Duration },
    HeartbeatRequested,
    HeartbeatAck,
    Reconnect,
    InvalidSession,
    Ready { application_id: Option<String>, session_id: String },
    MessageCreate(ChatMessage),
    Interaction(InboundInteraction),
    /// A dispatch the bridge does not handle.
    Ignored,
}

#[derive(Debug, Deserialize)]
struct HelloPayload {
    heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
struct ReadyApplication {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ReadyPayload {
    session_id: String,
    #[serde(default)]
    application: Option<ReadyApplication>,
}

pub(super) fn parse_gateway_message(message: WsMessage) -> Result<Option<GatewayFrame>> {
    match message {
        WsMessage::Text(text) => {
            let frame = serde_json::from_str::<GatewayFrame>(&text)
                .context("failed to parse discord gateway frame")?;
            Ok(Some(frame))
        }
        WsMessage::Binary(bytes) => {
            let text = String::from_utf8(bytes.to_vec())
                .context("invalid utf-8 discord gateway payload")?;
            let frame = serde_json::from_str::<GatewayFrame>(&text)
                .context("failed to parse discord gateway frame")?;
            Ok(Some(frame))
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) => Ok(None),
        WsMessage::Close(_) => Ok(None),
        WsMessage::Frame(_) => Ok(None),
    }
}

/// Interprets a frame. Malformed dispatch bodies are errors; unknown ones are ignored.
pub(super) fn normalize_gateway_frame(frame: GatewayFrame) -> Result<GatewayEvent> {
    let event = match frame.op {
        OP_HELLO => {
            let hello = serde_json::from_value::<HelloPayload>(frame.d)
                .context("failed to parse gateway hello")?;
            GatewayEvent::Hello {
                heartbeat_interval: Duration::from_millis(hello.heartbeat_interval.max(1)),
            }
        }
        OP_HEARTBEAT => GatewayEvent::HeartbeatRequested,
        OP_HEARTBEAT_ACK => GatewayEvent::HeartbeatAck,
        OP_RECONNECT => GatewayEvent::Reconnect,
        OP_INVALID_SESSION => GatewayEvent::InvalidSession,
        OP_DISPATCH => match frame.t.as_deref() {
            Some("READY") => {
                let ready = serde_json::from_value::<ReadyPayload>(frame.d)
                    .context("failed to parse gateway ready")?;
                GatewayEvent::Ready {
                    application_id: ready.application.map(|application| application.id),
                    session_id: ready.session_id,
                }
            }
            Some("MESSAGE_CREATE") => {
                let message = serde_json::from_value::<DiscordMessage>(frame.d)
                    .context("failed to parse gateway message")?;
                GatewayEvent::MessageCreate(message.into_chat_message())
            }
            Some("INTERACTION_CREATE") => {
                let interaction = serde_json::from_value::<DiscordInteraction>(frame.d)
                    .context("failed to parse gateway interaction")?;
                interaction
                    .into_inbound()
                    .map(GatewayEvent::Interaction)
                    .unwrap_or(GatewayEvent::Ignored)
            }
            _ => GatewayEvent::Ignored,
        },
        _ => GatewayEvent::Ignored,
    };
    Ok(event)
}

pub(super) fn identify_payload(bot_token: &str) -> String {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": bot_token,
            "intents": GATEWAY_INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "casewatch",
                "device": "casewatch",
            },
        },
    })
    .to_string()
}

pub(super) fn heartbeat_payload(sequence: Option<u64>) -> String {
    json!({ "op": OP_HEARTBEAT, "d": sequence }).to_string()
}

/// Gateway URL with the protocol version and encoding the bridge speaks.
pub(super) fn gateway_connect_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.contains('?') {
        base.to_string()
    } else {
        format!("{base}/?v={GATEWAY_VERSION}&encoding=json")
    }
}

/// Dedup key for events that may be redelivered after a reconnect.
pub(super) fn event_dedup_key(event: &GatewayEvent) -> Option<String> {
    match event {
        GatewayEvent::MessageCreate(message) => Some(format!("message:{}", message.id)),
        GatewayEvent::Interaction(InboundInteraction::Component(component)) => {
            Some(format!("interaction:{}", component.interaction.id))
        }
        GatewayEvent::Interaction(InboundInteraction::Command(command)) => {
            Some(format!("interaction:{}", command.interaction.id))
        }
        _ => None,
    }
}
