//! Discord channel
//!
//! REST client for posting into the relayed channel and a Gateway websocket
//! connector receiving `MESSAGE_CREATE` dispatches.

use super::{emit, http_client, truncate_for_error, Connector, PlatformSender};
use crate::config::DiscordConfig;
use crate::error::{Error, Result};
use crate::relay::types::{InboundEvent, NativeId, Platform};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

/// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = 1 | (1 << 9) | (1 << 15);

const DEFAULT_HEARTBEAT_MS: u64 = 41_250;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordMessage {
    pub id: String,
    pub channel_id: String,
    pub author: DiscordAuthor,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_reference: Option<DiscordMessageReference>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordAuthor {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordMessageReference {
    #[serde(default)]
    pub message_id: Option<String>,
}

/// Discord REST client bound to one channel
pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    channel_id: u64,
}

impl DiscordClient {
    pub fn new(config: &DiscordConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(config.request_timeout_secs)?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.bot_token.trim().to_string(),
            channel_id: config.channel_id,
        })
    }

    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }
}

#[async_trait]
impl PlatformSender for DiscordClient {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    async fn send(&self, text: &str, reply_to: Option<&NativeId>) -> Result<NativeId> {
        let mut payload = json!({ "content": text });
        match reply_to {
            Some(NativeId::Discord(message_id)) => {
                // Unknown targets degrade to a plain message instead of a 400
                payload["message_reference"] = json!({
                    "message_id": message_id.to_string(),
                    "fail_if_not_exists": false,
                });
            }
            Some(other) => {
                tracing::warn!(reply_to = %other, "Ignoring non-discord reply target");
            }
            None => {}
        }

        let response = self
            .http
            .post(format!(
                "{}/channels/{}/messages",
                self.api_base, self.channel_id
            ))
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Platform(format!(
                "discord create message failed with status {}: {}",
                status,
                truncate_for_error(&body)
            )));
        }

        let created: CreatedMessage = serde_json::from_str(&body)?;
        parse_snowflake(&created.id).map(NativeId::Discord)
    }
}

fn parse_snowflake(raw: &str) -> Result<u64> {
    raw.parse()
        .map_err(|_| Error::Platform(format!("invalid discord snowflake: {}", raw)))
}

/// Turn a `MESSAGE_CREATE` payload into a relay event.
///
/// Drops other channels, bot authors (ourselves included) and empty content.
pub fn normalize_message(message: &DiscordMessage, channel_id: u64) -> Option<InboundEvent> {
    if message.channel_id != channel_id.to_string() {
        return None;
    }
    if message.author.bot || message.content.trim().is_empty() {
        return None;
    }
    let native_id = parse_snowflake(&message.id).ok()?;

    let username = message
        .author
        .global_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| message.author.username.clone());

    let reply_to = message
        .message_reference
        .as_ref()
        .and_then(|r| r.message_id.as_deref())
        .and_then(|id| parse_snowflake(id).ok())
        .map(NativeId::Discord);

    Some(InboundEvent {
        native_id: NativeId::Discord(native_id),
        username,
        text: message.content.clone(),
        reply_to,
    })
}

fn identify_payload(token: &str) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": GATEWAY_INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "bindsync",
                "device": "bindsync",
            },
        },
    })
}

fn heartbeat_payload(seq: Option<u64>) -> Value {
    json!({ "op": OP_HEARTBEAT, "d": seq })
}

/// Heartbeat period from a HELLO payload; missing or zero falls back to the default
fn heartbeat_interval_ms(hello: &Value) -> u64 {
    match hello["heartbeat_interval"].as_u64() {
        Some(ms) if ms > 0 => ms,
        _ => DEFAULT_HEARTBEAT_MS,
    }
}

fn parse_frame(message: WsMessage) -> Result<Option<GatewayPayload>> {
    let text = match message {
        WsMessage::Text(text) => text,
        WsMessage::Binary(bytes) => String::from_utf8(bytes)
            .map_err(|_| Error::Platform("invalid utf-8 gateway payload".to_string()))?,
        _ => return Ok(None),
    };
    Ok(Some(serde_json::from_str(&text)?))
}

/// Gateway websocket connector for the relayed channel
pub struct DiscordConnector {
    gateway_url: String,
    token: String,
    channel_id: u64,
    reconnect_delay: Duration,
}

impl DiscordConnector {
    pub fn new(client: Arc<DiscordClient>, config: &DiscordConfig) -> Self {
        Self {
            gateway_url: config.gateway_url.clone(),
            token: client.token.clone(),
            channel_id: client.channel_id(),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
        }
    }
}

#[async_trait]
impl Connector for DiscordConnector {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    async fn run_session(&self, events: &mpsc::Sender<InboundEvent>) -> Result<()> {
        let (stream, _response) = connect_async(self.gateway_url.as_str())
            .await
            .map_err(|e| Error::Platform(format!("failed to connect discord gateway: {}", e)))?;
        let (mut sink, mut source) = stream.split();

        // First frame is always HELLO with the heartbeat interval
        let interval_ms = loop {
            let frame = source
                .next()
                .await
                .ok_or_else(|| Error::Platform("gateway closed before hello".to_string()))?
                .map_err(|e| Error::Platform(format!("gateway read failed: {}", e)))?;
            if let Some(payload) = parse_frame(frame)? {
                if payload.op != OP_HELLO {
                    return Err(Error::Platform(format!(
                        "expected gateway hello, got op {}",
                        payload.op
                    )));
                }
                break heartbeat_interval_ms(&payload.d);
            }
        };

        sink.send(WsMessage::Text(identify_payload(&self.token).to_string()))
            .await
            .map_err(|e| Error::Platform(format!("failed to identify: {}", e)))?;
        tracing::info!(interval_ms, "Discord gateway connected");

        let mut heartbeat = tokio::time::interval(Duration::from_millis(interval_ms));
        heartbeat.tick().await;
        let mut seq: Option<u64> = None;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    sink.send(WsMessage::Text(heartbeat_payload(seq).to_string()))
                        .await
                        .map_err(|e| Error::Platform(format!("heartbeat failed: {}", e)))?;
                }
                frame = source.next() => {
                    let Some(frame) = frame else {
                        return Ok(());
                    };
                    let frame = frame
                        .map_err(|e| Error::Platform(format!("gateway read failed: {}", e)))?;
                    if let WsMessage::Close(reason) = &frame {
                        tracing::info!(?reason, "Discord gateway closed");
                        return Ok(());
                    }
                    let Some(payload) = parse_frame(frame)? else {
                        continue;
                    };
                    if payload.s.is_some() {
                        seq = payload.s;
                    }
                    match payload.op {
                        OP_DISPATCH => {
                            if payload.t.as_deref() == Some("MESSAGE_CREATE") {
                                match serde_json::from_value::<DiscordMessage>(payload.d) {
                                    Ok(message) => {
                                        if let Some(event) = normalize_message(&message, self.channel_id) {
                                            emit(events, event).await?;
                                        }
                                    }
                                    Err(e) => tracing::warn!("Unparseable MESSAGE_CREATE: {}", e),
                                }
                            } else if payload.t.as_deref() == Some("READY") {
                                tracing::info!("Discord session ready");
                            }
                        }
                        OP_HEARTBEAT => {
                            sink.send(WsMessage::Text(heartbeat_payload(seq).to_string()))
                                .await
                                .map_err(|e| Error::Platform(format!("heartbeat failed: {}", e)))?;
                        }
                        OP_RECONNECT => {
                            tracing::info!("Discord requested reconnect");
                            return Ok(());
                        }
                        OP_INVALID_SESSION => {
                            return Err(Error::Platform("discord invalidated the session".to_string()));
                        }
                        OP_HEARTBEAT_ACK => {}
                        other => tracing::debug!(op = other, "Unhandled gateway op"),
                    }
                }
            }
        }
    }

    fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }
}
