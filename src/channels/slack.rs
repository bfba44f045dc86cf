//! Slack channel
//!
//! Web API client (`chat.postMessage`, `auth.test`, `users.info`,
//! `apps.connections.open`) and the Socket Mode connector.
//!
//! Slack's `ts` is both the message id and the thread key: replying means
//! posting with `thread_ts` set to the parent's `ts`.

use super::{emit, http_client, truncate_for_error, Connector, PlatformSender};
use crate::config::SlackConfig;
use crate::error::{Error, Result};
use crate::relay::types::{InboundEvent, NativeId, Platform};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

#[derive(Debug, Deserialize)]
struct SlackAuthTestResponse {
    ok: bool,
    user_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackOpenSocketResponse {
    ok: bool,
    url: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackChatMessageResponse {
    ok: bool,
    ts: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackUserInfoResponse {
    ok: bool,
    user: Option<SlackUser>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackSocketEnvelope {
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(rename = "type")]
    envelope_type: String,
    #[serde(default)]
    payload: Value,
}

/// `message` event fields the relay cares about
#[derive(Debug, Clone, Deserialize)]
pub struct SlackMessageEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

/// Slack Web API client bound to one channel
pub struct SlackClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    app_token: String,
    channel_id: String,
}

impl SlackClient {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(config.request_timeout_secs)?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.trim().to_string(),
            app_token: config.app_token.trim().to_string(),
            channel_id: config.channel_id.trim().to_string(),
        })
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: &str,
        token: &str,
        payload: Option<&Value>,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let mut request = self
            .http
            .post(format!("{}/{}", self.api_base, method))
            .bearer_auth(token);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(payload) = payload {
            request = request.json(payload);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Platform(format!(
                "slack {} failed with status {}: {}",
                method,
                status,
                truncate_for_error(&body)
            )));
        }
        serde_json::from_str(&body).map_err(|e| {
            Error::Platform(format!(
                "slack {} returned unparseable body: {}: {}",
                method,
                e,
                truncate_for_error(&body)
            ))
        })
    }

    /// Bot user id, used to ignore our own messages
    pub async fn resolve_bot_user_id(&self) -> Result<String> {
        let response: SlackAuthTestResponse = self
            .request_json("auth.test", &self.bot_token, None, &[])
            .await?;
        if !response.ok {
            return Err(slack_error("auth.test", response.error));
        }
        response
            .user_id
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| Error::Platform("slack auth.test did not return user_id".to_string()))
    }

    /// Display name for a user: real name, else handle, else "Unknown"
    pub async fn display_name(&self, user_id: &str) -> String {
        let response: Result<SlackUserInfoResponse> = self
            .request_json("users.info", &self.bot_token, None, &[("user", user_id)])
            .await;
        match response {
            Ok(response) if response.ok => response
                .user
                .and_then(|u| {
                    u.real_name
                        .filter(|n| !n.trim().is_empty())
                        .or(u.name.filter(|n| !n.trim().is_empty()))
                })
                .unwrap_or_else(|| "Unknown".to_string()),
            Ok(response) => {
                tracing::warn!(user = user_id, "users.info failed: {:?}", response.error);
                "Unknown".to_string()
            }
            Err(e) => {
                tracing::warn!(user = user_id, "users.info failed: {}", e);
                "Unknown".to_string()
            }
        }
    }

    /// Socket Mode websocket URL
    pub async fn open_socket_connection(&self) -> Result<String> {
        let response: SlackOpenSocketResponse = self
            .request_json("apps.connections.open", &self.app_token, None, &[])
            .await?;
        if !response.ok {
            return Err(slack_error("apps.connections.open", response.error));
        }
        response
            .url
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                Error::Platform("slack apps.connections.open did not return url".to_string())
            })
    }
}

fn slack_error(method: &str, error: Option<String>) -> Error {
    Error::Platform(format!(
        "slack {} failed: {}",
        method,
        error.unwrap_or_else(|| "unknown error".to_string())
    ))
}

#[async_trait]
impl PlatformSender for SlackClient {
    fn platform(&self) -> Platform {
        Platform::Slack
    }

    async fn send(&self, text: &str, reply_to: Option<&NativeId>) -> Result<NativeId> {
        let mut payload = json!({
            "channel": self.channel_id,
            "text": text,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        match reply_to {
            Some(NativeId::Slack(ts)) => {
                payload["thread_ts"] = Value::String(ts.clone());
            }
            Some(other) => {
                tracing::warn!(reply_to = %other, "Ignoring non-slack reply target");
            }
            None => {}
        }

        let response: SlackChatMessageResponse = self
            .request_json("chat.postMessage", &self.bot_token, Some(&payload), &[])
            .await?;
        if !response.ok {
            return Err(slack_error("chat.postMessage", response.error));
        }
        response
            .ts
            .filter(|ts| !ts.is_empty())
            .map(NativeId::Slack)
            .ok_or_else(|| Error::Platform("slack chat.postMessage returned no ts".to_string()))
    }
}

/// Filter a Slack `message` event.
///
/// Returns the event when it is a plain human message in the relayed
/// channel. Edits, bot posts and our own messages are dropped.
pub fn accept_event<'a>(
    event: &'a SlackMessageEvent,
    channel_id: &str,
    bot_user_id: Option<&str>,
) -> Option<&'a SlackMessageEvent> {
    if event.event_type != "message" {
        return None;
    }
    if matches!(
        event.subtype.as_deref(),
        Some("bot_message") | Some("message_changed")
    ) {
        return None;
    }
    if event.channel.as_deref() != Some(channel_id) {
        return None;
    }
    let user = event.user.as_deref()?;
    if bot_user_id == Some(user) {
        return None;
    }
    if event.text.trim().is_empty() {
        return None;
    }
    Some(event)
}

/// Build the relay event once the author's display name is known
pub fn to_inbound(event: &SlackMessageEvent, username: String) -> InboundEvent {
    // A thread root carries thread_ts == ts; only replies point elsewhere
    let reply_to = event
        .thread_ts
        .as_ref()
        .filter(|thread_ts| **thread_ts != event.ts)
        .map(|thread_ts| NativeId::Slack(thread_ts.clone()));
    InboundEvent {
        native_id: NativeId::Slack(event.ts.clone()),
        username,
        text: event.text.clone(),
        reply_to,
    }
}

fn parse_envelope(message: WsMessage) -> Result<Option<SlackSocketEnvelope>> {
    let text = match message {
        WsMessage::Text(text) => text,
        WsMessage::Binary(bytes) => String::from_utf8(bytes)
            .map_err(|_| Error::Platform("invalid utf-8 slack socket payload".to_string()))?,
        _ => return Ok(None),
    };
    Ok(Some(serde_json::from_str(&text)?))
}

/// Socket Mode connector for the relayed channel
pub struct SlackConnector {
    client: Arc<SlackClient>,
    bot_user_id: RwLock<Option<String>>,
    reconnect_delay: Duration,
}

impl SlackConnector {
    pub fn new(client: Arc<SlackClient>, config: &SlackConfig) -> Self {
        Self {
            client,
            bot_user_id: RwLock::new(None),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
        }
    }

    async fn handle_event(&self, event: Value, events: &mpsc::Sender<InboundEvent>) -> Result<()> {
        let event: SlackMessageEvent = match serde_json::from_value(event) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!("Skipping non-message slack event: {}", e);
                return Ok(());
            }
        };
        let bot_user_id = self.bot_user_id.read().await.clone();
        let Some(event) = accept_event(&event, self.client.channel_id(), bot_user_id.as_deref())
        else {
            return Ok(());
        };
        let user = event.user.as_deref().unwrap_or_default();
        let username = self.client.display_name(user).await;
        emit(events, to_inbound(event, username)).await
    }
}

#[async_trait]
impl Connector for SlackConnector {
    fn platform(&self) -> Platform {
        Platform::Slack
    }

    async fn run_session(&self, events: &mpsc::Sender<InboundEvent>) -> Result<()> {
        if self.bot_user_id.read().await.is_none() {
            match self.client.resolve_bot_user_id().await {
                Ok(id) => {
                    tracing::info!(bot_user_id = %id, "Slack bot user resolved");
                    *self.bot_user_id.write().await = Some(id);
                }
                Err(e) => tracing::warn!("Could not resolve slack bot user: {}", e),
            }
        }

        let socket_url = self.client.open_socket_connection().await?;
        let (stream, _response) = connect_async(socket_url.as_str())
            .await
            .map_err(|e| Error::Platform(format!("failed to connect slack socket: {}", e)))?;
        let (mut sink, mut source) = stream.split();
        tracing::info!("Slack socket connected");

        while let Some(frame) = source.next().await {
            let frame =
                frame.map_err(|e| Error::Platform(format!("slack socket read failed: {}", e)))?;
            if let WsMessage::Ping(data) = frame {
                sink.send(WsMessage::Pong(data))
                    .await
                    .map_err(|e| Error::Platform(format!("slack pong failed: {}", e)))?;
                continue;
            }
            let Some(envelope) = parse_envelope(frame)? else {
                continue;
            };

            if let Some(envelope_id) = &envelope.envelope_id {
                let ack = json!({ "envelope_id": envelope_id }).to_string();
                sink.send(WsMessage::Text(ack))
                    .await
                    .map_err(|e| Error::Platform(format!("slack ack failed: {}", e)))?;
            }

            match envelope.envelope_type.as_str() {
                "events_api" => {
                    let event = envelope.payload.get("event").cloned().unwrap_or(Value::Null);
                    self.handle_event(event, events).await?;
                }
                "disconnect" => {
                    tracing::info!("Slack requested disconnect");
                    return Ok(());
                }
                "hello" => {}
                other => tracing::debug!(envelope_type = other, "Unhandled slack envelope"),
            }
        }
        Ok(())
    }

    fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }
}
