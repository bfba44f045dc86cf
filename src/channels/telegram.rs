//! Telegram channel
//!
//! Bot API client (`sendMessage`, `getUpdates`) and the long-polling
//! connector for the one relayed chat.

use super::{emit, http_client, truncate_for_error, Connector, PlatformSender};
use crate::config::TelegramConfig;
use crate::error::{Error, Result};
use crate::relay::types::{InboundEvent, NativeId, Platform};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<TelegramMessage>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl TelegramUser {
    /// First and last name, falling back to the handle
    pub fn full_name(&self) -> String {
        let full = match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        };
        if full.trim().is_empty() {
            self.username.clone().unwrap_or_else(|| "Unknown".to_string())
        } else {
            full
        }
    }
}

/// Telegram Bot API client bound to one chat
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    chat_id: i64,
    poll_timeout_secs: u64,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(config.request_timeout_secs)?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.bot_token.trim().to_string(),
            chat_id: config.chat_id,
            poll_timeout_secs: config.poll_timeout_secs,
        })
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &Value,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let mut request = self.http.post(self.method_url(method)).json(payload);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        // Request URLs embed the bot token
        let response = request.send().await.map_err(|e| e.without_url())?;
        let status = response.status();
        let body = response.text().await.map_err(|e| e.without_url())?;

        let parsed: TelegramResponse<T> = serde_json::from_str(&body).map_err(|e| {
            Error::Platform(format!(
                "telegram {} returned unparseable body (status {}): {}: {}",
                method,
                status,
                e,
                truncate_for_error(&body)
            ))
        })?;
        if !parsed.ok {
            return Err(Error::Platform(format!(
                "telegram {} failed: {}",
                method,
                parsed
                    .description
                    .unwrap_or_else(|| "unknown error".to_string())
            )));
        }
        parsed
            .result
            .ok_or_else(|| Error::Platform(format!("telegram {} returned no result", method)))
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<TelegramUpdate>> {
        let mut payload = json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            payload["offset"] = json!(offset);
        }
        // The request must outlive the server-side poll
        let timeout = Duration::from_secs(self.poll_timeout_secs + 10);
        self.call("getUpdates", &payload, Some(timeout)).await
    }
}

#[async_trait]
impl PlatformSender for TelegramClient {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    async fn send(&self, text: &str, reply_to: Option<&NativeId>) -> Result<NativeId> {
        let mut payload = json!({
            "chat_id": self.chat_id,
            "text": text,
        });
        match reply_to {
            Some(NativeId::Telegram(message_id)) => {
                payload["reply_parameters"] = json!({
                    "message_id": message_id,
                    "allow_sending_without_reply": true,
                });
            }
            Some(other) => {
                tracing::warn!(reply_to = %other, "Ignoring non-telegram reply target");
            }
            None => {}
        }

        let message: TelegramMessage = self.call("sendMessage", &payload, None).await?;
        Ok(NativeId::Telegram(message.message_id))
    }
}

/// Turn a Telegram update into a relay event.
///
/// Drops updates from other chats, non-text messages and bot commands.
pub fn normalize_update(update: &TelegramUpdate, chat_id: i64) -> Option<InboundEvent> {
    let message = update.message.as_ref()?;
    if message.chat.id != chat_id {
        return None;
    }
    let text = message.text.as_deref()?;
    if text.trim().is_empty() || text.starts_with('/') {
        return None;
    }
    let from = message.from.as_ref()?;
    if from.is_bot {
        return None;
    }

    Some(InboundEvent {
        native_id: NativeId::Telegram(message.message_id),
        username: from.full_name(),
        text: text.to_string(),
        reply_to: message
            .reply_to_message
            .as_ref()
            .map(|m| NativeId::Telegram(m.message_id)),
    })
}

/// Long-polling connector for the relayed chat
pub struct TelegramConnector {
    client: Arc<TelegramClient>,
    offset: Mutex<Option<i64>>,
    reconnect_delay: Duration,
}

impl TelegramConnector {
    pub fn new(client: Arc<TelegramClient>, config: &TelegramConfig) -> Self {
        Self {
            client,
            offset: Mutex::new(None),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
        }
    }
}

#[async_trait]
impl Connector for TelegramConnector {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    async fn run_session(&self, events: &mpsc::Sender<InboundEvent>) -> Result<()> {
        let chat_id = self.client.chat_id();
        loop {
            let offset = *self.offset.lock().await;
            let updates = self.client.get_updates(offset).await?;
            for update in updates {
                *self.offset.lock().await = Some(update.update_id + 1);
                if let Some(event) = normalize_update(&update, chat_id) {
                    emit(events, event).await?;
                }
            }
        }
    }

    fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }
}
