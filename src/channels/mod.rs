//! Platform channels
//!
//! Each platform contributes two halves:
//! - a [`PlatformSender`] posting relay text through the platform's Web API
//! - a [`Connector`] keeping an inbound session alive and pushing normalized
//!   [`InboundEvent`]s into the relay queue

mod discord;
mod slack;
mod telegram;

pub use discord::{DiscordClient, DiscordConnector};
pub use slack::{SlackClient, SlackConnector};
pub use telegram::{TelegramClient, TelegramConnector};

use crate::error::{Error, Result};
use crate::relay::types::{InboundEvent, NativeId, Platform};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Capability to post a message on one platform
#[async_trait]
pub trait PlatformSender: Send + Sync {
    /// Platform this sender posts to
    fn platform(&self) -> Platform;

    /// Post `text`, threaded under `reply_to` when given.
    ///
    /// Returns the native id of the posted message.
    async fn send(&self, text: &str, reply_to: Option<&NativeId>) -> Result<NativeId>;
}

/// Long-running inbound session for one platform
#[async_trait]
pub trait Connector: Send + Sync {
    fn platform(&self) -> Platform;

    /// Run one session until it drops, forwarding events into `events`
    async fn run_session(&self, events: &mpsc::Sender<InboundEvent>) -> Result<()>;

    /// Delay before reconnecting after a session ends
    fn reconnect_delay(&self) -> Duration;
}

/// Keep a connector alive until the event queue closes
pub async fn run_connector(connector: Arc<dyn Connector>, events: mpsc::Sender<InboundEvent>) {
    let platform = connector.platform();
    tracing::info!(platform = %platform, "Connector starting");
    loop {
        match connector.run_session(&events).await {
            Ok(()) => tracing::info!(platform = %platform, "Session ended"),
            Err(e) => tracing::warn!(platform = %platform, "Session failed: {}", e),
        }
        if events.is_closed() {
            tracing::info!(platform = %platform, "Event queue closed, connector stopping");
            return;
        }
        tokio::time::sleep(connector.reconnect_delay()).await;
    }
}

/// Push a normalized event, failing the session once the relay is gone
pub(crate) async fn emit(events: &mpsc::Sender<InboundEvent>, event: InboundEvent) -> Result<()> {
    tracing::debug!(
        platform = %event.origin(),
        id = %event.native_id,
        "Inbound message"
    );
    events
        .send(event)
        .await
        .map_err(|_| Error::Internal("relay event queue closed".to_string()))
}

/// Shared HTTP client setup for platform Web APIs
pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::USER_AGENT,
        reqwest::header::HeaderValue::from_static(concat!("bindsync/", env!("CARGO_PKG_VERSION"))),
    );
    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| Error::Platform(format!("failed to create http client: {}", e)))
}

/// Shorten a response body for error messages
pub(crate) fn truncate_for_error(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() <= MAX {
        return body.to_string();
    }
    let mut out: String = body.chars().take(MAX).collect();
    out.push_str("...");
    out
}
