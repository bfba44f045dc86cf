//! Relay dispatcher
//!
//! One dispatcher serves every origin: the three platforms and the REST API.
//! Per message the pipeline is
//!
//! ```text
//! filter -> resolve -> persist -> forward (concurrent, per destination) -> record
//! ```
//!
//! Resolution only reads, so it runs before the append and the record is
//! created with its reply fields already set. The append always completes
//! before the first send. A failed send only costs that destination its id.

use super::crossref::CrossRefMaps;
use super::resolver::{ReplyResolver, ResolvedReply};
use super::tags::{format_relay, is_echo};
use super::types::{DeliveryReceipt, InboundEvent, NativeId, Platform, Source};
use crate::channels::PlatformSender;
use crate::error::{Error, Result};
use crate::store::{IdentityStore, NewMessage};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

/// Why an inbound event was not relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    EmptyText,
    Echo,
}

/// Result of dispatching one inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Filtered before anything was stored
    Dropped(DropReason),
    /// Stored and forwarded; the receipt lists every id the message has
    Relayed(DeliveryReceipt),
}

/// Generic relay dispatcher shared by all origins
#[derive(Clone)]
pub struct RelayDispatcher {
    store: Arc<dyn IdentityStore>,
    maps: CrossRefMaps,
    resolver: ReplyResolver,
    senders: HashMap<Platform, Arc<dyn PlatformSender>>,
}

impl RelayDispatcher {
    pub fn new(store: Arc<dyn IdentityStore>, maps: CrossRefMaps) -> Self {
        Self {
            resolver: ReplyResolver::new(store.clone(), maps.clone()),
            store,
            maps,
            senders: HashMap::new(),
        }
    }

    /// Register the sender for its platform (replacing any previous one)
    pub fn with_sender(mut self, sender: Arc<dyn PlatformSender>) -> Self {
        self.senders.insert(sender.platform(), sender);
        self
    }

    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    pub fn maps(&self) -> &CrossRefMaps {
        &self.maps
    }

    /// Whether a sender exists for `platform`
    pub fn is_configured(&self, platform: Platform) -> bool {
        self.senders.contains_key(&platform)
    }

    /// Relay a message received on one of the platforms
    pub async fn dispatch(&self, event: InboundEvent) -> Result<DispatchOutcome> {
        let origin = event.origin();
        if event.text.trim().is_empty() {
            tracing::debug!(platform = %origin, id = %event.native_id, "Dropping empty message");
            return Ok(DispatchOutcome::Dropped(DropReason::EmptyText));
        }
        if is_echo(origin, &event.text) {
            tracing::debug!(platform = %origin, id = %event.native_id, "Dropping relayed echo");
            return Ok(DispatchOutcome::Dropped(DropReason::Echo));
        }

        let resolved = match &event.reply_to {
            Some(reply_to) => self.resolver.resolve(reply_to).await,
            None => ResolvedReply::default(),
        };

        let source = Source::from(origin);
        let internal_id = self
            .store
            .append(
                NewMessage::new(source, event.username.clone(), event.text.clone())
                    .with_platform_id(event.native_id.clone())
                    .with_reply_to_id(resolved.reply_to_id.clone())
                    .with_reply_to_platform_ids(resolved.reply_to_platform_ids()),
            )
            .await?;

        let text = format_relay(source, &event.username, &event.text);
        let destinations: Vec<Platform> = origin.others().collect();
        let delivered = self
            .forward(&internal_id, &destinations, &text, &resolved)
            .await;

        let mut receipt = DeliveryReceipt::new(internal_id);
        receipt.record(&event.native_id);
        let mut group = vec![event.native_id.clone()];
        for id in &delivered {
            receipt.record(id);
            group.push(id.clone());
        }
        self.maps.insert_group(&group).await;

        tracing::info!(
            id = %receipt.id,
            platform = %origin,
            delivered = delivered.len(),
            "Relayed message"
        );
        Ok(DispatchOutcome::Relayed(receipt))
    }

    /// Relay a message injected through the REST API.
    ///
    /// `reply_to_id` is kept only when it names a stored record; otherwise
    /// the message goes out top-level everywhere.
    pub async fn post_from_api(
        &self,
        text: &str,
        username: &str,
        reply_to_id: Option<&str>,
        target: Option<Platform>,
    ) -> Result<DeliveryReceipt> {
        let parent = match reply_to_id {
            Some(id) => {
                let parent = self.store.get(id).await?;
                if parent.is_none() {
                    tracing::debug!(reply_to_id = id, "Unknown reply_to_id, posting top-level");
                }
                parent
            }
            None => None,
        };
        let resolved = parent
            .as_ref()
            .map(ResolvedReply::from_parent)
            .unwrap_or_default();
        self.relay_from_api(Source::Api, text, username, resolved, target)
            .await
    }

    /// Reply to a stored record from the REST API.
    ///
    /// Fails with `NotFound` (and stores nothing) when the parent is unknown.
    /// Platforms the parent never reached get a top-level message.
    pub async fn reply_from_api(
        &self,
        parent_id: &str,
        text: &str,
        username: &str,
        target: Option<Platform>,
    ) -> Result<DeliveryReceipt> {
        let parent = self
            .store
            .get(parent_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Message {} not found", parent_id)))?;
        let resolved = ResolvedReply::from_parent(&parent);
        self.relay_from_api(Source::ApiReply, text, username, resolved, target)
            .await
    }

    async fn relay_from_api(
        &self,
        source: Source,
        text: &str,
        username: &str,
        resolved: ResolvedReply,
        target: Option<Platform>,
    ) -> Result<DeliveryReceipt> {
        if text.trim().is_empty() {
            return Err(Error::BadRequest("text must not be empty".to_string()));
        }

        let internal_id = self
            .store
            .append(
                NewMessage::new(source, username, text)
                    .with_reply_to_id(resolved.reply_to_id.clone())
                    .with_reply_to_platform_ids(resolved.reply_to_platform_ids()),
            )
            .await?;

        let destinations: Vec<Platform> = match target {
            Some(platform) => vec![platform],
            None => Platform::ALL.to_vec(),
        };
        let relay_text = format_relay(source, username, text);
        let delivered = self
            .forward(&internal_id, &destinations, &relay_text, &resolved)
            .await;

        let mut receipt = DeliveryReceipt::new(internal_id);
        for id in &delivered {
            receipt.record(id);
        }
        self.maps.insert_group(&delivered).await;

        tracing::info!(
            id = %receipt.id,
            source = ?source,
            delivered = delivered.len(),
            "Relayed API message"
        );
        Ok(receipt)
    }

    /// Send to every configured destination concurrently and record each id
    /// produced. Send failures are logged and yield no id.
    async fn forward(
        &self,
        internal_id: &str,
        destinations: &[Platform],
        text: &str,
        resolved: &ResolvedReply,
    ) -> Vec<NativeId> {
        let sends = destinations.iter().filter_map(|platform| {
            let Some(sender) = self.senders.get(platform) else {
                tracing::debug!(platform = %platform, "No sender configured, skipping");
                return None;
            };
            let reply_to = resolved.target(*platform);
            let platform = *platform;
            Some(async move {
                match sender.send(text, reply_to).await {
                    Ok(id) if id.platform() == platform => Some(id),
                    Ok(id) => {
                        tracing::warn!(platform = %platform, id = %id, "Sender returned a foreign id");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(
                            platform = %platform,
                            id = internal_id,
                            "Delivery failed: {}",
                            e
                        );
                        None
                    }
                }
            })
        });
        let delivered: Vec<NativeId> = join_all(sends).await.into_iter().flatten().collect();

        for id in &delivered {
            if let Err(e) = self.store.set_platform_id(internal_id, id.clone()).await {
                tracing::error!(
                    id = internal_id,
                    platform = %id.platform(),
                    "Failed to record platform id: {}",
                    e
                );
            }
        }
        delivered
    }
}
