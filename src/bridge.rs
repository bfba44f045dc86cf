//! Relay wiring
//!
//! Builds the identity store, cross-reference maps, platform senders and the
//! dispatcher from a [`BridgeConfig`], then runs the connectors, the relay
//! loop and the REST facade side by side.

use crate::api::{build_app, AppState};
use crate::auth::{AdminStore, TokenStore};
use crate::channels::{
    run_connector, Connector, DiscordClient, DiscordConnector, SlackClient, SlackConnector,
    TelegramClient, TelegramConnector,
};
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::relay::{CrossRefMaps, DispatchOutcome, InboundEvent, RelayDispatcher};
use crate::store::FileStore;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Capacity of the inbound event queue shared by all connectors
const EVENT_QUEUE_CAPACITY: usize = 1000;

/// A fully wired relay, ready to run
pub struct Bridge {
    config: BridgeConfig,
    dispatcher: RelayDispatcher,
    tokens: TokenStore,
    admin: AdminStore,
    connectors: Vec<Arc<dyn Connector>>,
}

impl Bridge {
    /// Validate the configuration and construct every component.
    ///
    /// No network traffic happens here; sessions open in [`Bridge::run`].
    pub async fn build(config: BridgeConfig) -> Result<Self> {
        config.validate()?;

        let data_dir = &config.storage.data_dir;
        let store = Arc::new(FileStore::open(data_dir).await?);
        let tokens = TokenStore::open(data_dir).await?;
        let admin = AdminStore::open(data_dir).await?;

        let mut dispatcher = RelayDispatcher::new(store, CrossRefMaps::new());
        let mut connectors: Vec<Arc<dyn Connector>> = Vec::new();

        if let Some(tg) = &config.telegram {
            let client = Arc::new(TelegramClient::new(tg)?);
            dispatcher = dispatcher.with_sender(client.clone());
            connectors.push(Arc::new(TelegramConnector::new(client, tg)));
        }
        if let Some(dc) = &config.discord {
            let client = Arc::new(DiscordClient::new(dc)?);
            dispatcher = dispatcher.with_sender(client.clone());
            connectors.push(Arc::new(DiscordConnector::new(client, dc)));
        }
        if let Some(sk) = &config.slack {
            let client = Arc::new(SlackClient::new(sk)?);
            dispatcher = dispatcher.with_sender(client.clone());
            connectors.push(Arc::new(SlackConnector::new(client, sk)));
        }

        tracing::info!(
            platforms = connectors.len(),
            data_dir = %data_dir.display(),
            "Relay configured"
        );

        Ok(Self {
            config,
            dispatcher,
            tokens,
            admin,
            connectors,
        })
    }

    pub fn dispatcher(&self) -> &RelayDispatcher {
        &self.dispatcher
    }

    /// State shared with the REST handlers
    pub fn app_state(&self) -> AppState {
        AppState {
            dispatcher: self.dispatcher.clone(),
            tokens: self.tokens.clone(),
            admin: self.admin.clone(),
        }
    }

    /// Run until `shutdown` resolves.
    ///
    /// Connectors and the relay loop are aborted once the HTTP server has
    /// drained.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tokens.list().await.is_empty() {
            tracing::warn!(
                "No API tokens exist yet. Register an admin via POST /admin/register \
                 and create one via POST /admin/tokens"
            );
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let mut background = JoinSet::new();
        for connector in &self.connectors {
            tracing::info!(platform = %connector.platform(), "Starting connector");
            background.spawn(run_connector(connector.clone(), event_tx.clone()));
        }
        drop(event_tx);
        background.spawn(run_relay_loop(self.dispatcher.clone(), event_rx));

        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("cannot bind {}: {}", addr, e)))?;
        tracing::info!("REST API listening on http://{}", addr);

        let app = build_app(self.app_state(), &self.config.api.cors_origins);
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        tracing::info!("Shutting down relay");
        background.shutdown().await;
        served.map_err(Error::Io)
    }
}

/// Drain the inbound queue, dispatching each event on its own task.
///
/// Returns once every connector has dropped its sender and all in-flight
/// dispatches have finished.
pub async fn run_relay_loop(dispatcher: RelayDispatcher, mut events: mpsc::Receiver<InboundEvent>) {
    let mut in_flight = JoinSet::new();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    let dispatcher = dispatcher.clone();
                    in_flight.spawn(handle_event(dispatcher, event));
                }
                None => break,
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("Relay task failed: {}", e);
                }
            }
        }
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Relay task failed: {}", e);
        }
    }
    tracing::debug!("Relay loop stopped");
}

async fn handle_event(dispatcher: RelayDispatcher, event: InboundEvent) {
    let origin = event.origin();
    let native_id = event.native_id.clone();
    match dispatcher.dispatch(event).await {
        Ok(DispatchOutcome::Relayed(receipt)) => {
            tracing::debug!(
                platform = %origin,
                id = %receipt.id,
                delivered = receipt.delivered_count(),
                "Inbound message relayed"
            );
        }
        Ok(DispatchOutcome::Dropped(reason)) => {
            tracing::debug!(platform = %origin, native_id = %native_id, ?reason, "Inbound message dropped");
        }
        Err(e) => {
            tracing::error!(platform = %origin, native_id = %native_id, "Failed to relay message: {}", e);
        }
    }
}
