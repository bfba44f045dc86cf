//! BindSync - cross-platform chat relay with reply threading
//!
//! BindSync mirrors one Telegram chat, one Discord channel and one Slack
//! channel into each other, and exposes a small REST API that can inject
//! messages into all three. Replies stay threaded on every platform: a reply
//! on Discord to a relayed Telegram message becomes a reply to the matching
//! message on Telegram and Slack.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐ ┌──────────┐ ┌──────────┐      ┌──────────────┐
//! │ Telegram │ │ Discord  │ │  Slack   │      │  REST API    │
//! │ polling  │ │ gateway  │ │ socket   │      │  (axum)      │
//! └────┬─────┘ └────┬─────┘ └────┬─────┘      └──────┬───────┘
//!      └────────────┴────────────┘                   │
//!                   │ InboundEvent (mpsc)            │
//!      ┌────────────▼────────────────────────────────▼───────┐
//!      │                  Relay Dispatcher                    │
//!      │  filter → resolve reply → persist → forward → record │
//!      └──────┬──────────────────┬─────────────────┬──────────┘
//!             │                  │                 │
//!   ┌─────────▼───────┐ ┌────────▼────────┐ ┌──────▼──────────┐
//!   │ Cross-Reference │ │ Identity Store  │ │ Platform senders│
//!   │ Maps (memory)   │ │ (JSON files)    │ │ (Web APIs)      │
//!   └─────────────────┘ └─────────────────┘ └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`relay`]: platforms, native ids, cross-reference maps, reply resolution
//!   and the dispatcher
//! - [`store`]: the durable identity store
//! - [`channels`]: platform senders, inbound normalizers and connectors
//! - [`auth`]: API tokens and the admin account
//! - [`api`]: REST facade
//! - [`bridge`]: wiring and the runtime loop
//! - [`config`]: configuration management

pub mod api;
pub mod auth;
pub mod bridge;
pub mod channels;
pub mod config;
pub mod error;
pub mod relay;
pub mod store;

pub use error::{Error, Result};
