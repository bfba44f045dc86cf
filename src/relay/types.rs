//! Core relay types
//!
//! Platforms, their native message identifiers, record sources and the
//! normalized inbound event every adapter produces.

use serde::{Deserialize, Serialize};

/// A relayed messaging platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Group-chat client (integer message ids)
    Telegram,
    /// Gaming-community client (snowflake ids)
    Discord,
    /// Workspace client (timestamp strings doubling as thread keys)
    Slack,
}

impl Platform {
    /// All relayed platforms, in forwarding order
    pub const ALL: [Platform; 3] = [Platform::Telegram, Platform::Discord, Platform::Slack];

    /// Short lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Discord => "discord",
            Self::Slack => "slack",
        }
    }

    /// Platforms other than this one
    pub fn others(self) -> impl Iterator<Item = Platform> {
        Self::ALL.into_iter().filter(move |p| *p != self)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "telegram" => Ok(Self::Telegram),
            "discord" => Ok(Self::Discord),
            "slack" => Ok(Self::Slack),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

/// A message identifier meaningful only within one platform.
///
/// Slack timestamps are kept as the exact string the API returned; they are
/// compared and hashed textually, never as floats.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NativeId {
    Telegram(i64),
    Discord(u64),
    Slack(String),
}

impl NativeId {
    /// Platform this id belongs to
    pub fn platform(&self) -> Platform {
        match self {
            Self::Telegram(_) => Platform::Telegram,
            Self::Discord(_) => Platform::Discord,
            Self::Slack(_) => Platform::Slack,
        }
    }
}

impl std::fmt::Display for NativeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Telegram(id) => write!(f, "{}", id),
            Self::Discord(id) => write!(f, "{}", id),
            Self::Slack(ts) => f.write_str(ts),
        }
    }
}

/// Where a message record originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Telegram,
    Discord,
    Slack,
    Api,
    ApiReply,
}

impl From<Platform> for Source {
    fn from(platform: Platform) -> Self {
        match platform {
            Platform::Telegram => Self::Telegram,
            Platform::Discord => Self::Discord,
            Platform::Slack => Self::Slack,
        }
    }
}

/// Normalized inbound platform message
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// Native id of the message on its origin platform
    pub native_id: NativeId,
    pub username: String,
    pub text: String,
    /// Native id (same platform) of the message this one replies to
    pub reply_to: Option<NativeId>,
}

impl InboundEvent {
    pub fn origin(&self) -> Platform {
        self.native_id.platform()
    }
}

/// Native ids produced by forwarding one message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Internal id of the stored record
    pub id: String,
    pub tg_msg_id: Option<i64>,
    pub dc_msg_id: Option<u64>,
    pub slack_ts: Option<String>,
}

impl DeliveryReceipt {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Record a delivered native id
    pub fn record(&mut self, id: &NativeId) {
        match id {
            NativeId::Telegram(v) => self.tg_msg_id = Some(*v),
            NativeId::Discord(v) => self.dc_msg_id = Some(*v),
            NativeId::Slack(v) => self.slack_ts = Some(v.clone()),
        }
    }

    /// Number of platforms the message reached
    pub fn delivered_count(&self) -> usize {
        [
            self.tg_msg_id.is_some(),
            self.dc_msg_id.is_some(),
            self.slack_ts.is_some(),
        ]
        .iter()
        .filter(|d| **d)
        .count()
    }
}
