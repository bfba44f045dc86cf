//! Identity store
//!
//! Durable record of every relayed message and the native id it received on
//! each platform. The store is the source of truth for reply resolution; the
//! in-memory cross-reference maps are only a shortcut in front of it.
//!
//! Two backends share one in-memory index:
//! - [`FileStore`]: one JSON document per record under `<data_dir>/messages/`
//! - [`MemoryStore`]: process-local, used for tests and ephemeral runs

mod file;
mod index;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::relay::types::{NativeId, Platform, Source};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Largest page `list` will return
pub const MAX_LIST_LIMIT: usize = 200;

/// A relayed message.
///
/// Everything except the three platform id fields is immutable after
/// creation. Serialized with `internal_id` renamed to `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(rename = "id")]
    pub internal_id: String,
    pub source: Source,
    pub text: String,
    pub username: String,
    /// Seconds since the Unix epoch at creation
    pub timestamp: f64,
    pub tg_msg_id: Option<i64>,
    pub dc_msg_id: Option<u64>,
    pub slack_ts: Option<String>,
    pub reply_to_id: Option<String>,
    pub reply_to_tg_id: Option<i64>,
    pub reply_to_dc_id: Option<u64>,
    pub reply_to_slack_ts: Option<String>,
}

impl MessageRecord {
    /// Native id of this message on a platform, if delivered there
    pub fn platform_id(&self, platform: Platform) -> Option<NativeId> {
        match platform {
            Platform::Telegram => self.tg_msg_id.map(NativeId::Telegram),
            Platform::Discord => self.dc_msg_id.map(NativeId::Discord),
            Platform::Slack => self.slack_ts.clone().map(NativeId::Slack),
        }
    }

    /// All native ids known for this message
    pub fn native_ids(&self) -> Vec<NativeId> {
        Platform::ALL
            .iter()
            .filter_map(|p| self.platform_id(*p))
            .collect()
    }

    fn set_platform_id(&mut self, id: NativeId) {
        match id {
            NativeId::Telegram(v) => self.tg_msg_id = Some(v),
            NativeId::Discord(v) => self.dc_msg_id = Some(v),
            NativeId::Slack(v) => self.slack_ts = Some(v),
        }
    }

    fn set_reply_to_platform_id(&mut self, id: NativeId) {
        match id {
            NativeId::Telegram(v) => self.reply_to_tg_id = Some(v),
            NativeId::Discord(v) => self.reply_to_dc_id = Some(v),
            NativeId::Slack(v) => self.reply_to_slack_ts = Some(v),
        }
    }
}

/// Input to [`IdentityStore::append`]
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub source: Source,
    pub text: String,
    pub username: String,
    pub platform_ids: Vec<NativeId>,
    pub reply_to_id: Option<String>,
    pub reply_to_platform_ids: Vec<NativeId>,
}

impl NewMessage {
    pub fn new(source: Source, username: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
            username: username.into(),
            platform_ids: Vec::new(),
            reply_to_id: None,
            reply_to_platform_ids: Vec::new(),
        }
    }

    pub fn with_platform_id(mut self, id: NativeId) -> Self {
        self.platform_ids.push(id);
        self
    }

    pub fn with_reply_to_id(mut self, internal_id: Option<String>) -> Self {
        self.reply_to_id = internal_id;
        self
    }

    pub fn with_reply_to_platform_ids(mut self, ids: impl IntoIterator<Item = NativeId>) -> Self {
        self.reply_to_platform_ids.extend(ids);
        self
    }

    /// Materialize into a record with a fresh internal id and timestamp
    pub(crate) fn into_record(self) -> MessageRecord {
        let mut record = MessageRecord {
            internal_id: uuid::Uuid::new_v4().to_string(),
            source: self.source,
            text: self.text,
            username: self.username,
            timestamp: now_secs(),
            tg_msg_id: None,
            dc_msg_id: None,
            slack_ts: None,
            reply_to_id: self.reply_to_id,
            reply_to_tg_id: None,
            reply_to_dc_id: None,
            reply_to_slack_ts: None,
        };
        for id in self.platform_ids {
            record.set_platform_id(id);
        }
        for id in self.reply_to_platform_ids {
            record.set_reply_to_platform_id(id);
        }
        record
    }
}

/// Durable message identity store
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Persist a new record and return its internal id
    async fn append(&self, message: NewMessage) -> Result<String>;

    /// Record by internal id
    async fn get(&self, internal_id: &str) -> Result<Option<MessageRecord>>;

    /// Record holding `id` as its native id on `id`'s platform
    async fn find_by_platform_id(&self, id: &NativeId) -> Result<Option<MessageRecord>>;

    /// Records newest first; `limit` is clamped to `1..=MAX_LIST_LIMIT`
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<MessageRecord>>;

    /// Set the native id of a record on `id`'s platform.
    ///
    /// Keyed strictly by internal id. Re-setting the same value is a no-op;
    /// a different value overwrites (last write wins).
    async fn set_platform_id(&self, internal_id: &str, id: NativeId) -> Result<()>;

    /// Number of stored records
    async fn count(&self) -> Result<usize>;
}

/// Clamp a requested page size to `1..=MAX_LIST_LIMIT`
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_LIST_LIMIT)
}

fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_record_sets_ids() {
        let record = NewMessage::new(Source::Telegram, "Bob", "hi")
            .with_platform_id(NativeId::Telegram(100))
            .with_reply_to_id(Some("parent".to_string()))
            .with_reply_to_platform_ids([
                NativeId::Telegram(99),
                NativeId::Slack("1712345678.000100".to_string()),
            ])
            .into_record();

        assert_eq!(record.tg_msg_id, Some(100));
        assert_eq!(record.dc_msg_id, None);
        assert_eq!(record.reply_to_id.as_deref(), Some("parent"));
        assert_eq!(record.reply_to_tg_id, Some(99));
        assert_eq!(record.reply_to_dc_id, None);
        assert_eq!(record.reply_to_slack_ts.as_deref(), Some("1712345678.000100"));
        assert!(record.timestamp > 1_600_000_000.0);
        assert_eq!(record.internal_id.len(), 36);
    }

    #[test]
    fn test_record_wire_shape() {
        let record = NewMessage::new(Source::Api, "API", "hello").into_record();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], record.internal_id.as_str());
        assert!(json.get("internal_id").is_none());
        assert_eq!(json["source"], "api");
        assert!(json["tg_msg_id"].is_null());
        assert!(json["reply_to_slack_ts"].is_null());
    }

    #[test]
    fn test_native_ids() {
        let mut record = NewMessage::new(Source::Discord, "Ann", "yo")
            .with_platform_id(NativeId::Discord(5))
            .into_record();
        record.set_platform_id(NativeId::Slack("1.5".to_string()));
        assert_eq!(
            record.native_ids(),
            vec![NativeId::Discord(5), NativeId::Slack("1.5".to_string())]
        );
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(50), 50);
        assert_eq!(clamp_limit(10_000), MAX_LIST_LIMIT);
    }
}
