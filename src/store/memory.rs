//! Process-local identity store

use super::index::RecordIndex;
use super::{IdentityStore, MessageRecord, NewMessage};
use crate::error::Result;
use crate::relay::types::NativeId;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Identity store that lives only as long as the process
#[derive(Clone, Default)]
pub struct MemoryStore {
    index: Arc<RwLock<RecordIndex>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn append(&self, message: NewMessage) -> Result<String> {
        let record = message.into_record();
        let id = record.internal_id.clone();
        self.index.write().await.insert(record);
        Ok(id)
    }

    async fn get(&self, internal_id: &str) -> Result<Option<MessageRecord>> {
        Ok(self.index.read().await.get(internal_id).cloned())
    }

    async fn find_by_platform_id(&self, id: &NativeId) -> Result<Option<MessageRecord>> {
        Ok(self.index.read().await.find(id).cloned())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<MessageRecord>> {
        Ok(self.index.read().await.list(limit, offset))
    }

    async fn set_platform_id(&self, internal_id: &str, id: NativeId) -> Result<()> {
        let mut index = self.index.write().await;
        if let Some(updated) = index.prepare_update(internal_id, &id)? {
            index.commit_update(updated);
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.index.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::relay::types::{Platform, Source};

    #[tokio::test]
    async fn test_append_and_get() {
        let store = MemoryStore::new();
        let id = store
            .append(
                NewMessage::new(Source::Telegram, "Bob", "hi")
                    .with_platform_id(NativeId::Telegram(100)),
            )
            .await
            .unwrap();

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.text, "hi");
        assert_eq!(record.source, Source::Telegram);
        assert_eq!(record.tg_msg_id, Some(100));
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_once_platform_id_is_idempotent() {
        let store = MemoryStore::new();
        let id = store
            .append(NewMessage::new(Source::Api, "API", "x"))
            .await
            .unwrap();

        for _ in 0..3 {
            store
                .set_platform_id(&id, NativeId::Discord(555))
                .await
                .unwrap();
            let record = store.get(&id).await.unwrap().unwrap();
            assert_eq!(record.dc_msg_id, Some(555));
        }
        // Setting another platform never clears the first
        store
            .set_platform_id(&id, NativeId::Slack("1.1".to_string()))
            .await
            .unwrap();
        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.platform_id(Platform::Discord), Some(NativeId::Discord(555)));
        assert_eq!(record.slack_ts.as_deref(), Some("1.1"));
    }

    #[tokio::test]
    async fn test_set_platform_id_unknown_record() {
        let store = MemoryStore::new();
        let err = store
            .set_platform_id("missing", NativeId::Telegram(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_find_by_platform_id() {
        let store = MemoryStore::new();
        let id = store
            .append(
                NewMessage::new(Source::Telegram, "Bob", "hi")
                    .with_platform_id(NativeId::Telegram(100)),
            )
            .await
            .unwrap();
        store
            .set_platform_id(&id, NativeId::Discord(555))
            .await
            .unwrap();

        let by_dc = store
            .find_by_platform_id(&NativeId::Discord(555))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_dc.text, "hi");
        assert_eq!(by_dc.internal_id, id);
        assert!(store
            .find_by_platform_id(&NativeId::Discord(556))
            .await
            .unwrap()
            .is_none());
        // Same number on another platform is a different id
        assert!(store
            .find_by_platform_id(&NativeId::Telegram(555))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_clamps_limit() {
        let store = MemoryStore::new();
        for i in 0..3 {
            store
                .append(NewMessage::new(Source::Api, "API", format!("m{}", i)))
                .await
                .unwrap();
        }
        assert_eq!(store.list(0, 0).await.unwrap().len(), 1);
        assert_eq!(store.list(500, 0).await.unwrap().len(), 3);
        assert_eq!(store.count().await.unwrap(), 3);
    }
}
