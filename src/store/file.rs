//! File-backed identity store
//!
//! Directory layout:
//! ```text
//! <data_dir>/messages/
//! ├── <internal-id>.json
//! └── ...
//! ```
//!
//! Unlike fire-and-forget stores, every write is awaited: `append` only
//! returns an id once the record is on disk, so a record always exists before
//! any forward is attempted.

use super::index::RecordIndex;
use super::{IdentityStore, MessageRecord, NewMessage};
use crate::error::{Error, Result};
use crate::relay::types::NativeId;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Identity store persisting one JSON document per record
pub struct FileStore {
    messages_dir: PathBuf,
    index: Arc<RwLock<RecordIndex>>,
}

impl FileStore {
    /// Open (or create) a store under `base_dir`, loading existing records
    pub async fn open(base_dir: &Path) -> Result<Self> {
        let messages_dir = base_dir.join("messages");
        tokio::fs::create_dir_all(&messages_dir)
            .await
            .map_err(|e| Error::Storage(format!("cannot create {}: {}", messages_dir.display(), e)))?;

        let records = Self::load_records(&messages_dir);
        tracing::info!(
            count = records.len(),
            dir = %messages_dir.display(),
            "Loaded message records"
        );

        Ok(Self {
            messages_dir,
            index: Arc::new(RwLock::new(RecordIndex::from_records(records))),
        })
    }

    /// Default base directory (~/.bindsync/)
    pub fn default_dir() -> PathBuf {
        dirs_next::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".bindsync")
    }

    fn load_records(dir: &Path) -> Vec<MessageRecord> {
        let mut records = Vec::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to read directory {}: {}", dir.display(), e);
                }
                return records;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(data) => match serde_json::from_str(&data) {
                    Ok(record) => records.push(record),
                    Err(e) => tracing::warn!("Failed to parse {}: {}", path.display(), e),
                },
                Err(e) => tracing::warn!("Failed to read {}: {}", path.display(), e),
            }
        }

        records
    }

    /// Write a record via temp file + rename so readers never see half a document
    async fn write_record(&self, record: &MessageRecord) -> Result<()> {
        let path = self.messages_dir.join(format!("{}.json", record.internal_id));
        let tmp = self
            .messages_dir
            .join(format!(".{}.json.tmp", record.internal_id));
        let json = serde_json::to_vec_pretty(record)?;

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Error::Storage(format!("failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Storage(format!("failed to commit {}: {}", path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for FileStore {
    async fn append(&self, message: NewMessage) -> Result<String> {
        let record = message.into_record();
        self.write_record(&record).await?;
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
        // Held across the write so updates to one record are serialized
        let mut index = self.index.write().await;
        let Some(updated) = index.prepare_update(internal_id, &id)? else {
            return Ok(());
        };
        self.write_record(&updated).await?;
        index.commit_update(updated);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.index.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::types::Source;
    use tempfile::TempDir;

    async fn make_store() -> (FileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_append_writes_document() {
        let (store, dir) = make_store().await;
        let id = store
            .append(NewMessage::new(Source::Slack, "Ann", "hello"))
            .await
            .unwrap();

        let path = dir.path().join("messages").join(format!("{}.json", id));
        let data = std::fs::read_to_string(path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(json["id"], id.as_str());
        assert_eq!(json["source"], "slack");
    }

    #[tokio::test]
    async fn test_telegram_to_discord_round() {
        let (store, _dir) = make_store().await;
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

        let found = store
            .find_by_platform_id(&NativeId::Discord(555))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.text, "hi");
        assert_eq!(found.tg_msg_id, Some(100));
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = FileStore::open(dir.path()).await.unwrap();
            let id = store
                .append(
                    NewMessage::new(Source::Discord, "Ann", "yo")
                        .with_platform_id(NativeId::Discord(42)),
                )
                .await
                .unwrap();
            store
                .set_platform_id(&id, NativeId::Slack("1712345678.000100".to_string()))
                .await
                .unwrap();
            id
        };

        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        let record = store
            .find_by_platform_id(&NativeId::Slack("1712345678.000100".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.internal_id, id);
        assert_eq!(record.dc_msg_id, Some(42));
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let (store, _dir) = make_store().await;
        for text in ["one", "two", "three"] {
            store
                .append(NewMessage::new(Source::Api, "API", text))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let texts: Vec<_> = store
            .list(2, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.text)
            .collect();
        assert_eq!(texts, vec!["three", "two"]);
    }

    #[tokio::test]
    async fn test_load_skips_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let messages_dir = dir.path().join("messages");
        std::fs::create_dir_all(&messages_dir).unwrap();
        std::fs::write(messages_dir.join("bad.json"), "not valid json").unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_fails_when_directory_vanishes() {
        let (store, dir) = make_store().await;
        std::fs::remove_dir_all(dir.path().join("messages")).unwrap();

        let err = store
            .append(NewMessage::new(Source::Api, "API", "lost"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
