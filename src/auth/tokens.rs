//! API tokens
//!
//! Opaque bearer secrets gating the `/messages` routes. Stored as one JSON
//! document (`<data_dir>/tokens.json`) rewritten on every change.

use super::{generate_secret, load_json, persist_json};
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// A stored API token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiToken {
    pub name: String,
    pub token: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_used: Option<DateTime<Utc>>,
}

impl ApiToken {
    fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| now <= exp)
    }
}

/// Listing view; the secret is reduced to a short preview
#[derive(Debug, Clone, Serialize)]
pub struct TokenSummary {
    pub name: String,
    pub description: Option<String>,
    pub token_preview: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_used: Option<DateTime<Utc>>,
}

impl From<&ApiToken> for TokenSummary {
    fn from(token: &ApiToken) -> Self {
        let preview: String = token.token.chars().take(8).collect();
        Self {
            name: token.name.clone(),
            description: token.description.clone(),
            token_preview: format!("{}...", preview),
            created_at: token.created_at,
            expires_at: token.expires_at,
            is_active: token.is_active,
            last_used: token.last_used,
        }
    }
}

/// Usage stamps reach disk at most this often
pub const USAGE_FLUSH_INTERVAL_SECS: i64 = 60;

fn usage_flush_due(last_flush: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    last_flush.map_or(true, |at| {
        now.signed_duration_since(at).num_seconds() >= USAGE_FLUSH_INTERVAL_SECS
    })
}

/// Durable API token store
#[derive(Clone)]
pub struct TokenStore {
    path: Option<PathBuf>,
    tokens: Arc<RwLock<Vec<ApiToken>>>,
    usage_flushed_at: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl TokenStore {
    /// Open the store backed by `<data_dir>/tokens.json`
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("tokens.json");
        let tokens: Vec<ApiToken> = load_json(&path).await?.unwrap_or_default();
        tracing::info!(count = tokens.len(), "Loaded API tokens");
        Ok(Self {
            path: Some(path),
            tokens: Arc::new(RwLock::new(tokens)),
            usage_flushed_at: Arc::new(Mutex::new(None)),
        })
    }

    /// Store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tokens: Arc::new(RwLock::new(Vec::new())),
            usage_flushed_at: Arc::new(Mutex::new(None)),
        }
    }

    async fn save(&self, tokens: &[ApiToken]) -> Result<()> {
        match &self.path {
            Some(path) => persist_json(path, tokens).await,
            None => Ok(()),
        }
    }

    /// Issue a new token. Names are unique.
    pub async fn create(
        &self,
        name: &str,
        description: Option<String>,
        expires_in_days: Option<i64>,
    ) -> Result<ApiToken> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::BadRequest("token name must not be empty".to_string()));
        }
        if matches!(expires_in_days, Some(days) if days <= 0) {
            return Err(Error::BadRequest(
                "expires_in_days must be positive".to_string(),
            ));
        }

        let mut tokens = self.tokens.write().await;
        if tokens.iter().any(|t| t.name == name) {
            return Err(Error::Conflict(format!("Token '{}' already exists", name)));
        }

        let created_at = Utc::now();
        let expires_at = match expires_in_days {
            Some(days) => Some(
                Duration::try_days(days)
                    .and_then(|d| created_at.checked_add_signed(d))
                    .ok_or_else(|| {
                        Error::BadRequest("expires_in_days is out of range".to_string())
                    })?,
            ),
            None => None,
        };
        let token = ApiToken {
            name: name.to_string(),
            token: generate_secret(),
            description,
            created_at,
            expires_at,
            is_active: true,
            last_used: None,
        };
        tokens.push(token.clone());
        if let Err(e) = self.save(&tokens).await {
            tokens.pop();
            return Err(e);
        }

        tracing::info!(name = %token.name, "API token created");
        Ok(token)
    }

    /// Check a presented secret; on success stamp `last_used`.
    ///
    /// The stamp is kept in memory; the file is refreshed in the background
    /// at most once per [`USAGE_FLUSH_INTERVAL_SECS`].
    pub async fn verify(&self, secret: &str) -> Result<bool> {
        if secret.is_empty() {
            return Ok(false);
        }
        let now = Utc::now();
        {
            let mut tokens = self.tokens.write().await;
            let Some(token) = tokens.iter_mut().find(|t| t.token == secret) else {
                return Ok(false);
            };
            if !token.is_usable(now) {
                return Ok(false);
            }
            token.last_used = Some(now);
        }

        if self.path.is_some() {
            let mut flushed_at = self.usage_flushed_at.lock().await;
            if usage_flush_due(*flushed_at, now) {
                *flushed_at = Some(now);
                let store = self.clone();
                tokio::spawn(async move { store.flush_usage().await });
            }
        }
        Ok(true)
    }

    async fn flush_usage(&self) {
        let tokens = self.tokens.write().await;
        if let Err(e) = self.save(&tokens).await {
            // The tokens stay valid; only usage stamps are lost
            tracing::warn!("Failed to persist token usage: {}", e);
        }
    }

    /// All tokens, newest first
    pub async fn list(&self) -> Vec<TokenSummary> {
        let tokens = self.tokens.read().await;
        let mut list: Vec<TokenSummary> = tokens.iter().map(TokenSummary::from).collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    /// Deactivate a token by name
    pub async fn revoke(&self, name: &str) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        let token = tokens
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::NotFound(format!("Token '{}' not found", name)))?;
        token.is_active = false;
        self.save(&tokens).await?;
        tracing::info!(name, "API token revoked");
        Ok(())
    }

    /// Remove a token by name
    pub async fn delete(&self, name: &str) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|t| t.name != name);
        if tokens.len() == before {
            return Err(Error::NotFound(format!("Token '{}' not found", name)));
        }
        self.save(&tokens).await?;
        tracing::info!(name, "API token deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_and_verify() {
        let store = TokenStore::in_memory();
        let token = store.create("ci", Some("pipeline".into()), None).await.unwrap();
        assert_eq!(token.token.len(), 43);
        assert!(token.is_active);

        assert!(store.verify(&token.token).await.unwrap());
        assert!(!store.verify("not-a-token").await.unwrap());
        assert!(!store.verify("").await.unwrap());

        let listed = store.list().await;
        assert!(listed[0].last_used.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let store = TokenStore::in_memory();
        store.create("ci", None, None).await.unwrap();
        let err = store.create("ci", None, None).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_revoked_and_expired_tokens_fail() {
        let store = TokenStore::in_memory();
        let token = store.create("ci", None, Some(30)).await.unwrap();
        assert!(token.expires_at.is_some());
        store.revoke("ci").await.unwrap();
        assert!(!store.verify(&token.token).await.unwrap());

        let expired = store.create("old", None, Some(1)).await.unwrap();
        store.tokens.write().await[1].expires_at = Some(Utc::now() - Duration::hours(1));
        assert!(!store.verify(&expired.token).await.unwrap());

        assert!(matches!(
            store.revoke("missing").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_list_previews_newest_first() {
        let store = TokenStore::in_memory();
        let first = store.create("first", None, None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.create("second", None, None).await.unwrap();

        let listed = store.list().await;
        assert_eq!(listed[0].name, "second");
        assert_eq!(listed[1].name, "first");
        assert_eq!(
            listed[1].token_preview,
            format!("{}...", &first.token[..8])
        );
        let json = serde_json::to_value(&listed[1]).unwrap();
        assert!(json.get("token").is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = TokenStore::in_memory();
        let token = store.create("ci", None, None).await.unwrap();
        store.delete("ci").await.unwrap();
        assert!(!store.verify(&token.token).await.unwrap());
        assert!(matches!(
            store.delete("ci").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_tokens_persist() {
        let dir = TempDir::new().unwrap();
        let secret = {
            let store = TokenStore::open(dir.path()).await.unwrap();
            store.create("ci", None, None).await.unwrap().token
        };
        let store = TokenStore::open(dir.path()).await.unwrap();
        assert!(store.verify(&secret).await.unwrap());
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let store = TokenStore::in_memory();
        assert!(matches!(
            store.create("  ", None, None).await.unwrap_err(),
            Error::BadRequest(_)
        ));
        assert!(matches!(
            store.create("ci", None, Some(0)).await.unwrap_err(),
            Error::BadRequest(_)
        ));
    }

    #[test]
    fn test_usage_flush_due() {
        let now = Utc::now();
        assert!(usage_flush_due(None, now));
        assert!(!usage_flush_due(Some(now - Duration::seconds(5)), now));
        assert!(usage_flush_due(
            Some(now - Duration::seconds(USAGE_FLUSH_INTERVAL_SECS)),
            now
        ));
    }

    #[tokio::test]
    async fn test_usage_stamp_flushed_in_background() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::open(dir.path()).await.unwrap();
        let secret = store.create("ci", None, None).await.unwrap().token;

        assert!(store.verify(&secret).await.unwrap());
        assert!(store.list().await[0].last_used.is_some());

        let path = dir.path().join("tokens.json");
        let mut persisted = false;
        for _ in 0..100 {
            let on_disk: Vec<ApiToken> =
                serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
            if on_disk[0].last_used.is_some() {
                persisted = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(persisted);

        // A second use inside the window stays in memory only
        let first_flush = *store.usage_flushed_at.lock().await;
        assert!(store.verify(&secret).await.unwrap());
        assert_eq!(*store.usage_flushed_at.lock().await, first_flush);
    }
}
