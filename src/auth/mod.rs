//! Authorization gate for the REST facade
//!
//! - [`TokenStore`]: API tokens checked on every `/messages` request
//! - [`AdminStore`]: the admin account that manages those tokens

mod admin;
mod tokens;

pub use admin::{AdminInfo, AdminStatus, AdminStore};
pub use tokens::{ApiToken, TokenStore, TokenSummary};

use crate::error::{Error, Result};
use base64::Engine;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// 32 random bytes, URL-safe base64 without padding
pub(crate) fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Read a JSON document, `None` when the file does not exist yet
pub(crate) async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(data) => serde_json::from_str(&data)
            .map(Some)
            .map_err(|e| Error::Storage(format!("failed to parse {}: {}", path.display(), e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Storage(format!(
            "failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Replace a JSON document via temp file + rename
pub(crate) async fn persist_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Storage(format!("cannot create {}: {}", parent.display(), e)))?;
    }
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| Error::Storage(format!("failed to write {}: {}", tmp.display(), e)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::Storage(format!("failed to commit {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_secret() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn test_json_round_trip_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        let missing: Option<Vec<String>> = load_json(&path).await.unwrap();
        assert!(missing.is_none());

        persist_json(&path, &vec!["a".to_string()]).await.unwrap();
        let loaded: Option<Vec<String>> = load_json(&path).await.unwrap();
        assert_eq!(loaded, Some(vec!["a".to_string()]));
    }

    #[tokio::test]
    async fn test_corrupt_document_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "{broken").unwrap();
        let err = load_json::<Vec<String>>(&path).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }
}
