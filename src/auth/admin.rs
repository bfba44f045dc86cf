//! Admin account and sessions
//!
//! A single administrator manages API tokens. The account lives in
//! `<data_dir>/admin.json`; login sessions are process-local and vanish on
//! restart.

use super::{generate_secret, load_json, persist_json};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AdminAccount {
    username: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

/// Public view of the registered admin
#[derive(Debug, Clone, Serialize)]
pub struct AdminInfo {
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Whether setup is still pending
#[derive(Debug, Clone, Serialize)]
pub struct AdminStatus {
    pub admin_exists: bool,
    pub registration_required: bool,
}

fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Admin account plus active sessions
#[derive(Clone)]
pub struct AdminStore {
    path: Option<PathBuf>,
    account: Arc<RwLock<Option<AdminAccount>>>,
    sessions: Arc<RwLock<HashSet<String>>>,
}

impl AdminStore {
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("admin.json");
        let account: Option<AdminAccount> = load_json(&path).await?;
        Ok(Self {
            path: Some(path),
            account: Arc::new(RwLock::new(account)),
            sessions: Arc::new(RwLock::new(HashSet::new())),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            account: Arc::new(RwLock::new(None)),
            sessions: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub async fn status(&self) -> AdminStatus {
        let exists = self.account.read().await.is_some();
        AdminStatus {
            admin_exists: exists,
            registration_required: !exists,
        }
    }

    /// Register the one admin account
    pub async fn register(&self, username: &str, password: &str) -> Result<AdminInfo> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(Error::BadRequest(
                "username and password are required".to_string(),
            ));
        }

        let mut account = self.account.write().await;
        if account.is_some() {
            return Err(Error::Conflict("Admin already registered".to_string()));
        }
        let created = AdminAccount {
            username: username.to_string(),
            password_hash: hash_password(password),
            created_at: Utc::now(),
        };
        if let Some(path) = &self.path {
            persist_json(path, &created).await?;
        }

        tracing::info!(username, "Admin registered");
        let info = AdminInfo {
            username: created.username.clone(),
            created_at: created.created_at,
        };
        *account = Some(created);
        Ok(info)
    }

    /// Check credentials and open a session
    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        let valid = match self.account.read().await.as_ref() {
            Some(account) => {
                account.username == username.trim()
                    && account.password_hash == hash_password(password)
            }
            None => false,
        };
        if !valid {
            return Err(Error::Unauthorized("Invalid credentials".to_string()));
        }
        let session = generate_secret();
        self.sessions.write().await.insert(session.clone());
        Ok(session)
    }

    pub async fn logout(&self, session: &str) -> bool {
        self.sessions.write().await.remove(session)
    }

    pub async fn is_session_valid(&self, session: &str) -> bool {
        self.sessions.read().await.contains(session)
    }
}
