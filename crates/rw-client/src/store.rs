//! Credential storage.
//!
//! The token lives in a single named slot that is read at dispatch start,
//! written after a refresh and removed when the session ends.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::token::Token;

/// Single-slot credential store
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Current token, if any
    async fn get(&self) -> Result<Option<Token>, StoreError>;

    /// Replace the stored token
    async fn set(&self, token: &Token) -> Result<(), StoreError>;

    /// Remove the stored token. Clearing an empty slot is not an error.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// In-memory slot
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slot: RwLock<Option<Token>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: Token) -> Self {
        Self {
            slot: RwLock::new(Some(token)),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self) -> Result<Option<Token>, StoreError> {
        Ok(self.slot.read().await.clone())
    }

    async fn set(&self, token: &Token) -> Result<(), StoreError> {
        *self.slot.write().await = Some(token.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.slot.write().await = None;
        Ok(())
    }
}

/// Slot persisted as a file named after the slot inside `dir`
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl AsRef<Path>, slot: &str) -> Self {
        Self {
            path: dir.as_ref().join(slot),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self) -> Result<Option<Token>, StoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let text = String::from_utf8(raw)
            .map_err(|_| StoreError::Corrupt(format!("{} is not UTF-8", self.path.display())))?;
        let text = text.trim();

        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(Token::new(text)))
    }

    async fn set(&self, token: &Token) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Rename keeps readers from ever seeing a half-written token
        let tmp = self.temp_path();
        let mut file = create_owner_only(&tmp).await?;
        file.write_all(token.as_str().as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), "Stored credential");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Cleared credential");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Fresh file readable only by its owner. A leftover temp file is removed
/// first so its permissions are not inherited.
async fn create_owner_only(path: &Path) -> std::io::Result<tokio::fs::File> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path).await
}
