//! On-disk persistence for the account list
//!
//! One JSON file holds the whole pool: schema version, account array, and a
//! reserved active index. All writes use atomic temp-file + rename to prevent
//! corruption on crash, with 0600 permissions since the file contains OAuth
//! tokens.
//!
//! The store is plain I/O; the pool owns the in-memory state and calls
//! `save` after every mutation. An absent file loads as `None` (empty pool),
//! never as an error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::account::Account;
use crate::error::{Error, Result};

/// Current version of the persisted schema.
pub const SCHEMA_VERSION: u32 = 1;

/// The persisted shape of the whole pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPool {
    pub schema_version: u32,
    pub accounts: Vec<Account>,
    /// Reserved. Always written as 0 and not read back by the engine.
    #[serde(default)]
    pub active_index: usize,
}

impl StoredPool {
    /// Wrap an account list in the current schema.
    pub fn new(accounts: Vec<Account>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            accounts,
            active_index: 0,
        }
    }
}

/// Account-file manager.
pub struct AccountStore {
    path: PathBuf,
}

impl AccountStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted pool, or `None` when no file exists yet.
    pub async fn load(&self) -> Result<Option<StoredPool>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "account file not found, starting with empty pool");
            return Ok(None);
        }

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::Io(format!("reading account file: {e}")))?;
        let stored: StoredPool = serde_json::from_str(&contents)
            .map_err(|e| Error::Parse(format!("parsing account file: {e}")))?;
        info!(
            path = %self.path.display(),
            accounts = stored.accounts.len(),
            schema = stored.schema_version,
            "loaded account file"
        );
        Ok(Some(stored))
    }

    /// Persist the pool atomically (temp file + rename, 0600 permissions).
    pub async fn save(&self, pool: &StoredPool) -> Result<()> {
        let json = serde_json::to_string_pretty(pool)
            .map_err(|e| Error::Parse(format!("serializing account file: {e}")))?;

        let dir = self
            .path
            .parent()
            .ok_or_else(|| Error::Io("account file path has no parent directory".into()))?;

        let tmp_path = dir.join(format!(".accounts.tmp.{}", std::process::id()));

        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .map_err(|e| Error::Io(format!("writing temp account file: {e}")))?;

        // 0600: the file holds live OAuth tokens (unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&tmp_path, perms)
                .await
                .map_err(|e| Error::Io(format!("setting account file permissions: {e}")))?;
        }

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| Error::Io(format!("renaming temp account file: {e}")))?;

        debug!(path = %self.path.display(), accounts = pool.accounts.len(), "persisted accounts");
        Ok(())
    }
}
