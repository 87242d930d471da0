use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use snafu::ResultExt;

use super::error::{
    AuthResult, CreateDirSnafu, DecodeFileSnafu, EncodeFileSnafu, ReadFileSnafu, RenameFileSnafu,
    WriteFileSnafu,
};

pub const ADMIN_FLAG_KEY: &str = "relay.adminAuthenticated";
pub const AUTHORIZATION_FILE_NAME: &str = "authorization.json";

/// Small persisted key-value store local to this device.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> AuthResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> AuthResult<()>;
    fn remove(&self, key: &str) -> AuthResult<()>;
}

#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> AuthResult<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AuthResult<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AuthResult<()> {
        self.lock().remove(key);
        Ok(())
    }
}

/// JSON object on disk, rewritten through a temp file on every change.
pub struct FileKeyValueStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileKeyValueStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn default_path() -> PathBuf {
        crate::settings::ClientSettingsStore::default_config_dir().join(AUTHORIZATION_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> AuthResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path).context(ReadFileSnafu {
            stage: "read-key-value-file",
            path: self.path.clone(),
        })?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).context(DecodeFileSnafu {
            stage: "decode-key-value-file",
            path: self.path.clone(),
        })
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> AuthResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-key-value-directory",
                path: parent.to_path_buf(),
            })?;
        }
        let content = serde_json::to_string_pretty(entries).context(EncodeFileSnafu {
            stage: "encode-key-value-file",
        })?;
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-key-value-file",
            path: temp_path.clone(),
        })?;
        std::fs::rename(&temp_path, &self.path).context(RenameFileSnafu {
            stage: "rename-temporary-key-value-file",
            path: self.path.clone(),
        })
    }

    fn modify(&self, change: impl FnOnce(&mut BTreeMap<String, String>)) -> AuthResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_all()?;
        change(&mut entries);
        self.write_all(&entries)
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> AuthResult<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> AuthResult<()> {
        self.modify(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> AuthResult<()> {
        self.modify(|entries| {
            entries.remove(key);
        })
    }
}

/// Remembers whether this client passed the operator challenge.
///
/// This gates convenience surfaces (maintenance bypass, God Mode) on one device. It is not
/// an authorization boundary; the document store's own rules are.
#[derive(Clone)]
pub struct AuthorizationContext {
    store: Arc<dyn KeyValueStore>,
    passphrase: String,
}

impl AuthorizationContext {
    pub fn new(store: Arc<dyn KeyValueStore>, passphrase: impl Into<String>) -> Self {
        Self {
            store,
            passphrase: passphrase.into().trim().to_string(),
        }
    }

    pub fn in_memory(passphrase: impl Into<String>) -> Self {
        Self::new(Arc::new(MemoryKeyValueStore::new()), passphrase)
    }

    pub fn is_admin(&self) -> bool {
        match self.store.get(ADMIN_FLAG_KEY) {
            Ok(flag) => flag.as_deref() == Some("true"),
            Err(error) => {
                tracing::warn!(%error, "admin flag unreadable, treating as not admin");
                false
            }
        }
    }

    /// Sets the persisted flag when `attempt` matches the configured passphrase.
    ///
    /// An empty configured passphrase disables the challenge.
    pub fn try_admin_challenge(&self, attempt: &str) -> AuthResult<bool> {
        if self.passphrase.is_empty() || attempt.trim() != self.passphrase {
            tracing::warn!("admin challenge failed");
            return Ok(false);
        }
        self.store.set(ADMIN_FLAG_KEY, "true")?;
        tracing::info!("admin challenge passed");
        Ok(true)
    }

    pub fn revoke(&self) -> AuthResult<()> {
        self.store.remove(ADMIN_FLAG_KEY)?;
        tracing::info!("admin flag revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_sets_and_revoke_clears_the_flag() {
        let context = AuthorizationContext::in_memory("open sesame");
        assert!(!context.is_admin());
        assert!(!context.try_admin_challenge("guess").unwrap());
        assert!(!context.is_admin());

        assert!(context.try_admin_challenge(" open sesame ").unwrap());
        assert!(context.is_admin());

        context.revoke().unwrap();
        assert!(!context.is_admin());
    }

    #[test]
    fn empty_passphrase_never_grants_admin() {
        let context = AuthorizationContext::in_memory("");
        assert!(!context.try_admin_challenge("").unwrap());
        assert!(!context.is_admin());
    }

    #[test]
    fn file_store_survives_a_new_context() {
        let path = std::env::temp_dir()
            .join(format!("relay-auth-{}", uuid::Uuid::new_v4().simple()))
            .join(AUTHORIZATION_FILE_NAME);
        let first = AuthorizationContext::new(Arc::new(FileKeyValueStore::new(path.clone())), "pw");
        assert!(first.try_admin_challenge("pw").unwrap());
        assert!(!path.with_extension("json.tmp").exists());

        let second = AuthorizationContext::new(Arc::new(FileKeyValueStore::new(path.clone())), "pw");
        assert!(second.is_admin());
        second.revoke().unwrap();
        assert!(!first.is_admin());

        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
}
