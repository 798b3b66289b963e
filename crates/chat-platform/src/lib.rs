//! Storage backends for the chat room store.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use chat_core::{PersistenceError, StorePersistence, StoreSnapshot};
use tracing::debug;

const STORE_FILE_NAME: &str = "chat-store.json";
const ACCOUNT_SLUG_MAX_LEN: usize = 64;

/// Keeps the serialized snapshot in memory, like browser local storage.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    data: Arc<RwLock<Option<String>>>,
}

impl InMemoryPersistence {
    /// Seed with raw JSON (for example a snapshot from an older build).
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            data: Arc::new(RwLock::new(Some(raw.into()))),
        }
    }

    pub fn raw(&self) -> Option<String> {
        self.data.read().ok().and_then(|data| data.clone())
    }
}

impl StorePersistence for InMemoryPersistence {
    fn load(&self) -> Result<Option<StoreSnapshot>, PersistenceError> {
        let data = self
            .data
            .read()
            .map_err(|_| PersistenceError::Backend("poisoned lock".to_owned()))?;
        data.as_deref().map(decode_snapshot).transpose()
    }

    fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        let encoded = serde_json::to_string(snapshot)
            .map_err(|err| PersistenceError::Backend(err.to_string()))?;
        let mut data = self
            .data
            .write()
            .map_err(|_| PersistenceError::Backend("poisoned lock".to_owned()))?;
        *data = Some(encoded);
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| PersistenceError::Backend("poisoned lock".to_owned()))?;
        *data = None;
        Ok(())
    }
}

/// JSON file on disk, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store file for one account under `root`: `<root>/user-<slug>/chat-store.json`.
    pub fn for_account(root: &Path, account_id: &str) -> Self {
        let slug = slugify_component(account_id, ACCOUNT_SLUG_MAX_LEN);
        let slug = if slug.is_empty() {
            "anonymous".to_owned()
        } else {
            slug
        };
        Self::new(root.join(format!("user-{slug}")).join(STORE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let now_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos())
            .unwrap_or(0);
        parent.join(format!(".{STORE_FILE_NAME}.{now_nanos}.tmp"))
    }
}

impl StorePersistence for JsonFilePersistence {
    fn load(&self) -> Result<Option<StoreSnapshot>, PersistenceError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(PersistenceError::Unavailable(format!(
                    "failed reading chat store {}: {err}",
                    self.path.display()
                )));
            }
        };
        decode_snapshot(&raw).map(Some)
    }

    fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                PersistenceError::Unavailable(format!(
                    "failed creating chat store directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let encoded = serde_json::to_vec(snapshot)
            .map_err(|err| PersistenceError::Backend(err.to_string()))?;
        let temp_path = self.temp_path();
        fs::write(&temp_path, encoded).map_err(|err| {
            PersistenceError::Backend(format!(
                "failed writing temp chat store {}: {err}",
                temp_path.display()
            ))
        })?;

        if let Err(rename_err) = fs::rename(&temp_path, &self.path) {
            // Windows refuses to rename over an existing file.
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    let _ = fs::remove_file(&temp_path);
                    return Err(PersistenceError::Backend(format!(
                        "failed replacing chat store {} after rename error ({rename_err}): {err}",
                        self.path.display()
                    )));
                }
            }
            fs::rename(&temp_path, &self.path).map_err(|err| {
                let _ = fs::remove_file(&temp_path);
                PersistenceError::Backend(format!(
                    "failed moving chat store into place {}: {err}",
                    self.path.display()
                ))
            })?;
        }

        debug!(path = %self.path.display(), rooms = snapshot.rooms.len(), "chat store saved");
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PersistenceError::Backend(format!(
                "failed deleting chat store {}: {err}",
                self.path.display()
            ))),
        }
    }
}

fn decode_snapshot(raw: &str) -> Result<StoreSnapshot, PersistenceError> {
    serde_json::from_str(raw).map_err(|err| PersistenceError::Corrupt(err.to_string()))
}

fn slugify_component(input: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max_len));
    let mut last_was_sep = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep && !out.is_empty() {
            out.push('_');
            last_was_sep = true;
        }
        if out.len() >= max_len {
            break;
        }
    }
    out.trim_end_matches('_').to_owned()
}
