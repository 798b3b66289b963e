use serde::{Deserialize, Serialize};

use crate::{error::PersistenceError, store::Room};

/// Version written by this build; older snapshots are re-validated on load.
pub const STORE_SCHEMA_VERSION: u32 = 2;

/// Serialized form of the whole room store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StoreSnapshot {
    /// Missing in the first schema, which only had rooms and messages.
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub rooms: Vec<Room>,
}

/// Durable storage for the room store, written after every mutation.
pub trait StorePersistence: Send + Sync {
    /// Load the last saved snapshot, `None` when nothing was saved yet.
    fn load(&self) -> Result<Option<StoreSnapshot>, PersistenceError>;

    fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError>;

    /// Remove the saved snapshot (logout or corruption recovery).
    fn clear(&self) -> Result<(), PersistenceError>;
}
