//! Player profile store.
//!
//! The game core only reads profiles (`get`, `list`); `create` exists for the
//! login side that mints new players. The file-backed store keeps every
//! profile in one JSON object keyed by player id, re-reads it before each
//! operation and rewrites it on change.

use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::protocol::PlayerIdentity;

/// Credits granted to a freshly created player.
pub const STARTING_CREDITS: i64 = 10_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Profile store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Profile store at {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Keyed record store of player profiles.
pub trait ProfileStore: Send + Sync {
    /// Look up a profile. `None` if unknown.
    fn get(&self, id: &str) -> Option<PlayerIdentity>;

    /// Create a profile, or return the existing one unchanged.
    fn create(&self, id: &str, name: &str) -> Result<PlayerIdentity, StoreError>;

    /// All profiles, oldest first.
    fn list(&self) -> Vec<PlayerIdentity>;
}

type ProfileMap = IndexMap<String, PlayerIdentity>;

fn new_identity(id: &str, name: &str) -> PlayerIdentity {
    let created = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    PlayerIdentity {
        id: id.to_string(),
        name: name.to_string(),
        credits: STARTING_CREDITS,
        created: Some(created),
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    players: RwLock<ProfileMap>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with existing profiles.
    pub fn with_profiles(profiles: impl IntoIterator<Item = PlayerIdentity>) -> Self {
        let players = profiles.into_iter().map(|p| (p.id.clone(), p)).collect();
        Self {
            players: RwLock::new(players),
        }
    }
}

impl ProfileStore for MemoryProfileStore {
    fn get(&self, id: &str) -> Option<PlayerIdentity> {
        let players = self.players.read().unwrap_or_else(PoisonError::into_inner);
        players.get(id).cloned()
    }

    fn create(&self, id: &str, name: &str) -> Result<PlayerIdentity, StoreError> {
        let mut players = self.players.write().unwrap_or_else(PoisonError::into_inner);
        let identity = players
            .entry(id.to_string())
            .or_insert_with(|| new_identity(id, name));
        Ok(identity.clone())
    }

    fn list(&self) -> Vec<PlayerIdentity> {
        let players = self.players.read().unwrap_or_else(PoisonError::into_inner);
        players.values().cloned().collect()
    }
}

/// JSON-file-backed store.
///
/// The file is shared with the login side, which may add profiles at any
/// time, so every operation re-reads it first. A missing file is recreated
/// empty; an unreadable one leaves the last good copy in place.
#[derive(Debug)]
pub struct JsonFileProfileStore {
    path: PathBuf,
    players: RwLock<ProfileMap>,
}

impl JsonFileProfileStore {
    /// Open the store at `path`, creating an empty one if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let players = if path.exists() {
            read_profiles(&path)?
        } else {
            log::info!("Creating empty profile store at {}", path.display());
            let empty = ProfileMap::new();
            write_profiles(&path, &empty)?;
            empty
        };

        log::info!("Loaded {} player profiles from {}", players.len(), path.display());
        Ok(Self {
            path,
            players: RwLock::new(players),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the cached profiles with the file's current contents.
    fn refresh(&self, players: &mut ProfileMap) {
        let result = if self.path.exists() {
            read_profiles(&self.path).map(|fresh| *players = fresh)
        } else {
            log::warn!("Profile store {} vanished, recreating", self.path.display());
            write_profiles(&self.path, players)
        };
        if let Err(e) = result {
            log::warn!("Keeping cached profiles: {e}");
        }
    }
}

impl ProfileStore for JsonFileProfileStore {
    fn get(&self, id: &str) -> Option<PlayerIdentity> {
        let mut players = self.players.write().unwrap_or_else(PoisonError::into_inner);
        self.refresh(&mut players);
        players.get(id).cloned()
    }

    fn create(&self, id: &str, name: &str) -> Result<PlayerIdentity, StoreError> {
        let mut players = self.players.write().unwrap_or_else(PoisonError::into_inner);
        self.refresh(&mut players);
        if let Some(existing) = players.get(id) {
            return Ok(existing.clone());
        }

        let identity = new_identity(id, name);
        players.insert(id.to_string(), identity.clone());
        if let Err(e) = write_profiles(&self.path, &players) {
            players.shift_remove(id);
            return Err(e);
        }
        log::info!("Created player {} ({})", identity.name, identity.id);
        Ok(identity)
    }

    fn list(&self) -> Vec<PlayerIdentity> {
        let mut players = self.players.write().unwrap_or_else(PoisonError::into_inner);
        self.refresh(&mut players);
        players.values().cloned().collect()
    }
}

fn read_profiles(path: &Path) -> Result<ProfileMap, StoreError> {
    let text = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if text.trim().is_empty() {
        return Ok(ProfileMap::new());
    }
    serde_json::from_str(&text).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_profiles(path: &Path, players: &ProfileMap) -> Result<(), StoreError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let json = serde_json::to_string_pretty(players).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}
