//! Bidirectional artifact index.
//!
//! Tracks which artifacts were rendered for each container and item so
//! deletions can evict them without scanning the store.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::keys::{ArtifactKey, ArtifactOwner};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

#[derive(Default)]
struct IndexMaps {
    owner_to_keys: HashMap<ArtifactOwner, HashSet<ArtifactKey>>,
    key_to_owners: HashMap<ArtifactKey, HashSet<ArtifactOwner>>,
}

/// Tracks owner → artifact keys and artifact key → owners mappings.
pub struct ArtifactIndex {
    maps: RwLock<IndexMaps>,
}

impl ArtifactIndex {
    pub fn new() -> Self {
        Self {
            maps: RwLock::new(IndexMaps::default()),
        }
    }

    /// Register an artifact under its container and item.
    pub fn register(&self, key: ArtifactKey) {
        let owners = ArtifactOwner::for_key(&key);
        let mut maps = rw_write(&self.maps, SOURCE, "register");
        for owner in owners {
            maps.owner_to_keys.entry(owner).or_default().insert(key);
        }
        maps.key_to_owners.entry(key).or_default().extend(owners);
    }

    pub fn keys_for(&self, owner: &ArtifactOwner) -> HashSet<ArtifactKey> {
        rw_read(&self.maps, SOURCE, "keys_for")
            .owner_to_keys
            .get(owner)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop one artifact from every owner it was registered under.
    pub fn unregister(&self, key: &ArtifactKey) {
        let mut maps = rw_write(&self.maps, SOURCE, "unregister");
        let IndexMaps {
            owner_to_keys,
            key_to_owners,
        } = &mut *maps;

        if let Some(owners) = key_to_owners.remove(key) {
            for owner in owners {
                if let Some(keys) = owner_to_keys.get_mut(&owner) {
                    keys.remove(key);
                    if keys.is_empty() {
                        owner_to_keys.remove(&owner);
                    }
                }
            }
        }
    }

    /// Remove an owner and every artifact registered under it.
    ///
    /// Returns the affected artifact keys; they are fully unregistered.
    pub fn take_owner(&self, owner: &ArtifactOwner) -> HashSet<ArtifactKey> {
        let affected = self.keys_for(owner);
        for key in &affected {
            self.unregister(key);
        }
        affected
    }

    pub fn clear(&self) {
        let mut maps = rw_write(&self.maps, SOURCE, "clear");
        maps.owner_to_keys.clear();
        maps.key_to_owners.clear();
    }

    pub fn owner_count(&self) -> usize {
        rw_read(&self.maps, SOURCE, "owner_count")
            .owner_to_keys
            .len()
    }

    pub fn key_count(&self) -> usize {
        rw_read(&self.maps, SOURCE, "key_count").key_to_owners.len()
    }
}

impl Default for ArtifactIndex {
    fn default() -> Self {
        Self::new()
    }
}
