//! The volume registry.
//!
//! One readers-writer lock guards the whole name → volume table. Lookups
//! take it shared; every mutation, and every read that must stay consistent
//! with a following write, runs inside a single exclusive section. Guards
//! are never held across an `.await`.

use std::collections::{BTreeMap, HashMap};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::volume::{Volume, VolumeInfo};

/// The name → volume table.
#[derive(Debug, Default)]
pub struct VolumeTable {
    volumes: HashMap<String, Volume>,
}

impl VolumeTable {
    /// Build a table from persisted volume info.
    #[must_use]
    pub fn from_snapshot(snapshot: BTreeMap<String, VolumeInfo>) -> Self {
        let volumes = snapshot
            .into_iter()
            .map(|(name, info)| (name, Volume::restored(info)))
            .collect();
        Self { volumes }
    }

    /// Look up a volume.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Volume> {
        self.volumes.get(name)
    }

    /// Look up a volume for modification.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Volume> {
        self.volumes.get_mut(name)
    }

    /// Insert or replace a volume.
    pub fn upsert(&mut self, name: impl Into<String>, volume: Volume) {
        self.volumes.insert(name.into(), volume);
    }

    /// Remove a volume, returning it if it was present.
    pub fn delete(&mut self, name: &str) -> Option<Volume> {
        self.volumes.remove(name)
    }

    /// Summaries of every volume.
    #[must_use]
    pub fn list(&self) -> Vec<VolumeInfo> {
        self.volumes.values().map(|v| v.info.clone()).collect()
    }

    /// The persistable view of the table, ordered by name.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, VolumeInfo> {
        self.volumes
            .iter()
            .map(|(name, volume)| (name.clone(), volume.info.clone()))
            .collect()
    }

    /// Remove and return every volume.
    pub fn take_all(&mut self) -> Vec<Volume> {
        self.volumes.drain().map(|(_, v)| v).collect()
    }

    /// Number of volumes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

/// Lock-guarded volume table shared by every driver operation.
#[derive(Debug, Default)]
pub struct Registry {
    table: RwLock<VolumeTable>,
}

impl Registry {
    /// Create a registry holding restored volumes.
    #[must_use]
    pub fn from_snapshot(snapshot: BTreeMap<String, VolumeInfo>) -> Self {
        Self {
            table: RwLock::new(VolumeTable::from_snapshot(snapshot)),
        }
    }

    /// Take the lock shared.
    pub fn read(&self) -> RwLockReadGuard<'_, VolumeTable> {
        self.table.read()
    }

    /// Take the lock exclusively.
    pub fn write(&self) -> RwLockWriteGuard<'_, VolumeTable> {
        self.table.write()
    }

    /// Summaries of every volume, copied out of the lock.
    #[must_use]
    pub fn list(&self) -> Vec<VolumeInfo> {
        self.read().list()
    }

    /// Number of volumes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
