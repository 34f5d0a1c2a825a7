//! Registry snapshot persistence.
//!
//! The snapshot is a single JSON object, name → `{Name, Mountpoint,
//! MountCount}`, stored as `driver-state.json` in the mount root. It is
//! rewritten in full after every mutation; there is no journal, so a crash
//! mid-write can leave a truncated file. Loading tolerates that by starting
//! empty.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nfsvol_common::{DriverPaths, DriverResult};

use crate::umask::UmaskGuard;
use crate::volume::VolumeInfo;

/// Reads and writes the registry snapshot.
#[derive(Debug, Clone)]
pub struct StateStore {
    /// Directory holding the snapshot.
    root: PathBuf,
    /// Snapshot file.
    path: PathBuf,
}

impl StateStore {
    /// Create a store for the given paths.
    #[must_use]
    pub fn new(paths: &DriverPaths) -> Self {
        Self {
            root: paths.root.clone(),
            path: paths.state_file(),
        }
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot, replacing the previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be encoded or written.
    pub fn save(&self, volumes: &BTreeMap<String, VolumeInfo>) -> DriverResult<()> {
        let _umask = UmaskGuard::clear();

        std::fs::create_dir_all(&self.root)?;

        let json = serde_json::to_vec(volumes)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o777)
            .open(&self.path)?;
        file.write_all(&json)?;

        tracing::debug!(
            path = %self.path.display(),
            volumes = volumes.len(),
            "Saved driver state"
        );

        Ok(())
    }

    /// Read the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(&self) -> DriverResult<BTreeMap<String, VolumeInfo>> {
        let json = std::fs::read(&self.path)?;
        let volumes: BTreeMap<String, VolumeInfo> = serde_json::from_slice(&json)?;

        tracing::debug!(
            path = %self.path.display(),
            volumes = volumes.len(),
            "Loaded driver state"
        );

        Ok(volumes)
    }

    /// Read the snapshot, falling back to an empty one on any failure.
    #[must_use]
    pub fn restore(&self) -> BTreeMap<String, VolumeInfo> {
        match self.load() {
            Ok(volumes) => {
                tracing::info!(
                    path = %self.path.display(),
                    volumes = volumes.len(),
                    "Driver state restored"
                );
                volumes
            }
            Err(e) => {
                tracing::info!(
                    path = %self.path.display(),
                    error = %e,
                    "Starting with empty driver state"
                );
                BTreeMap::new()
            }
        }
    }
}
