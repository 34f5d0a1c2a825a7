//! Standard filesystem paths for nfsvol.

use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;

/// Name of the state snapshot inside the mount root.
pub const STATE_FILE_NAME: &str = "driver-state.json";

/// Default mount root directory.
pub static NFSVOL_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("NFSVOL_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/nfsvol/mounts"))
});

/// Paths used by the driver.
///
/// Every volume is mounted directly below the root, and the state snapshot
/// lives next to the mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverPaths {
    /// Mount root directory.
    pub root: PathBuf,
}

impl DriverPaths {
    /// Create paths with the default root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the root to an absolute path.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn resolve(self) -> std::io::Result<Self> {
        let root = std::path::absolute(&self.root)?;
        Ok(Self { root })
    }

    /// Mountpoint for a volume. Depends on the name only.
    ///
    /// Root, parent and current-directory components of `name` are dropped,
    /// so the result always stays below the root.
    #[must_use]
    pub fn mount_path(&self, name: &str) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(
            Path::new(name)
                .components()
                .filter(|c| matches!(c, Component::Normal(_))),
        );
        path
    }

    /// Whether `name` can be used as a volume name.
    ///
    /// A volume name must be a single plain path component and must not
    /// collide with the state snapshot.
    #[must_use]
    pub fn is_volume_name(name: &str) -> bool {
        let mut components = Path::new(name).components();
        matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(first)), None) if first == name
        ) && name != STATE_FILE_NAME
    }

    /// State snapshot file.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.root.join(STATE_FILE_NAME)
    }
}

impl Default for DriverPaths {
    fn default() -> Self {
        Self {
            root: NFSVOL_ROOT.clone(),
        }
    }
}
