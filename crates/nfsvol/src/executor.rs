//! Physical mount operations.
//!
//! [`MountExecutor`] wraps a [`Mounter`] with mountpoint directory handling
//! and the error shapes the driver reports. It never touches the registry;
//! callers invoke it with the registry lock released.

use std::path::Path;
use std::sync::Arc;

use nfsvol_common::{DriverError, DriverResult, MountError};

use crate::mounter::Mounter;
use crate::umask::UmaskGuard;
use crate::volume::MountOptions;

/// Runs mounts and unmounts through a [`Mounter`].
#[derive(Clone)]
pub struct MountExecutor {
    mounter: Arc<dyn Mounter>,
}

impl std::fmt::Debug for MountExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountExecutor").finish_non_exhaustive()
    }
}

impl MountExecutor {
    /// Create an executor.
    pub fn new(mounter: Arc<dyn Mounter>) -> Self {
        Self { mounter }
    }

    /// Mount a volume at `target`.
    ///
    /// Creates the target directory first. If the mount fails the directory
    /// is removed again; a failure to remove it is logged and the mount error
    /// is returned.
    ///
    /// # Errors
    ///
    /// Fails if `options` is `None` (a volume restored without its options),
    /// if the directory cannot be created, or if the mounter fails.
    pub async fn mount(
        &self,
        options: Option<&MountOptions>,
        target: &Path,
    ) -> Result<(), MountError> {
        let Some(options) = options else {
            tracing::error!(target = %target.display(), "Unable to extract mount source");
            return Err(MountError::failed("no source information"));
        };

        tracing::info!(
            source = %options.source,
            target = %target.display(),
            "Mounting volume"
        );

        {
            let _umask = UmaskGuard::clear();
            if let Err(e) = std::fs::create_dir_all(target) {
                tracing::error!(target = %target.display(), error = %e, "Failed to create mount directory");
                return Err(e.into());
            }
        }

        let result = self.mounter.mount(&options.source, target, options).await;
        if let Err(e) = &result {
            tracing::error!(target = %target.display(), error = %e, "Mount failed");
            if let Err(rm) = std::fs::remove_dir_all(target) {
                tracing::error!(
                    target = %target.display(),
                    error = %rm,
                    "Failed to remove mount directory"
                );
            }
        }
        result
    }

    /// Unmount volume `name` from `target` and remove the directory.
    ///
    /// # Errors
    ///
    /// Fails if `target` does not exist, if the mounter fails, or if the
    /// directory cannot be removed afterwards.
    pub async fn unmount(&self, name: &str, target: &Path) -> DriverResult<()> {
        let exists = match target.try_exists() {
            Ok(exists) => exists,
            Err(e) => {
                tracing::error!(target = %target.display(), error = %e, "Failed to stat mountpoint");
                true
            }
        };

        if !exists {
            let err = DriverError::MountpointMissing {
                name: name.to_string(),
                path: target.display().to_string(),
            };
            tracing::error!(volume = name, error = %err, "Mountpoint not found");
            return Err(err);
        }

        tracing::info!(volume = name, target = %target.display(), "Unmounting volume");

        self.mounter.unmount(target).await.map_err(|e| {
            tracing::error!(volume = name, error = %e, "Unmount failed");
            DriverError::UnmountFailed(e.to_string())
        })?;

        std::fs::remove_dir_all(target).map_err(|e| {
            tracing::error!(target = %target.display(), error = %e, "Failed to remove mount directory");
            DriverError::RemoveMountpoint(e.to_string())
        })?;

        tracing::info!(volume = name, "Volume unmounted");
        Ok(())
    }

    /// Whether volume `name` is really mounted at `target`.
    pub async fn check(&self, name: &str, target: &Path) -> bool {
        self.mounter.check(name, target).await
    }

    /// Force-clean every mount below `root`.
    pub async fn purge(&self, root: &Path) {
        tracing::info!(root = %root.display(), "Purging mounts");
        self.mounter.purge(root).await;
    }
}
