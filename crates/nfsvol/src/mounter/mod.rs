//! The mount capability the driver delegates physical work to.

mod nfs;

use std::path::Path;

use async_trait::async_trait;
use nfsvol_common::MountError;

use crate::volume::MountOptions;

pub use nfs::{NfsMounter, mount_points};

/// Performs physical mounts.
///
/// Implementations must tolerate concurrent calls for different targets; the
/// driver never issues two overlapping mounts for the same target.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Mount `source` on `target`. The target directory already exists.
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        options: &MountOptions,
    ) -> Result<(), MountError>;

    /// Unmount `target`.
    async fn unmount(&self, target: &Path) -> Result<(), MountError>;

    /// Whether volume `name` is currently mounted at `target`.
    async fn check(&self, name: &str, target: &Path) -> bool;

    /// Force-unmount everything below `root`. Best effort.
    async fn purge(&self, root: &Path);
}
