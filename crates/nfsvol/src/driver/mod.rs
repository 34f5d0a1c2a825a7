//! The volume driver.
//!
//! [`Driver`] implements the volume lifecycle: create, mount, path,
//! unmount, remove, get, list and drain. Bookkeeping happens under the
//! registry lock and is persisted before the lock is released; physical
//! mounts and unmounts always run with the lock released so a slow NFS
//! server only ever delays callers of its own volume.

mod inflight;
mod mount;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nfsvol_common::{DriverError, DriverPaths, DriverResult};
use serde_json::{Map, Value};

use crate::config::DriverConfig;
use crate::executor::MountExecutor;
use crate::mounter::Mounter;
use crate::protocol::{Capabilities, Scope};
use crate::registry::{Registry, VolumeTable};
use crate::signal::MountSignal;
use crate::state::StateStore;
use crate::umask::UmaskGuard;
use crate::volume::{MountOptions, Volume, VolumeInfo};

use inflight::InFlight;

/// NFS volume driver.
#[derive(Debug)]
pub struct Driver {
    paths: DriverPaths,
    slow_mount_threshold: Duration,
    registry: Registry,
    state: StateStore,
    executor: MountExecutor,
}

impl Driver {
    /// Start the driver.
    ///
    /// Resolves and creates the mount root, restores the registry from the
    /// state snapshot and evicts every restored volume that is no longer
    /// mounted.
    ///
    /// # Errors
    ///
    /// Fails if the mount root cannot be resolved or created. There is no
    /// sensible fallback location, so callers should abort startup.
    pub async fn new(config: DriverConfig, mounter: Arc<dyn Mounter>) -> DriverResult<Self> {
        let paths = config.paths.resolve().map_err(|e| DriverError::Config {
            message: format!("cannot resolve mount root: {e}"),
        })?;

        {
            let _umask = UmaskGuard::clear();
            std::fs::create_dir_all(&paths.root).map_err(|e| DriverError::Config {
                message: format!("cannot create mount root {}: {e}", paths.root.display()),
            })?;
        }

        let state = StateStore::new(&paths);
        let registry = Registry::from_snapshot(state.restore());

        let driver = Self {
            paths,
            slow_mount_threshold: config.slow_mount_threshold,
            registry,
            state,
            executor: MountExecutor::new(mounter),
        };
        driver.prune_stale().await;

        tracing::info!(
            root = %driver.paths.root.display(),
            volumes = driver.registry.len(),
            "Driver started"
        );

        Ok(driver)
    }

    /// Plugin interfaces implemented by the driver.
    #[must_use]
    pub fn activate(&self) -> Vec<String> {
        vec!["VolumeDriver".to_string()]
    }

    /// Driver capabilities. Volumes are always local to this host.
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        Capabilities { scope: Scope::Local }
    }

    /// Create a volume, or replace the options of an existing one.
    ///
    /// An existing volume keeps its mountpoint and mount count.
    ///
    /// # Errors
    ///
    /// Fails on a missing name or `source` option, or if the state cannot be
    /// persisted. In the latter case the volume is still registered.
    pub fn create(&self, name: &str, opts: Map<String, Value>) -> DriverResult<()> {
        validate_name(name)?;

        let options = MountOptions::from_opts(opts).inspect_err(|_| {
            tracing::info!(volume = name, "Mount config missing source");
        })?;

        let mut table = self.registry.write();
        if let Some(existing) = table.get_mut(name) {
            tracing::info!(volume = name, source = %options.source, "Updating volume options");
            existing.options = Some(options);
        } else {
            tracing::info!(volume = name, source = %options.source, "Creating volume");
            table.upsert(name, Volume::new(name, options));
        }

        self.persist(&table, "creating")
    }

    /// Mountpoint of a mounted volume.
    ///
    /// # Errors
    ///
    /// Fails if the volume does not exist or was never mounted.
    pub fn path(&self, name: &str) -> DriverResult<PathBuf> {
        validate_name(name)?;

        let table = self.registry.read();
        let volume = table.get(name).ok_or_else(|| {
            tracing::error!(volume = name, "No such volume");
            not_found(name)
        })?;

        if !volume.info.has_mountpoint() {
            tracing::error!(volume = name, "Mountpoint not assigned");
            return Err(DriverError::NotMounted);
        }

        Ok(volume.info.mountpoint.clone())
    }

    /// Release one mount of a volume.
    ///
    /// The last holder physically unmounts the volume before the count is
    /// dropped; if that fails the count is left untouched. Once the count
    /// drops below one the volume is removed from the registry.
    ///
    /// # Errors
    ///
    /// Fails if the volume does not exist or was never mounted, if the
    /// physical unmount fails, or if the state cannot be persisted.
    pub async fn unmount(&self, name: &str) -> DriverResult<()> {
        validate_name(name)?;

        loop {
            let step = {
                let mut table = self.registry.write();
                let volume = table.get_mut(name).ok_or_else(|| {
                    tracing::error!(volume = name, "No such volume");
                    not_found(name)
                })?;

                if !volume.info.has_mountpoint() {
                    tracing::error!(volume = name, "Mountpoint not assigned");
                    return Err(DriverError::NotMounted);
                }

                if volume.signal.is_pending() {
                    Step::Wait(volume.signal.clone())
                } else if volume.info.mount_count == 1 && !volume.mount_failed() {
                    // Last holder of a live mount.
                    let signal = volume.arm();
                    let target = volume.info.mountpoint.clone();
                    Step::Unmount(target, InFlight::unmount(&self.registry, name, signal))
                } else {
                    release(&mut table, name);
                    return self.persist(&table, "unmounting");
                }
            };

            let (target, inflight) = match step {
                Step::Wait(signal) => {
                    signal.wait().await;
                    continue;
                }
                Step::Unmount(target, inflight) => (target, inflight),
            };

            if let Err(e) = self.executor.unmount(name, &target).await {
                inflight.finish();
                return Err(e);
            }

            let result = {
                let mut table = self.registry.write();
                release(&mut table, name);
                self.persist(&table, "unmounting")
            };
            inflight.finish();
            return result;
        }
    }

    /// Remove a volume, unmounting it first if it has a mountpoint.
    ///
    /// Removing an unknown volume succeeds.
    ///
    /// # Errors
    ///
    /// Fails if the physical unmount fails or the state cannot be persisted.
    pub async fn remove(&self, name: &str) -> DriverResult<()> {
        validate_name(name)?;

        loop {
            let step = {
                let mut table = self.registry.write();
                let Some(volume) = table.get_mut(name) else {
                    tracing::warn!(volume = name, "Volume not found, nothing to remove");
                    return Ok(());
                };

                if volume.signal.is_pending() {
                    Step::Wait(volume.signal.clone())
                } else if volume.info.has_mountpoint() && !volume.mount_failed() {
                    let signal = volume.arm();
                    let target = volume.info.mountpoint.clone();
                    Step::Unmount(target, InFlight::unmount(&self.registry, name, signal))
                } else {
                    tracing::info!(volume = name, "Removing volume");
                    table.delete(name);
                    return self.persist(&table, "removing");
                }
            };

            let (target, inflight) = match step {
                Step::Wait(signal) => {
                    signal.wait().await;
                    continue;
                }
                Step::Unmount(target, inflight) => (target, inflight),
            };

            if let Err(e) = self.executor.unmount(name, &target).await {
                inflight.finish();
                return Err(e);
            }

            tracing::info!(volume = name, "Removing volume");
            let result = {
                let mut table = self.registry.write();
                table.delete(name);
                self.persist(&table, "removing")
            };
            inflight.finish();
            return result;
        }
    }

    /// Name and mountpoint of a volume.
    ///
    /// # Errors
    ///
    /// Fails if the volume does not exist.
    pub fn get(&self, name: &str) -> DriverResult<VolumeInfo> {
        validate_name(name)?;
        let table = self.registry.read();
        let volume = table.get(name).ok_or(DriverError::Unknown)?;
        tracing::debug!(volume = name, "Getting volume");
        Ok(volume.info.clone())
    }

    /// Every known volume.
    #[must_use]
    pub fn list(&self) -> Vec<VolumeInfo> {
        self.registry.list()
    }

    /// Unmount and forget every volume, then purge the mount root.
    ///
    /// Failures are logged and never stop the drain.
    pub async fn drain(&self) {
        tracing::info!("Draining volumes");

        let volumes = self.registry.write().take_all();
        for volume in volumes {
            volume.signal.wait().await;
            if volume.info.has_mountpoint() && volume.info.mount_count > 0 {
                if let Err(e) = self
                    .executor
                    .unmount(volume.name(), &volume.info.mountpoint)
                    .await
                {
                    tracing::error!(
                        volume = %volume.name(),
                        mountpoint = %volume.info.mountpoint.display(),
                        error = %e,
                        "Drain unmount failed"
                    );
                }
            }
        }

        {
            let table = self.registry.write();
            if let Err(e) = self.persist(&table, "draining") {
                tracing::warn!(error = %e, "Drained state not persisted");
            }
        }

        self.executor.purge(&self.paths.root).await;
        tracing::info!("Drain complete");
    }

    /// Evict restored volumes that are no longer mounted.
    async fn prune_stale(&self) {
        let restored: Vec<(String, PathBuf)> = self
            .registry
            .read()
            .snapshot()
            .into_iter()
            .map(|(name, info)| (name, info.mountpoint))
            .collect();

        let mut evicted = Vec::new();
        for (name, mountpoint) in restored {
            if !self.executor.check(&name, &mountpoint).await {
                tracing::info!(volume = %name, "Evicting stale volume");
                evicted.push(name);
            }
        }

        if evicted.is_empty() {
            return;
        }

        let mut table = self.registry.write();
        for name in &evicted {
            table.delete(name);
        }
        if let Err(e) = self.persist(&table, "pruning") {
            tracing::warn!(error = %e, "Pruned state not persisted");
        }
    }

    /// Write the snapshot. Must be called with the registry lock held.
    fn persist(&self, table: &VolumeTable, action: &'static str) -> DriverResult<()> {
        self.state.save(&table.snapshot()).map_err(|e| {
            tracing::error!(action, error = %e, "Failed to persist driver state");
            DriverError::PersistState {
                action,
                message: e.to_string(),
            }
        })
    }

    /// Where a volume is mounted.
    fn mount_path(&self, name: &str) -> PathBuf {
        self.paths.mount_path(name)
    }
}

/// Next action of an unmount or remove attempt.
enum Step<'a> {
    /// Another physical operation is in flight; retry once it completes.
    Wait(MountSignal),
    /// This caller unmounts the target.
    Unmount(PathBuf, InFlight<'a>),
}

/// Drop one mount reference, deleting the volume when none remain.
fn release(table: &mut VolumeTable, name: &str) {
    let Some(volume) = table.get_mut(name) else {
        return;
    };
    volume.info.mount_count = volume.info.mount_count.saturating_sub(1);
    tracing::info!(volume = name, count = volume.info.mount_count, "Volume released");
    if volume.info.mount_count < 1 {
        table.delete(name);
    }
}

fn validate_name(name: &str) -> DriverResult<()> {
    if name.is_empty() {
        return Err(DriverError::MissingName);
    }
    if !DriverPaths::is_volume_name(name) {
        tracing::error!(volume = name, "Invalid volume name");
        return Err(DriverError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn not_found(name: &str) -> DriverError {
    DriverError::NotFound {
        name: name.to_string(),
    }
}
