//! Shared helpers for driver integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nfsvol::{Driver, DriverConfig, MountOptions, Mounter};
use nfsvol_common::{DriverResult, MountError};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tempfile::TempDir;

/// A [`Mounter`] that records calls instead of mounting anything.
///
/// A target counts as mounted between a successful `mount` and the matching
/// `unmount`, unless [`FakeMounter::lose`] pulled it away in between.
#[derive(Default)]
pub struct FakeMounter {
    mounts: AtomicUsize,
    unmounts: AtomicUsize,
    purges: AtomicUsize,
    mounted: Mutex<HashSet<PathBuf>>,
    delay: Mutex<Duration>,
    slow_sources: Mutex<HashMap<String, Duration>>,
    mount_error: Mutex<Option<MountError>>,
    unmount_error: Mutex<Option<String>>,
}

impl FakeMounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mounts(&self) -> usize {
        self.mounts.load(Ordering::SeqCst)
    }

    pub fn unmounts(&self) -> usize {
        self.unmounts.load(Ordering::SeqCst)
    }

    pub fn purges(&self) -> usize {
        self.purges.load(Ordering::SeqCst)
    }

    /// Delay every subsequent mount.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Delay subsequent mounts of `source` only.
    pub fn set_slow(&self, source: &str, delay: Duration) {
        self.slow_sources.lock().insert(source.to_string(), delay);
    }

    /// Fail every subsequent mount with `err`.
    pub fn fail_mounts(&self, err: MountError) {
        *self.mount_error.lock() = Some(err);
    }

    /// Fail every subsequent unmount with `message`.
    pub fn fail_unmounts(&self, message: &str) {
        *self.unmount_error.lock() = Some(message.to_string());
    }

    /// Let mounts and unmounts succeed again.
    pub fn recover(&self) {
        *self.mount_error.lock() = None;
        *self.unmount_error.lock() = None;
    }

    /// Forget a mount, as if the server dropped it.
    pub fn lose(&self, target: &Path) {
        self.mounted.lock().remove(target);
    }

    /// Pretend `target` is mounted.
    pub fn adopt(&self, target: &Path) {
        self.mounted.lock().insert(target.to_path_buf());
    }

    pub fn is_mounted(&self, target: &Path) -> bool {
        self.mounted.lock().contains(target)
    }
}

#[async_trait]
impl Mounter for FakeMounter {
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        _options: &MountOptions,
    ) -> Result<(), MountError> {
        self.mounts.fetch_add(1, Ordering::SeqCst);

        let delay = self
            .slow_sources
            .lock()
            .get(source)
            .copied()
            .unwrap_or_else(|| *self.delay.lock());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.mount_error.lock().clone() {
            return Err(err);
        }
        self.mounted.lock().insert(target.to_path_buf());
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<(), MountError> {
        self.unmounts.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.unmount_error.lock().clone() {
            return Err(MountError::Failed(message));
        }
        self.mounted.lock().remove(target);
        Ok(())
    }

    async fn check(&self, _name: &str, target: &Path) -> bool {
        self.is_mounted(target)
    }

    async fn purge(&self, _root: &Path) {
        self.purges.fetch_add(1, Ordering::SeqCst);
        self.mounted.lock().clear();
    }
}

/// A driver rooted in a temporary directory.
pub struct Harness {
    pub dir: TempDir,
    pub mounter: Arc<FakeMounter>,
    pub driver: Arc<Driver>,
}

impl Harness {
    pub async fn new() -> DriverResult<Self> {
        let dir = TempDir::new()?;
        let mounter = FakeMounter::new();
        let driver = start(dir.path(), mounter.clone()).await?;
        Ok(Self {
            dir,
            mounter,
            driver: Arc::new(driver),
        })
    }

    /// Start a second driver on the same root, as after a restart.
    pub async fn restart(&self) -> DriverResult<Driver> {
        start(self.dir.path(), self.mounter.clone()).await
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("mounts")
    }

    /// Make the state snapshot unwritable by putting a directory in its place.
    pub fn break_state_file(&self) -> std::io::Result<()> {
        let state = self.root().join("driver-state.json");
        if state.exists() {
            std::fs::remove_file(&state)?;
        }
        std::fs::create_dir(&state)
    }

    /// Undo [`Harness::break_state_file`].
    pub fn repair_state_file(&self) -> std::io::Result<()> {
        std::fs::remove_dir(self.root().join("driver-state.json"))
    }
}

pub async fn start(dir: &Path, mounter: Arc<FakeMounter>) -> DriverResult<Driver> {
    let config = DriverConfig::default().with_root(dir.join("mounts"));
    Driver::new(config, mounter).await
}

/// Create options pointing at a dummy export.
pub fn opts(source: &str) -> Map<String, Value> {
    match json!({ "source": source, "vers": "4.1" }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}
