//! Volume records.
//!
//! A [`Volume`] is the registry entry for one named NFS volume. Only its
//! [`VolumeInfo`] is persisted; the mount options may carry credentials and
//! are kept in memory only.

use std::collections::BTreeMap;
use std::path::PathBuf;

use nfsvol_common::{DriverError, DriverResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::signal::MountSignal;

/// The persisted, user-visible part of a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeInfo {
    /// Volume name.
    pub name: String,
    /// Where the volume is mounted; empty until the first mount.
    pub mountpoint: PathBuf,
    /// Number of active mount holders.
    pub mount_count: u32,
}

impl VolumeInfo {
    /// Info for a freshly created, unmounted volume.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Whether a mountpoint has been assigned.
    #[must_use]
    pub fn has_mountpoint(&self) -> bool {
        !self.mountpoint.as_os_str().is_empty()
    }
}

/// Options a volume is mounted with.
///
/// `source` is the NFS export (`server:/path`). Every other option given at
/// create time is handed to the mounter untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountOptions {
    /// The NFS export to mount.
    pub source: String,
    /// Remaining options, passed through verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl MountOptions {
    /// Options with a source and nothing else.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            extra: BTreeMap::new(),
        }
    }

    /// Add a pass-through option.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Build options from the untyped map of a create request.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::MissingSource`] if `source` is absent or not a
    /// string.
    pub fn from_opts(opts: Map<String, Value>) -> DriverResult<Self> {
        let mut extra: BTreeMap<String, Value> = opts.into_iter().collect();
        match extra.remove("source") {
            Some(Value::String(source)) => Ok(Self { source, extra }),
            _ => Err(DriverError::MissingSource),
        }
    }
}

/// A registry entry.
#[derive(Debug, Clone)]
pub struct Volume {
    /// Persisted information.
    pub info: VolumeInfo,
    /// Mount options; `None` for volumes restored from a snapshot.
    pub options: Option<MountOptions>,
    /// Recorded form of the last mount failure.
    pub last_mount_error: Option<String>,
    /// Failure of the latest remount. Cleared when the next operation is
    /// armed, so a later mount retries the remount.
    pub remount_error: Option<String>,
    /// Completion signal of the physical operation in flight, if any.
    pub signal: MountSignal,
    /// Bumped every time a physical operation is started on the volume.
    pub generation: u64,
}

impl Volume {
    /// A newly created volume.
    #[must_use]
    pub fn new(name: impl Into<String>, options: MountOptions) -> Self {
        Self {
            info: VolumeInfo::new(name),
            options: Some(options),
            last_mount_error: None,
            remount_error: None,
            signal: MountSignal::fired(),
            generation: 0,
        }
    }

    /// A volume restored from persisted info.
    #[must_use]
    pub fn restored(info: VolumeInfo) -> Self {
        Self {
            info,
            options: None,
            last_mount_error: None,
            remount_error: None,
            signal: MountSignal::fired(),
            generation: 0,
        }
    }

    /// Volume name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Whether the volume is known not to be mounted because its mount or
    /// latest remount failed.
    #[must_use]
    pub const fn mount_failed(&self) -> bool {
        self.last_mount_error.is_some() || self.remount_error.is_some()
    }

    /// Arm a fresh signal for a new physical operation and return it.
    pub fn arm(&mut self) -> MountSignal {
        self.signal = MountSignal::armed();
        self.generation += 1;
        self.remount_error = None;
        self.signal.clone()
    }
}
