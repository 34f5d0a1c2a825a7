//! # nfsvol
//!
//! Core of an NFS volume driver for container runtimes.
//!
//! The driver maps volume names to NFS mounts under a single mount root.
//! Mounts are reference counted, concurrent mounts of the same volume are
//! collapsed into one physical mount, and the registry is checkpointed to
//! disk after every change so a restarted driver picks up where it left off.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use nfsvol::{Driver, DriverConfig, NfsMounter};
//! use serde_json::{Map, Value};
//!
//! # async fn example() -> nfsvol_common::DriverResult<()> {
//! let driver = Driver::new(DriverConfig::default(), Arc::new(NfsMounter::new())).await?;
//!
//! let mut opts = Map::new();
//! opts.insert("source".into(), Value::from("nfsserver:/export"));
//! driver.create("shared", opts)?;
//!
//! let mountpoint = driver.mount("shared").await?;
//! println!("mounted at {}", mountpoint.display());
//!
//! driver.unmount("shared").await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod driver;
pub mod executor;
pub mod mounter;
pub mod protocol;
pub mod registry;
pub mod signal;
pub mod state;
pub mod umask;
pub mod volume;

pub use config::DriverConfig;
pub use driver::Driver;
pub use mounter::{Mounter, NfsMounter};
pub use volume::{MountOptions, Volume, VolumeInfo};
