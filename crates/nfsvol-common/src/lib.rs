//! # nfsvol-common
//!
//! Shared types for the nfsvol volume driver:
//! - Error types
//! - Standard filesystem paths

#![warn(missing_docs)]

pub mod error;
pub mod paths;

pub use error::{DriverError, DriverResult, MountError, SafeError};
pub use paths::DriverPaths;
