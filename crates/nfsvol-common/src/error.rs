//! Error types for the nfsvol driver.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`DriverError`].
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors surfaced by driver operations.
///
/// The `Display` output of every variant is the exact message handed back to
/// the container runtime in the `Err` field of a response.
#[derive(Error, Diagnostic, Debug)]
pub enum DriverError {
    /// The request did not name a volume.
    #[error("Missing mandatory 'volume_name'")]
    #[diagnostic(code(nfsvol::request::missing_name))]
    MissingName,

    /// The volume name is not a single plain path component.
    #[error("Invalid volume name '{name}'")]
    #[diagnostic(
        code(nfsvol::request::invalid_name),
        help("Volume names are mounted directly below the mount root and may not contain '/'")
    )]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// Create was called without a string `source` option.
    #[error("Missing mandatory 'source' field in 'Opts'")]
    #[diagnostic(
        code(nfsvol::request::missing_source),
        help("Pass the NFS export as an option, e.g. `-o source=nfsserver:/export`")
    )]
    MissingSource,

    /// Mount was called for a volume that was never created.
    #[error("Volume '{name}' must be created before being mounted")]
    #[diagnostic(code(nfsvol::volume::not_created))]
    NotCreated {
        /// The volume name.
        name: String,
    },

    /// The volume is not known to the driver.
    #[error("Volume '{name}' not found")]
    #[diagnostic(code(nfsvol::volume::not_found))]
    NotFound {
        /// The volume name.
        name: String,
    },

    /// Get was called for an unknown volume.
    #[error("Volume not found")]
    #[diagnostic(code(nfsvol::volume::unknown))]
    Unknown,

    /// The volume has never been assigned a mountpoint.
    #[error("Volume not previously mounted")]
    #[diagnostic(code(nfsvol::volume::not_mounted))]
    NotMounted,

    /// A recorded mount failure, returned verbatim.
    #[error("{0}")]
    #[diagnostic(code(nfsvol::mount::failed))]
    MountFailed(String),

    /// Healing a stale mount failed.
    #[error("Error remounting volume: {0}")]
    #[diagnostic(code(nfsvol::mount::remount_failed))]
    RemountFailed(String),

    /// The mountpoint to unmount is missing from the filesystem.
    #[error("Volume {name} does not exist (path: {path}), nothing to do!")]
    #[diagnostic(code(nfsvol::unmount::missing_mountpoint))]
    MountpointMissing {
        /// The volume name.
        name: String,
        /// The expected mountpoint.
        path: String,
    },

    /// The mounter failed to unmount the volume.
    #[error("Error unmounting volume: {0}")]
    #[diagnostic(code(nfsvol::unmount::failed))]
    UnmountFailed(String),

    /// The mountpoint directory could not be removed after unmounting.
    #[error("Error removing mountpoint: {0}")]
    #[diagnostic(code(nfsvol::unmount::remove_failed))]
    RemoveMountpoint(String),

    /// The state snapshot could not be written.
    #[error("failed to persist state when {action}: {message}")]
    #[diagnostic(
        code(nfsvol::state::persist),
        help("The in-memory registry was updated; the snapshot on disk is stale")
    )]
    PersistState {
        /// The operation in progress (e.g. "mounting").
        action: &'static str,
        /// The underlying failure.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(nfsvol::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(nfsvol::serialization))]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(nfsvol::config))]
    Config {
        /// The error message.
        message: String,
    },
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A failure description that is safe to show to end users.
///
/// Mounters return it when their message has been scrubbed of secrets; it is
/// recorded on the volume in its JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeError {
    /// The user-facing description.
    #[serde(rename = "SafeDescription")]
    pub safe_description: String,
}

impl SafeError {
    /// Create a new safe error.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            safe_description: description.into(),
        }
    }
}

impl std::fmt::Display for SafeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.safe_description)
    }
}

/// Errors reported by a mounter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MountError {
    /// A structured error whose serialized form must reach the caller.
    #[error("{0}")]
    Safe(SafeError),

    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

impl MountError {
    /// Create a plain failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// The form recorded as a volume's last mount error.
    ///
    /// Safe errors are kept as their JSON encoding, everything else as its
    /// message.
    #[must_use]
    pub fn recorded(&self) -> String {
        match self {
            Self::Safe(safe) => serde_json::to_string(safe).unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to marshal safe error");
                safe.safe_description.clone()
            }),
            Self::Failed(message) => message.clone(),
        }
    }
}

impl From<std::io::Error> for MountError {
    fn from(err: std::io::Error) -> Self {
        Self::Failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = DriverError::NotCreated {
            name: "v1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Volume 'v1' must be created before being mounted"
        );
        assert_eq!(
            DriverError::MissingName.to_string(),
            "Missing mandatory 'volume_name'"
        );
        assert_eq!(DriverError::Unknown.to_string(), "Volume not found");
        assert_eq!(
            DriverError::InvalidName {
                name: "/etc".to_string()
            }
            .to_string(),
            "Invalid volume name '/etc'"
        );
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DriverError = io_err.into();
        assert!(matches!(err, DriverError::Io(_)));
    }

    #[test]
    fn safe_error_recorded_as_json() {
        let err = MountError::Safe(SafeError::new("access denied"));
        insta::assert_snapshot!(err.recorded(), @r#"{"SafeDescription":"access denied"}"#);
    }

    #[test]
    fn plain_error_recorded_as_message() {
        let err = MountError::failed("mount.nfs: Connection timed out");
        assert_eq!(err.recorded(), "mount.nfs: Connection timed out");
    }
}
