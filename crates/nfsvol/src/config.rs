//! Driver configuration.

use std::path::PathBuf;
use std::time::Duration;

use nfsvol_common::DriverPaths;

/// Mounts slower than this are reported. The container runtime gives up on
/// container creation not long after.
pub const DEFAULT_SLOW_MOUNT_THRESHOLD: Duration = Duration::from_secs(8);

/// Driver configuration options.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Mount root and state file locations.
    pub paths: DriverPaths,
    /// Mount duration above which a warning is logged.
    pub slow_mount_threshold: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            paths: DriverPaths::new(),
            slow_mount_threshold: DEFAULT_SLOW_MOUNT_THRESHOLD,
        }
    }
}

impl DriverConfig {
    /// Set the mount root directory.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths = DriverPaths::with_root(root);
        self
    }

    /// Set the slow mount warning threshold.
    #[must_use]
    pub const fn with_slow_mount_threshold(mut self, threshold: Duration) -> Self {
        self.slow_mount_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.slow_mount_threshold, Duration::from_secs(8));
    }

    #[test]
    fn builder_pattern() {
        let config = DriverConfig::default()
            .with_root("/custom/root")
            .with_slow_mount_threshold(Duration::from_secs(2));

        assert_eq!(config.paths.root, PathBuf::from("/custom/root"));
        assert_eq!(config.slow_mount_threshold, Duration::from_secs(2));
    }
}
