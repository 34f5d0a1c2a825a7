//! Kernel NFS mounts.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nfsvol_common::MountError;
use serde_json::Value;
use tokio::process::Command;

use super::Mounter;
use crate::volume::MountOptions;

/// Mount table of the current process.
const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Mounts NFS exports through the system `mount` helper and unmounts them
/// with `umount2(2)`.
#[derive(Debug, Clone)]
pub struct NfsMounter {
    /// The mount helper binary.
    command: PathBuf,
    /// Filesystem type passed to `mount -t`.
    fstype: String,
}

impl Default for NfsMounter {
    fn default() -> Self {
        Self {
            command: PathBuf::from("mount"),
            fstype: "nfs".to_string(),
        }
    }
}

impl NfsMounter {
    /// Create a mounter using `mount -t nfs`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different mount helper.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<PathBuf>) -> Self {
        self.command = command.into();
        self
    }

    /// Use a different filesystem type (e.g. `nfs4`).
    #[must_use]
    pub fn with_fstype(mut self, fstype: impl Into<String>) -> Self {
        self.fstype = fstype.into();
        self
    }

    /// Arguments for the mount helper.
    fn mount_args(&self, source: &str, target: &Path, options: &MountOptions) -> Vec<String> {
        let mut args = vec!["-t".to_string(), self.fstype.clone()];
        if let Some(data) = render_options(options) {
            args.push("-o".to_string());
            args.push(data);
        }
        args.push(source.to_string());
        args.push(target.display().to_string());
        args
    }

    async fn unmount_with(
        target: &Path,
        flags: rustix::mount::UnmountFlags,
    ) -> Result<(), MountError> {
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || rustix::mount::unmount(target.as_path(), flags))
            .await
            .map_err(|e| MountError::failed(format!("unmount task failed: {e}")))?
            .map_err(|e| MountError::Failed(std::io::Error::from(e).to_string()))
    }
}

#[async_trait]
impl Mounter for NfsMounter {
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        options: &MountOptions,
    ) -> Result<(), MountError> {
        let args = self.mount_args(source, target, options);

        tracing::debug!(
            command = %self.command.display(),
            ?args,
            "Mounting NFS export"
        );

        let output = Command::new(&self.command)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                MountError::failed(format!(
                    "Failed to execute {}: {e}",
                    self.command.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MountError::failed(format!(
                "mount failed with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<(), MountError> {
        tracing::debug!(target = %target.display(), "Unmounting NFS export");
        Self::unmount_with(target, rustix::mount::UnmountFlags::empty()).await
    }

    async fn check(&self, name: &str, target: &Path) -> bool {
        match tokio::fs::read_to_string(PROC_MOUNTS).await {
            Ok(table) => {
                let mounted = mount_points(&table).iter().any(|p| p == target);
                if !mounted {
                    tracing::info!(volume = name, target = %target.display(), "Volume is not mounted");
                }
                mounted
            }
            Err(e) => {
                tracing::warn!(volume = name, error = %e, "Failed to read mount table");
                false
            }
        }
    }

    async fn purge(&self, root: &Path) {
        use rustix::mount::UnmountFlags;

        let table = match tokio::fs::read_to_string(PROC_MOUNTS).await {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read mount table, skipping purge");
                return;
            }
        };

        // Deepest first so nested mounts go before their parents.
        let mut stale: Vec<PathBuf> = mount_points(&table)
            .into_iter()
            .filter(|p| p != root && p.starts_with(root))
            .collect();
        stale.sort_by_key(|p| std::cmp::Reverse(p.components().count()));

        for target in stale {
            if let Err(e) =
                Self::unmount_with(&target, UnmountFlags::FORCE | UnmountFlags::DETACH).await
            {
                tracing::warn!(target = %target.display(), error = %e, "Failed to purge mount");
                continue;
            }
            // Only empty directories: never recurse into something that may still be mounted.
            if let Err(e) = tokio::fs::remove_dir(&target).await {
                tracing::warn!(target = %target.display(), error = %e, "Failed to remove purged mountpoint");
            }
            tracing::info!(target = %target.display(), "Purged mount");
        }
    }
}

/// Render pass-through options as a `-o` argument.
///
/// `true` becomes a bare flag, `false` and `null` are dropped, everything
/// else is `key=value`.
fn render_options(options: &MountOptions) -> Option<String> {
    let parts: Vec<String> = options
        .extra
        .iter()
        .filter_map(|(key, value)| match value {
            Value::Bool(true) => Some(key.clone()),
            Value::Bool(false) | Value::Null => None,
            Value::String(s) => Some(format!("{key}={s}")),
            other => Some(format!("{key}={other}")),
        })
        .collect();

    (!parts.is_empty()).then(|| parts.join(","))
}

/// Mount points listed in a `/proc/mounts` style table.
#[must_use]
pub fn mount_points(table: &str) -> Vec<PathBuf> {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(unescape(field)))
        .collect()
}

/// Decode the octal escapes (`\040` etc.) the kernel uses in mount tables.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                out.push(digits.iter().fold(0u8, |acc, d| acc * 8 + (d - b'0')));
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
nfsserver:/export /var/lib/nfsvol/mounts/v1 nfs rw,relatime,vers=3 0 0
nfsserver:/other /var/lib/nfsvol/mounts/with\\040space nfs4 rw 0 0
";

    #[test]
    fn parses_mount_points() {
        let points = mount_points(TABLE);
        assert_eq!(points.len(), 3);
        assert_eq!(points[1], PathBuf::from("/var/lib/nfsvol/mounts/v1"));
        assert_eq!(points[2], PathBuf::from("/var/lib/nfsvol/mounts/with space"));
    }

    #[test]
    fn unescape_leaves_plain_text() {
        assert_eq!(unescape("/mnt/plain"), "/mnt/plain");
        assert_eq!(unescape("/mnt/trailing\\"), "/mnt/trailing\\");
    }

    #[test]
    fn renders_options() {
        let options = MountOptions::new("srv:/a")
            .with("vers", "4.1")
            .with("ro", true)
            .with("hard", false)
            .with("timeo", 600);
        assert_eq!(
            render_options(&options).as_deref(),
            Some("ro,timeo=600,vers=4.1")
        );
        assert_eq!(render_options(&MountOptions::new("srv:/a")), None);
    }

    #[test]
    fn mount_args_layout() {
        let mounter = NfsMounter::new().with_fstype("nfs4");
        let options = MountOptions::new("srv:/a").with("vers", "4.1");
        let args = mounter.mount_args("srv:/a", Path::new("/mnt/v1"), &options);
        assert_eq!(args, ["-t", "nfs4", "-o", "vers=4.1", "srv:/a", "/mnt/v1"]);
    }
}
