//! Integration tests for the volume lifecycle.

mod support;

use std::collections::BTreeMap;
use std::error::Error;

use nfsvol::VolumeInfo;
use nfsvol_common::{DriverError, MountError, SafeError};
use serde_json::Map;

use support::{Harness, opts};

fn read_state(h: &Harness) -> Result<BTreeMap<String, VolumeInfo>, Box<dyn Error>> {
    let data = std::fs::read(h.root().join("driver-state.json"))?;
    Ok(serde_json::from_slice(&data)?)
}

#[test_log::test(tokio::test)]
async fn test_create_mount_get_unmount() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;

    h.driver.create("v1", opts("nfsserver:/export/v1"))?;
    let mountpoint = h.driver.mount("v1").await?;
    assert_eq!(mountpoint, h.root().join("v1"));
    assert!(mountpoint.is_dir());

    let info = h.driver.get("v1")?;
    assert_eq!(info.mountpoint, mountpoint);
    assert_eq!(info.mount_count, 1);
    assert_eq!(h.driver.path("v1")?, mountpoint);

    h.driver.unmount("v1").await?;
    assert!(!mountpoint.exists());
    assert!(matches!(
        h.driver.path("v1"),
        Err(DriverError::NotFound { .. })
    ));

    assert_eq!(h.mounter.mounts(), 1);
    assert_eq!(h.mounter.unmounts(), 1);
    Ok(())
}

#[tokio::test]
async fn test_create_is_idempotent() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;

    h.driver.create("v1", opts("nfsserver:/export/v1"))?;
    let mountpoint = h.driver.mount("v1").await?;
    h.driver.create("v1", opts("nfsserver:/export/other"))?;

    let info = h.driver.get("v1")?;
    assert_eq!(info.mount_count, 1);
    assert_eq!(info.mountpoint, mountpoint);
    assert_eq!(h.driver.list().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_create_requires_name_and_source() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;

    assert!(matches!(
        h.driver.create("", opts("nfsserver:/export")),
        Err(DriverError::MissingName)
    ));
    let err = h.driver.create("v1", Map::new()).unwrap_err();
    assert_eq!(err.to_string(), "Missing mandatory 'source' field in 'Opts'");
    assert!(h.driver.list().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_names_stay_below_mount_root() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;

    for name in ["/tmp/escape", "../escape", "a/b", "driver-state.json"] {
        let err = h.driver.create(name, opts("nfsserver:/export")).unwrap_err();
        assert_eq!(err.to_string(), format!("Invalid volume name '{name}'"));
        assert!(matches!(
            h.driver.mount(name).await,
            Err(DriverError::InvalidName { .. })
        ));
    }

    assert!(h.driver.list().is_empty());
    assert_eq!(h.mounter.mounts(), 0);
    Ok(())
}

#[tokio::test]
async fn test_get_unknown_volume() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;

    let err = h.driver.get("ghost").unwrap_err();
    assert_eq!(err.to_string(), "Volume not found");
    Ok(())
}

#[tokio::test]
async fn test_mount_unknown_volume() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;

    let err = h.driver.mount("ghost").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Volume 'ghost' must be created before being mounted"
    );
    assert_eq!(h.mounter.mounts(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unmount_absent_volume() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;

    assert!(matches!(
        h.driver.unmount("ghost").await,
        Err(DriverError::NotFound { .. })
    ));

    h.driver.create("v1", opts("nfsserver:/export/v1"))?;
    let err = h.driver.unmount("v1").await.unwrap_err();
    assert_eq!(err.to_string(), "Volume not previously mounted");

    assert_eq!(h.mounter.unmounts(), 0);
    Ok(())
}

#[tokio::test]
async fn test_refcount_unmounts_once() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;
    h.driver.create("v1", opts("nfsserver:/export/v1"))?;

    for _ in 0..3 {
        h.driver.mount("v1").await?;
    }
    assert_eq!(h.driver.get("v1")?.mount_count, 3);
    assert_eq!(h.mounter.mounts(), 1);

    h.driver.unmount("v1").await?;
    h.driver.unmount("v1").await?;
    assert_eq!(h.mounter.unmounts(), 0);
    assert_eq!(h.driver.get("v1")?.mount_count, 1);

    h.driver.unmount("v1").await?;
    assert_eq!(h.mounter.unmounts(), 1);
    assert!(h.driver.list().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unmount_failure_keeps_count() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;
    h.driver.create("v1", opts("nfsserver:/export/v1"))?;
    h.driver.mount("v1").await?;

    h.mounter.fail_unmounts("device is busy");
    let err = h.driver.unmount("v1").await.unwrap_err();
    assert_eq!(err.to_string(), "Error unmounting volume: device is busy");
    assert_eq!(h.driver.get("v1")?.mount_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_remove() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;

    h.driver.remove("ghost").await?;

    h.driver.create("idle", opts("nfsserver:/export/idle"))?;
    h.driver.remove("idle").await?;
    assert_eq!(h.mounter.unmounts(), 0);

    h.driver.create("busy", opts("nfsserver:/export/busy"))?;
    let mountpoint = h.driver.mount("busy").await?;
    h.driver.remove("busy").await?;
    assert_eq!(h.mounter.unmounts(), 1);
    assert!(!mountpoint.exists());

    assert!(h.driver.list().is_empty());
    assert!(read_state(&h)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_state_survives_restart() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;
    h.driver.create("v1", opts("nfsserver:/export/v1"))?;
    h.driver.create("v2", opts("nfsserver:/export/v2"))?;
    let mountpoint = h.driver.mount("v1").await?;
    h.driver.mount("v1").await?;

    let state = read_state(&h)?;
    assert_eq!(state["v1"].mount_count, 2);
    assert_eq!(state["v1"].mountpoint, mountpoint);
    assert_eq!(state["v2"].mount_count, 0);

    let restarted = h.restart().await?;
    let info = restarted.get("v1")?;
    assert_eq!(info.mountpoint, mountpoint);
    assert_eq!(info.mount_count, 2);

    // Never mounted, so nothing to keep.
    assert!(matches!(restarted.get("v2"), Err(DriverError::Unknown)));
    assert!(!read_state(&h)?.contains_key("v2"));
    Ok(())
}

#[tokio::test]
async fn test_restart_prunes_lost_mounts() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;
    h.driver.create("kept", opts("nfsserver:/export/kept"))?;
    h.driver.create("lost", opts("nfsserver:/export/lost"))?;
    h.driver.mount("kept").await?;
    let lost = h.driver.mount("lost").await?;

    h.mounter.lose(&lost);

    let restarted = h.restart().await?;
    let names: Vec<_> = restarted.list().into_iter().map(|v| v.name).collect();
    assert_eq!(names, vec!["kept".to_string()]);
    assert_eq!(read_state(&h)?.keys().collect::<Vec<_>>(), vec!["kept"]);
    Ok(())
}

#[tokio::test]
async fn test_restored_volume_cannot_remount_without_options() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;
    h.driver.create("v1", opts("nfsserver:/export/v1"))?;
    let mountpoint = h.driver.mount("v1").await?;

    let restarted = h.restart().await?;
    h.mounter.lose(&mountpoint);

    let err = restarted.mount("v1").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Error remounting volume: no source information"
    );
    Ok(())
}

#[tokio::test]
async fn test_failed_remount_is_retried() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;
    h.driver.create("v1", opts("nfsserver:/export/v1"))?;
    let mountpoint = h.driver.mount("v1").await?;

    h.mounter.lose(&mountpoint);
    h.mounter.fail_mounts(MountError::failed("server down"));
    let err = h.driver.mount("v1").await.unwrap_err();
    assert_eq!(err.to_string(), "Error remounting volume: server down");
    assert_eq!(h.mounter.mounts(), 2);

    h.mounter.recover();
    assert_eq!(h.driver.mount("v1").await?, mountpoint);
    assert_eq!(h.mounter.mounts(), 3);
    assert!(h.mounter.is_mounted(&mountpoint));
    assert_eq!(h.driver.get("v1")?.mount_count, 3);

    for _ in 0..3 {
        h.driver.unmount("v1").await?;
    }
    assert_eq!(h.mounter.unmounts(), 1);
    assert!(h.driver.list().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_failed_mount_keeps_reservation() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;
    h.driver.create("v1", opts("nfsserver:/export/v1"))?;

    h.mounter
        .fail_mounts(MountError::failed("mount.nfs: Connection timed out"));
    let err = h.driver.mount("v1").await.unwrap_err();
    assert_eq!(err.to_string(), "mount.nfs: Connection timed out");

    let info = h.driver.get("v1")?;
    assert_eq!(info.mount_count, 1);
    assert!(!info.mountpoint.exists());

    // The compensating unmount releases the reservation without touching
    // the mounter.
    h.driver.unmount("v1").await?;
    assert_eq!(h.mounter.unmounts(), 0);
    assert!(h.driver.list().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_safe_mount_error_is_verbatim() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;
    h.driver.create("v1", opts("nfsserver:/export/v1"))?;

    h.mounter
        .fail_mounts(MountError::Safe(SafeError::new("access denied by server")));
    let err = h.driver.mount("v1").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        r#"{"SafeDescription":"access denied by server"}"#
    );
    Ok(())
}

#[tokio::test]
async fn test_persist_failure_keeps_change() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;
    h.driver.create("v1", opts("nfsserver:/export/v1"))?;

    h.break_state_file()?;
    let err = h
        .driver
        .create("v2", opts("nfsserver:/export/v2"))
        .unwrap_err();
    assert!(
        err.to_string()
            .starts_with("failed to persist state when creating: "),
        "unexpected error: {err}"
    );
    assert_eq!(h.driver.get("v2")?.mount_count, 0);

    h.repair_state_file()?;
    h.driver.create("v3", opts("nfsserver:/export/v3"))?;
    let state = read_state(&h)?;
    assert!(state.contains_key("v2"));
    assert!(state.contains_key("v3"));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_drain() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;
    h.driver.create("v1", opts("nfsserver:/export/v1"))?;
    h.driver.create("v2", opts("nfsserver:/export/v2"))?;
    h.driver.create("idle", opts("nfsserver:/export/idle"))?;
    h.driver.mount("v1").await?;
    h.driver.mount("v2").await?;
    h.driver.mount("v2").await?;

    h.driver.drain().await;

    assert!(h.driver.list().is_empty());
    assert_eq!(h.mounter.unmounts(), 2);
    assert_eq!(h.mounter.purges(), 1);
    assert!(read_state(&h)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_drain_survives_unmount_failures() -> Result<(), Box<dyn Error>> {
    let h = Harness::new().await?;
    h.driver.create("v1", opts("nfsserver:/export/v1"))?;
    h.driver.create("v2", opts("nfsserver:/export/v2"))?;
    h.driver.mount("v1").await?;
    h.driver.mount("v2").await?;

    h.mounter.fail_unmounts("device is busy");
    h.driver.drain().await;

    assert!(h.driver.list().is_empty());
    assert_eq!(h.mounter.unmounts(), 2);
    assert_eq!(h.mounter.purges(), 1);
    assert!(read_state(&h)?.is_empty());
    Ok(())
}
