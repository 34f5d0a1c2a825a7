//! Single-flight mounting.
//!
//! Many NFS mount helpers misbehave when the same export is mounted on the
//! same target twice at once, so every volume has at most one physical
//! mount in flight. The first caller to find a volume unmounted becomes its
//! owner and performs the mount; callers arriving meanwhile count
//! themselves in and wait for the owner's signal, then report the owner's
//! outcome. A caller joining an already mounted volume verifies the mount is
//! still there and heals it with a remount if it went away underneath us.
//! A failed remount is reported to the callers that rendezvoused with it
//! only; the next mount tries again.

use std::path::{Path, PathBuf};
use std::time::Instant;

use nfsvol_common::{DriverError, DriverResult, MountError};

use super::{Driver, InFlight, not_found, validate_name};
use crate::signal::MountSignal;
use crate::volume::MountOptions;

/// A caller counted in on a volume.
struct Admission<'a> {
    mountpoint: PathBuf,
    signal: MountSignal,
    /// Operation that was in flight when the caller was counted in.
    joined: Option<u64>,
    /// Present when this caller must perform the physical mount.
    owner: Option<(InFlight<'a>, Option<MountOptions>)>,
}

/// What the registry says about a volume after a rendezvous.
enum Outcome {
    /// Another physical operation, numbered `generation`, is in flight.
    Pending {
        signal: MountSignal,
        generation: u64,
    },
    /// The volume is mounted, as of `generation`.
    Ready { mountpoint: PathBuf, generation: u64 },
}

/// Result of trying to claim a stale volume for remounting.
enum Remount<'a> {
    /// Someone else is remounting, or already has, as `generation`.
    Follow {
        signal: MountSignal,
        generation: u64,
    },
    /// This caller remounts.
    Owner {
        inflight: InFlight<'a>,
        options: Option<MountOptions>,
        mountpoint: PathBuf,
    },
}

impl Driver {
    /// Mount a volume and return its mountpoint.
    ///
    /// Every successful call must be paired with an [`Driver::unmount`].
    /// A failed mount still holds its reference, so callers release it with
    /// an unmount as well.
    ///
    /// # Errors
    ///
    /// Fails if the volume was never created or has been removed, if the
    /// physical mount (or a healing remount) fails, or if the state cannot
    /// be persisted.
    pub async fn mount(&self, name: &str) -> DriverResult<PathBuf> {
        validate_name(name)?;

        let Admission {
            mountpoint,
            signal,
            joined,
            owner,
        } = self.admit(name)?;

        let mut verified = owner.is_some();
        if let Some((inflight, options)) = owner {
            // The outcome is recorded on the volume and read back below.
            let _ = self
                .mount_physically(name, inflight, options.as_ref(), &mountpoint)
                .await;
        }

        signal.wait().await;
        if let Some(err) = joined.and_then(|generation| self.remount_failure(name, generation)) {
            return Err(DriverError::RemountFailed(err));
        }

        loop {
            let (target, generation) = match self.outcome(name)? {
                Outcome::Pending { signal, generation } => {
                    signal.wait().await;
                    if let Some(err) = self.remount_failure(name, generation) {
                        return Err(DriverError::RemountFailed(err));
                    }
                    continue;
                }
                Outcome::Ready {
                    mountpoint,
                    generation,
                } => (mountpoint, generation),
            };

            if verified || self.executor.check(name, &target).await {
                return Ok(target);
            }

            tracing::warn!(
                volume = name,
                mountpoint = %target.display(),
                "Mount is stale, remounting"
            );

            match self.claim_remount(name, generation)? {
                Remount::Follow { signal, generation } => {
                    signal.wait().await;
                    if let Some(err) = self.remount_failure(name, generation) {
                        return Err(DriverError::RemountFailed(err));
                    }
                }
                Remount::Owner {
                    inflight,
                    options,
                    mountpoint,
                } => {
                    self.mount_physically(name, inflight, options.as_ref(), &mountpoint)
                        .await
                        .map_err(|e| {
                            tracing::error!(volume = name, error = %e, "Remount failed");
                            DriverError::RemountFailed(e.recorded())
                        })?;
                    verified = true;
                }
            }
        }
    }

    /// Count the caller in and decide whether it owns the physical mount.
    fn admit<'a>(&'a self, name: &'a str) -> DriverResult<Admission<'a>> {
        let (admission, persisted) = {
            let mut table = self.registry.write();
            let volume = table.get_mut(name).ok_or_else(|| {
                tracing::error!(volume = name, "Volume not created");
                DriverError::NotCreated {
                    name: name.to_string(),
                }
            })?;

            let mountpoint = self.mount_path(name);

            let owner = if volume.info.mount_count < 1 {
                let signal = volume.arm();
                Some((
                    InFlight::mount(&self.registry, name, signal),
                    volume.options.clone(),
                ))
            } else {
                None
            };

            volume.info.mountpoint.clone_from(&mountpoint);
            volume.info.mount_count += 1;

            tracing::info!(
                volume = name,
                mountpoint = %mountpoint.display(),
                count = volume.info.mount_count,
                owner = owner.is_some(),
                "Mount admitted"
            );

            let signal = volume.signal.clone();
            let joined = signal.is_pending().then_some(volume.generation);
            let persisted = self.persist(&table, "mounting");
            (
                Admission {
                    mountpoint,
                    signal,
                    joined,
                    owner,
                },
                persisted,
            )
        };

        if let Err(e) = persisted {
            if let Some((inflight, _)) = admission.owner {
                inflight.fail(e.to_string());
            }
            return Err(e);
        }

        Ok(admission)
    }

    /// Perform the physical mount, record its outcome and fire the signal.
    async fn mount_physically(
        &self,
        name: &str,
        inflight: InFlight<'_>,
        options: Option<&MountOptions>,
        target: &Path,
    ) -> Result<(), MountError> {
        let started = Instant::now();
        let result = self.executor.mount(options, target).await;
        let elapsed = started.elapsed();

        if elapsed > self.slow_mount_threshold {
            tracing::warn!(
                volume = name,
                duration_secs = elapsed.as_secs(),
                "Mount took too long, this may result in container creation failure"
            );
        }

        {
            let mut table = self.registry.write();
            match table.get_mut(name) {
                Some(volume) if volume.signal.same(inflight.signal()) => {
                    if let Some(slot) = inflight.outcome_slot(volume) {
                        *slot = result.as_ref().err().map(MountError::recorded);
                    }
                }
                Some(_) => {
                    tracing::warn!(volume = name, "Volume was recreated while mounting");
                }
                None => {
                    tracing::warn!(volume = name, "Volume was removed while mounting");
                }
            }
        }

        inflight.finish();
        result
    }

    /// Read the settled state of a volume.
    fn outcome(&self, name: &str) -> DriverResult<Outcome> {
        let table = self.registry.read();
        let volume = table.get(name).ok_or_else(|| not_found(name))?;

        if volume.signal.is_pending() {
            return Ok(Outcome::Pending {
                signal: volume.signal.clone(),
                generation: volume.generation,
            });
        }
        if let Some(err) = &volume.last_mount_error {
            return Err(DriverError::MountFailed(err.clone()));
        }
        // Removed and created again while we waited.
        if !volume.info.has_mountpoint() {
            return Err(not_found(name));
        }

        Ok(Outcome::Ready {
            mountpoint: volume.info.mountpoint.clone(),
            generation: volume.generation,
        })
    }

    /// Failure of the remount numbered `generation`, if that is still the
    /// latest operation on the volume.
    fn remount_failure(&self, name: &str, generation: u64) -> Option<String> {
        let table = self.registry.read();
        table
            .get(name)
            .filter(|volume| volume.generation == generation)
            .and_then(|volume| volume.remount_error.clone())
    }

    /// Claim a stale volume for remounting unless somebody got there first.
    fn claim_remount<'a>(&'a self, name: &'a str, seen: u64) -> DriverResult<Remount<'a>> {
        let mut table = self.registry.write();
        let volume = table.get_mut(name).ok_or_else(|| not_found(name))?;

        if volume.signal.is_pending() || volume.generation != seen {
            return Ok(Remount::Follow {
                signal: volume.signal.clone(),
                generation: volume.generation,
            });
        }

        let signal = volume.arm();
        Ok(Remount::Owner {
            inflight: InFlight::remount(&self.registry, name, signal),
            options: volume.options.clone(),
            mountpoint: volume.info.mountpoint.clone(),
        })
    }
}
