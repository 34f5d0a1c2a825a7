//! Completion duty of the caller performing a physical operation.

use crate::registry::Registry;
use crate::signal::MountSignal;
use crate::volume::Volume;

/// What is in flight, and where its failure is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    /// First mount; failures stick until the volume is released.
    Mount,
    /// Healing a stale mount; failures last until the next attempt.
    Remount,
    /// Physical unmount; failures are returned to the caller only.
    Unmount,
}

impl Operation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::Remount => "remount",
            Self::Unmount => "unmount",
        }
    }
}

/// Held by the caller that armed a volume's signal.
///
/// Exactly one of [`InFlight::finish`] or the drop handler fires the
/// signal, so waiters are released even if the owner's future is dropped
/// half way. A dropped mount or remount owner also records a failure on the
/// volume, giving the waiters an outcome to report.
pub(super) struct InFlight<'a> {
    registry: &'a Registry,
    name: &'a str,
    signal: MountSignal,
    operation: Operation,
    done: bool,
}

impl<'a> InFlight<'a> {
    fn new(
        registry: &'a Registry,
        name: &'a str,
        signal: MountSignal,
        operation: Operation,
    ) -> Self {
        Self {
            registry,
            name,
            signal,
            operation,
            done: false,
        }
    }

    /// Track a first physical mount.
    pub(super) fn mount(registry: &'a Registry, name: &'a str, signal: MountSignal) -> Self {
        Self::new(registry, name, signal, Operation::Mount)
    }

    /// Track a remount of a stale volume.
    pub(super) fn remount(registry: &'a Registry, name: &'a str, signal: MountSignal) -> Self {
        Self::new(registry, name, signal, Operation::Remount)
    }

    /// Track a physical unmount.
    pub(super) fn unmount(registry: &'a Registry, name: &'a str, signal: MountSignal) -> Self {
        Self::new(registry, name, signal, Operation::Unmount)
    }

    /// The signal being tracked.
    pub(super) const fn signal(&self) -> &MountSignal {
        &self.signal
    }

    /// Where the outcome of this operation is kept on `volume`.
    pub(super) fn outcome_slot<'v>(
        &self,
        volume: &'v mut Volume,
    ) -> Option<&'v mut Option<String>> {
        match self.operation {
            Operation::Mount => Some(&mut volume.last_mount_error),
            Operation::Remount => Some(&mut volume.remount_error),
            Operation::Unmount => None,
        }
    }

    /// Fire the signal. The outcome must already be recorded.
    ///
    /// The registry lock must not be held.
    pub(super) fn finish(mut self) {
        self.done = true;
        self.signal.fire();
    }

    /// Record `message` as the operation's failure, then fire.
    ///
    /// The registry lock must not be held.
    pub(super) fn fail(mut self, message: String) {
        self.record(message);
        self.done = true;
        self.signal.fire();
    }

    fn record(&self, message: String) {
        let mut table = self.registry.write();
        if let Some(volume) = table.get_mut(self.name) {
            if volume.signal.same(&self.signal) {
                if let Some(slot) = self.outcome_slot(volume) {
                    *slot = Some(message);
                }
            }
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        tracing::warn!(
            volume = self.name,
            operation = self.operation.as_str(),
            "Physical operation abandoned"
        );
        if self.operation != Operation::Unmount {
            self.record(format!(
                "{} of volume '{}' was cancelled",
                self.operation.as_str(),
                self.name
            ));
        }
        self.signal.fire();
    }
}
