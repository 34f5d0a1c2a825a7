//! Process umask handling.

use parking_lot::{Mutex, MutexGuard};
use rustix::fs::Mode;

/// The umask is process wide; guards are taken one at a time.
static UMASK_LOCK: Mutex<()> = Mutex::new(());

/// Clears the process umask for its lifetime and restores it on drop.
///
/// Mountpoints and the state file are created world-accessible so that
/// containers running as any user can reach them.
#[derive(Debug)]
pub struct UmaskGuard {
    previous: Mode,
    _lock: MutexGuard<'static, ()>,
}

impl UmaskGuard {
    /// Clear the umask.
    #[must_use]
    pub fn clear() -> Self {
        let lock = UMASK_LOCK.lock();
        let previous = rustix::process::umask(Mode::empty());
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        rustix::process::umask(self.previous);
    }
}

