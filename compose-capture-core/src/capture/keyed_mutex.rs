use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::traits::two_state_lock::{LockState, TwoStateLock};

/// In-process two-state lock.
///
/// Tracks the current holder's state; any acquire waits until the lock is
/// free, whichever state it asks for.
#[derive(Debug, Default)]
pub struct KeyedMutex {
    holder: Mutex<Option<LockState>>,
    released: Condvar,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// State of the current holder, if any.
    pub fn holder(&self) -> Option<LockState> {
        *self.holder.lock()
    }
}

impl TwoStateLock for KeyedMutex {
    fn acquire(&self, state: LockState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut holder = self.holder.lock();
        while holder.is_some() {
            if self.released.wait_until(&mut holder, deadline).timed_out() && holder.is_some() {
                return false;
            }
        }
        *holder = Some(state);
        true
    }

    fn release(&self, state: LockState) {
        let mut holder = self.holder.lock();
        if *holder != Some(state) {
            log::warn!("keyed mutex released as {:?} while held as {:?}", state, *holder);
            return;
        }
        *holder = None;
        self.released.notify_one();
    }
}
