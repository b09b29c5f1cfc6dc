use std::time::Duration;

/// The two ownership states of the composition surface lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockState {
    /// Held by a capture worker while it writes its region.
    ProducerWritable,
    /// Held by the orchestrator while it copies the surface out.
    ConsumerReadable,
}

/// A mutual-exclusion primitive with two named ownership states.
///
/// At most one holder exists at any time regardless of state: a producer and
/// the consumer never overlap, and neither do two producers. Acquisition is
/// always bounded so no thread can wait forever on a stalled peer.
///
/// Implemented by:
/// - `KeyedMutex` (in-process, `parking_lot` based)
/// - Platform keyed mutexes shared between device contexts
pub trait TwoStateLock: Send + Sync {
    /// Try to take the lock in `state`, waiting at most `timeout`.
    ///
    /// Returns `false` when the wait timed out.
    fn acquire(&self, state: LockState, timeout: Duration) -> bool;

    /// Release a lock previously taken in `state`.
    fn release(&self, state: LockState);
}
