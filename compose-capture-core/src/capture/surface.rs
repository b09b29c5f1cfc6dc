use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::models::error::CaptureError;
use crate::models::frame::{PointerState, Texture, BYTES_PER_PIXEL};
use crate::models::geometry::Size;
use crate::processing::compositor::Placed;
use crate::traits::two_state_lock::{LockState, TwoStateLock};

/// Largest canvas we are willing to allocate (16K x 16K).
const MAX_CANVAS_PIXELS: usize = 16_384 * 16_384;

/// Everything the two-state lock protects.
#[derive(Debug)]
pub struct SurfaceContents {
    pub texture: Texture,
    pub pointer: PointerState,
}

/// The single canvas every source worker writes into.
///
/// Access goes through `acquire`, which takes the two-state lock in the
/// requested state and hands out a guard. The inner mutex is only ever taken
/// by the lock holder, so it never contends.
pub struct SharedCompositionSurface {
    size: Size,
    lock: Arc<dyn TwoStateLock>,
    contents: Mutex<SurfaceContents>,
}

impl SharedCompositionSurface {
    pub fn new(size: Size, lock: Arc<dyn TwoStateLock>, background: [u8; 4]) -> Result<Self, CaptureError> {
        if size.is_empty() {
            return Err(CaptureError::SurfaceAllocation(format!(
                "canvas {}x{} is empty",
                size.width, size.height
            )));
        }
        if size.pixel_count() > MAX_CANVAS_PIXELS {
            return Err(CaptureError::SurfaceAllocation(format!(
                "canvas {}x{} exceeds {} MB",
                size.width,
                size.height,
                MAX_CANVAS_PIXELS * BYTES_PER_PIXEL / (1024 * 1024)
            )));
        }
        Ok(Self {
            size,
            lock,
            contents: Mutex::new(SurfaceContents {
                texture: Texture::filled(size, background),
                pointer: PointerState::default(),
            }),
        })
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Take the lock in `state`, waiting at most `timeout`.
    pub fn acquire(&self, state: LockState, timeout: Duration) -> Option<SurfaceGuard<'_>> {
        if !self.lock.acquire(state, timeout) {
            return None;
        }
        Some(SurfaceGuard {
            contents: self.contents.lock(),
            hold: LockHold {
                lock: self.lock.as_ref(),
                state,
            },
        })
    }
}

/// Exclusive access to the surface. Releases the two-state lock on drop.
pub struct SurfaceGuard<'a> {
    // Declared first so the inner mutex is released before the lock is.
    contents: MutexGuard<'a, SurfaceContents>,
    hold: LockHold<'a>,
}

impl SurfaceGuard<'_> {
    pub fn state(&self) -> LockState {
        self.hold.state
    }
}

impl Deref for SurfaceGuard<'_> {
    type Target = SurfaceContents;

    fn deref(&self) -> &SurfaceContents {
        &self.contents
    }
}

impl DerefMut for SurfaceGuard<'_> {
    fn deref_mut(&mut self) -> &mut SurfaceContents {
        &mut self.contents
    }
}

struct LockHold<'a> {
    lock: &'a dyn TwoStateLock,
    state: LockState,
}

impl Drop for LockHold<'_> {
    fn drop(&mut self) {
        self.lock.release(self.state);
    }
}

/// Latest resized frame of one overlay, read by the orchestrator on each pull.
#[derive(Debug, Default)]
pub struct OverlaySlot {
    latest: Mutex<Option<Placed>>,
}

impl OverlaySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, placed: Placed) {
        *self.latest.lock() = Some(placed);
    }

    pub fn clear(&self) {
        *self.latest.lock() = None;
    }

    pub fn latest(&self) -> Option<Placed> {
        self.latest.lock().clone()
    }
}

/// Sequence counter bumped by workers after every write.
///
/// Lets the orchestrator sleep until something changes instead of spinning
/// on the surface lock.
#[derive(Debug, Default)]
pub struct UpdateNotifier {
    sequence: Mutex<u64>,
    changed: Condvar,
}

impl UpdateNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        *self.sequence.lock() += 1;
        self.changed.notify_all();
    }

    pub fn sequence(&self) -> u64 {
        *self.sequence.lock()
    }

    /// Wait until the sequence moves past `seen` or `deadline` passes.
    /// Returns the sequence at wake-up.
    pub fn wait_past(&self, seen: u64, deadline: Instant) -> u64 {
        let mut sequence = self.sequence.lock();
        while *sequence == seen {
            if self.changed.wait_until(&mut sequence, deadline).timed_out() {
                break;
            }
        }
        *sequence
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::capture::keyed_mutex::KeyedMutex;
    use crate::models::geometry::Rect;

    fn surface(size: Size) -> SharedCompositionSurface {
        SharedCompositionSurface::new(size, Arc::new(KeyedMutex::new()), [0, 0, 0, 255]).unwrap()
    }

    #[test]
    fn rejects_empty_and_huge_canvases() {
        let lock: Arc<dyn TwoStateLock> = Arc::new(KeyedMutex::new());
        assert!(matches!(
            SharedCompositionSurface::new(Size::new(0, 10), lock.clone(), [0; 4]),
            Err(CaptureError::SurfaceAllocation(_))
        ));
        assert!(SharedCompositionSurface::new(Size::new(40_000, 40_000), lock, [0; 4]).is_err());
    }

    #[test]
    fn guard_releases_on_drop() {
        let surface = surface(Size::new(4, 4));
        {
            let mut guard = surface.acquire(LockState::ProducerWritable, Duration::from_millis(1)).unwrap();
            assert_eq!(guard.state(), LockState::ProducerWritable);
            guard.texture.fill_rect(Rect::new(0, 0, 2, 2), [9, 9, 9, 255]);
            assert!(surface.acquire(LockState::ConsumerReadable, Duration::from_millis(2)).is_none());
        }
        let guard = surface.acquire(LockState::ConsumerReadable, Duration::from_millis(1)).unwrap();
        assert_eq!(guard.texture.pixel(1, 1), Some([9, 9, 9, 255]));
    }

    #[test]
    fn notifier_wakes_waiter() {
        let notifier = Arc::new(UpdateNotifier::new());
        let seen = notifier.sequence();
        let bumper = {
            let notifier = notifier.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                notifier.notify();
            })
        };
        let now = notifier.wait_past(seen, Instant::now() + Duration::from_secs(5));
        bumper.join().unwrap();
        assert_eq!(now, seen + 1);
    }

    #[test]
    fn notifier_times_out() {
        let notifier = UpdateNotifier::new();
        assert_eq!(notifier.wait_past(0, Instant::now() + Duration::from_millis(5)), 0);
    }

    #[test]
    fn overlay_slot_keeps_latest() {
        let slot = OverlaySlot::new();
        assert!(slot.latest().is_none());
        slot.store(Placed {
            texture: Texture::new(Size::new(1, 1)),
            rect: Rect::new(5, 5, 6, 6),
        });
        assert_eq!(slot.latest().map(|p| p.rect), Some(Rect::new(5, 5, 6, 6)));
        slot.clear();
        assert!(slot.latest().is_none());
    }
}
