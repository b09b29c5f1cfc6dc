use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender};

use super::error_signal::ErrorSignal;
use super::surface::{OverlaySlot, SharedCompositionSurface, SurfaceContents, UpdateNotifier};
use crate::models::config::EngineConfiguration;
use crate::models::error::{CaptureError, ErrorClass};
use crate::models::frame::{PointerState, PointerUpdate};
use crate::models::geometry::{Point, Rect, Rotation, Size};
use crate::models::source::RecordingSource;
use crate::models::state::CaptureThreadState;
use crate::processing::compositor::{Placed, TextureCompositor};
use crate::sources::create_source;
use crate::traits::capture_source::{CaptureSource, DeviceContext, SourceFrame};
use crate::traits::two_state_lock::LockState;

/// What a worker reports once its source is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ready {
    pub native_size: Size,
    pub native_origin: Point,
}

/// Where a worker writes.
pub(crate) enum Target {
    /// Its region of the shared surface.
    Surface,
    /// A private slot the orchestrator composites on top at pull time.
    Overlay(Arc<OverlaySlot>),
}

/// Sent to a ready worker once the canvas exists.
pub(crate) struct Assignment {
    /// Destination rectangle in canvas coordinates.
    pub dest: Rect,
    pub target: Target,
    pub surface: Arc<SharedCompositionSurface>,
}

/// Session-wide handles every worker gets a copy of.
#[derive(Clone)]
pub(crate) struct WorkerShared {
    pub terminate: Arc<AtomicBool>,
    pub error_signal: Arc<ErrorSignal>,
    pub notifier: Arc<UpdateNotifier>,
    pub config: EngineConfiguration,
    pub device: DeviceContext,
}

/// Orchestrator-side end of one worker.
pub(crate) struct WorkerHandle {
    pub id: String,
    pub state: Arc<CaptureThreadState>,
    pub ready: Receiver<Result<Ready, CaptureError>>,
    pub go: Option<Sender<Assignment>>,
    pub thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Wait for the thread to exit. Dropping `go` first releases a worker that
    /// is still waiting for its assignment.
    pub fn join(&mut self) {
        self.go.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("capture worker {} panicked", self.id);
            }
        }
    }
}

/// Start a worker thread for `source`.
///
/// The worker opens its source on its own thread and reports `Ready` (or the
/// failure) on `ready`; it then waits for an `Assignment` on `go`. A dropped
/// `go` sender makes it exit without capturing.
pub(crate) fn spawn_worker(
    source: RecordingSource,
    shared: WorkerShared,
    state: Arc<CaptureThreadState>,
) -> Result<WorkerHandle, CaptureError> {
    let (ready_tx, ready_rx) = bounded(1);
    let (go_tx, go_rx) = bounded(1);
    let id = source.id.clone();
    let short_id: String = id.chars().take(8).collect();

    let worker = CaptureWorker {
        source,
        shared,
        state: state.clone(),
        compositor: TextureCompositor,
    };
    let thread = thread::Builder::new()
        .name(format!("capture-worker-{}", short_id))
        .spawn(move || worker.run(ready_tx, go_rx))
        .map_err(|e| CaptureError::WorkerStart(format!("{}: {}", id, e)))?;

    Ok(WorkerHandle {
        id,
        state,
        ready: ready_rx,
        go: Some(go_tx),
        thread: Some(thread),
    })
}

struct CaptureWorker {
    source: RecordingSource,
    shared: WorkerShared,
    state: Arc<CaptureThreadState>,
    compositor: TextureCompositor,
}

impl CaptureWorker {
    fn run(self, ready: Sender<Result<Ready, CaptureError>>, go: Receiver<Assignment>) {
        let mut capture = create_source(&self.source.kind);
        let prepared = self.prepare(capture.as_mut());
        let failed = prepared.is_err();
        if ready.send(prepared).is_err() || failed {
            capture.stop_capture();
            return;
        }

        if let Ok(assignment) = go.recv() {
            log::debug!(
                "worker {} ({}) writing to {:?}",
                self.source.id,
                self.source.kind.label(),
                assignment.dest
            );
            self.capture_loop(capture.as_mut(), &assignment);
        }
        capture.stop_capture();
    }

    fn prepare(&self, capture: &mut dyn CaptureSource) -> Result<Ready, CaptureError> {
        capture.initialize(&self.shared.device)?;
        capture.start_capture(&self.source)?;
        Ok(Ready {
            native_size: capture.native_size(&self.source)?,
            native_origin: capture.native_origin(),
        })
    }

    fn capture_loop(&self, capture: &mut dyn CaptureSource, assignment: &Assignment) {
        let poll = self.shared.config.source_poll_timeout();
        while !self.shared.terminate.load(Ordering::Acquire) {
            match capture.acquire_next_frame(poll) {
                Ok(None) => continue,
                Ok(Some(frame)) => match self.compose(frame, assignment.dest) {
                    Ok((placed, pointer)) => self.write(assignment, Some(placed), pointer),
                    Err(e) => self.recover(assignment, e),
                },
                Err(e) => match e.class() {
                    ErrorClass::Recoverable => self.recover(assignment, e),
                    ErrorClass::DeviceInvalidated | ErrorClass::Fatal => {
                        log::error!(
                            "worker {} stopping ({:?}): {}",
                            self.source.id,
                            e.class(),
                            e
                        );
                        self.state.record_error(e.clone());
                        self.shared.error_signal.raise(e);
                        return;
                    }
                },
            }
        }
    }

    /// Undo rotation, crop, and fit the frame into `dest`.
    fn compose(&self, frame: SourceFrame, dest: Rect) -> Result<(Placed, Option<PointerUpdate>), CaptureError> {
        let placement = &self.source.placement;
        let raw_size = frame.texture.size();
        let upright = if frame.rotation == Rotation::None {
            frame.texture
        } else {
            self.compositor.rotate(&frame.texture, frame.rotation.inverse())
        };

        let region = match placement.source_rect {
            Some(crop) => crop
                .intersect(&upright.bounds())
                .ok_or_else(|| CaptureError::Transient(format!("crop {:?} outside {:?}", crop, upright.size())))?,
            None => upright.bounds(),
        };
        let cropped = if region == upright.bounds() {
            upright
        } else {
            self.compositor
                .crop(&upright, region)
                .map_err(|e| CaptureError::Transient(e.to_string()))?
        };

        let placed = self.compositor.place(&cropped, dest, placement.stretch, placement.anchor);
        let pointer = frame
            .pointer
            .map(|update| map_pointer(update, raw_size, frame.rotation, region, placed.rect));
        Ok((placed, pointer))
    }

    /// Blank this worker's region after a recoverable failure.
    fn recover(&self, assignment: &Assignment, error: CaptureError) {
        log::debug!("worker {} blanking after: {}", self.source.id, error);
        self.state.record_error(error);
        self.write(assignment, None, None);
    }

    fn write(&self, assignment: &Assignment, placed: Option<Placed>, pointer: Option<PointerUpdate>) {
        match &assignment.target {
            Target::Overlay(slot) => {
                match placed {
                    Some(placed) => slot.store(placed),
                    None => slot.clear(),
                }
                self.state.record_frame();
                self.shared.notifier.notify();
            }
            Target::Surface => {
                let dest = assignment.dest;
                let blank = self.shared.config.blank_color;
                let draw = self.source.capture_video;
                let compositor = self.compositor;
                self.with_surface(&assignment.surface, |contents| {
                    contents.texture.fill_rect(dest, blank);
                    if let (true, Some(placed)) = (draw, &placed) {
                        compositor.draw_into(&mut contents.texture, &placed.texture, placed.rect);
                    }
                    if let Some(update) = pointer {
                        merge_pointer(&mut contents.pointer, update, dest, Instant::now());
                    }
                });
            }
        }
    }

    /// Run `write` under the producer lock, retrying briefly on contention.
    ///
    /// Counters are bumped while the lock is still held so the orchestrator's
    /// pending-count swap always sees pixels and counts together.
    fn with_surface(&self, surface: &SharedCompositionSurface, write: impl FnOnce(&mut SurfaceContents)) {
        let config = &self.shared.config;
        let timeout = config.producer_lock_timeout();
        for _ in 0..config.producer_lock_attempts {
            if self.shared.terminate.load(Ordering::Acquire) {
                return;
            }
            if let Some(mut guard) = surface.acquire(LockState::ProducerWritable, timeout) {
                write(&mut *guard);
                self.state.record_frame();
                drop(guard);
                self.shared.notifier.notify();
                return;
            }
        }
        log::warn!(
            "worker {}: surface busy after {} attempts, frame dropped",
            self.source.id,
            config.producer_lock_attempts
        );
    }
}

/// Translate a pointer report from raw frame pixels into canvas coordinates.
///
/// `region` is the kept part of the upright frame and `content` where it was
/// drawn. A pointer outside the region is reported invisible.
pub(crate) fn map_pointer(
    update: PointerUpdate,
    raw_size: Size,
    rotation: Rotation,
    region: Rect,
    content: Rect,
) -> PointerUpdate {
    let upright = TextureCompositor::rotate_point(update.position, raw_size, rotation.inverse());
    if !region.contains(upright) || region.is_empty() {
        return PointerUpdate {
            visible: false,
            ..update
        };
    }
    let scale = |offset: i32, from: u32, to: u32| (offset as i64 * to as i64 / from as i64) as i32;
    let position = Point::new(
        content.left + scale(upright.x - region.left, region.width(), content.width()),
        content.top + scale(upright.y - region.top, region.height(), content.height()),
    );
    PointerUpdate { position, ..update }
}

/// Apply one source's pointer report to the shared pointer state.
///
/// The most recent visible report wins. An invisible report only hides the
/// pointer when it comes from the source that last showed it, so a cursor on
/// one display is not hidden by every other display.
pub(crate) fn merge_pointer(state: &mut PointerState, update: PointerUpdate, writer: Rect, now: Instant) {
    if update.visible {
        state.visible = true;
        state.position = update.position;
        if update.shape.is_some() {
            state.shape = update.shape;
        }
        state.last_writer = Some(writer);
        state.last_update = Some(now);
    } else if state.last_writer.is_none() || state.last_writer == Some(writer) {
        state.visible = false;
        state.last_update = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::frame::{PointerShape, PointerShapeKind};

    fn visible_at(x: i32, y: i32) -> PointerUpdate {
        PointerUpdate {
            visible: true,
            position: Point::new(x, y),
            shape: None,
        }
    }

    #[test]
    fn pointer_scales_into_content() {
        let update = map_pointer(
            visible_at(100, 50),
            Size::new(200, 100),
            Rotation::None,
            Rect::new(0, 0, 200, 100),
            Rect::new(1000, 0, 1100, 50),
        );
        assert!(update.visible);
        assert_eq!(update.position, Point::new(1050, 25));
    }

    #[test]
    fn pointer_outside_crop_is_hidden() {
        let update = map_pointer(
            visible_at(5, 5),
            Size::new(200, 100),
            Rotation::None,
            Rect::new(50, 50, 150, 100),
            Rect::new(0, 0, 100, 50),
        );
        assert!(!update.visible);
    }

    #[test]
    fn pointer_follows_rotation() {
        // raw 4x2 frame from a display rotated by 90 degrees; upright frame is 2x4
        let update = map_pointer(
            visible_at(3, 0),
            Size::new(4, 2),
            Rotation::Rotate90,
            Rect::new(0, 0, 2, 4),
            Rect::new(0, 0, 2, 4),
        );
        assert_eq!(update.position, Point::new(0, 0));
    }

    #[test]
    fn last_writer_rule() {
        let left = Rect::new(0, 0, 100, 100);
        let right = Rect::new(100, 0, 200, 100);
        let mut state = PointerState::default();
        let now = Instant::now();

        merge_pointer(&mut state, visible_at(150, 10), right, now);
        assert!(state.visible);

        // the other display reports no cursor: stays visible
        merge_pointer(
            &mut state,
            PointerUpdate {
                visible: false,
                ..visible_at(0, 0)
            },
            left,
            now,
        );
        assert!(state.visible);
        assert_eq!(state.position, Point::new(150, 10));

        // the owning display hides it
        merge_pointer(
            &mut state,
            PointerUpdate {
                visible: false,
                ..visible_at(0, 0)
            },
            right,
            now,
        );
        assert!(!state.visible);
    }

    #[test]
    fn shape_is_kept_until_replaced() {
        let writer = Rect::new(0, 0, 10, 10);
        let mut state = PointerState::default();
        let shape = PointerShape {
            kind: PointerShapeKind::Color,
            width: 1,
            height: 1,
            pitch: 4,
            hot_spot: Point::default(),
            buffer: vec![0; 4],
        };
        merge_pointer(
            &mut state,
            PointerUpdate {
                shape: Some(shape.clone()),
                ..visible_at(1, 1)
            },
            writer,
            Instant::now(),
        );
        merge_pointer(&mut state, visible_at(2, 2), writer, Instant::now());
        assert_eq!(state.shape, Some(shape));
    }
}
