use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error_signal::ErrorSignal;
use super::keyed_mutex::KeyedMutex;
use super::surface::{OverlaySlot, SharedCompositionSurface, UpdateNotifier};
use super::worker::{spawn_worker, Assignment, Ready, Target, WorkerHandle, WorkerShared};
use crate::models::config::EngineConfiguration;
use crate::models::error::{AcquireError, CaptureError};
use crate::models::frame::{ComposedFrame, SourceUpdate};
use crate::models::geometry::{Anchor, Point, Rect, Size};
use crate::models::source::{Placement, RecordingOverlay, RecordingSource};
use crate::models::state::CaptureThreadState;
use crate::processing::compositor::{anchored_position, TextureCompositor};
use crate::traits::capture_source::DeviceContext;
use crate::traits::source_backend::SourceBackend;
use crate::traits::two_state_lock::{LockState, TwoStateLock};

/// Builds the surface lock for each new session.
pub type LockFactory = Arc<dyn Fn() -> Arc<dyn TwoStateLock> + Send + Sync>;

/// Canvas geometry for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasLayout {
    /// Bounding rectangle of all sources in desktop coordinates, even-sized.
    pub canvas: Rect,
    /// Destination of each source, in canvas coordinates.
    pub sources: Vec<Rect>,
    /// Destination of each overlay, in canvas coordinates.
    pub overlays: Vec<Rect>,
}

impl CanvasLayout {
    pub fn size(&self) -> Size {
        self.canvas.size()
    }
}

/// Size a placement asks for: explicit output size, else the crop, else native.
fn placement_size(placement: &Placement, native: Size) -> Size {
    placement
        .output_size
        .or_else(|| placement.source_rect.map(|r| r.size()))
        .unwrap_or(native)
}

/// Compute where every source and overlay lands.
///
/// Sources without a position sit at their native origin (plus the crop
/// offset), so displays keep their desktop arrangement. The canvas is the
/// union of all source rectangles, rounded up to even dimensions.
pub fn compute_layout(
    sources: &[RecordingSource],
    source_native: &[(Size, Point)],
    overlays: &[RecordingOverlay],
    overlay_native: &[Size],
) -> Result<CanvasLayout, CaptureError> {
    let desktop: Vec<Rect> = sources
        .iter()
        .zip(source_native)
        .map(|(source, &(native, origin))| {
            let placement = &source.placement;
            let position = placement.position.unwrap_or_else(|| match placement.source_rect {
                Some(crop) => Point::new(origin.x + crop.left, origin.y + crop.top),
                None => origin,
            });
            Rect::from_origin_size(position, placement_size(placement, native))
        })
        .collect();

    let bounds = desktop.iter().fold(Rect::default(), |acc, r| acc.union(r));
    if bounds.is_empty() {
        return Err(CaptureError::SurfaceAllocation("sources cover no area".into()));
    }
    let canvas = Rect::from_origin_size(bounds.origin(), bounds.size().to_even());
    let canvas_size = canvas.size();

    let overlays = overlays
        .iter()
        .zip(overlay_native)
        .map(|(overlay, &native)| {
            let size = placement_size(&overlay.placement, native);
            match overlay.placement.position {
                Some(position) => Rect::from_origin_size(
                    Point::new(position.x + overlay.offset.x, position.y + overlay.offset.y),
                    size,
                ),
                None => overlay_rect(canvas_size, size, overlay.placement.anchor, overlay.offset),
            }
        })
        .collect();

    Ok(CanvasLayout {
        canvas,
        sources: desktop.iter().map(|r| r.offset(-canvas.left, -canvas.top)).collect(),
        overlays,
    })
}

/// Anchor `content` in a `canvas`-sized rectangle, then push it inward by `offset`.
pub fn overlay_rect(canvas: Size, content: Size, anchor: Anchor, offset: Point) -> Rect {
    let parent = Rect::from_origin_size(Point::default(), canvas);
    let origin = anchored_position(parent, content, anchor);
    let (dx, dy) = match anchor {
        Anchor::TopLeft | Anchor::Center => (offset.x, offset.y),
        Anchor::TopRight => (-offset.x, offset.y),
        Anchor::BottomLeft => (offset.x, -offset.y),
        Anchor::BottomRight => (-offset.x, -offset.y),
    };
    Rect::from_origin_size(Point::new(origin.x + dx, origin.y + dy), content)
}

struct OverlayWorker {
    handle: WorkerHandle,
    slot: Arc<OverlaySlot>,
    rect: Rect,
}

struct Session {
    layout: CanvasLayout,
    surface: Arc<SharedCompositionSurface>,
    sources: Vec<WorkerHandle>,
    overlays: Vec<OverlayWorker>,
    terminate: Arc<AtomicBool>,
    error_signal: Arc<ErrorSignal>,
    notifier: Arc<UpdateNotifier>,
    seen_sequence: u64,
}

impl Session {
    fn all_sources_started(&self) -> bool {
        self.sources.iter().all(|w| w.state.has_produced())
    }

    fn has_pending(&self) -> bool {
        self.sources.iter().any(|w| w.state.pending_frames() > 0)
            || self.overlays.iter().any(|o| o.handle.state.pending_frames() > 0)
    }

    fn handles_mut(&mut self) -> impl Iterator<Item = &mut WorkerHandle> {
        self.sources
            .iter_mut()
            .chain(self.overlays.iter_mut().map(|o| &mut o.handle))
    }
}

/// Runs one worker per source and overlay and hands out composed frames.
///
/// ```text
/// workers ──(producer lock)──▶ shared surface ──(consumer lock)──▶ acquire_next_frame
/// overlay workers ──▶ overlay slots ─────────────────────────────────┘
/// ```
pub struct CaptureOrchestrator {
    config: EngineConfiguration,
    device: DeviceContext,
    lock_factory: LockFactory,
    compositor: TextureCompositor,
    session: Option<Session>,
}

impl CaptureOrchestrator {
    pub fn new(backend: Arc<dyn SourceBackend>, config: EngineConfiguration) -> Self {
        Self {
            config,
            device: DeviceContext::new(backend),
            lock_factory: Arc::new(|| Arc::new(KeyedMutex::new()) as Arc<dyn TwoStateLock>),
            compositor: TextureCompositor,
            session: None,
        }
    }

    /// Use a different surface lock implementation for future sessions.
    pub fn with_lock_factory(mut self, factory: LockFactory) -> Self {
        self.lock_factory = factory;
        self
    }

    pub fn is_capturing(&self) -> bool {
        self.session.is_some()
    }

    pub fn layout(&self) -> Option<&CanvasLayout> {
        self.session.as_ref().map(|s| &s.layout)
    }

    /// Destination rectangle of each overlay, by overlay id.
    pub fn overlay_rects(&self) -> Vec<(String, Rect)> {
        self.session
            .iter()
            .flat_map(|s| s.overlays.iter().map(|o| (o.handle.id.clone(), o.rect)))
            .collect()
    }

    /// Progress counters of every worker, sources first.
    pub fn thread_states(&self) -> Vec<(String, Arc<CaptureThreadState>)> {
        self.session
            .iter()
            .flat_map(|s| {
                s.sources
                    .iter()
                    .chain(s.overlays.iter().map(|o| &o.handle))
                    .map(|w| (w.id.clone(), w.state.clone()))
            })
            .collect()
    }

    /// Open every source, lay out the canvas, allocate the shared surface and
    /// start the workers.
    ///
    /// Workers open their sources in parallel. If any of them fails, or the
    /// surface cannot be allocated, every worker is stopped and the error is
    /// returned.
    pub fn start_capture(
        &mut self,
        sources: &[RecordingSource],
        overlays: &[RecordingOverlay],
        error_signal: Arc<ErrorSignal>,
    ) -> Result<(), CaptureError> {
        if self.session.is_some() {
            return Err(CaptureError::ConfigurationFailed("capture already running".into()));
        }
        if sources.is_empty() {
            return Err(CaptureError::ConfigurationFailed("at least one source is required".into()));
        }
        self.config.validate().map_err(CaptureError::ConfigurationFailed)?;

        let terminate = Arc::new(AtomicBool::new(false));
        let notifier = Arc::new(UpdateNotifier::new());
        let shared = WorkerShared {
            terminate: terminate.clone(),
            error_signal: error_signal.clone(),
            notifier: notifier.clone(),
            config: self.config.clone(),
            device: self.device.clone(),
        };

        let epoch = Instant::now();
        let mut workers = Vec::with_capacity(sources.len() + overlays.len());
        let descriptions = sources
            .iter()
            .cloned()
            .chain(overlays.iter().map(RecordingOverlay::as_source));
        for source in descriptions {
            match spawn_worker(source, shared.clone(), Arc::new(CaptureThreadState::new(epoch))) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    abort(&terminate, &mut workers);
                    return Err(e);
                }
            }
        }

        let ready = match self.collect_ready(&workers) {
            Ok(ready) => ready,
            Err(e) => {
                abort(&terminate, &mut workers);
                return Err(e);
            }
        };
        let (source_ready, overlay_ready) = ready.split_at(sources.len());
        let source_native: Vec<(Size, Point)> = source_ready.iter().map(|r| (r.native_size, r.native_origin)).collect();
        let overlay_native: Vec<Size> = overlay_ready.iter().map(|r| r.native_size).collect();

        let surface = compute_layout(sources, &source_native, overlays, &overlay_native).and_then(|layout| {
            let surface = SharedCompositionSurface::new(layout.size(), (self.lock_factory)(), self.config.blank_color)?;
            Ok((layout, Arc::new(surface)))
        });
        let (layout, surface) = match surface {
            Ok(allocated) => allocated,
            Err(e) => {
                abort(&terminate, &mut workers);
                return Err(e);
            }
        };

        let mut overlay_workers = Vec::with_capacity(overlays.len());
        let overlay_handles = workers.split_off(sources.len());
        let dispatch = workers
            .iter()
            .zip(&layout.sources)
            .map(|(worker, &dest)| (worker, dest, Target::Surface))
            .collect::<Vec<_>>();
        let mut failed = None;
        for (worker, dest, target) in dispatch {
            if !send_assignment(worker, dest, target, &surface) {
                failed = Some(worker.id.clone());
            }
        }
        for (handle, &rect) in overlay_handles.into_iter().zip(&layout.overlays) {
            let slot = Arc::new(OverlaySlot::new());
            if !send_assignment(&handle, rect, Target::Overlay(slot.clone()), &surface) {
                failed = Some(handle.id.clone());
            }
            overlay_workers.push(OverlayWorker { handle, slot, rect });
        }
        if let Some(id) = failed {
            let mut all: Vec<WorkerHandle> = workers;
            all.extend(overlay_workers.into_iter().map(|o| o.handle));
            abort(&terminate, &mut all);
            return Err(CaptureError::WorkerStart(format!("worker {} exited before its assignment", id)));
        }

        log::info!(
            "capture started: canvas {}x{} at ({}, {}), {} source(s), {} overlay(s)",
            layout.canvas.width(),
            layout.canvas.height(),
            layout.canvas.left,
            layout.canvas.top,
            workers.len(),
            overlay_workers.len()
        );

        self.session = Some(Session {
            layout,
            surface,
            sources: workers,
            overlays: overlay_workers,
            terminate,
            error_signal,
            notifier,
            seen_sequence: 0,
        });
        Ok(())
    }

    fn collect_ready(&self, workers: &[WorkerHandle]) -> Result<Vec<Ready>, CaptureError> {
        let deadline = Instant::now() + self.config.worker_start_timeout();
        workers
            .iter()
            .map(|worker| match worker.ready.recv_deadline(deadline) {
                Ok(Ok(ready)) => Ok(ready),
                Ok(Err(e)) => {
                    log::error!("source {} failed to start: {}", worker.id, e);
                    Err(e)
                }
                Err(_) => Err(CaptureError::WorkerStart(format!("source {} did not become ready", worker.id))),
            })
            .collect()
    }

    /// Pull one composed frame.
    ///
    /// Returns `Busy` until every source has produced its first frame, and
    /// when nothing was written since the previous successful pull. Returns
    /// `Timeout` when the surface lock could not be taken in time.
    pub fn acquire_next_frame(&mut self, timeout: Duration) -> Result<ComposedFrame, AcquireError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| AcquireError::Fatal(CaptureError::ConfigurationFailed("capture not started".into())))?;
        if let Some(error) = session.error_signal.error() {
            return Err(AcquireError::Fatal(error));
        }
        let deadline = Instant::now() + timeout;

        // Cold start: wait until every source has written once.
        loop {
            let seen = session.notifier.sequence();
            if session.all_sources_started() {
                break;
            }
            if Instant::now() >= deadline {
                return Err(AcquireError::Busy);
            }
            session.notifier.wait_past(seen, deadline);
        }

        while !session.has_pending() {
            let sequence = session.notifier.wait_past(session.seen_sequence, deadline);
            if sequence == session.seen_sequence {
                return Err(AcquireError::Busy);
            }
            session.seen_sequence = sequence;
        }

        let wait = deadline.saturating_duration_since(Instant::now()).max(Duration::from_millis(1));
        let Some(guard) = session.surface.acquire(LockState::ConsumerReadable, wait) else {
            return Err(AcquireError::Timeout);
        };
        let mut texture = guard.texture.clone();
        let pointer = guard.pointer.clone();
        let source_updates: Vec<SourceUpdate> = session
            .sources
            .iter()
            .map(|w| SourceUpdate {
                id: w.id.clone(),
                frames: w.state.take_pending(),
            })
            .collect();
        let overlay_updates: Vec<SourceUpdate> = session
            .overlays
            .iter()
            .map(|o| SourceUpdate {
                id: o.handle.id.clone(),
                frames: o.handle.state.take_pending(),
            })
            .collect();
        drop(guard);
        session.seen_sequence = session.notifier.sequence();

        for overlay in &session.overlays {
            if let Some(placed) = overlay.slot.latest() {
                self.compositor.draw_into(&mut texture, &placed.texture, placed.rect);
            }
        }

        Ok(ComposedFrame {
            texture,
            pointer,
            source_updates,
            overlay_updates,
            captured_at: Instant::now(),
        })
    }

    /// Stop every worker and release the surface. Safe to call repeatedly and
    /// without a prior successful start.
    pub fn stop_capture(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.terminate.store(true, Ordering::Release);
        let mut total = 0;
        for handle in session.handles_mut() {
            handle.join();
            total += handle.state.total_frames();
        }
        log::info!("capture stopped, {} frame(s) written", total);
    }
}

impl Drop for CaptureOrchestrator {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

fn send_assignment(
    worker: &WorkerHandle,
    dest: Rect,
    target: Target,
    surface: &Arc<SharedCompositionSurface>,
) -> bool {
    let Some(go) = worker.go.as_ref() else {
        return false;
    };
    go.send(Assignment {
        dest,
        target,
        surface: surface.clone(),
    })
    .is_ok()
}

fn abort(terminate: &AtomicBool, workers: &mut [WorkerHandle]) {
    terminate.store(true, Ordering::Release);
    for worker in workers.iter_mut() {
        worker.join();
    }
}

#[cfg(test)]
mod tests {
    use std::env::temp_dir;
    use std::sync::atomic::AtomicUsize;

    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::models::geometry::StretchMode;
    use crate::models::source::SourceKind;
    use crate::test_support::{wait_until, CountingLock, FakeBackend, FakeFeed};

    fn orchestrator(backend: FakeBackend) -> CaptureOrchestrator {
        CaptureOrchestrator::new(Arc::new(backend), EngineConfiguration::default())
    }

    fn first_frame(orchestrator: &mut CaptureOrchestrator) -> ComposedFrame {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            match orchestrator.acquire_next_frame(Duration::from_millis(50)) {
                Ok(frame) => return frame,
                Err(AcquireError::Fatal(e)) => panic!("fatal: {}", e),
                Err(_) if Instant::now() < deadline => continue,
                Err(e) => panic!("no frame: {:?}", e),
            }
        }
    }

    #[test]
    fn layout_unions_displays_and_offsets_into_canvas() {
        let sources = vec![RecordingSource::display("LEFT"), RecordingSource::display("RIGHT")];
        let native = vec![
            (Size::new(1280, 1024), Point::new(-1280, 0)),
            (Size::new(1920, 1080), Point::new(0, 0)),
        ];
        let layout = compute_layout(&sources, &native, &[], &[]).unwrap();

        assert_eq!(layout.canvas, Rect::new(-1280, 0, 1920, 1080));
        assert_eq!(layout.sources[0], Rect::new(0, 0, 1280, 1024));
        assert_eq!(layout.sources[1], Rect::new(1280, 0, 3200, 1080));
    }

    #[test]
    fn layout_rounds_canvas_to_even() {
        let source = RecordingSource::display("").with_placement(Placement {
            output_size: Some(Size::new(1001, 601)),
            ..Placement::default()
        });
        let layout = compute_layout(&[source], &[(Size::new(1920, 1080), Point::default())], &[], &[]).unwrap();
        assert_eq!(layout.size(), Size::new(1002, 602));
        assert_eq!(layout.sources[0], Rect::new(0, 0, 1001, 601));
    }

    #[test]
    fn layout_uses_crop_size_and_offset() {
        let source = RecordingSource::display("").with_placement(Placement {
            source_rect: Some(Rect::new(100, 50, 500, 350)),
            ..Placement::default()
        });
        let layout =
            compute_layout(&[source], &[(Size::new(1920, 1080), Point::new(1920, 0))], &[], &[]).unwrap();
        assert_eq!(layout.canvas, Rect::new(2020, 50, 2420, 350));
        assert_eq!(layout.sources[0], Rect::new(0, 0, 400, 300));
    }

    #[test]
    fn overlay_offsets_push_inward() {
        let canvas = Size::new(1920, 1080);
        let content = Size::new(200, 100);
        let offset = Point::new(10, 10);
        assert_eq!(
            overlay_rect(canvas, content, Anchor::BottomRight, offset),
            Rect::new(1710, 970, 1910, 1070)
        );
        assert_eq!(
            overlay_rect(canvas, content, Anchor::TopLeft, offset),
            Rect::new(10, 10, 210, 110)
        );
        assert_eq!(
            overlay_rect(canvas, content, Anchor::TopRight, offset),
            Rect::new(1710, 10, 1910, 110)
        );
        assert_eq!(
            overlay_rect(canvas, content, Anchor::BottomLeft, offset),
            Rect::new(10, 970, 210, 1070)
        );
    }

    #[test]
    fn screen_with_image_overlay_end_to_end() {
        let overlay_path = temp_dir().join(format!("overlay-{}.png", uuid::Uuid::new_v4()));
        RgbaImage::from_pixel(200, 100, Rgba([255, 255, 255, 255]))
            .save(&overlay_path)
            .unwrap();

        let backend = FakeBackend::new().with_display(
            "DISPLAY1",
            FakeFeed::new(Size::new(1920, 1080)).with_interval(Duration::from_millis(10)),
        );
        let mut orchestrator = orchestrator(backend);

        let screen = RecordingSource::display("DISPLAY1").with_placement(Placement {
            stretch: StretchMode::Uniform,
            anchor: Anchor::TopLeft,
            ..Placement::default()
        });
        let overlay = RecordingOverlay::new(SourceKind::ImageFile {
            path: overlay_path.clone(),
        })
        .with_placement(Placement {
            anchor: Anchor::BottomRight,
            ..Placement::default()
        })
        .with_offset(Point::new(10, 10));

        orchestrator
            .start_capture(&[screen], &[overlay.clone()], Arc::new(ErrorSignal::new()))
            .unwrap();
        assert_eq!(orchestrator.layout().unwrap().size(), Size::new(1920, 1080));
        assert_eq!(
            orchestrator.overlay_rects(),
            vec![(overlay.id.clone(), Rect::new(1710, 970, 1910, 1070))]
        );

        first_frame(&mut orchestrator);
        let mut frames = Vec::new();
        for _ in 0..30 {
            match orchestrator.acquire_next_frame(Duration::from_millis(33)) {
                Ok(frame) => frames.push(frame),
                Err(e) => panic!("pull failed: {:?}", e),
            }
        }
        assert_eq!(frames.len(), 30);

        // by now the overlay has been drawn at its anchored rectangle
        let last = frames.last().unwrap();
        assert_eq!(last.texture.size(), Size::new(1920, 1080));
        assert_eq!(last.texture.pixel(1710, 970), Some([255, 255, 255, 255]));
        assert_eq!(last.texture.pixel(1909, 1069), Some([255, 255, 255, 255]));
        assert_eq!(last.texture.pixel(1910, 1070), Some([40, 80, 120, 255]));
        assert_eq!(last.texture.pixel(0, 0), Some([40, 80, 120, 255]));

        orchestrator.stop_capture();
        std::fs::remove_file(&overlay_path).ok();
    }

    #[test]
    fn withholds_frames_until_every_source_started() {
        let gate = Arc::new(AtomicBool::new(false));
        let backend = FakeBackend::new()
            .with_display("A", FakeFeed::new(Size::new(64, 64)))
            .with_display(
                "B",
                FakeFeed::new(Size::new(64, 64))
                    .with_origin(Point::new(64, 0))
                    .gated(gate.clone()),
            );
        let mut orchestrator = orchestrator(backend);
        orchestrator
            .start_capture(
                &[RecordingSource::display("A"), RecordingSource::display("B")],
                &[],
                Arc::new(ErrorSignal::new()),
            )
            .unwrap();

        let states = orchestrator.thread_states();
        assert!(wait_until(Duration::from_secs(5), || states[0].1.has_produced()));
        for _ in 0..5 {
            assert_eq!(
                orchestrator.acquire_next_frame(Duration::from_millis(20)).unwrap_err(),
                AcquireError::Busy
            );
        }

        gate.store(true, Ordering::Release);
        let frame = first_frame(&mut orchestrator);
        assert_eq!(frame.texture.size(), Size::new(128, 64));
        assert!(frame.source_updates.iter().all(|u| u.frames > 0));
    }

    #[test]
    fn reported_updates_account_for_every_frame() {
        let backend = FakeBackend::new()
            .with_display("A", FakeFeed::new(Size::new(32, 32)))
            .with_display("B", FakeFeed::new(Size::new(32, 32)).with_origin(Point::new(32, 0)));
        let mut orchestrator = orchestrator(backend);
        orchestrator
            .start_capture(
                &[RecordingSource::display("A"), RecordingSource::display("B")],
                &[],
                Arc::new(ErrorSignal::new()),
            )
            .unwrap();
        let states = orchestrator.thread_states();

        let mut reported = 0;
        for _ in 0..40 {
            if let Ok(frame) = orchestrator.acquire_next_frame(Duration::from_millis(20)) {
                reported += frame.total_source_updates();
            }
        }
        orchestrator.stop_capture();

        let written: u64 = states.iter().map(|(_, s)| s.total_frames()).sum();
        let pending: u64 = states.iter().map(|(_, s)| s.pending_frames()).sum();
        assert!(reported > 0);
        assert_eq!(reported + pending, written);
    }

    #[test]
    fn producers_and_consumer_never_overlap() {
        let lock = Arc::new(CountingLock::new());
        let factory_lock = lock.clone();
        let backend = FakeBackend::new()
            .with_display("A", FakeFeed::new(Size::new(48, 48)).with_interval(Duration::from_millis(1)))
            .with_display(
                "B",
                FakeFeed::new(Size::new(48, 48))
                    .with_origin(Point::new(48, 0))
                    .with_interval(Duration::from_millis(1)),
            )
            .with_display(
                "C",
                FakeFeed::new(Size::new(48, 48))
                    .with_origin(Point::new(96, 0))
                    .with_interval(Duration::from_millis(1)),
            );
        let mut orchestrator =
            orchestrator(backend).with_lock_factory(Arc::new(move || factory_lock.clone() as Arc<dyn TwoStateLock>));
        orchestrator
            .start_capture(
                &[
                    RecordingSource::display("A"),
                    RecordingSource::display("B"),
                    RecordingSource::display("C"),
                ],
                &[],
                Arc::new(ErrorSignal::new()),
            )
            .unwrap();

        let pulls = AtomicUsize::new(0);
        for _ in 0..50 {
            if orchestrator.acquire_next_frame(Duration::from_millis(10)).is_ok() {
                pulls.fetch_add(1, Ordering::SeqCst);
            }
        }
        orchestrator.stop_capture();

        assert_eq!(lock.overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(lock.holders(), 0);
        assert!(lock.producer_acquisitions.load(Ordering::SeqCst) > 0);
        assert_eq!(
            lock.consumer_acquisitions.load(Ordering::SeqCst),
            pulls.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn fatal_source_error_surfaces_on_next_pull() {
        let feed = FakeFeed::new(Size::new(16, 16));
        let backend = FakeBackend::new().with_display("A", feed.clone());
        let mut orchestrator = orchestrator(backend);
        let signal = Arc::new(ErrorSignal::new());
        orchestrator
            .start_capture(&[RecordingSource::display("A")], &[], signal.clone())
            .unwrap();
        first_frame(&mut orchestrator);

        feed.push_error(CaptureError::SourceFailed("decoder crashed".into()));
        assert!(signal.wait(Duration::from_secs(5)).is_some());
        assert_eq!(
            orchestrator.acquire_next_frame(Duration::from_millis(10)).unwrap_err(),
            AcquireError::Fatal(CaptureError::SourceFailed("decoder crashed".into()))
        );
        orchestrator.stop_capture();
    }

    #[test]
    fn transient_error_blanks_region_and_keeps_running() {
        let feed = FakeFeed::new(Size::new(16, 16)).with_color([1, 2, 3, 255]);
        let backend = FakeBackend::new().with_display("A", feed.clone());
        let mut orchestrator = orchestrator(backend);
        let signal = Arc::new(ErrorSignal::new());
        orchestrator
            .start_capture(&[RecordingSource::display("A")], &[], signal.clone())
            .unwrap();
        first_frame(&mut orchestrator);

        feed.push_error(CaptureError::Transient("secure desktop".into()));
        let states = orchestrator.thread_states();
        assert!(wait_until(Duration::from_secs(5), || states[0].1.last_error().is_some()));

        let frame = first_frame(&mut orchestrator);
        assert_eq!(frame.texture.size(), Size::new(16, 16));
        assert!(!signal.is_raised());
        assert_eq!(
            states[0].1.last_error(),
            Some(CaptureError::Transient("secure desktop".into()))
        );
        orchestrator.stop_capture();
    }

    #[test]
    fn failed_source_aborts_start() {
        let backend = FakeBackend::new().with_display("A", FakeFeed::new(Size::new(16, 16)));
        let mut orchestrator = orchestrator(backend);
        let err = orchestrator
            .start_capture(
                &[RecordingSource::display("A"), RecordingSource::display("MISSING")],
                &[],
                Arc::new(ErrorSignal::new()),
            )
            .unwrap_err();
        assert!(matches!(err, CaptureError::DeviceNotAvailable(_)));
        assert!(!orchestrator.is_capturing());
        assert!(matches!(
            orchestrator.acquire_next_frame(Duration::from_millis(1)),
            Err(AcquireError::Fatal(_))
        ));
    }

    #[test]
    fn stop_is_idempotent() {
        let mut orchestrator = orchestrator(FakeBackend::new());
        orchestrator.stop_capture();
        orchestrator.stop_capture();

        assert!(orchestrator
            .start_capture(&[], &[], Arc::new(ErrorSignal::new()))
            .is_err());
    }
}
