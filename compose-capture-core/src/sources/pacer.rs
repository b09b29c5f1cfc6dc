use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::models::error::CaptureError;
use crate::models::geometry::{Point, Size};
use crate::traits::capture_source::SourceFrame;
use crate::traits::source_backend::{FrameProvider, RawFrame};

/// Cadence used when neither the media nor the frame says otherwise.
const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);
/// How long the pacer thread waits on its provider per poll.
const PROVIDER_POLL: Duration = Duration::from_millis(10);

type FrameResult = Result<RawFrame, CaptureError>;

/// Drives a file or camera provider on its own thread at the media's cadence.
///
/// Frames are handed over through a one-slot channel, so a slow consumer
/// holds the pacer back instead of queueing frames. At end of stream the
/// provider is rewound; providers that cannot rewind keep their last frame
/// on screen and the pacer idles until stopped.
pub struct FramePacer {
    frames: Receiver<FrameResult>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    native_size: Size,
    origin: Point,
}

impl FramePacer {
    pub fn spawn(label: &str, provider: Box<dyn FrameProvider>) -> Result<Self, CaptureError> {
        let native_size = provider.native_size();
        let origin = provider.origin();
        let (frame_tx, frame_rx) = bounded(1);
        let (stop_tx, stop_rx) = bounded(0);

        let handle = thread::Builder::new()
            .name(format!("frame-pacer-{}", label))
            .spawn(move || pace(provider, frame_tx, stop_rx))
            .map_err(|e| CaptureError::WorkerStart(format!("frame pacer: {}", e)))?;

        Ok(Self {
            frames: frame_rx,
            stop: Some(stop_tx),
            handle: Some(handle),
            native_size,
            origin,
        })
    }

    pub fn native_size(&self) -> Size {
        self.native_size
    }

    pub fn origin(&self) -> Point {
        self.origin
    }

    /// Next paced frame, or `Ok(None)` if none is due within `timeout`.
    pub fn recv(&self, timeout: Duration) -> Result<Option<RawFrame>, CaptureError> {
        match self.frames.recv_timeout(timeout) {
            Ok(frame) => frame.map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::SourceFailed("frame pacer stopped".into())),
        }
    }

    pub fn stop(&mut self) {
        // Dropping the sender disconnects the pacer's stop channel.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("frame pacer thread panicked");
            }
        }
    }
}

impl Drop for FramePacer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pacer slot shared by the camera, video and image sources.
#[derive(Default)]
pub(crate) struct PacedSlot {
    pacer: Option<FramePacer>,
}

impl PacedSlot {
    pub(crate) fn start(&mut self, label: &str, provider: Box<dyn FrameProvider>) -> Result<(), CaptureError> {
        self.stop();
        self.pacer = Some(FramePacer::spawn(label, provider)?);
        Ok(())
    }

    pub(crate) fn recv(&self, timeout: Duration) -> Result<Option<SourceFrame>, CaptureError> {
        let pacer = self
            .pacer
            .as_ref()
            .ok_or_else(|| CaptureError::ConfigurationFailed("source not started".into()))?;
        Ok(pacer.recv(timeout)?.map(SourceFrame::from))
    }

    pub(crate) fn native_size(&self) -> Result<Size, CaptureError> {
        self.pacer
            .as_ref()
            .map(FramePacer::native_size)
            .ok_or_else(|| CaptureError::ConfigurationFailed("source not started".into()))
    }

    pub(crate) fn stop(&mut self) {
        if let Some(mut pacer) = self.pacer.take() {
            pacer.stop();
        }
    }
}

fn pace(mut provider: Box<dyn FrameProvider>, frames: Sender<FrameResult>, stop: Receiver<()>) {
    let default_interval = provider
        .frame_rate()
        .filter(|rate| *rate > 0.0)
        .map(|rate| Duration::from_secs_f64(1.0 / rate))
        .unwrap_or(DEFAULT_FRAME_INTERVAL);
    let mut next_due = Instant::now();

    loop {
        match provider.next_frame(PROVIDER_POLL) {
            Ok(Some(frame)) => {
                let interval = frame.duration.unwrap_or(default_interval);
                if !deliver(&frames, &stop, Ok(frame)) {
                    return;
                }
                next_due = (next_due + interval).max(Instant::now());
                match stop.recv_deadline(next_due) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => return,
                }
            }
            Ok(None) => {
                if !matches!(stop.try_recv(), Err(TryRecvError::Empty)) {
                    return;
                }
            }
            Err(CaptureError::EndOfStream) => {
                if let Err(e) = provider.rewind() {
                    log::info!("end of stream, holding last frame ({})", e);
                    let _ = stop.recv();
                    return;
                }
            }
            Err(e) => {
                let recoverable = e.is_recoverable();
                if !deliver(&frames, &stop, Err(e)) || !recoverable {
                    return;
                }
            }
        }
    }
}

/// Block until the consumer takes `frame` or the pacer is stopped.
fn deliver(frames: &Sender<FrameResult>, stop: &Receiver<()>, frame: FrameResult) -> bool {
    crossbeam_channel::select! {
        send(frames, frame) -> sent => sent.is_ok(),
        recv(stop) -> _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedProvider;

    #[test]
    fn delivers_frames_in_order() {
        let provider = ScriptedProvider::counting(Size::new(2, 2), 3).with_frame_rate(200.0);
        let pacer = FramePacer::spawn("test", Box::new(provider)).unwrap();

        let mut seen = Vec::new();
        while seen.len() < 3 {
            if let Some(frame) = pacer.recv(Duration::from_secs(5)).unwrap() {
                seen.push(frame.texture.pixel(0, 0).unwrap()[0]);
            }
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn rewinds_at_end_of_stream() {
        let provider = ScriptedProvider::counting(Size::new(1, 1), 2)
            .with_frame_rate(500.0)
            .rewindable();
        let pacer = FramePacer::spawn("loop", Box::new(provider)).unwrap();

        let mut seen = Vec::new();
        while seen.len() < 5 {
            if let Some(frame) = pacer.recv(Duration::from_secs(5)).unwrap() {
                seen.push(frame.texture.pixel(0, 0).unwrap()[0]);
            }
        }
        assert_eq!(seen, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn holds_when_rewind_is_unsupported() {
        let provider = ScriptedProvider::counting(Size::new(1, 1), 1).with_frame_rate(500.0);
        let mut pacer = FramePacer::spawn("hold", Box::new(provider)).unwrap();

        assert!(pacer.recv(Duration::from_secs(5)).unwrap().is_some());
        assert!(pacer.recv(Duration::from_millis(50)).unwrap().is_none());
        pacer.stop();
        assert!(pacer.recv(Duration::from_millis(5)).is_err());
    }

    #[test]
    fn frame_durations_drive_cadence() {
        let provider = ScriptedProvider::counting(Size::new(1, 1), 2).with_frame_duration(Duration::from_millis(60));
        let pacer = FramePacer::spawn("gif", Box::new(provider)).unwrap();

        assert!(pacer.recv(Duration::from_secs(5)).unwrap().is_some());
        let started = Instant::now();
        assert!(pacer.recv(Duration::from_secs(5)).unwrap().is_some());
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
