use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::models::error::CaptureError;

/// Process-wide error slot shared by the caller and every capture worker.
///
/// The first error raised wins; later ones are logged and dropped. The caller
/// either polls `error()` or blocks in `wait`.
#[derive(Debug, Default)]
pub struct ErrorSignal {
    error: Mutex<Option<CaptureError>>,
    raised: Condvar,
}

impl ErrorSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, error: CaptureError) {
        let mut slot = self.error.lock();
        if let Some(first) = slot.as_ref() {
            log::debug!("error signal already raised ({}); ignoring {}", first, error);
            return;
        }
        log::error!("capture error raised: {}", error);
        *slot = Some(error);
        self.raised.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        self.error.lock().is_some()
    }

    pub fn error(&self) -> Option<CaptureError> {
        self.error.lock().clone()
    }

    /// Block until an error is raised or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Option<CaptureError> {
        let mut slot = self.error.lock();
        if slot.is_none() {
            self.raised.wait_for(&mut slot, timeout);
        }
        slot.clone()
    }

    /// Clear the slot so the signal can be reused for a new session.
    pub fn reset(&self) {
        *self.error.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn first_error_wins() {
        let signal = ErrorSignal::new();
        signal.raise(CaptureError::SourceFailed("first".into()));
        signal.raise(CaptureError::SourceFailed("second".into()));
        assert_eq!(signal.error(), Some(CaptureError::SourceFailed("first".into())));

        signal.reset();
        assert!(!signal.is_raised());
    }

    #[test]
    fn wait_returns_raised_error() {
        let signal = Arc::new(ErrorSignal::new());
        let raiser = {
            let signal = signal.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                signal.raise(CaptureError::DeviceInvalidated("device removed".into()));
            })
        };
        let error = signal.wait(Duration::from_secs(5));
        raiser.join().unwrap();
        assert_eq!(error, Some(CaptureError::DeviceInvalidated("device removed".into())));
    }

    #[test]
    fn wait_times_out_quietly() {
        let signal = ErrorSignal::new();
        assert_eq!(signal.wait(Duration::from_millis(5)), None);
    }
}
