//! Speech capture loop
//!
//! A [`CaptureSession`] owns a dedicated thread holding the input stream and
//! one recognizer. Each [`CaptureSession::listen`] call drops audio buffered
//! since the previous call, then feeds fixed-size frames to the recognizer
//! until it finalizes non-empty text.

mod device;
mod recognizer;

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::utterance::Utterance;
use crate::{Error, Result};

pub use device::{DeviceBackend, DeviceFrameSource};
pub use recognizer::{RecognitionModel, Recognizer};

/// Capture sample rate
pub const SAMPLE_RATE: u32 = 16_000;

/// Capture sample rate as the recognizer expects it
pub const SAMPLE_RATE_HZ: f32 = 16_000.0;

/// Longest wait for one frame before the cancellation token is checked again
const FRAME_POLL: Duration = Duration::from_millis(100);

/// Blocking reader of fixed-size audio frames
pub trait FrameSource {
    /// Wait up to `timeout` for the next frame
    ///
    /// Returns `None` when no full frame arrived in time.
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the device stops delivering audio
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Vec<i16>>>;

    /// Drop everything captured so far
    fn discard_pending(&mut self);
}

/// Opens the two halves of a capture session
///
/// Both are created on the session thread, so neither needs to be `Send`.
pub trait CaptureBackend: Send + Sync {
    /// Open the frame source
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the device cannot be opened
    fn open_source(&self) -> Result<Box<dyn FrameSource>>;

    /// Create a recognizer with no prior state
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if no recognizer is available
    fn open_recognizer(&self) -> Result<Box<dyn Recognizer>>;
}

/// Read frames until the recognizer finalizes non-empty text
///
/// Returns `None` if `cancel` fires first. Cancellation is observed between
/// frame reads; a partially read frame is dropped.
///
/// # Errors
///
/// Returns `Error::Capture` on device or recognizer failure
pub fn capture_utterance(
    source: &mut dyn FrameSource,
    recognizer: &mut dyn Recognizer,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    while !cancel.is_cancelled() {
        let Some(frame) = source.read_frame(FRAME_POLL)? else {
            continue;
        };

        let Some(text) = recognizer.accept_frame(&frame)? else {
            continue;
        };

        let text = normalize(&text);
        if text.is_empty() {
            tracing::trace!("recognizer finalized silence");
            continue;
        }

        tracing::debug!(text = %text, "utterance recognized");
        return Ok(Some(text));
    }

    Ok(None)
}

/// Trim and lower-case recognized text
#[must_use]
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

type Reply = oneshot::Sender<Result<Utterance>>;

/// One open microphone stream bound to one recognizer
pub struct CaptureSession {
    requests: Option<mpsc::Sender<Reply>>,
    cancel: CancellationToken,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CaptureSession {
    /// Start a session thread and wait for the device and recognizer
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if either cannot be opened
    pub async fn open(backend: Arc<dyn CaptureBackend>) -> Result<Self> {
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (requests, request_rx) = mpsc::channel();

        let thread = {
            let cancel = cancel.clone();
            std::thread::Builder::new()
                .name("chorus-capture".to_string())
                .spawn(move || run_session(backend.as_ref(), &request_rx, ready_tx, &cancel))
                .map_err(|e| Error::Capture(format!("failed to start capture thread: {e}")))?
        };

        let mut session = Self {
            requests: Some(requests),
            cancel,
            thread: Some(thread),
        };

        match ready_rx.await {
            Ok(Ok(())) => {
                tracing::info!("capture session opened");
                Ok(session)
            }
            Ok(Err(e)) => {
                session.shutdown().await;
                Err(e)
            }
            Err(_) => {
                session.shutdown().await;
                Err(Error::Capture("capture thread exited during startup".to_string()))
            }
        }
    }

    /// Block until the next non-empty utterance
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` on device or recognizer failure, or if the
    /// session has ended
    pub async fn listen(&self) -> Result<Utterance> {
        let (reply, response) = oneshot::channel();

        self.requests
            .as_ref()
            .ok_or_else(|| Error::Capture("capture session closed".to_string()))?
            .send(reply)
            .map_err(|_| Error::Capture("capture session ended".to_string()))?;

        response
            .await
            .map_err(|_| Error::Capture("capture session ended".to_string()))?
    }

    /// Stop capturing and release the device
    pub async fn close(mut self) {
        self.shutdown().await;
        tracing::info!("capture session closed");
    }

    async fn shutdown(&mut self) {
        self.cancel.cancel();
        self.requests.take();

        if let Some(thread) = self.thread.take()
            && let Ok(Err(_)) = tokio::task::spawn_blocking(move || thread.join()).await
        {
            tracing::warn!("capture thread panicked");
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn run_session(
    backend: &dyn CaptureBackend,
    requests: &mpsc::Receiver<Reply>,
    ready: oneshot::Sender<Result<()>>,
    cancel: &CancellationToken,
) {
    let opened = backend
        .open_recognizer()
        .and_then(|recognizer| Ok((backend.open_source()?, recognizer)));

    let (mut source, mut recognizer) = match opened {
        Ok(pair) => {
            let _ = ready.send(Ok(()));
            pair
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to open capture session");
            let _ = ready.send(Err(e));
            return;
        }
    };

    while let Ok(reply) = requests.recv() {
        if cancel.is_cancelled() {
            break;
        }

        source.discard_pending();

        match capture_utterance(source.as_mut(), recognizer.as_mut(), cancel) {
            Ok(Some(text)) => {
                // Listener may have given up; the utterance is dropped
                let _ = reply.send(Ok(Utterance::spoken(text)));
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "capture failed");
                let _ = reply.send(Err(e));
                break;
            }
        }
    }

    tracing::debug!("capture thread exiting");
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    struct ScriptedFrames {
        frames: VecDeque<Option<Vec<i16>>>,
        discarded: usize,
    }

    impl FrameSource for ScriptedFrames {
        fn read_frame(&mut self, _timeout: Duration) -> Result<Option<Vec<i16>>> {
            self.frames
                .pop_front()
                .ok_or_else(|| Error::Capture("script exhausted".to_string()))
        }

        fn discard_pending(&mut self) {
            self.discarded += 1;
        }
    }

    struct ScriptedRecognizer {
        results: VecDeque<Option<String>>,
        frames_seen: usize,
    }

    impl Recognizer for ScriptedRecognizer {
        fn accept_frame(&mut self, frame: &[i16]) -> Result<Option<String>> {
            assert_eq!(frame.len(), 4);
            self.frames_seen += 1;
            Ok(self.results.pop_front().flatten())
        }
    }

    fn frames(count: usize) -> ScriptedFrames {
        ScriptedFrames {
            frames: (0..count).map(|_| Some(vec![0; 4])).collect(),
            discarded: 0,
        }
    }

    fn results(script: &[Option<&str>]) -> ScriptedRecognizer {
        ScriptedRecognizer {
            results: script.iter().map(|r| r.map(str::to_string)).collect(),
            frames_seen: 0,
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Disable Voice Control \n"), "disable voice control");
    }

    #[test]
    fn test_returns_first_non_empty_result() {
        let mut source = frames(5);
        let mut recognizer = results(&[None, Some("  "), None, Some("What Time Is It")]);

        let text = capture_utterance(&mut source, &mut recognizer, &CancellationToken::new())
            .unwrap();

        assert_eq!(text.as_deref(), Some("what time is it"));
        assert_eq!(recognizer.frames_seen, 4);
        assert_eq!(source.frames.len(), 1);
    }

    #[test]
    fn test_read_timeouts_keep_waiting() {
        let mut source = ScriptedFrames {
            frames: VecDeque::from([None, None, Some(vec![0; 4])]),
            discarded: 0,
        };
        let mut recognizer = results(&[Some("hello")]);

        let text = capture_utterance(&mut source, &mut recognizer, &CancellationToken::new())
            .unwrap();
        assert_eq!(text.as_deref(), Some("hello"));
    }

    #[test]
    fn test_cancelled_before_read() {
        let mut source = frames(3);
        let mut recognizer = results(&[Some("hello")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let text = capture_utterance(&mut source, &mut recognizer, &cancel).unwrap();
        assert!(text.is_none());
        assert_eq!(recognizer.frames_seen, 0);
    }

    #[test]
    fn test_device_failure_is_error() {
        let mut source = frames(1);
        let mut recognizer = results(&[None]);

        let err = capture_utterance(&mut source, &mut recognizer, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::Capture(_)));
    }
}
