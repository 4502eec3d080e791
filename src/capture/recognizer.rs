//! Frame-based speech recognizers

use std::path::{Path, PathBuf};
#[cfg(feature = "vosk")]
use std::sync::Arc;

use crate::{Error, Result};

/// Consumes PCM frames and reports finalized text
pub trait Recognizer {
    /// Feed one frame of 16 kHz mono samples
    ///
    /// Returns the finalized text when the frame closes an utterance. The
    /// text may be empty when the engine finalized on silence.
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the engine rejects the frame
    fn accept_frame(&mut self, frame: &[i16]) -> Result<Option<String>>;
}

/// Speech model loaded once at startup and shared by every session
#[derive(Clone)]
pub struct RecognitionModel {
    path: PathBuf,
    #[cfg(feature = "vosk")]
    model: Arc<vosk::Model>,
}

impl RecognitionModel {
    /// Load the model in `dir`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the model cannot be loaded
    #[cfg(feature = "vosk")]
    pub fn load(dir: &Path) -> Result<Self> {
        vosk::set_log_level(vosk::LogLevel::Error);

        let model = vosk::Model::new(dir.to_string_lossy()).ok_or_else(|| {
            Error::Config(format!(
                "recognition.model_dir: failed to load model from {}",
                dir.display()
            ))
        })?;

        tracing::info!(path = %dir.display(), "recognition model loaded");

        Ok(Self {
            path: dir.to_path_buf(),
            model: Arc::new(model),
        })
    }

    /// Record the model directory; recognizers cannot be created
    ///
    /// # Errors
    ///
    /// Never fails in this build
    #[cfg(not(feature = "vosk"))]
    pub fn load(dir: &Path) -> Result<Self> {
        tracing::warn!(
            path = %dir.display(),
            "built without the vosk feature, voice mode is unavailable"
        );

        Ok(Self {
            path: dir.to_path_buf(),
        })
    }

    /// Model directory
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a fresh recognizer for one capture session
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the engine cannot create a recognizer
    #[cfg(feature = "vosk")]
    pub fn recognizer(&self) -> Result<Box<dyn Recognizer>> {
        let inner = vosk::Recognizer::new(&self.model, super::SAMPLE_RATE_HZ)
            .ok_or_else(|| Error::Capture("failed to create recognizer".to_string()))?;

        Ok(Box::new(VoskRecognizer { inner }))
    }

    /// Create a fresh recognizer for one capture session
    ///
    /// # Errors
    ///
    /// Always fails in this build
    #[cfg(not(feature = "vosk"))]
    pub fn recognizer(&self) -> Result<Box<dyn Recognizer>> {
        Err(Error::Capture(format!(
            "speech recognition is not compiled in (model at {})",
            self.path.display()
        )))
    }
}

#[cfg(feature = "vosk")]
struct VoskRecognizer {
    inner: vosk::Recognizer,
}

#[cfg(feature = "vosk")]
impl Recognizer for VoskRecognizer {
    fn accept_frame(&mut self, frame: &[i16]) -> Result<Option<String>> {
        let state = self
            .inner
            .accept_waveform(frame)
            .map_err(|e| Error::Capture(format!("recognizer rejected frame: {e:?}")))?;

        match state {
            vosk::DecodingState::Finalized => {
                let text = self
                    .inner
                    .result()
                    .single()
                    .map(|r| r.text.to_string())
                    .unwrap_or_default();
                Ok(Some(text))
            }
            vosk::DecodingState::Running => Ok(None),
            vosk::DecodingState::Failed => {
                Err(Error::Capture("recognizer failed to decode frame".to_string()))
            }
        }
    }
}
