//! Audio rendering for speakable segments
//!
//! A segment is synthesized to speech first, then pushed through an ordered
//! list of post-processing stages. Synthesis is required; later stages are
//! best effort and a failure falls back to the last playable artifact.

mod process;
mod stages;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::config::Config;
use crate::segmenter::Segment;
use crate::{Error, Result};

pub use stages::{Preprocess, Stage, Synthesizer, VoiceConversion};

/// Which stage produced an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Raw synthesis output
    Synthesized,
    /// Re-encoded for conversion
    Preprocessed,
    /// Voice-converted output
    Converted,
}

impl ArtifactKind {
    /// File name suffix for this kind's output
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Synthesized => "tts",
            Self::Preprocessed => "clean",
            Self::Converted => "converted",
        }
    }
}

/// Rendered audio ready for playback
#[derive(Debug)]
pub struct AudioArtifact {
    /// WAV file to play
    pub path: PathBuf,

    /// Stage that produced `path`
    pub kind: ArtifactKind,

    /// Other files created while rendering, removed with the artifact
    pub scratch: Vec<PathBuf>,
}

impl AudioArtifact {
    /// Wrap a freshly rendered file
    #[must_use]
    pub const fn new(path: PathBuf, kind: ArtifactKind) -> Self {
        Self {
            path,
            kind,
            scratch: Vec::new(),
        }
    }

    /// Replace the playable file with a later stage's output
    fn promote(&mut self, path: PathBuf, kind: ArtifactKind) {
        let previous = std::mem::replace(&mut self.path, path);
        self.scratch.push(previous);
        self.kind = kind;
    }

    /// Delete the artifact and its scratch files
    pub fn discard(self) {
        for path in self.scratch.iter().chain(std::iter::once(&self.path)) {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "failed to remove audio file");
                }
            }
        }
    }
}

/// Turns segments into playable audio
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render one segment
    ///
    /// # Errors
    ///
    /// Returns `Error::Synthesis` when no audio could be produced
    async fn render(&self, segment: &Segment) -> Result<AudioArtifact>;
}

/// Synthesis followed by an ordered chain of best-effort stages
pub struct AudioRenderer {
    synthesizer: Synthesizer,
    stages: Vec<Box<dyn Stage>>,
    work_dir: PathBuf,
    sequence: AtomicU64,
}

impl AudioRenderer {
    /// Create a renderer writing into `work_dir`
    ///
    /// # Errors
    ///
    /// Returns error if `work_dir` does not exist
    pub fn new(
        synthesizer: Synthesizer,
        stages: Vec<Box<dyn Stage>>,
        work_dir: &Path,
    ) -> Result<Self> {
        // Converters run from their own install root, so paths must be absolute
        let work_dir = std::fs::canonicalize(work_dir)?;

        Ok(Self {
            synthesizer,
            stages,
            work_dir,
            sequence: AtomicU64::new(0),
        })
    }

    /// Build the stage chain described by configuration
    ///
    /// # Errors
    ///
    /// Returns error if `work_dir` does not exist
    pub fn from_config(config: &Config, work_dir: &Path) -> Result<Self> {
        let mut stages: Vec<Box<dyn Stage>> = Vec::new();

        if let Some(conversion) = &config.conversion {
            stages.push(Box::new(Preprocess::new(
                conversion.ffmpeg.clone(),
                conversion.sample_rate,
            )));
            stages.push(Box::new(VoiceConversion::new(conversion)));
        }

        tracing::debug!(
            stages = stages.len(),
            work_dir = %work_dir.display(),
            "audio renderer initialized"
        );

        Self::new(Synthesizer::new(&config.synthesis), stages, work_dir)
    }

    fn output_path(&self, id: u64, kind: ArtifactKind) -> PathBuf {
        self.work_dir
            .join(format!("segment-{id:05}-{}.wav", kind.suffix()))
    }
}

#[async_trait]
impl Renderer for AudioRenderer {
    async fn render(&self, segment: &Segment) -> Result<AudioArtifact> {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        let synthesized = self.output_path(id, ArtifactKind::Synthesized);
        remove_stale(&synthesized).map_err(|e| {
            Error::Synthesis(format!("failed to clear {}: {e}", synthesized.display()))
        })?;

        if let Err(e) = self.synthesizer.synthesize(&segment.text, &synthesized).await {
            tracing::error!(segment = segment.index, error = %e, "synthesis failed, skipping segment");
            AudioArtifact::new(synthesized, ArtifactKind::Synthesized).discard();
            return Err(e);
        }

        let mut artifact = AudioArtifact::new(synthesized, ArtifactKind::Synthesized);
        let mut input = artifact.path.clone();

        for stage in &self.stages {
            let output = self.output_path(id, stage.kind());

            let result = match remove_stale(&output) {
                Ok(()) => stage.run(&input, &output).await,
                Err(e) => Err(e.into()),
            };

            match result {
                Ok(()) if stage.is_intermediate() => {
                    artifact.scratch.push(output.clone());
                    input = output;
                }
                Ok(()) => {
                    artifact.promote(output.clone(), stage.kind());
                    input = output;
                }
                Err(e) => {
                    tracing::warn!(
                        segment = segment.index,
                        stage = stage.kind().suffix(),
                        error = %e,
                        fallback = artifact.kind.suffix(),
                        "render stage failed, using earlier output"
                    );
                    artifact.scratch.push(output);
                    break;
                }
            }
        }

        tracing::debug!(
            segment = segment.index,
            kind = artifact.kind.suffix(),
            path = %artifact.path.display(),
            "segment rendered"
        );

        Ok(artifact)
    }
}

/// Output names repeat across runs in a persistent work directory
fn remove_stale(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
