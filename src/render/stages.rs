//! Renderer stages: synthesis, re-encoding and voice conversion

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::ArtifactKind;
use super::process::{self, Invocation};
use crate::config::{ConversionConfig, SynthesisConfig};
use crate::{Error, Result};

/// Time allowed for re-encoding one segment
const PREPROCESS_TIMEOUT: Duration = Duration::from_secs(60);

/// A post-synthesis stage turning one audio file into another
#[async_trait]
pub trait Stage: Send + Sync {
    /// Kind of artifact this stage produces
    fn kind(&self) -> ArtifactKind;

    /// Whether the output only exists to feed the next stage
    fn is_intermediate(&self) -> bool {
        false
    }

    /// Render `input` into `output`
    ///
    /// # Errors
    ///
    /// Returns the stage's error variant on any failure
    async fn run(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Text-to-speech renderer taking text on stdin
pub struct Synthesizer {
    executable: PathBuf,
    model: PathBuf,
    timeout: Duration,
}

impl Synthesizer {
    /// Create a synthesizer from configuration
    #[must_use]
    pub fn new(config: &SynthesisConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            model: config.model.clone(),
            timeout: config.timeout,
        }
    }

    /// Render `text` into a WAV file at `output`
    ///
    /// # Errors
    ///
    /// Returns `Error::Synthesis` if the renderer fails or writes nothing
    pub async fn synthesize(&self, text: &str, output: &Path) -> Result<()> {
        let current_dir = self.executable.parent().unwrap_or_else(|| Path::new("."));

        process::run(Invocation {
            program: &self.executable,
            args: vec![
                "--model".into(),
                self.model.clone().into(),
                "--output_file".into(),
                output.into(),
            ],
            current_dir,
            env: None,
            stdin: Some(text.as_bytes()),
            timeout: self.timeout,
        })
        .await
        .map_err(Error::Synthesis)?;

        expect_output(output).map_err(Error::Synthesis)
    }
}

/// Re-encodes audio to the layout the converter expects
pub struct Preprocess {
    ffmpeg: PathBuf,
    sample_rate: u32,
}

impl Preprocess {
    /// Create a re-encoder targeting mono 16-bit PCM at `sample_rate`
    #[must_use]
    pub const fn new(ffmpeg: PathBuf, sample_rate: u32) -> Self {
        Self {
            ffmpeg,
            sample_rate,
        }
    }
}

#[async_trait]
impl Stage for Preprocess {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Preprocessed
    }

    fn is_intermediate(&self) -> bool {
        true
    }

    async fn run(&self, input: &Path, output: &Path) -> Result<()> {
        let current_dir = output.parent().unwrap_or_else(|| Path::new("."));

        process::run(Invocation {
            program: &self.ffmpeg,
            args: vec![
                "-y".into(),
                "-loglevel".into(),
                "error".into(),
                "-i".into(),
                input.into(),
                "-ar".into(),
                self.sample_rate.to_string().into(),
                "-ac".into(),
                "1".into(),
                "-acodec".into(),
                "pcm_s16le".into(),
                output.into(),
            ],
            current_dir,
            env: None,
            stdin: None,
            timeout: PREPROCESS_TIMEOUT,
        })
        .await
        .map_err(Error::Preprocess)?;

        expect_output(output).map_err(Error::Preprocess)
    }
}

/// Voice conversion through the retrieval-based converter CLI
pub struct VoiceConversion {
    python: PathBuf,
    script: PathBuf,
    root: PathBuf,
    model_name: String,
    index_path: PathBuf,
    f0_method: String,
    device: String,
    timeout: Duration,
    env: BTreeMap<String, String>,
}

impl VoiceConversion {
    /// Create a converter from configuration
    #[must_use]
    pub fn new(config: &ConversionConfig) -> Self {
        Self {
            python: config.python.clone(),
            script: config.script.clone(),
            root: config.root.clone(),
            model_name: config.model_name.clone(),
            index_path: config.index_path.clone(),
            f0_method: config.f0_method.clone(),
            device: config.device.clone(),
            timeout: config.timeout,
            env: config.env.clone(),
        }
    }

    fn args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            self.script.clone().into(),
            "--model_name".into(),
            self.model_name.clone().into(),
            "--index_path".into(),
            self.index_path.clone().into(),
            "--input_path".into(),
            input.into(),
            "--opt_path".into(),
            output.into(),
            "--f0method".into(),
            self.f0_method.clone().into(),
            "--device".into(),
            self.device.clone().into(),
        ]
    }
}

#[async_trait]
impl Stage for VoiceConversion {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Converted
    }

    async fn run(&self, input: &Path, output: &Path) -> Result<()> {
        process::run(Invocation {
            program: &self.python,
            args: self.args(input, output),
            current_dir: &self.root,
            env: Some(&self.env),
            stdin: None,
            timeout: self.timeout,
        })
        .await
        .map_err(Error::Conversion)?;

        expect_output(output).map_err(Error::Conversion)
    }
}

/// A renderer may exit cleanly without writing anything
fn expect_output(output: &Path) -> std::result::Result<(), String> {
    match std::fs::metadata(output) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        Ok(_) => Err(format!("{} is empty", output.display())),
        Err(e) => Err(format!("{} was not written: {e}", output.display())),
    }
}
