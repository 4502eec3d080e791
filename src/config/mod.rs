//! Configuration management for Chorus
//!
//! Precedence is env > toml > default. Paths to external renderers and models
//! are checked once by [`Config::validate`] before anything is spawned.

pub mod file;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

use file::ChorusConfigFile;

/// Default generation service URL
pub const DEFAULT_GENERATION_URL: &str = "http://localhost:11434";

/// Default generation model
pub const DEFAULT_MODEL: &str = "moondream";

/// Samples per microphone read
pub const DEFAULT_FRAME_SAMPLES: usize = 4000;

/// Chorus configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Generation service
    pub generation: GenerationConfig,

    /// Speech synthesis renderer
    pub synthesis: SynthesisConfig,

    /// Voice conversion renderer, if enabled
    pub conversion: Option<ConversionConfig>,

    /// Speech recognition
    pub recognition: RecognitionConfig,

    /// Sentence segmentation
    pub segmenter: SegmenterConfig,

    /// Directory for rendered audio; a temporary directory when unset
    pub work_dir: Option<PathBuf>,
}

/// Generation service configuration
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Base URL of the service
    pub url: String,

    /// Model identifier
    pub model: String,

    /// Optional system prompt
    pub system: Option<String>,

    /// Display name; the model name when unset
    pub bot_name: Option<String>,
}

impl GenerationConfig {
    /// Name printed before each response
    #[must_use]
    pub fn bot_name(&self) -> &str {
        self.bot_name.as_deref().unwrap_or(&self.model)
    }
}

/// Speech synthesis renderer configuration
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Renderer executable
    pub executable: PathBuf,

    /// Voice model file
    pub model: PathBuf,

    /// Time allowed per segment
    pub timeout: Duration,
}

/// Voice conversion renderer configuration
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    /// Python interpreter
    pub python: PathBuf,

    /// Conversion CLI script
    pub script: PathBuf,

    /// Install root, used as working directory so relative assets resolve
    pub root: PathBuf,

    /// Trained voice identifier (file name, not a path)
    pub model_name: String,

    /// Retrieval index file
    pub index_path: PathBuf,

    /// Pitch extraction method
    pub f0_method: String,

    /// Compute device
    pub device: String,

    /// Sample rate expected by the converter
    pub sample_rate: u32,

    /// Re-encoder executable
    pub ffmpeg: PathBuf,

    /// Time allowed per segment
    pub timeout: Duration,

    /// Extra environment for the converter
    pub env: BTreeMap<String, String>,
}

/// Speech recognition configuration
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    /// Recognizer model directory; voice mode is unavailable without it
    pub model_dir: Option<PathBuf>,

    /// Samples per microphone read
    pub frame_samples: usize,
}

/// Sentence segmentation configuration
#[derive(Debug, Clone, Default)]
pub struct SegmenterConfig {
    /// Soft cap on unpunctuated segment length
    pub max_chars: Option<usize>,
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if the file is unreadable or required keys are missing
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with environment overrides
    ///
    /// # Errors
    ///
    /// Returns error if a required key is missing
    pub fn resolve(fc: ChorusConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let generation = GenerationConfig {
            url: env("CHORUS_GENERATION_URL")
                .or(fc.generation.url)
                .unwrap_or_else(|| DEFAULT_GENERATION_URL.to_string()),
            model: env("CHORUS_MODEL")
                .or(fc.generation.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            system: fc.generation.system,
            bot_name: fc.generation.bot_name,
        };

        let synthesis = SynthesisConfig {
            executable: env("CHORUS_PIPER_EXE")
                .or(fc.synthesis.executable)
                .map_or_else(|| PathBuf::from("piper"), PathBuf::from),
            model: env("CHORUS_PIPER_MODEL")
                .or(fc.synthesis.model)
                .map(PathBuf::from)
                .ok_or_else(|| {
                    Error::Config(
                        "synthesis.model is required (or set CHORUS_PIPER_MODEL)".to_string(),
                    )
                })?,
            timeout: Duration::from_secs(fc.synthesis.timeout_secs.unwrap_or(60)),
        };

        let conversion = fc.conversion.map(resolve_conversion).transpose()?;

        let recognition = RecognitionConfig {
            model_dir: env("CHORUS_VOSK_MODEL")
                .or(fc.recognition.model_dir)
                .map(PathBuf::from),
            frame_samples: fc
                .recognition
                .frame_samples
                .unwrap_or(DEFAULT_FRAME_SAMPLES),
        };

        if recognition.frame_samples == 0 {
            return Err(Error::Config(
                "recognition.frame_samples must be positive".to_string(),
            ));
        }

        Ok(Self {
            generation,
            synthesis,
            conversion,
            recognition,
            segmenter: SegmenterConfig {
                max_chars: fc.segmenter.max_chars,
            },
            work_dir: env("CHORUS_WORK_DIR").or(fc.work_dir).map(PathBuf::from),
        })
    }

    /// Check every renderer and model path, resolving bare program names
    /// against `PATH`
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first missing path
    pub fn validate(&mut self) -> Result<()> {
        self.synthesis.executable =
            resolve_program("synthesis.executable", &self.synthesis.executable)?;
        self.synthesis.model = require_file("synthesis.model", &self.synthesis.model)?;

        // Converters run with their install root as cwd, so keep paths absolute
        if let Some(conversion) = self.conversion.as_mut() {
            conversion.python = resolve_program("conversion.python", &conversion.python)?;
            conversion.ffmpeg = resolve_program("conversion.ffmpeg", &conversion.ffmpeg)?;
            conversion.script = require_file("conversion.script", &conversion.script)?;
            conversion.index_path = require_file("conversion.index_path", &conversion.index_path)?;
            conversion.root = require_dir("conversion.root", &conversion.root)?;
        }

        self.recognition.model_dir = self
            .recognition
            .model_dir
            .as_deref()
            .map(|dir| require_dir("recognition.model_dir", dir))
            .transpose()?;

        if let Some(dir) = &self.work_dir {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::Config(format!("work_dir {} is not usable: {e}", dir.display()))
            })?;
        }

        tracing::debug!(
            synthesis = %self.synthesis.executable.display(),
            conversion = self.conversion.is_some(),
            recognition = self.recognition.model_dir.is_some(),
            "configuration validated"
        );

        Ok(())
    }
}

fn resolve_conversion(fc: file::ConversionFileConfig) -> Result<ConversionConfig> {
    let script = fc.script.map(PathBuf::from).ok_or_else(|| {
        Error::Config("conversion.script is required when [conversion] is present".to_string())
    })?;
    let script = absolute("conversion.script", &script)?;
    let model_name = fc.model_name.ok_or_else(|| {
        Error::Config("conversion.model_name is required when [conversion] is present".to_string())
    })?;
    let index_path = fc.index_path.map(PathBuf::from).ok_or_else(|| {
        Error::Config("conversion.index_path is required when [conversion] is present".to_string())
    })?;

    // The CLI lives in <root>/tools/, assets resolve from <root>
    let root = match fc.root {
        Some(root) => PathBuf::from(root),
        None => script
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                Error::Config(format!(
                    "cannot derive conversion.root from {}",
                    script.display()
                ))
            })?,
    };

    Ok(ConversionConfig {
        python: fc
            .python
            .map_or_else(|| PathBuf::from("python"), PathBuf::from),
        script,
        root,
        model_name,
        index_path,
        f0_method: fc.f0_method.unwrap_or_else(|| "rmvpe".to_string()),
        device: fc.device.unwrap_or_else(|| "cpu".to_string()),
        sample_rate: fc.sample_rate.unwrap_or(44_100),
        ffmpeg: fc
            .ffmpeg
            .map_or_else(|| PathBuf::from("ffmpeg"), PathBuf::from),
        timeout: Duration::from_secs(fc.timeout_secs.unwrap_or(180)),
        env: fc.env,
    })
}

/// Resolve a program given as a path or as a bare name on `PATH`
fn resolve_program(key: &str, program: &Path) -> Result<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return require_file(key, program);
    }

    which::which(program)
        .map_err(|e| Error::Config(format!("{key}: {} not found on PATH: {e}", program.display())))
}

/// Absolute path of an existing file
fn require_file(key: &str, path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        absolute(key, path)
    } else {
        Err(Error::Config(format!("{key}: file not found at {}", path.display())))
    }
}

/// Absolute path of an existing directory
fn require_dir(key: &str, path: &Path) -> Result<PathBuf> {
    if path.is_dir() {
        absolute(key, path)
    } else {
        Err(Error::Config(format!(
            "{key}: directory not found at {}",
            path.display()
        )))
    }
}

/// Symlinks are kept: a virtualenv interpreter must run through its own link
fn absolute(key: &str, path: &Path) -> Result<PathBuf> {
    std::path::absolute(path)
        .map_err(|e| Error::Config(format!("{key}: cannot resolve {}: {e}", path.display())))
}
