//! TOML configuration file loading
//!
//! Supports `~/.config/chorus/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ChorusConfigFile {
    /// Generation service configuration
    #[serde(default)]
    pub generation: GenerationFileConfig,

    /// Speech synthesis renderer
    #[serde(default)]
    pub synthesis: SynthesisFileConfig,

    /// Voice conversion renderer (disabled when absent)
    #[serde(default)]
    pub conversion: Option<ConversionFileConfig>,

    /// Speech recognition configuration
    #[serde(default)]
    pub recognition: RecognitionFileConfig,

    /// Sentence segmentation configuration
    #[serde(default)]
    pub segmenter: SegmenterFileConfig,

    /// Directory for rendered audio files
    pub work_dir: Option<String>,
}

/// Generation service configuration
#[derive(Debug, Default, Deserialize)]
pub struct GenerationFileConfig {
    /// Base URL (e.g. `http://localhost:11434`)
    pub url: Option<String>,

    /// Model identifier (e.g. "moondream")
    pub model: Option<String>,

    /// Optional system prompt sent with every request
    pub system: Option<String>,

    /// Name printed before each response
    pub bot_name: Option<String>,
}

/// Speech synthesis renderer configuration
#[derive(Debug, Default, Deserialize)]
pub struct SynthesisFileConfig {
    /// Renderer executable (path or name on `PATH`)
    pub executable: Option<String>,

    /// Voice model file
    pub model: Option<String>,

    /// Seconds before the renderer is killed
    pub timeout_secs: Option<u64>,
}

/// Voice conversion renderer configuration
#[derive(Debug, Default, Deserialize)]
pub struct ConversionFileConfig {
    /// Python interpreter running the conversion script
    pub python: Option<String>,

    /// Conversion CLI script
    pub script: Option<String>,

    /// Install root used as working directory
    pub root: Option<String>,

    /// Trained voice identifier
    pub model_name: Option<String>,

    /// Retrieval index file
    pub index_path: Option<String>,

    /// Pitch extraction method
    pub f0_method: Option<String>,

    /// Compute device
    pub device: Option<String>,

    /// Sample rate the converter expects
    pub sample_rate: Option<u32>,

    /// Re-encoder executable
    pub ffmpeg: Option<String>,

    /// Seconds before the converter is killed
    pub timeout_secs: Option<u64>,

    /// Extra environment for the converter process
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Speech recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecognitionFileConfig {
    /// Recognizer model directory
    pub model_dir: Option<String>,

    /// Samples per frame read from the microphone
    pub frame_samples: Option<usize>,
}

/// Sentence segmentation configuration
#[derive(Debug, Default, Deserialize)]
pub struct SegmenterFileConfig {
    /// Soft cap on unpunctuated segment length
    pub max_chars: Option<usize>,
}

/// Load the TOML config file
///
/// An explicit path must exist and parse. The standard path is optional and
/// falls back to `ChorusConfigFile::default()` when missing or broken.
///
/// # Errors
///
/// Returns error if an explicitly given file cannot be read or parsed
pub fn load_config_file(explicit: Option<&Path>) -> Result<ChorusConfigFile> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = parse_config(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(ChorusConfigFile::default());
    };

    if !path.exists() {
        return Ok(ChorusConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(ChorusConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(ChorusConfigFile::default())
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed
pub fn parse_config(content: &str) -> Result<ChorusConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/chorus/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("chorus").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_file() {
        let fc = parse_config(
            r#"
            [generation]
            model = "llama3"

            [synthesis]
            model = "/voices/amy.onnx"
            "#,
        )
        .unwrap();

        assert_eq!(fc.generation.model.as_deref(), Some("llama3"));
        assert!(fc.generation.url.is_none());
        assert_eq!(fc.synthesis.model.as_deref(), Some("/voices/amy.onnx"));
        assert!(fc.conversion.is_none());
    }

    #[test]
    fn test_parse_conversion_env_table() {
        let fc = parse_config(
            r#"
            [conversion]
            script = "/rvc/tools/infer_cli.py"
            model_name = "voice.pth"

            [conversion.env]
            PYTHONIOENCODING = "utf-8"
            "#,
        )
        .unwrap();

        let conversion = fc.conversion.unwrap();
        assert_eq!(conversion.model_name.as_deref(), Some("voice.pth"));
        assert_eq!(
            conversion.env.get("PYTHONIOENCODING").map(String::as_str),
            Some("utf-8")
        );
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let err = load_config_file(Some(Path::new("/nonexistent/chorus.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
