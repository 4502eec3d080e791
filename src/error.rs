//! Error types for Chorus

use thiserror::Error;

/// Result type alias for Chorus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Chorus
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing model, asset or renderer path)
    #[error("configuration error: {0}")]
    Config(String),

    /// Generation stream carried a line that is not an event record
    #[error("decode error: {0}")]
    Decode(String),

    /// Generation stream ended without a completion record
    #[error("generation stream ended before completion")]
    TruncatedStream,

    /// Generation service reported a failure
    #[error("generation error: {0}")]
    Generation(String),

    /// Speech synthesis failed
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Re-encoding ahead of voice conversion failed
    #[error("preprocess error: {0}")]
    Preprocess(String),

    /// Voice conversion failed
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Microphone or recognizer failure
    #[error("capture error: {0}")]
    Capture(String),

    /// Audio decoding or playback error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

