//! Chorus - spoken conversations with a local language model
//!
//! This library provides the pieces of a voice chat loop:
//! - Streaming token generation from a local model server
//! - Sentence segmentation of the token stream
//! - Speech rendering through external synthesis and voice-conversion tools
//! - Microphone capture with a frame-based recognizer
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               InteractionController                  │
//! │        typed lines  │  CaptureSession (voice)        │
//! └────────────────────┬────────────────────────────────┘
//!                      │ Utterance
//! ┌────────────────────▼────────────────────────────────┐
//! │               ResponseOrchestrator                   │
//! │  GenerationClient → TextSegmenter → display sink     │
//! └────────────────────┬────────────────────────────────┘
//!                      │ Segment
//! ┌────────────────────▼────────────────────────────────┐
//! │   AudioRenderer (synthesis → preprocess → convert)   │
//! │                  → Player (speakers)                 │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod capture;
pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod generation;
pub mod orchestrator;
pub mod playback;
pub mod render;
pub mod segmenter;
pub mod utterance;

pub use capture::{CaptureBackend, CaptureSession, DeviceBackend, RecognitionModel};
pub use config::Config;
pub use controller::{ExitReason, InteractionController, Mode};
pub use display::{DisplaySink, TerminalDisplay};
pub use error::{Error, Result};
pub use generation::{GenerationClient, TokenEvent, TokenSource};
pub use orchestrator::{ResponseOrchestrator, ResponseReport};
pub use playback::{CpalPlayback, Player, UnavailablePlayback};
pub use render::{AudioArtifact, AudioRenderer, Renderer};
pub use segmenter::{Segment, TextSegmenter};
pub use utterance::{Origin, Utterance};
