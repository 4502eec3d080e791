//! Audio playback to speakers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};

use crate::audio;
use crate::render::AudioArtifact;
use crate::{Error, Result};

/// Extra time allowed past the nominal clip length
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Plays rendered artifacts, one at a time
#[async_trait]
pub trait Player: Send + Sync {
    /// Play an artifact to completion
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if the file cannot be decoded or played
    async fn play(&self, artifact: &AudioArtifact) -> Result<()>;
}

/// Plays audio on the default output device
pub struct CpalPlayback {
    config: StreamConfig,
}

impl CpalPlayback {
    /// Probe the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device or f32 stream config is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let default = device
            .default_output_config()
            .map_err(|e| Error::Audio(e.to_string()))?;
        let rate = default.sample_rate();

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| {
                c.sample_format() == SampleFormat::F32
                    && c.min_sample_rate() <= rate
                    && c.max_sample_rate() >= rate
            })
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config.with_sample_rate(rate).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }

    /// Output sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Play mono samples recorded at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if resampling or playback fails
    pub async fn play_samples(&self, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            let samples = audio::resample(&samples, sample_rate, config.sample_rate.0)?;
            play_blocking(&config, samples)
        })
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}

#[async_trait]
impl Player for CpalPlayback {
    async fn play(&self, artifact: &AudioArtifact) -> Result<()> {
        let path = artifact.path.clone();
        let decoded = tokio::task::spawn_blocking(move || audio::read_wav(&path))
            .await
            .map_err(|e| Error::Audio(format!("decode task failed: {e}")))??;

        tracing::debug!(
            path = %artifact.path.display(),
            samples = decoded.samples.len(),
            sample_rate = decoded.sample_rate,
            "playing artifact"
        );

        self.play_samples(decoded.samples, decoded.sample_rate).await
    }
}

/// Stands in for a missing output device; every artifact fails to play
pub struct UnavailablePlayback {
    reason: String,
}

impl UnavailablePlayback {
    /// Report `reason` for every playback attempt
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Player for UnavailablePlayback {
    async fn play(&self, artifact: &AudioArtifact) -> Result<()> {
        Err(Error::Audio(format!(
            "cannot play {}: {}",
            artifact.path.display(),
            self.reason
        )))
    }
}

/// Play samples at the stream's rate, returning once they have drained
fn play_blocking(config: &StreamConfig, samples: Vec<f32>) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let channels = usize::from(config.channels);
    let sample_count = samples.len();

    let samples = Arc::new(samples);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);

        device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);

                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or_else(|| {
                            finished.store(true, Ordering::Release);
                            0.0
                        });
                        frame.fill(sample);

                        if pos < samples.len() {
                            pos += 1;
                        }
                    }

                    position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(config.sample_rate.0.max(1));
    let deadline = Duration::from_millis(duration_ms) + DRAIN_GRACE;
    let start = Instant::now();

    while !finished.load(Ordering::Acquire) {
        if start.elapsed() > deadline {
            tracing::warn!(samples = sample_count, "playback did not drain in time");
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");

    Ok(())
}

/// A short sine tone for checking the output device
#[must_use]
pub fn test_tone(frequency: f32, duration: Duration, sample_rate: u32) -> Vec<f32> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let count = (duration.as_secs_f32() * sample_rate as f32) as usize;

    #[allow(clippy::cast_precision_loss)]
    (0..count)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.3 * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}
