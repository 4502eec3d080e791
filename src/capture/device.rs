//! Microphone frames from the default input device

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfigRange};

use super::recognizer::{RecognitionModel, Recognizer};
use super::{CaptureBackend, FrameSource, SAMPLE_RATE};
use crate::audio::{self, StreamResampler};
use crate::{Error, Result};

/// Reads fixed-size 16 kHz mono frames from the default input device
///
/// Devices that cannot capture at 16 kHz are opened at their default rate
/// and the stream is resampled as it arrives.
pub struct DeviceFrameSource {
    _stream: Stream,
    chunks: Receiver<Vec<f32>>,
    resampler: Option<StreamResampler>,
    frame_samples: usize,
    pending: Vec<f32>,
}

impl DeviceFrameSource {
    /// Open the default input device and start capturing
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if no usable input device is available
    pub fn open(frame_samples: usize) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Capture("no input device available".to_string()))?;

        let config = input_config(&device)?;
        let channels = usize::from(config.channels.max(1));
        let device_rate = config.sample_rate.0;

        let (sender, chunks) = mpsc::channel();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    #[allow(clippy::cast_precision_loss)]
                    let mono: Vec<f32> = if channels == 1 {
                        data.to_vec()
                    } else {
                        data.chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                            .collect()
                    };
                    // Receiver gone means the session is closing
                    let _ = sender.send(mono);
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Capture(e.to_string()))?;

        let resampler = if device_rate == SAMPLE_RATE {
            None
        } else {
            Some(
                StreamResampler::new(device_rate, SAMPLE_RATE)
                    .map_err(|e| Error::Capture(e.to_string()))?,
            )
        };

        stream.play().map_err(|e| Error::Capture(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = device_rate,
            channels,
            frame_samples,
            "audio capture started"
        );

        Ok(Self {
            _stream: stream,
            chunks,
            resampler,
            frame_samples,
            pending: Vec::new(),
        })
    }
}

impl FrameSource for DeviceFrameSource {
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Vec<i16>>> {
        let deadline = Instant::now() + timeout;

        while self.pending.len() < self.frame_samples {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let chunk = match self.chunks.recv_timeout(remaining) {
                Ok(chunk) => chunk,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Capture("input stream closed".to_string()));
                }
            };

            match self.resampler.as_mut() {
                Some(resampler) => {
                    let resampled = resampler
                        .push(&chunk)
                        .map_err(|e| Error::Capture(e.to_string()))?;
                    self.pending.extend_from_slice(&resampled);
                }
                None => self.pending.extend_from_slice(&chunk),
            }
        }

        Ok(Some(
            self.pending
                .drain(..self.frame_samples)
                .map(audio::f32_to_i16)
                .collect(),
        ))
    }

    fn discard_pending(&mut self) {
        let mut dropped = self.pending.len();
        self.pending.clear();
        while let Ok(chunk) = self.chunks.try_recv() {
            dropped += chunk.len();
        }
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }

        if dropped > 0 {
            tracing::trace!(samples = dropped, "discarded buffered input");
        }
    }
}

/// Prefer 16 kHz f32 with the fewest channels, else the device default rate
fn input_config(device: &cpal::Device) -> Result<StreamConfig> {
    let supported: Vec<SupportedStreamConfigRange> = device
        .supported_input_configs()
        .map_err(|e| Error::Capture(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    let pick = |rate: SampleRate| {
        supported
            .iter()
            .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
            .min_by_key(|c| c.channels())
            .cloned()
            .map(|c| c.with_sample_rate(rate).config())
    };

    if let Some(config) = pick(SampleRate(SAMPLE_RATE)) {
        return Ok(config);
    }

    let default_rate = device
        .default_input_config()
        .map_err(|e| Error::Capture(e.to_string()))?
        .sample_rate();

    pick(default_rate).ok_or_else(|| Error::Capture("no suitable input config found".to_string()))
}

/// Default input device paired with a recognition model
pub struct DeviceBackend {
    model: Option<RecognitionModel>,
    frame_samples: usize,
}

impl DeviceBackend {
    /// Create a backend; without a model, sessions fail to open
    #[must_use]
    pub const fn new(model: Option<RecognitionModel>, frame_samples: usize) -> Self {
        Self {
            model,
            frame_samples,
        }
    }
}

impl CaptureBackend for DeviceBackend {
    fn open_source(&self) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(DeviceFrameSource::open(self.frame_samples)?))
    }

    fn open_recognizer(&self) -> Result<Box<dyn Recognizer>> {
        self.model
            .as_ref()
            .ok_or_else(|| Error::Capture("no recognition model configured".to_string()))?
            .recognizer()
    }
}
