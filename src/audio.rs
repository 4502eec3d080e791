//! WAV decoding, sample conversion and resampling

use std::path::Path;

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Resampler input chunk length
const RESAMPLE_CHUNK: usize = 1024;

/// Decoded mono audio
#[derive(Debug, Clone)]
pub struct MonoAudio {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,

    /// Samples per second
    pub sample_rate: u32,
}

/// Read a WAV file, mixing all channels down to mono
///
/// # Errors
///
/// Returns error if the file is not a readable WAV
pub fn read_wav(path: &Path) -> Result<MonoAudio> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| Error::Audio(format!("{}: {e}", path.display())))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| int_to_f32(v, scale)))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    };

    #[allow(clippy::cast_precision_loss)]
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(MonoAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

#[allow(clippy::cast_precision_loss)]
fn int_to_f32(value: i32, scale: f32) -> f32 {
    value as f32 / scale
}

/// Convert an f32 sample in [-1.0, 1.0] to i16
#[must_use]
pub fn f32_to_i16(sample: f32) -> i16 {
    #[allow(clippy::cast_possible_truncation)]
    let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
    value
}

/// Resample mono audio using rubato
///
/// The final partial chunk is zero-padded and the output trimmed back to the
/// expected length, so the tail of the audio is kept.
///
/// # Errors
///
/// Returns error if the resampler cannot be built
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let expected = samples.len() * to_rate as usize / from_rate as usize;
    let mut output = Vec::with_capacity(expected + RESAMPLE_CHUNK);

    for chunk in samples.chunks(RESAMPLE_CHUNK) {
        let mut block = chunk.to_vec();
        block.resize(RESAMPLE_CHUNK, 0.0);

        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    // Push the filter delay out, then drop it from the front
    let delay = resampler.output_delay();
    let flushed = resampler
        .process(&[vec![0.0; RESAMPLE_CHUNK]], None)
        .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
    output.extend_from_slice(&flushed[0]);

    Ok(output.into_iter().skip(delay).take(expected).collect())
}

/// Resamples a continuous stream, keeping filter state between pushes
///
/// Input is processed in fixed chunks; a partial chunk waits for the next push.
pub struct StreamResampler {
    resampler: FftFixedIn<f32>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Create a resampler from `from_rate` to `to_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be built
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler =
            FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
                .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

        Ok(Self {
            resampler,
            pending: Vec::with_capacity(RESAMPLE_CHUNK),
        })
    }

    /// Feed samples, returning whatever output full chunks produced
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut output = Vec::new();
        while self.pending.len() >= RESAMPLE_CHUNK {
            let block: Vec<f32> = self.pending.drain(..RESAMPLE_CHUNK).collect();
            let result = self
                .resampler
                .process(&[block], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            output.extend_from_slice(&result[0]);
        }

        Ok(output)
    }

    /// Drop buffered input and filter history
    pub fn reset(&mut self) {
        self.pending.clear();
        self.resampler.reset();
    }
}
