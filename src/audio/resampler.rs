//! High-quality sample rate conversion for offline transcoding.
//!
//! This module provides sample rate conversion using the `rubato` crate, which
//! implements high-quality FFT resampling.

use std::{
    error::Error,
    fmt::{Display, Formatter, Result as StdResult},
};

use {
    rubato::{FftFixedIn, Resampler},
    tracing::debug,
};

/// Error type for resampling operations.
#[derive(Debug)]
pub enum ResamplingError {
    /// Rubato resampling error.
    RubatoError(String),
    /// Invalid configuration.
    InvalidConfiguration(String),
}

impl Display for ResamplingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> StdResult {
        match self {
            ResamplingError::RubatoError(msg) => write!(f, "Rubato error: {}", msg),
            ResamplingError::InvalidConfiguration(msg) => {
                write!(f, "Invalid configuration: {}", msg)
            }
        }
    }
}

impl Error for ResamplingError {}

/// Audio resampler using rubato.
///
/// This struct handles sample rate conversion between source and target sample
/// rates, maintaining proper channel layout and timing.
pub struct AudioResampler {
    /// Rubato resampler instance.
    resampler: FftFixedIn<f32>,
    /// Source sample rate in Hz.
    source_rate: u32,
    /// Target sample rate in Hz.
    target_rate: u32,
    /// Number of channels.
    channels: usize,
    /// Fixed input chunk size per channel expected by rubato.
    chunk_size: usize,
    /// Accumulated interleaved input buffer (may hold partial frames).
    input_buffer: Vec<f32>,
    /// Output buffer for resampled data.
    output_buffer: Vec<f32>,
}

impl AudioResampler {
    /// Creates a new audio resampler.
    ///
    /// # Arguments
    ///
    /// * `source_rate` - Source sample rate in Hz.
    /// * `target_rate` - Target sample rate in Hz.
    /// * `channels` - Number of audio channels.
    ///
    /// # Errors
    ///
    /// Returns `ResamplingError` if the resampler cannot be created or if rates are invalid.
    pub fn new(
        source_rate: u32,
        target_rate: u32,
        channels: usize,
    ) -> Result<Self, ResamplingError> {
        if source_rate == 0 || target_rate == 0 {
            return Err(ResamplingError::InvalidConfiguration(
                "Sample rates must be greater than 0".to_string(),
            ));
        }

        if source_rate == target_rate {
            return Err(ResamplingError::InvalidConfiguration(
                "Source and target rates must be different".to_string(),
            ));
        }

        if channels == 0 {
            return Err(ResamplingError::InvalidConfiguration(
                "Channel count must be greater than 0".to_string(),
            ));
        }

        let chunk_size = calculate_chunk_size(source_rate, target_rate);

        let resampler = FftFixedIn::<f32>::new(
            source_rate as usize,
            target_rate as usize,
            chunk_size,
            1, // sub_chunks
            channels,
        )
        .map_err(|e| ResamplingError::RubatoError(e.to_string()))?;

        debug!(
            "Created resampler: {} Hz -> {} Hz, {} channels, chunk size: {}",
            source_rate, target_rate, channels, chunk_size
        );

        Ok(AudioResampler {
            resampler,
            source_rate,
            target_rate,
            channels,
            chunk_size,
            input_buffer: Vec::with_capacity(chunk_size * channels),
            output_buffer: Vec::new(),
        })
    }

    /// Resamples a block of audio samples.
    ///
    /// Input that does not fill a whole chunk is kept for the next call.
    ///
    /// # Arguments
    ///
    /// * `input_samples` - Input samples in interleaved format [L, R, L, R, ...].
    ///
    /// # Errors
    ///
    /// Returns `ResamplingError` if resampling fails.
    pub fn resample_block(&mut self, input_samples: &[f32]) -> Result<Vec<f32>, ResamplingError> {
        if input_samples.is_empty() {
            return Ok(Vec::new());
        }

        self.input_buffer.extend_from_slice(input_samples);
        self.output_buffer.clear();

        let ch = self.channels;
        let needed_frames = self.chunk_size;
        let mut available_frames = self.input_buffer.len() / ch;

        while available_frames >= needed_frames {
            let frame_samples = &self.input_buffer[..needed_frames * ch];
            let mut planar_in: Vec<Vec<f32>> =
                (0..ch).map(|_| Vec::with_capacity(needed_frames)).collect();
            for frame in frame_samples.chunks_exact(ch) {
                for (c, plane) in planar_in.iter_mut().enumerate() {
                    plane.push(frame[c]);
                }
            }

            let in_refs: Vec<&[f32]> = planar_in.iter().map(|v| v.as_slice()).collect();
            let planar_out = self
                .resampler
                .process(&in_refs, None)
                .map_err(|e| ResamplingError::RubatoError(e.to_string()))?;

            let out_frames = planar_out.first().map_or(0, Vec::len);
            for i in 0..out_frames {
                for plane in &planar_out {
                    self.output_buffer.push(plane[i]);
                }
            }

            self.input_buffer.drain(0..needed_frames * ch);
            available_frames = self.input_buffer.len() / ch;
        }

        Ok(self.output_buffer.clone())
    }

    /// Resamples a complete signal.
    ///
    /// The tail is flushed with silence and the filter delay is removed, so the
    /// result holds exactly the expected number of frames.
    ///
    /// # Errors
    ///
    /// Returns `ResamplingError` if resampling fails.
    pub fn resample_all(&mut self, input_samples: &[f32]) -> Result<Vec<f32>, ResamplingError> {
        let ch = self.channels;
        let expected = self.expected_output_size(input_samples.len() / ch);
        let delay = self.resampler.output_delay();

        let mut output = self.resample_block(input_samples)?;
        let silence = vec![0.0; self.chunk_size * ch];
        while output.len() / ch < delay + expected {
            let block = self.resample_block(&silence)?;
            if block.is_empty() {
                break;
            }
            output.extend_from_slice(&block);
        }

        output.drain(..(delay * ch).min(output.len()));
        output.truncate(expected * ch);
        Ok(output)
    }

    /// Gets the expected output size for a given input size.
    ///
    /// # Arguments
    ///
    /// * `input_size` - Number of input samples (per channel).
    ///
    /// # Returns
    ///
    /// Expected number of output samples (per channel).
    pub fn expected_output_size(&self, input_size: usize) -> usize {
        let in_rate = self.source_rate as u64;
        let out_rate = self.target_rate as u64;
        ((input_size as u64 * out_rate) / in_rate) as usize
    }
}

/// Calculates an appropriate chunk size for resampling based on sample rates.
fn calculate_chunk_size(source_rate: u32, target_rate: u32) -> usize {
    let gcd = gcd(source_rate, target_rate);
    let lcm = (source_rate as u64 * target_rate as u64) / gcd as u64;

    let base_chunk = (lcm / source_rate as u64).min(4096) as usize;

    // At least 256 frames per chunk
    base_chunk.clamp(256, 8192)
}

/// Calculates the greatest common divisor of two numbers.
fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}
