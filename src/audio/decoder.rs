//! In-memory audio decoding using the `symphonia` crate.
//!
//! Raw audio fetched from the conversion backend or a mirror is held in memory;
//! this module probes its container, decodes it to interleaved `f32` samples and
//! reports its duration.

use std::io::{Cursor, ErrorKind::UnexpectedEof};

use {
    bytes::Bytes,
    serde::{Deserialize, Serialize},
    symphonia::{
        core::{
            audio::SampleBuffer,
            codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions},
            errors::Error as SymphoniaError,
            formats::{FormatOptions, FormatReader},
            io::{MediaSourceStream, MediaSourceStreamOptions},
            meta::MetadataOptions,
            probe::Hint,
        },
        default::{get_codecs, get_probe},
    },
    thiserror::Error,
    tracing::{debug, warn},
};

/// Error type for audio decoding operations.
#[derive(Error, Debug)]
pub enum DecoderError {
    /// Symphonia decoding error.
    #[error("Decoding error: {0}")]
    SymphoniaError(#[from] SymphoniaError),
    /// No audio track found in the stream.
    #[error("No audio track found")]
    NoAudioTrack,
    /// The stream decoded to no samples.
    #[error("Stream contains no audio")]
    EmptyStream,
}

/// Audio format information extracted during decoding setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u32,
    /// Bits per sample of the source, when the container declares it.
    pub bits_per_sample: Option<u32>,
}

/// Fully decoded audio, interleaved.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Interleaved samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Format of `samples`.
    pub format: AudioFormat,
}

impl DecodedAudio {
    /// Number of frames (samples per channel).
    #[must_use]
    pub fn frames(&self) -> usize {
        match self.format.channels {
            0 => 0,
            ch => self.samples.len() / ch as usize,
        }
    }

    /// Playback duration in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.format.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.format.sample_rate)
    }
}

/// Audio decoder over an in-memory byte buffer.
pub struct AudioDecoder {
    /// The underlying format reader.
    format_reader: Box<dyn FormatReader>,
    /// The active audio decoder.
    decoder: Box<dyn Decoder>,
    /// Container id of the selected audio track.
    track_id: u32,
    /// Audio format declared by the container.
    pub format: AudioFormat,
    /// Total frames declared by the container.
    n_frames: Option<u64>,
}

impl AudioDecoder {
    /// Opens a decoder over `bytes`.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Complete encoded audio stream.
    /// * `extension` - Optional file extension hint (`"m4a"`, `"mp3"`, ...).
    ///
    /// # Errors
    ///
    /// Returns `DecoderError` if:
    /// - The container format is not recognized
    /// - No audio track is found in the stream
    /// - No decoder exists for the track codec
    pub fn from_bytes(bytes: Bytes, extension: Option<&str>) -> Result<Self, DecoderError> {
        let mss = MediaSourceStream::new(
            Box::new(Cursor::new(bytes)),
            MediaSourceStreamOptions::default(),
        );

        let mut hint = Hint::new();
        if let Some(extension) = extension {
            hint.with_extension(extension);
        }

        let probed = get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecoderError::NoAudioTrack)?;

        let codec_params = &track.codec_params;
        let format = AudioFormat {
            sample_rate: codec_params.sample_rate.unwrap_or(0),
            channels: codec_params
                .channels
                .map_or(0, |channels| channels.count() as u32),
            bits_per_sample: codec_params.bits_per_sample,
        };
        let track_id = track.id;
        let n_frames = codec_params.n_frames;

        let decoder = get_codecs().make(codec_params, &DecoderOptions::default())?;

        debug!(
            "Opened audio stream: {} Hz, {} channels, {:?} frames",
            format.sample_rate, format.channels, n_frames
        );

        Ok(AudioDecoder {
            format_reader,
            decoder,
            track_id,
            format,
            n_frames,
        })
    }

    /// Duration declared by the container, without decoding.
    #[must_use]
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.n_frames, self.format.sample_rate) {
            (Some(frames), rate) if rate > 0 => Some(frames as f64 / f64::from(rate)),
            _ => None,
        }
    }

    /// Decodes the whole stream into interleaved `f32` samples.
    ///
    /// Corrupted packets are skipped. The format of the result is taken from the
    /// decoded buffers, which is authoritative when the container omits it.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError` if decoding fails or yields no audio.
    pub fn decode_all(mut self) -> Result<DecodedAudio, DecoderError> {
        let mut samples = Vec::new();
        let mut format = self.format;

        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(reason)) => {
                    warn!("Skipping corrupted packet: {reason}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            format.sample_rate = spec.rate;
            format.channels = spec.channels.count() as u32;

            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buffer.samples());
        }

        if samples.is_empty() || format.channels == 0 {
            return Err(DecoderError::EmptyStream);
        }

        Ok(DecodedAudio { samples, format })
    }
}

/// Decodes a complete in-memory stream.
///
/// # Errors
///
/// Returns `DecoderError` if the stream cannot be decoded.
pub fn decode_bytes(bytes: Bytes, extension: Option<&str>) -> Result<DecodedAudio, DecoderError> {
    AudioDecoder::from_bytes(bytes, extension)?.decode_all()
}

/// Determines the duration of an encoded stream.
///
/// Uses the container's frame count when present and falls back to a full decode.
///
/// # Errors
///
/// Returns `DecoderError` if the stream cannot be opened or decoded.
pub fn probe_duration(bytes: Bytes, extension: Option<&str>) -> Result<f64, DecoderError> {
    let decoder = AudioDecoder::from_bytes(bytes, extension)?;
    match decoder.duration_secs() {
        Some(duration) => Ok(duration),
        None => Ok(decoder.decode_all()?.duration_secs()),
    }
}

/// Builds a 16-bit PCM WAV stream holding a sine tone.
#[cfg(test)]
pub(crate) fn sine_wav(sample_rate: u32, channels: u16, frames: u32) -> Bytes {
    let data_len = frames * u32::from(channels) * 2;
    let mut wav = Vec::with_capacity(44 + data_len as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&(sample_rate * u32::from(channels) * 2).to_le_bytes());
    wav.extend_from_slice(&(channels * 2).to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    for frame in 0..frames {
        let phase = 2.0 * std::f32::consts::PI * 440.0 * frame as f32 / sample_rate as f32;
        let sample = (phase.sin() * 0.5 * f32::from(i16::MAX)) as i16;
        for _ in 0..channels {
            wav.extend_from_slice(&sample.to_le_bytes());
        }
    }
    Bytes::from(wav)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::audio::decoder::{
        AudioDecoder, DecoderError, decode_bytes, probe_duration, sine_wav,
    };

    #[test]
    fn test_decode_wav_to_interleaved_samples() {
        let decoded = decode_bytes(sine_wav(22050, 2, 2205), Some("wav")).unwrap();

        assert_eq!(decoded.format.sample_rate, 22050);
        assert_eq!(decoded.format.channels, 2);
        assert_eq!(decoded.frames(), 2205);
        assert!((decoded.duration_secs() - 0.1).abs() < 1e-6);
        assert!(decoded.samples.iter().all(|s| (-1.0..=1.0).contains(s)));
        assert!(decoded.samples.iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn test_probe_duration_from_container() {
        let decoder = AudioDecoder::from_bytes(sine_wav(8000, 1, 16000), None).unwrap();
        assert_eq!(decoder.format.bits_per_sample, Some(16));

        let duration = probe_duration(sine_wav(8000, 1, 16000), None).unwrap();
        assert!((duration - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let result = decode_bytes(Bytes::from_static(b"definitely not audio"), None);
        assert!(matches!(result, Err(DecoderError::SymphoniaError(_))));
    }
}
