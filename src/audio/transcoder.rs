//! MP3 transcoding of fetched audio into offline artifacts.
//!
//! The pipeline is decode, channel normalization to stereo, resampling to the
//! target rate and LAME encoding at a fixed bitrate. All of it is CPU-bound and
//! runs on a blocking worker.

use {
    bytes::Bytes,
    mp3lame_encoder::{Bitrate, Builder, Encoder, FlushNoGap, InterleavedPcm, Quality},
    thiserror::Error,
    tracing::debug,
};

use crate::audio::{
    decoder::{DecodedAudio, DecoderError, decode_bytes},
    resampler::{AudioResampler, ResamplingError},
};

/// Output channel count.
const CHANNELS: u8 = 2;

/// Frames handed to LAME per encode call.
const ENCODE_CHUNK_FRAMES: usize = 44_100;

/// Error type for transcoding.
#[derive(Error, Debug)]
pub enum TranscodeError {
    /// Source could not be decoded.
    #[error("Decoder error: {0}")]
    DecoderError(#[from] DecoderError),
    /// Sample rate conversion failed.
    #[error("Resampling error: {0}")]
    ResamplingError(#[from] ResamplingError),
    /// LAME rejected its configuration or input.
    #[error("Encoder error: {reason}")]
    EncoderError { reason: String },
    /// Bitrate has no MP3 equivalent.
    #[error("Unsupported bitrate: {0} kbps")]
    UnsupportedBitrate(u32),
}

/// Encoded artifact ready for persistence.
#[derive(Debug, Clone)]
pub struct TranscodedAudio {
    /// Encoded stream.
    pub bytes: Bytes,
    /// Duration of the encoded audio in seconds.
    pub duration_secs: f64,
}

/// Converts raw fetched audio into the offline artifact format.
pub trait Transcoder: Send + Sync {
    /// Transcodes a complete raw stream.
    ///
    /// # Errors
    ///
    /// Returns `TranscodeError` if any stage fails; no partial output is returned.
    fn transcode(&self, raw: Bytes) -> Result<TranscodedAudio, TranscodeError>;
}

/// Stereo MP3 transcoder built on `symphonia`, `rubato` and LAME.
#[derive(Debug, Clone)]
pub struct Mp3Transcoder {
    bitrate_kbps: u32,
    sample_rate: u32,
}

impl Default for Mp3Transcoder {
    fn default() -> Self {
        Self {
            bitrate_kbps: 192,
            sample_rate: 44_100,
        }
    }
}

impl Mp3Transcoder {
    /// Creates a transcoder for the given bitrate and output sample rate.
    ///
    /// # Errors
    ///
    /// Returns `TranscodeError::UnsupportedBitrate` if LAME has no such bitrate.
    pub fn new(bitrate_kbps: u32, sample_rate: u32) -> Result<Self, TranscodeError> {
        bitrate_from_kbps(bitrate_kbps)?;
        Ok(Self {
            bitrate_kbps,
            sample_rate,
        })
    }

    fn create_encoder(&self) -> Result<Encoder, TranscodeError> {
        let encoder_error = |stage: &str, e: &dyn std::fmt::Debug| TranscodeError::EncoderError {
            reason: format!("{stage}: {e:?}"),
        };

        let mut builder = Builder::new().ok_or_else(|| TranscodeError::EncoderError {
            reason: "failed to allocate LAME encoder".to_string(),
        })?;
        builder
            .set_num_channels(CHANNELS)
            .map_err(|e| encoder_error("channels", &e))?;
        builder
            .set_sample_rate(self.sample_rate)
            .map_err(|e| encoder_error("sample rate", &e))?;
        builder
            .set_brate(bitrate_from_kbps(self.bitrate_kbps)?)
            .map_err(|e| encoder_error("bitrate", &e))?;
        builder
            .set_quality(Quality::Best)
            .map_err(|e| encoder_error("quality", &e))?;
        builder.build().map_err(|e| encoder_error("build", &e))
    }

    fn encode(&self, stereo: &[f32]) -> Result<Vec<u8>, TranscodeError> {
        let mut encoder = self.create_encoder()?;
        let chunk_len = ENCODE_CHUNK_FRAMES * usize::from(CHANNELS);

        let frames = stereo.len() / usize::from(CHANNELS);
        let mut mp3 = Vec::with_capacity(frames * 5 / 4 + 7200);

        for chunk in stereo.chunks(chunk_len) {
            let chunk_frames = chunk.len() / usize::from(CHANNELS);
            mp3.reserve(chunk_frames * 5 / 4 + 7200);
            let written = encoder
                .encode(InterleavedPcm(chunk), mp3.spare_capacity_mut())
                .map_err(|e| TranscodeError::EncoderError {
                    reason: format!("encode: {e:?}"),
                })?;
            // SAFETY: LAME initialized exactly `written` bytes of the spare capacity.
            unsafe {
                mp3.set_len(mp3.len() + written);
            }
        }

        mp3.reserve(7200);
        let written = encoder
            .flush::<FlushNoGap>(mp3.spare_capacity_mut())
            .map_err(|e| TranscodeError::EncoderError {
                reason: format!("flush: {e:?}"),
            })?;
        // SAFETY: as above, for the flushed tail.
        unsafe {
            mp3.set_len(mp3.len() + written);
        }

        Ok(mp3)
    }
}

impl Transcoder for Mp3Transcoder {
    fn transcode(&self, raw: Bytes) -> Result<TranscodedAudio, TranscodeError> {
        let raw_len = raw.len();
        let decoded = decode_bytes(raw, None)?;
        debug!(
            "Transcoding {} bytes: {} Hz, {} channels, {:.1}s",
            raw_len,
            decoded.format.sample_rate,
            decoded.format.channels,
            decoded.duration_secs()
        );

        let source_rate = decoded.format.sample_rate;
        let mut stereo = to_stereo(&decoded);

        if source_rate != self.sample_rate {
            let mut resampler =
                AudioResampler::new(source_rate, self.sample_rate, usize::from(CHANNELS))?;
            stereo = resampler.resample_all(&stereo)?;
        }

        let duration_secs =
            (stereo.len() / usize::from(CHANNELS)) as f64 / f64::from(self.sample_rate);
        let mp3 = self.encode(&stereo)?;
        debug!("Encoded {} bytes at {} kbps", mp3.len(), self.bitrate_kbps);

        Ok(TranscodedAudio {
            bytes: Bytes::from(mp3),
            duration_secs,
        })
    }
}

/// Maps a kbps value onto a LAME bitrate.
///
/// # Errors
///
/// Returns `TranscodeError::UnsupportedBitrate` for values LAME cannot produce.
pub fn bitrate_from_kbps(kbps: u32) -> Result<Bitrate, TranscodeError> {
    match kbps {
        96 => Ok(Bitrate::Kbps96),
        128 => Ok(Bitrate::Kbps128),
        160 => Ok(Bitrate::Kbps160),
        192 => Ok(Bitrate::Kbps192),
        256 => Ok(Bitrate::Kbps256),
        320 => Ok(Bitrate::Kbps320),
        other => Err(TranscodeError::UnsupportedBitrate(other)),
    }
}

/// Converts interleaved audio of any channel count into interleaved stereo.
///
/// Mono is duplicated. Wider layouts fold even channels into the left output
/// and odd channels into the right.
fn to_stereo(decoded: &DecodedAudio) -> Vec<f32> {
    let channels = decoded.format.channels as usize;
    match channels {
        2 => decoded.samples.clone(),
        1 => decoded.samples.iter().flat_map(|&s| [s, s]).collect(),
        _ => {
            let left_count = channels.div_ceil(2) as f32;
            let right_count = (channels / 2) as f32;
            decoded
                .samples
                .chunks_exact(channels)
                .flat_map(|frame| {
                    let left: f32 = frame.iter().step_by(2).sum();
                    let right: f32 = frame.iter().skip(1).step_by(2).sum();
                    [left / left_count, right / right_count]
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::audio::{
        decoder::{AudioFormat, DecodedAudio, decode_bytes, sine_wav},
        transcoder::{
            Mp3Transcoder, TranscodeError, Transcoder, bitrate_from_kbps, to_stereo,
        },
    };

    fn decoded(samples: Vec<f32>, channels: u32) -> DecodedAudio {
        DecodedAudio {
            samples,
            format: AudioFormat {
                sample_rate: 44_100,
                channels,
                bits_per_sample: None,
            },
        }
    }

    #[test]
    fn test_mono_is_duplicated() {
        assert_eq!(
            to_stereo(&decoded(vec![0.1, 0.2], 1)),
            vec![0.1, 0.1, 0.2, 0.2]
        );
    }

    #[test]
    fn test_multichannel_is_folded() {
        let stereo = to_stereo(&decoded(vec![0.2, 0.4, 0.6, 0.8], 4));
        assert_eq!(stereo.len(), 2);
        assert!((stereo[0] - 0.4).abs() < 1e-6);
        assert!((stereo[1] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_bitrate_mapping() {
        assert!(bitrate_from_kbps(192).is_ok());
        assert!(matches!(
            bitrate_from_kbps(200),
            Err(TranscodeError::UnsupportedBitrate(200))
        ));
        assert!(Mp3Transcoder::new(64, 44_100).is_err());
    }

    #[test]
    fn test_transcode_wav_to_stereo_mp3() {
        let transcoder = Mp3Transcoder::default();
        let output = transcoder.transcode(sine_wav(22_050, 1, 22_050)).unwrap();

        assert!((output.duration_secs - 1.0).abs() < 1e-3);
        assert!(!output.bytes.is_empty());

        let reread = decode_bytes(output.bytes, Some("mp3")).unwrap();
        assert_eq!(reread.format.sample_rate, 44_100);
        assert_eq!(reread.format.channels, 2);
        assert!((reread.duration_secs() - 1.0).abs() < 0.2);
    }

    #[test]
    fn test_transcode_rejects_garbage() {
        let result = Mp3Transcoder::default().transcode(Bytes::from_static(&[0u8; 64]));
        assert!(matches!(result, Err(TranscodeError::DecoderError(_))));
    }
}
