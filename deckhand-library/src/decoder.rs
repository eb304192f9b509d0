//! External decoder invocation
//!
//! Compressed containers are not decoded in-process. One `ffmpeg` run per
//! song converts whatever the file holds into canonical PCM (stereo, 16-bit
//! signed little-endian, 48 kHz) piped back as a WAV stream, which is parsed
//! with `hound` and normalised into an `AudioSource`.

use deckhand_audio::{AudioSource, SourceError, SAMPLE_RATE};
use std::io::Cursor;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::debug;

/// Errors from the decode step. Nothing in the mixer changes when a decode
/// fails; the error is surfaced to the caller of load.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The decoder binary could not be started at all.
    #[error("failed to run decoder: {0}")]
    Spawn(#[from] std::io::Error),

    /// The decoder ran but rejected the file.
    #[error("decoder exited with {code}: {stderr}")]
    DecoderFailed { code: i32, stderr: String },

    /// The decoder produced something other than canonical PCM.
    #[error("decoder produced malformed PCM: {0}")]
    MalformedPcm(String),
}

impl From<SourceError> for DecodeError {
    fn from(e: SourceError) -> Self {
        DecodeError::MalformedPcm(e.to_string())
    }
}

impl From<hound::Error> for DecodeError {
    fn from(e: hound::Error) -> Self {
        DecodeError::MalformedPcm(e.to_string())
    }
}

/// Decode any supported container into a normalised `AudioSource`.
pub fn decode_file(file: &Path) -> Result<AudioSource, DecodeError> {
    debug!(file = %file.display(), "decoding");
    let output = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(file)
        .args(["-fflags", "+bitexact", "-flags", "+bitexact"])
        .args(["-acodec", "pcm_s16le"])
        .args(["-ar", "48000"])
        .args(["-ac", "2"])
        .args(["-f", "wav", "pipe:1"])
        .output()?;

    if !output.status.success() {
        return Err(DecodeError::DecoderFailed {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr)
                .lines()
                .last()
                .unwrap_or_default()
                .to_string(),
        });
    }

    source_from_wav(&output.stdout)
}

/// Parse a canonical WAV byte stream into a source, validating the format
/// the decoder was asked for.
pub(crate) fn source_from_wav(bytes: &[u8]) -> Result<AudioSource, DecodeError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    if spec.channels != 2 {
        return Err(DecodeError::MalformedPcm(format!(
            "expected 2 channels, got {}",
            spec.channels
        )));
    }
    if spec.sample_rate != SAMPLE_RATE {
        return Err(DecodeError::MalformedPcm(format!(
            "expected {} Hz, got {}",
            SAMPLE_RATE, spec.sample_rate
        )));
    }
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(DecodeError::MalformedPcm(format!(
            "expected 16-bit signed samples, got {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let samples: Vec<i16> = reader
        .samples::<i16>()
        .collect::<Result<_, _>>()
        .map_err(|e| DecodeError::MalformedPcm(e.to_string()))?;
    Ok(AudioSource::from_pcm(&samples)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(spec: hound::WavSpec, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn canonical_spec() -> hound::WavSpec {
        hound::WavSpec {
            channels: 2,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }

    #[test]
    fn test_parse_canonical_wav() {
        let samples: Vec<i16> = vec![0, 0, 16384, -16384, 32767, -32768];
        let bytes = wav_bytes(canonical_spec(), &samples);
        let source = source_from_wav(&bytes).unwrap();
        assert_eq!(source.frames(), 3);
        // Peak normalised to exactly one.
        let block = source.stream(0, 3);
        let peak = block.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert_eq!(peak, 1.0);
    }

    #[test]
    fn test_rejects_wrong_sample_rate() {
        let mut spec = canonical_spec();
        spec.sample_rate = 44_100;
        let bytes = wav_bytes(spec, &[0, 0]);
        assert!(matches!(
            source_from_wav(&bytes),
            Err(DecodeError::MalformedPcm(_))
        ));
    }

    #[test]
    fn test_rejects_mono() {
        let mut spec = canonical_spec();
        spec.channels = 1;
        let bytes = wav_bytes(spec, &[0, 0]);
        assert!(matches!(
            source_from_wav(&bytes),
            Err(DecodeError::MalformedPcm(_))
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(source_from_wav(b"not a wav file").is_err());
    }
}
