//! In-memory audio with bounds-padded random access
//!
//! An `AudioSource` holds a whole song as normalised interleaved-stereo
//! floats at the engine sample rate. Reads outside the signal are padded
//! with silence so callers never have to clamp positions themselves.

use thiserror::Error;

/// Errors raised while building a source from decoder output.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The decoder produced an odd number of samples for a stereo stream.
    #[error("stereo stream has an odd sample count")]
    MalformedStereo,
}

/// Immutable normalised stereo PCM.
pub struct AudioSource {
    /// Interleaved stereo samples, peak |x| <= 1.
    signal: Vec<f32>,
    frames: usize,
}

impl AudioSource {
    /// Build a source from canonical decoder output (interleaved stereo
    /// 16-bit signed samples), converting to float and normalising so the
    /// peak magnitude is exactly 1 (silent input stays silent).
    pub fn from_pcm(samples: &[i16]) -> Result<AudioSource, SourceError> {
        let signal: Vec<f32> = samples.iter().map(|&s| s as f32 / 32768.0).collect();
        Self::from_frames(signal)
    }

    /// Build a source from interleaved stereo floats, normalising the peak.
    pub fn from_frames(mut signal: Vec<f32>) -> Result<AudioSource, SourceError> {
        if signal.len() % 2 != 0 {
            return Err(SourceError::MalformedStereo);
        }
        let peak = signal.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        if peak > 0.0 {
            for v in &mut signal {
                *v /= peak;
            }
        }
        let frames = signal.len() / 2;
        Ok(AudioSource { signal, frames })
    }

    /// Length in stereo frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        self.frames as f64 / crate::SAMPLE_RATE as f64
    }

    /// Fill `out` (interleaved stereo) with the signal starting at frame
    /// `pos`. Any part of the window outside `[0, frames)` is silence.
    pub fn stream_into(&self, pos: i64, out: &mut [f32]) {
        debug_assert_eq!(out.len() % 2, 0);
        out.fill(0.0);

        let len = (out.len() / 2) as i64;
        let frames = self.frames as i64;
        if len <= 0 || pos + len <= 0 || pos >= frames {
            return;
        }

        let from_src = pos.clamp(0, frames) as usize;
        let to_src = (pos + len).min(frames) as usize;
        let from_out = (-pos).clamp(0, len) as usize;
        let count = to_src - from_src;

        out[from_out * 2..(from_out + count) * 2]
            .copy_from_slice(&self.signal[from_src * 2..to_src * 2]);
    }

    /// Allocate and fill a fresh block of `len` stereo frames.
    pub fn stream(&self, pos: i64, len: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; len * 2];
        self.stream_into(pos, &mut out);
        out
    }

    /// Copy out one channel, at most `max_frames` samples. Used to feed the
    /// analyzer, which only looks at channel 0.
    pub fn channel(&self, channel: usize, max_frames: usize) -> Vec<f32> {
        debug_assert!(channel < 2);
        let count = self.frames.min(max_frames);
        (0..count).map(|i| self.signal[i * 2 + channel]).collect()
    }
}
