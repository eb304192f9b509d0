//! STFT power spectrogram
//!
//! Short overlapping segments (length 256, hop 224) shaped by a Tukey(0.25)
//! window, mean-removed per segment, one-sided power output. The time axis
//! places each value at the centre of its segment.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Segment length in samples.
const SEGMENT: usize = 256;
/// Overlap between consecutive segments.
const OVERLAP: usize = 32;
/// Hop between segment starts.
const HOP: usize = SEGMENT - OVERLAP;
/// Tukey window taper fraction.
const TAPER: f64 = 0.25;

/// A one-sided power spectrogram stored time-major.
pub struct Spectrogram {
    /// Segment-centre times in seconds.
    pub times: Vec<f64>,
    /// `frames[t][f]` with `f` in `0..=SEGMENT/2`.
    frames: Vec<Vec<f64>>,
}

impl Spectrogram {
    /// Number of frequency rows.
    pub const BINS: usize = SEGMENT / 2 + 1;

    /// Compute the spectrogram of a mono signal.
    pub fn compute(signal: &[f64], sample_rate: u32) -> Spectrogram {
        let fs = sample_rate as f64;
        let window = tukey_window(SEGMENT, TAPER);
        let win_power: f64 = window.iter().map(|w| w * w).sum();
        let scale = 1.0 / (fs * win_power);

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(SEGMENT);
        let mut buf = vec![Complex::new(0.0, 0.0); SEGMENT];

        let count = if signal.len() >= SEGMENT {
            (signal.len() - SEGMENT) / HOP + 1
        } else {
            0
        };

        let mut times = Vec::with_capacity(count);
        let mut frames = Vec::with_capacity(count);

        for i in 0..count {
            let start = i * HOP;
            let segment = &signal[start..start + SEGMENT];
            let mean = segment.iter().sum::<f64>() / SEGMENT as f64;
            for ((b, &s), w) in buf.iter_mut().zip(segment).zip(&window) {
                *b = Complex::new((s - mean) * w, 0.0);
            }
            fft.process(&mut buf);

            let mut row = Vec::with_capacity(Self::BINS);
            for (f, b) in buf.iter().take(Self::BINS).enumerate() {
                let mut power = b.norm_sqr() * scale;
                // Interior bins carry the mirrored negative frequencies.
                if f != 0 && f != SEGMENT / 2 {
                    power *= 2.0;
                }
                row.push(power);
            }
            frames.push(row);
            times.push((SEGMENT as f64 / 2.0 + (i * HOP) as f64) / fs);
        }

        Spectrogram { times, frames }
    }

    /// Total power per segment, summed over all frequency rows.
    pub fn energy_envelope(&self) -> Vec<f64> {
        self.frames
            .iter()
            .map(|row| row.iter().sum::<f64>())
            .collect()
    }

    /// The lowest frequency row per segment.
    pub fn bass_envelope(&self) -> Vec<f64> {
        self.frames.iter().map(|row| row[0]).collect()
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Tukey (tapered cosine) window of length `len` with taper fraction `alpha`.
fn tukey_window(len: usize, alpha: f64) -> Vec<f64> {
    use std::f64::consts::PI;
    let m = (len - 1) as f64;
    let edge = alpha * m / 2.0;
    (0..len)
        .map(|i| {
            let n = i as f64;
            if n < edge {
                0.5 * (1.0 + (PI * (2.0 * n / (alpha * m) - 1.0)).cos())
            } else if n > m - edge {
                0.5 * (1.0 + (PI * (2.0 * (m - n) / (alpha * m) - 1.0)).cos())
            } else {
                1.0
            }
        })
        .collect()
}
