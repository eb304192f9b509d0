//! Pitch-preserving time stretch
//!
//! A per-block phase vocoder: analysis frames are taken at hops scaled by
//! the playback speed, their bin phases re-propagated at the fixed synthesis
//! hop, and the re-synthesised frames overlap-added under window-power
//! normalisation. Each call is self-contained; the mixer's transient
//! cross-fade hides the seams between consecutive blocks.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Analysis/synthesis frame length.
const WINDOW: usize = 2_048;
/// Synthesis hop (75 % overlap).
const HOP: usize = 512;
/// Positive-frequency bin count.
const BINS: usize = WINDOW / 2 + 1;

/// Offline phase-vocoder stretcher with reusable scratch buffers.
pub struct TimeStretcher {
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buf: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    channel: Vec<f32>,
    magnitude: Vec<f32>,
    phase: Vec<f32>,
    prev_phase: Vec<f32>,
    accum: Vec<f32>,
    ola: Vec<f32>,
    norm: Vec<f32>,
}

impl TimeStretcher {
    pub fn new() -> TimeStretcher {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(WINDOW);
        let ifft = planner.plan_fft_inverse(WINDOW);
        let window = (0..WINDOW)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / WINDOW as f32).cos()))
            .collect();
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());
        TimeStretcher {
            fft,
            ifft,
            window,
            buf: vec![Complex::new(0.0, 0.0); WINDOW],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            channel: Vec::new(),
            magnitude: vec![0.0; BINS],
            phase: vec![0.0; BINS],
            prev_phase: vec![0.0; BINS],
            accum: vec![0.0; BINS],
            ola: Vec::new(),
            norm: Vec::new(),
        }
    }

    /// Stretch an interleaved stereo block by playback speed `speed`,
    /// writing `round(frames / speed)` frames into `output`. A speed of 1
    /// is an exact pass-through.
    pub fn stretch(&mut self, input: &[f32], speed: f64, output: &mut Vec<f32>) {
        debug_assert_eq!(input.len() % 2, 0);
        debug_assert!(speed > 0.0);
        let frames_in = input.len() / 2;
        let frames_out = (frames_in as f64 / speed).round() as usize;

        output.clear();
        output.resize(frames_out * 2, 0.0);
        if frames_in == 0 || frames_out == 0 {
            return;
        }
        if (speed - 1.0).abs() < 1e-9 {
            output.copy_from_slice(&input[..frames_out * 2]);
            return;
        }

        let frame_count = frames_out.saturating_sub(WINDOW).div_ceil(HOP) + 1;

        for ch in 0..2 {
            self.channel.clear();
            self.channel
                .extend(input.iter().skip(ch).step_by(2).copied());
            self.stretch_channel(frame_count, speed, frames_out, ch == 0);
            for i in 0..frames_out {
                let norm = self.norm[i].max(1e-6);
                output[2 * i + ch] = self.ola[i] / norm;
            }
        }
    }

    fn stretch_channel(
        &mut self,
        frame_count: usize,
        speed: f64,
        frames_out: usize,
        first_channel: bool,
    ) {
        let padded = frames_out + WINDOW;
        self.ola.clear();
        self.ola.resize(padded, 0.0);
        if first_channel {
            self.norm.clear();
            self.norm.resize(padded, 0.0);
        }

        let mut prev_pos = 0usize;
        for k in 0..frame_count {
            let pos = (k as f64 * HOP as f64 * speed).round() as usize;

            // Windowed analysis frame, zero-padded past the input tail.
            for (j, b) in self.buf.iter_mut().enumerate() {
                let sample = self.channel.get(pos + j).copied().unwrap_or(0.0);
                *b = Complex::new(sample * self.window[j], 0.0);
            }
            self.fft
                .process_with_scratch(&mut self.buf, &mut self.scratch);
            for bin in 0..BINS {
                self.magnitude[bin] = self.buf[bin].norm();
                self.phase[bin] = self.buf[bin].arg();
            }

            if k == 0 {
                self.accum.copy_from_slice(&self.phase);
            } else {
                // Instantaneous frequency from the actual analysis hop,
                // advanced by the synthesis hop.
                let hop_a = (pos - prev_pos).max(1) as f32;
                for bin in 0..BINS {
                    let omega = 2.0 * PI * bin as f32 / WINDOW as f32;
                    let expected = self.prev_phase[bin] + omega * hop_a;
                    let deviation = wrap_phase(self.phase[bin] - expected);
                    let freq = omega + deviation / hop_a;
                    self.accum[bin] += freq * HOP as f32;
                }
            }
            self.prev_phase.copy_from_slice(&self.phase);
            prev_pos = pos;

            // Re-synthesise from the propagated phases.
            for bin in 0..BINS {
                self.buf[bin] = Complex::from_polar(self.magnitude[bin], self.accum[bin]);
            }
            for bin in 1..WINDOW / 2 {
                self.buf[WINDOW - bin] = self.buf[bin].conj();
            }
            self.ifft
                .process_with_scratch(&mut self.buf, &mut self.scratch);

            let scale = 1.0 / WINDOW as f32;
            let base = k * HOP;
            for j in 0..WINDOW {
                let w = self.window[j];
                self.ola[base + j] += self.buf[j].re * scale * w;
                if first_channel {
                    self.norm[base + j] += w * w;
                }
            }
        }
    }
}

impl Default for TimeStretcher {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn wrap_phase(x: f32) -> f32 {
    // Principal value in (-pi, pi].
    let two_pi = 2.0 * PI;
    x - two_pi * (x / two_pi).round()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_tone(freq: f64, frames: usize) -> Vec<f32> {
        use std::f64::consts::PI;
        (0..frames)
            .flat_map(|i| {
                let v = (2.0 * PI * freq * i as f64 / 48_000.0).sin() as f32 * 0.5;
                [v, v]
            })
            .collect()
    }

    #[test]
    fn test_unit_speed_is_exact_passthrough() {
        let mut stretcher = TimeStretcher::new();
        let input = stereo_tone(440.0, 24_000);
        let mut output = Vec::new();
        stretcher.stretch(&input, 1.0, &mut output);
        assert_eq!(input, output);
    }

    #[test]
    fn test_output_length_scales_with_speed() {
        let mut stretcher = TimeStretcher::new();
        let input = stereo_tone(440.0, 24_000);
        let mut output = Vec::new();

        stretcher.stretch(&input, 2.0, &mut output);
        assert_eq!(output.len(), 24_000);

        stretcher.stretch(&input, 0.5, &mut output);
        assert_eq!(output.len(), 96_000);

        stretcher.stretch(&input, 1.25, &mut output);
        assert_eq!(output.len() / 2, (24_000.0f64 / 1.25).round() as usize);
    }

    #[test]
    fn test_stretched_tone_keeps_pitch() {
        use rustfft::FftPlanner;

        let mut stretcher = TimeStretcher::new();
        let input = stereo_tone(1_000.0, 24_000);
        let mut output = Vec::new();
        stretcher.stretch(&input, 1.5, &mut output);

        // Measure the dominant frequency of a steady stretch of output.
        let size = 8_192;
        let start = 4_000;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let mut buf: Vec<Complex<f32>> = (0..size)
            .map(|i| Complex::new(output[2 * (start + i)], 0.0))
            .collect();
        fft.process(&mut buf);
        let peak = buf[..size / 2]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .map(|(i, _)| i)
            .unwrap();
        let freq = peak as f64 * 48_000.0 / size as f64;
        assert!((freq - 1_000.0).abs() < 30.0, "peak at {} Hz", freq);
    }

    #[test]
    fn test_output_stays_bounded() {
        let mut stretcher = TimeStretcher::new();
        let input = stereo_tone(220.0, 24_000);
        let mut output = Vec::new();
        stretcher.stretch(&input, 0.75, &mut output);
        assert!(output.iter().all(|v| v.is_finite() && v.abs() <= 1.0));
    }
}
