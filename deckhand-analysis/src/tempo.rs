//! Tempo and downbeat estimation
//!
//! The tempo detector works on the spectrogram energy envelope of the first
//! minute of audio: autocorrelation exposes the beat period, the magnitude
//! spectrum of the autocorrelation exposes the beat frequency, and folding
//! down-scaled copies of that spectrum onto itself collapses harmonics onto
//! the fundamental. Because the envelope spans sixty seconds, spectrum
//! indices read directly as beats per minute.
//!
//! The downbeat detector overlays bar-length windows of the bass envelope;
//! the position where accumulated bass energy peaks is the bar phase.

use crate::dsp::{argmax, butter2_lowpass, detrend, gaussian_smooth, lfilter, PiecewiseLinear};
use crate::spectrogram::Spectrogram;
use crate::{ANALYSIS_SECONDS, SAMPLE_RATE};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use thiserror::Error;
use tracing::debug;

/// Analysis failure modes.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    /// The tempo estimate collapsed to a non-positive value; the song cannot
    /// be beat-matched.
    #[error("estimated tempo is not positive")]
    NonPositiveTempo,
}

/// Result of analysing one song.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SongAnalysis {
    /// Estimated tempo in beats per minute.
    pub bpm: f64,
    /// Samples from the start of the song to the first downbeat.
    pub offset: i64,
}

/// Fold a raw tempo estimate into the range a DJ would call it.
///
/// Halves while above 180 and even, doubles while below 70, then offers the
/// half of an even tempo at or above 140 and the double of a tempo at or
/// below 90. Returns the sorted candidate list.
pub fn to_reasonable_bpm(bpm: f64) -> Result<Vec<f64>, AnalyzeError> {
    if bpm <= 0.0 {
        return Err(AnalyzeError::NonPositiveTempo);
    }
    let mut bpm = bpm;
    while bpm > 180.0 && bpm % 2.0 == 0.0 {
        bpm = (bpm / 2.0).floor();
    }
    while bpm < 70.0 {
        bpm *= 2.0;
    }
    let mut candidates = vec![bpm];
    if bpm % 2.0 == 0.0 && bpm >= 140.0 {
        candidates.push((bpm / 2.0).floor());
    }
    if bpm <= 90.0 {
        candidates.push(bpm * 2.0);
    }
    candidates.sort_by(f64::total_cmp);
    Ok(candidates)
}

/// Estimate tempo and downbeat offset from channel 0 of a song.
///
/// The input is zero-padded or truncated to exactly sixty seconds before
/// analysis, so short songs are handled the same way as long ones.
pub fn analyze_song(channel0: &[f32]) -> Result<SongAnalysis, AnalyzeError> {
    let len = ANALYSIS_SECONDS * SAMPLE_RATE as usize;
    let mut signal = vec![0.0f64; len];
    for (dst, src) in signal.iter_mut().zip(channel0.iter()) {
        *dst = *src as f64;
    }

    // Pre-filter: gentle low-pass keeps the rhythmic body of the signal.
    lfilter(&butter2_lowpass(0.01), &mut signal);

    let spec = Spectrogram::compute(&signal, SAMPLE_RATE);
    let bpm = detect_bpm(&spec)?;
    let offset = detect_offset(&spec, bpm);
    debug!(bpm, offset, "song analysis complete");

    Ok(SongAnalysis { bpm, offset })
}

fn detect_bpm(spec: &Spectrogram) -> Result<f64, AnalyzeError> {
    let envelope = spec.energy_envelope();

    // Full linear autocorrelation, smoothed, non-negative lags only.
    let mut corr = autocorrelate_full(&envelope);
    corr = gaussian_smooth(&corr, 10.0);
    let mut corr = corr.split_off(corr.len() / 2);

    // Remove the broad triangular trend before looking for periodicity.
    detrend(&mut corr, 3);

    // Magnitude spectrum of the autocorrelation, positive half.
    let mut spectrum = fft_magnitude(&corr);
    spectrum.truncate(spectrum.len() / 2);

    // Fold down-scaled copies of the spectrum onto a running accumulator so
    // harmonics reinforce the fundamental.
    let mut acc = PiecewiseLinear::empty();
    let mut remaining = spectrum.len() as f64;
    let mut divisor = 1u32;
    while remaining >= 2.0 {
        let xs: Vec<f64> = (0..spectrum.len())
            .map(|x| x as f64 / divisor as f64)
            .collect();
        acc = acc.add(&PiecewiseLinear::new(xs, spectrum.clone()));
        remaining /= 2.0;
        divisor += 1;
    }

    // The envelope spans one minute, so accumulator positions are BPM.
    let mut acc = acc.restrict(30.0, 180.0);
    acc.detrend_quadratic();
    let raw = acc.argmax().map(|(x, _)| x).unwrap_or(0.0);

    let candidates = to_reasonable_bpm(raw)?;
    Ok(candidates[candidates.len() - 1])
}

fn detect_offset(spec: &Spectrogram, bpm: f64) -> i64 {
    let bass = spec.bass_envelope();
    let times = &spec.times;
    let beat = 60.0 / bpm;
    let bar_duration = beat * 4.0;

    let bar = nearest_time_index(times, bar_duration);
    let mut acc = vec![0.0f64; bar];

    // Overlay up to 2048 bar-length windows of bass energy, each detrended
    // and unit-normalised so loud sections do not dominate.
    for i in 0..2048usize {
        let off = nearest_time_index(times, bar_duration * i as f64);
        if off + bar >= bass.len() {
            break;
        }
        let mut window: Vec<f64> = bass[off..off + bar].to_vec();
        detrend(&mut window, 2);
        let norm = window.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm != 0.0 {
            for v in &mut window {
                *v /= norm;
            }
        }
        for (a, w) in acc.iter_mut().zip(&window) {
            *a += w;
        }
    }

    let peak = argmax(&acc);
    ((times[peak] % beat) * SAMPLE_RATE as f64).round() as i64
}

/// Full linear autocorrelation (both lag signs) computed in the frequency
/// domain with zero padding against circular wrap-around.
fn autocorrelate_full(signal: &[f64]) -> Vec<f64> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }
    let full = 2 * n - 1;
    let size = full.next_power_of_two();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(size);
    let ifft = planner.plan_fft_inverse(size);

    let mut buf = vec![Complex::new(0.0, 0.0); size];
    for (b, &s) in buf.iter_mut().zip(signal) {
        *b = Complex::new(s, 0.0);
    }
    fft.process(&mut buf);
    for b in buf.iter_mut() {
        *b = *b * b.conj();
    }
    ifft.process(&mut buf);

    let scale = 1.0 / size as f64;
    let mut out = Vec::with_capacity(full);
    // Lags -(n-1)..=-1 wrap around the end of the circular result.
    for lag in (1..n).rev() {
        out.push(buf[size - lag].re * scale);
    }
    for lag in 0..n {
        out.push(buf[lag].re * scale);
    }
    out
}

fn fft_magnitude(signal: &[f64]) -> Vec<f64> {
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(signal.len());
    let mut buf: Vec<Complex<f64>> = signal.iter().map(|&s| Complex::new(s, 0.0)).collect();
    fft.process(&mut buf);
    buf.iter().map(|c| c.norm()).collect()
}

/// Index on a uniform time grid closest to `target` seconds.
fn nearest_time_index(times: &[f64], target: f64) -> usize {
    debug_assert!(times.len() > 1);
    let dt = times[1] - times[0];
    let idx = ((target - times[0]) / dt).round();
    (idx.max(0.0) as usize).min(times.len() - 1)
}
