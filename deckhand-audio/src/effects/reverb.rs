//! Convolution reverb

use super::Effect;
use crate::source::AudioSource;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Longest impulse response kept, in frames (one second).
const MAX_IR_FRAMES: usize = 48_000;

/// Reverb by FFT convolution with a fixed impulse response. The response is
/// trimmed to one second and normalised to unit total sum; the tail past the
/// block end is discarded and hidden by the mixer's block cross-fade.
pub struct Reverb {
    ir: [Vec<f32>; 2],
    planner: FftPlanner<f32>,
    plan: Option<ConvPlan>,
    buf: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

/// FFT machinery for one block size, rebuilt only when the size changes.
struct ConvPlan {
    size: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    ir_fft: [Vec<Complex<f32>>; 2],
}

impl Reverb {
    pub fn new(impulse: &AudioSource) -> Reverb {
        let frames = impulse.frames().min(MAX_IR_FRAMES);
        let raw = impulse.stream(0, frames);

        let mut left = Vec::with_capacity(frames);
        let mut right = Vec::with_capacity(frames);
        for frame in raw.chunks(2) {
            left.push(frame[0]);
            right.push(frame[1]);
        }

        // Unit total sum keeps the wet path at roughly source loudness.
        let total: f32 = left.iter().chain(right.iter()).sum();
        if total.abs() > f32::EPSILON {
            for v in left.iter_mut().chain(right.iter_mut()) {
                *v /= total;
            }
        }

        Reverb {
            ir: [left, right],
            planner: FftPlanner::new(),
            plan: None,
            buf: Vec::new(),
            scratch: Vec::new(),
        }
    }

    fn ensure_plan(&mut self, frames: usize) {
        let ir_frames = self.ir[0].len();
        let size = (frames + ir_frames).next_power_of_two();
        if self.plan.as_ref().map(|p| p.size) == Some(size) {
            return;
        }

        let fft = self.planner.plan_fft_forward(size);
        let ifft = self.planner.plan_fft_inverse(size);

        let ir_fft = [0, 1].map(|ch: usize| {
            let mut buf = vec![Complex::new(0.0f32, 0.0); size];
            for (b, &v) in buf.iter_mut().zip(&self.ir[ch]) {
                *b = Complex::new(v, 0.0);
            }
            fft.process(&mut buf);
            buf
        });

        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());
        self.scratch.resize(scratch_len, Complex::new(0.0, 0.0));

        self.plan = Some(ConvPlan {
            size,
            fft,
            ifft,
            ir_fft,
        });
    }
}

impl Effect for Reverb {
    fn id(&self) -> &'static str {
        "rev"
    }

    fn default_value(&self) -> f32 {
        0.0
    }

    fn apply(&mut self, input: &[f32], output: &mut [f32], param: &[f32], _bpm: f64) {
        debug_assert_eq!(input.len(), output.len());
        debug_assert_eq!(input.len(), param.len() * 2);
        let frames = param.len();

        self.ensure_plan(frames);
        let Some(plan) = self.plan.as_ref() else {
            return;
        };
        let scale = 1.0 / plan.size as f32;

        for ch in 0..2 {
            self.buf.clear();
            self.buf.resize(plan.size, Complex::new(0.0, 0.0));
            for i in 0..frames {
                self.buf[i] = Complex::new(input[2 * i + ch], 0.0);
            }
            plan.fft.process_with_scratch(&mut self.buf, &mut self.scratch);
            for (b, k) in self.buf.iter_mut().zip(&plan.ir_fft[ch]) {
                *b *= k;
            }
            plan.ifft
                .process_with_scratch(&mut self.buf, &mut self.scratch);

            for (i, &p) in param.iter().enumerate() {
                let wet = self.buf[i].re * scale;
                output[2 * i + ch] = wet * p + (1.0 - p) * input[2 * i + ch];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::test_support::test_assets;

    #[test]
    fn test_zero_param_is_dry() {
        let assets = test_assets();
        let mut rev = Reverb::new(&assets.reverb_ir);
        let input: Vec<f32> = (0..512).map(|i| ((i as f32) * 0.05).sin()).collect();
        let param = vec![0.0f32; 256];
        let mut output = vec![0.0f32; 512];
        rev.apply(&input, &mut output, &param, 130.0);
        for (o, i) in output.iter().zip(&input) {
            assert!((o - i).abs() < 1e-6);
        }
    }

    #[test]
    fn test_full_wet_impulse_reproduces_response() {
        let assets = test_assets();
        let mut rev = Reverb::new(&assets.reverb_ir);
        let frames = 1_024;
        let mut input = vec![0.0f32; frames * 2];
        input[0] = 1.0;
        input[1] = 1.0;
        let param = vec![1.0f32; frames];
        let mut output = vec![0.0f32; frames * 2];
        rev.apply(&input, &mut output, &param, 130.0);

        // Convolving an impulse returns the (normalised) response itself.
        let expected = &rev.ir;
        for i in (0..frames).step_by(97) {
            assert!(
                (output[2 * i] - expected[0][i]).abs() < 1e-4,
                "frame {}: {} vs {}",
                i,
                output[2 * i],
                expected[0][i]
            );
        }
    }

    #[test]
    fn test_ir_normalised_to_unit_sum() {
        let assets = test_assets();
        let rev = Reverb::new(&assets.reverb_ir);
        let total: f32 = rev.ir[0].iter().chain(rev.ir[1].iter()).sum();
        assert!((total - 1.0).abs() < 1e-3);
    }
}
