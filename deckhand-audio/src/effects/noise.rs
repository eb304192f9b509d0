//! Noise riser

use super::iir::{warp, CoefTable};
use super::Effect;
use crate::source::AudioSource;
use deckhand_analysis::dsp::{butter2_lowpass, Biquad};

/// Warp knots for the noise colour filter. The top stays well below
/// Nyquist so even a fully open riser keeps a soft character.
static NOISE_KNOTS: [f64; 5] = [
    1.0 / 24_000.0,
    500.0 / 24_000.0,
    1_000.0 / 24_000.0,
    2_500.0 / 24_000.0,
    5_000.0 / 24_000.0,
];

/// White-noise riser: a fixed clip is tiled over the block, folded with its
/// own reversal so the loop point disappears, coloured by a sweepable
/// low-pass and mixed in linearly. At parameter 1 the deck is all noise,
/// which is what a build-up wants.
pub struct Noise {
    clip: Vec<f32>,
    clip_frames: usize,
    table: CoefTable,
    tiled: Vec<f32>,
    coloured: Vec<f32>,
}

impl Noise {
    pub fn new(clip: &AudioSource) -> Noise {
        let frames = clip.frames();
        let cut = warp(&NOISE_KNOTS);
        let table = CoefTable::new(move |p| {
            let wn = cut(p);
            if wn <= 0.0 {
                Biquad::SILENCE
            } else if wn >= 1.0 {
                Biquad::IDENTITY
            } else {
                butter2_lowpass(wn)
            }
        });
        Noise {
            clip: clip.stream(0, frames),
            clip_frames: frames,
            table,
            tiled: Vec::new(),
            coloured: Vec::new(),
        }
    }
}

impl Effect for Noise {
    fn id(&self) -> &'static str {
        "noise"
    }

    fn default_value(&self) -> f32 {
        0.0
    }

    fn apply(&mut self, input: &[f32], output: &mut [f32], param: &[f32], _bpm: f64) {
        debug_assert_eq!(input.len(), output.len());
        debug_assert_eq!(input.len(), param.len() * 2);
        let frames = param.len();
        if self.clip_frames == 0 {
            output.copy_from_slice(input);
            return;
        }

        // Tile the clip over the block, then average with its own frame
        // reversal so the repetition seam vanishes.
        self.coloured.resize(frames * 2, 0.0);
        self.tiled.resize(frames * 2, 0.0);
        for i in 0..frames {
            let src = (i % self.clip_frames) * 2;
            self.coloured[2 * i] = self.clip[src];
            self.coloured[2 * i + 1] = self.clip[src + 1];
        }
        for i in 0..frames {
            let rev = 2 * (frames - 1 - i);
            self.tiled[2 * i] = (self.coloured[2 * i] + self.coloured[rev]) * 0.5;
            self.tiled[2 * i + 1] = (self.coloured[2 * i + 1] + self.coloured[rev + 1]) * 0.5;
        }

        self.table.run(&self.tiled, &mut self.coloured, param);

        for (i, &p) in param.iter().enumerate() {
            output[2 * i] = self.coloured[2 * i] * p + input[2 * i] * (1.0 - p);
            output[2 * i + 1] = self.coloured[2 * i + 1] * p + input[2 * i + 1] * (1.0 - p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::test_support::test_assets;

    #[test]
    fn test_zero_param_passes_dry() {
        let assets = test_assets();
        let mut noise = Noise::new(&assets.noise);
        let input: Vec<f32> = (0..256).map(|i| (i as f32 * 0.03).cos()).collect();
        let param = vec![0.0f32; 128];
        let mut output = vec![0.0f32; 256];
        noise.apply(&input, &mut output, &param, 130.0);
        assert_eq!(input, output);
    }

    #[test]
    fn test_full_param_replaces_signal_with_noise() {
        let assets = test_assets();
        let mut noise = Noise::new(&assets.noise);
        let input = vec![0.0f32; 4_096];
        let param = vec![1.0f32; 2_048];
        let mut output = vec![0.0f32; 4_096];
        noise.apply(&input, &mut output, &param, 130.0);
        // Silence in, noise out.
        let rms = (output.iter().map(|v| v * v).sum::<f32>() / output.len() as f32).sqrt();
        assert!(rms > 0.01, "rms {}", rms);
    }

    #[test]
    fn test_fold_is_symmetric() {
        let assets = test_assets();
        let mut noise = Noise::new(&assets.noise);
        let frames = 512;
        let input = vec![0.0f32; frames * 2];
        let param = vec![1.0f32; frames];
        let mut output = vec![0.0f32; frames * 2];
        noise.apply(&input, &mut output, &param, 130.0);
        // The folded pre-filter signal is its own frame reversal.
        for i in 0..frames {
            let j = frames - 1 - i;
            assert!(
                (noise.tiled[2 * i] - noise.tiled[2 * j]).abs() < 1e-6,
                "frame {} vs {}",
                i,
                j
            );
        }
    }
}
