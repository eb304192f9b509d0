//! Per-deck audio effects
//!
//! Every effect processes one contiguous stereo block under a per-frame
//! parameter curve in `[0, 1]`. Effects carry no state between calls; the
//! mixer supplies a pre-roll block so filters and convolutions settle before
//! the audible half of the buffer begins.

mod delay;
mod filters;
mod iir;
mod noise;
mod reverb;
mod volume;

pub use delay::Delay;
pub use filters::{HighPass, LowPass};
pub use noise::Noise;
pub use reverb::Reverb;
pub use volume::Volume;

use crate::source::AudioSource;
use std::sync::Arc;

/// One audio effect in the chain.
///
/// `input` and `output` are equal-length interleaved stereo blocks and
/// `param` holds one value per stereo frame (`input.len() == 2 * param.len()`).
/// `bpm` is the global tempo, used by tempo-synced effects.
pub trait Effect: Send {
    /// Registry identifier, also used in transition definitions.
    fn id(&self) -> &'static str;

    /// Parameter value applied outside any transition window.
    fn default_value(&self) -> f32;

    /// Process one block. Internal scratch may be reused between calls but
    /// no audible state survives a call.
    fn apply(&mut self, input: &[f32], output: &mut [f32], param: &[f32], bpm: f64);
}

/// The order effects are applied in, and the full set of known ids.
pub const EFFECT_CHAIN: [&str; 6] = ["vol", "lpf", "hpf", "dly", "rev", "noise"];

/// Fixed audio material the effects need: a noise clip for risers and an
/// impulse response for the convolution reverb. Decoded once at startup.
pub struct EffectAssets {
    pub noise: Arc<AudioSource>,
    pub reverb_ir: Arc<AudioSource>,
}

/// All available effects, in stable chain order.
pub struct EffectRegistry {
    effects: Vec<Box<dyn Effect>>,
}

impl EffectRegistry {
    pub fn new(assets: &EffectAssets) -> EffectRegistry {
        let effects: Vec<Box<dyn Effect>> = vec![
            Box::new(Volume::new()),
            Box::new(LowPass::new()),
            Box::new(HighPass::new()),
            Box::new(Delay::new()),
            Box::new(Reverb::new(&assets.reverb_ir)),
            Box::new(Noise::new(&assets.noise)),
        ];
        debug_assert!(effects
            .iter()
            .zip(EFFECT_CHAIN)
            .all(|(e, id)| e.id() == id));
        EffectRegistry { effects }
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut (dyn Effect + '_)> {
        match self.effects.iter_mut().find(|e| e.id() == id) {
            Some(e) => Some(&mut **e),
            None => None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.effects.iter().any(|e| e.id() == id)
    }

    pub fn default_value(&self, id: &str) -> Option<f32> {
        self.effects
            .iter()
            .find(|e| e.id() == id)
            .map(|e| e.default_value())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Synthetic assets so tests never touch the filesystem: a short
    /// deterministic noise clip and a decaying impulse response.
    pub fn test_assets() -> EffectAssets {
        let mut noise = Vec::with_capacity(2_048);
        let mut state = 0x2545_f491u32;
        for _ in 0..1_024 {
            // xorshift, mapped into [-1, 1]
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let v = (state as f32 / u32::MAX as f32) * 2.0 - 1.0;
            noise.push(v);
            noise.push(-v);
        }

        let mut ir = Vec::with_capacity(9_600);
        for i in 0..4_800 {
            let v = (-(i as f32) / 400.0).exp();
            ir.push(v);
            ir.push(v * 0.8);
        }

        EffectAssets {
            noise: Arc::new(AudioSource::from_frames(noise).unwrap()),
            reverb_ir: Arc::new(AudioSource::from_frames(ir).unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_assets;
    use super::*;

    #[test]
    fn test_registry_chain_order() {
        let assets = test_assets();
        let registry = EffectRegistry::new(&assets);
        for id in EFFECT_CHAIN {
            assert!(registry.contains(id));
        }
        assert!(!registry.contains("phaser"));
    }

    #[test]
    fn test_default_values() {
        let assets = test_assets();
        let registry = EffectRegistry::new(&assets);
        assert_eq!(registry.default_value("vol"), Some(1.0));
        assert_eq!(registry.default_value("lpf"), Some(1.0));
        assert_eq!(registry.default_value("hpf"), Some(0.0));
        assert_eq!(registry.default_value("dly"), Some(0.0));
        assert_eq!(registry.default_value("rev"), Some(0.0));
        assert_eq!(registry.default_value("noise"), Some(0.0));
    }
}
