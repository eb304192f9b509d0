//! Volume control

use super::Effect;

/// Equal-power volume: the parameter is square-rooted so that two decks
/// cross-fading against each other keep roughly constant summed power.
pub struct Volume;

impl Volume {
    pub fn new() -> Volume {
        Volume
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for Volume {
    fn id(&self) -> &'static str {
        "vol"
    }

    fn default_value(&self) -> f32 {
        1.0
    }

    fn apply(&mut self, input: &[f32], output: &mut [f32], param: &[f32], _bpm: f64) {
        debug_assert_eq!(input.len(), output.len());
        debug_assert_eq!(input.len(), param.len() * 2);
        for (i, &p) in param.iter().enumerate() {
            let gain = p.max(0.0).sqrt();
            output[2 * i] = input[2 * i] * gain;
            output[2 * i + 1] = input[2 * i + 1] * gain;
        }
    }
}
