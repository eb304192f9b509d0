//! Sweepable low-pass and high-pass filters
//!
//! Both map their parameter through an exponential-like warp so the audible
//! effect ramps in early: a small turn of the knob already moves the cutoff
//! through the musically dense low end of the spectrum.

use super::iir::{warp, CoefTable};
use super::Effect;
use deckhand_analysis::dsp::{butter2_highpass, butter2_lowpass, Biquad};

/// Warp knots in Hz over the 24 kHz Nyquist range, placed at eleven evenly
/// spaced parameter positions.
static CUTOFF_KNOTS: [f64; 11] = [
    0.0 / 24_000.0,
    30.0 / 24_000.0,
    60.0 / 24_000.0,
    120.0 / 24_000.0,
    250.0 / 24_000.0,
    500.0 / 24_000.0,
    1_000.0 / 24_000.0,
    2_000.0 / 24_000.0,
    4_000.0 / 24_000.0,
    16_000.0 / 24_000.0,
    24_000.0 / 24_000.0,
];

/// Dynamic 2nd-order Butterworth low-pass. A cutoff of 0 passes nothing,
/// a cutoff of 1 passes everything.
pub struct LowPass {
    table: CoefTable,
}

impl LowPass {
    pub fn new() -> LowPass {
        let cut = warp(&CUTOFF_KNOTS);
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
        LowPass { table }
    }
}

impl Default for LowPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for LowPass {
    fn id(&self) -> &'static str {
        "lpf"
    }

    fn default_value(&self) -> f32 {
        1.0
    }

    fn apply(&mut self, input: &[f32], output: &mut [f32], param: &[f32], _bpm: f64) {
        self.table.run(input, output, param);
    }
}

/// Dynamic 2nd-order Butterworth high-pass. A cutoff of 0 passes
/// everything, a cutoff of 1 passes nothing.
pub struct HighPass {
    table: CoefTable,
}

impl HighPass {
    pub fn new() -> HighPass {
        HighPass {
            table: Self::table(),
        }
    }

    /// The coefficient table, shared with the delay's pre-filter.
    pub(crate) fn table() -> CoefTable {
        let cut = warp(&CUTOFF_KNOTS);
        CoefTable::new(move |p| {
            let wn = cut(p);
            if wn <= 0.0 {
                Biquad::IDENTITY
            } else if wn >= 1.0 {
                Biquad::SILENCE
            } else {
                butter2_highpass(wn)
            }
        })
    }
}

impl Default for HighPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for HighPass {
    fn id(&self) -> &'static str {
        "hpf"
    }

    fn default_value(&self) -> f32 {
        0.0
    }

    fn apply(&mut self, input: &[f32], output: &mut [f32], param: &[f32], _bpm: f64) {
        self.table.run(input, output, param);
    }
}
