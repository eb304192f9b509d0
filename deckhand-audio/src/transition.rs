//! Transition definitions and automation curves
//!
//! A `TransitionDef` is the serialisable recipe an operator queues: per
//! effect, a handful of normalised control points. Building a transition
//! scales those points onto a concrete time window and fixes the clamping
//! behaviour outside it, yielding one `TransitionCurve` per effect in stable
//! chain order.

use crate::effects::{EffectRegistry, EFFECT_CHAIN};
use crate::error::MixerError;
use std::collections::BTreeMap;

/// Per-effect control points with `t` normalised over the transition window.
pub type TransitionDef = BTreeMap<String, Vec<(f64, f32)>>;

/// Flip a transition's direction: each control point's `t` becomes `1 - t`.
pub fn invert_transition(def: &TransitionDef) -> TransitionDef {
    def.iter()
        .map(|(fx, points)| {
            let flipped = points.iter().map(|&(t, v)| (1.0 - t, v)).collect();
            (fx.clone(), flipped)
        })
        .collect()
}

/// An automation curve over absolute deck time: linear interpolation between
/// scaled control points inside the window, fixed clamp values outside it.
#[derive(Debug, Clone)]
pub struct TransitionCurve {
    xs: Vec<f64>,
    ys: Vec<f32>,
    left: f32,
    right: f32,
}

impl TransitionCurve {
    /// Scale `points` onto `[start, end]` seconds. `left`/`right` are the
    /// values outside the window.
    pub fn new(points: &[(f64, f32)], start: f64, end: f64, left: f32, right: f32) -> Self {
        let mut sorted = points.to_vec();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
        let length = end - start;
        let xs = sorted.iter().map(|&(t, _)| start + t * length).collect();
        let ys = sorted.iter().map(|&(_, v)| v).collect();
        TransitionCurve {
            xs,
            ys,
            left,
            right,
        }
    }

    /// Sample the curve at one point in time.
    pub fn value_at(&self, t: f64) -> f32 {
        if self.xs.is_empty() {
            return self.left;
        }
        if t < self.xs[0] {
            return self.left;
        }
        let last = self.xs.len() - 1;
        if t > self.xs[last] {
            return self.right;
        }
        match self.xs.binary_search_by(|probe| probe.total_cmp(&t)) {
            Ok(i) => self.ys[i],
            Err(i) => {
                let (x0, x1) = (self.xs[i - 1], self.xs[i]);
                let (y0, y1) = (self.ys[i - 1], self.ys[i]);
                if x1 > x0 {
                    y0 + (y1 - y0) * ((t - x0) / (x1 - x0)) as f32
                } else {
                    y0
                }
            }
        }
    }

    /// Sample onto an even time axis `t[k] = start + k * step`.
    pub fn sample_into(&self, start: f64, step: f64, out: &mut [f32]) {
        for (k, o) in out.iter_mut().enumerate() {
            *o = self.value_at(start + k as f64 * step);
        }
    }
}

/// Build the ordered per-effect curves for one side of a transition.
///
/// The window is `[start, end]` in deck-local seconds. `incoming` selects
/// the volume clamp: an incoming deck is silent before the window and full
/// after it, an outgoing deck the reverse. Every other effect rests at its
/// default value on both sides.
pub fn build_transition(
    registry: &EffectRegistry,
    def: &TransitionDef,
    start: f64,
    end: f64,
    incoming: bool,
) -> Result<Vec<(String, TransitionCurve)>, MixerError> {
    for fx in def.keys() {
        if !registry.contains(fx) {
            return Err(MixerError::UnknownEffect(fx.clone()));
        }
    }

    let mut chain = Vec::with_capacity(def.len());
    for id in EFFECT_CHAIN {
        let Some(points) = def.get(id) else {
            continue;
        };
        if points.is_empty() {
            return Err(MixerError::EmptyCurve(id.to_string()));
        }
        let (left, right) = if id == "vol" {
            if incoming {
                (0.0, 1.0)
            } else {
                (1.0, 0.0)
            }
        } else {
            let default = registry.default_value(id).unwrap_or(0.0);
            (default, default)
        };
        chain.push((
            id.to_string(),
            TransitionCurve::new(points, start, end, left, right),
        ));
    }
    Ok(chain)
}
