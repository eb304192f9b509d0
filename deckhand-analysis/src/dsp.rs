//! Shared DSP helpers for the analysis pipeline
//!
//! Polynomial fitting and detrending, Gaussian smoothing, second-order
//! Butterworth design with direct-form filtering, and an algebra for sampled
//! piecewise-linear functions.

use std::f64::consts::{PI, SQRT_2};

/// Fit a least-squares polynomial of degree `deg` to `(x, y)` and return the
/// trend evaluated at every `x`.
///
/// The fit is performed in a centred/scaled coordinate so that high degrees
/// over long index axes stay well conditioned.
pub fn poly_trend(x: &[f64], y: &[f64], deg: usize) -> Vec<f64> {
    debug_assert_eq!(x.len(), y.len());
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }

    // Centre and scale the abscissa into [-1, 1].
    let (min, max) = x.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    });
    let centre = 0.5 * (min + max);
    let scale = if max > min { 0.5 * (max - min) } else { 1.0 };
    let u: Vec<f64> = x.iter().map(|&v| (v - centre) / scale).collect();

    let m = deg + 1;

    // Normal equations: G c = r with G[i][j] = sum u^(i+j), r[i] = sum y u^i.
    let mut moments = vec![0.0f64; 2 * deg + 1];
    let mut rhs = vec![0.0f64; m];
    for (ui, yi) in u.iter().zip(y.iter()) {
        let mut p = 1.0;
        for (k, moment) in moments.iter_mut().enumerate() {
            *moment += p;
            if k < m {
                rhs[k] += yi * p;
            }
            p *= ui;
        }
    }
    let mut g = vec![vec![0.0f64; m]; m];
    for i in 0..m {
        for j in 0..m {
            g[i][j] = moments[i + j];
        }
    }

    let coeffs = solve_linear(&mut g, &mut rhs);

    // Evaluate with Horner in the scaled coordinate.
    u.iter()
        .map(|&ui| {
            coeffs
                .iter()
                .rev()
                .fold(0.0, |acc, &c| acc * ui + c)
        })
        .collect()
}

/// Subtract a polynomial trend of degree `deg` fitted over the index axis.
pub fn detrend(y: &mut [f64], deg: usize) {
    let x: Vec<f64> = (0..y.len()).map(|i| i as f64).collect();
    let trend = poly_trend(&x, y, deg);
    for (v, t) in y.iter_mut().zip(trend) {
        *v -= t;
    }
}

/// Gaussian elimination with partial pivoting for the small systems produced
/// by the polynomial fits. Degenerate pivots fall back to a zero coefficient.
fn solve_linear(g: &mut [Vec<f64>], rhs: &mut [f64]) -> Vec<f64> {
    let m = rhs.len();
    for col in 0..m {
        let pivot = (col..m)
            .max_by(|&a, &b| g[a][col].abs().total_cmp(&g[b][col].abs()))
            .unwrap_or(col);
        g.swap(col, pivot);
        rhs.swap(col, pivot);
        let diag = g[col][col];
        if diag.abs() < 1e-12 {
            continue;
        }
        for row in (col + 1)..m {
            let factor = g[row][col] / diag;
            for k in col..m {
                let pivot_val = g[col][k];
                g[row][k] -= factor * pivot_val;
            }
            let pivot_rhs = rhs[col];
            rhs[row] -= factor * pivot_rhs;
        }
    }
    let mut coeffs = vec![0.0f64; m];
    for col in (0..m).rev() {
        let mut acc = rhs[col];
        for k in (col + 1)..m {
            acc -= g[col][k] * coeffs[k];
        }
        let diag = g[col][col];
        coeffs[col] = if diag.abs() < 1e-12 { 0.0 } else { acc / diag };
    }
    coeffs
}

/// 1-D Gaussian smoothing with kernel truncated at four standard deviations
/// and reflected boundaries.
pub fn gaussian_smooth(data: &[f64], sigma: f64) -> Vec<f64> {
    let n = data.len();
    if n == 0 || sigma <= 0.0 {
        return data.to_vec();
    }

    let radius = (4.0 * sigma + 0.5) as isize;
    let mut kernel = Vec::with_capacity(2 * radius as usize + 1);
    for i in -radius..=radius {
        let x = i as f64 / sigma;
        kernel.push((-0.5 * x * x).exp());
    }
    let norm: f64 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= norm;
    }

    let reflect = |idx: isize| -> usize {
        let mut i = idx;
        let n = n as isize;
        loop {
            if i < 0 {
                i = -i - 1;
            } else if i >= n {
                i = 2 * n - 1 - i;
            } else {
                return i as usize;
            }
        }
    };

    let mut out = vec![0.0f64; n];
    for (i, o) in out.iter_mut().enumerate() {
        let mut acc = 0.0;
        for (k, w) in kernel.iter().enumerate() {
            let idx = reflect(i as isize + k as isize - radius);
            acc += w * data[idx];
        }
        *o = acc;
    }
    out
}

/// Normalised second-order section, coefficients with `a0 == 1` implied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Biquad {
    /// A section that passes its input through unchanged.
    pub const IDENTITY: Biquad = Biquad {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// A section that outputs silence.
    pub const SILENCE: Biquad = Biquad {
        b0: 0.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };
}

/// Design a 2nd-order Butterworth low-pass via the bilinear transform.
///
/// `wn` is the critical frequency normalised so that 1.0 is the Nyquist
/// frequency; it must lie strictly inside `(0, 1)`.
pub fn butter2_lowpass(wn: f64) -> Biquad {
    let wc = (PI * wn / 2.0).tan();
    let k = wc * wc;
    let a0 = 1.0 + SQRT_2 * wc + k;
    Biquad {
        b0: k / a0,
        b1: 2.0 * k / a0,
        b2: k / a0,
        a1: 2.0 * (k - 1.0) / a0,
        a2: (1.0 - SQRT_2 * wc + k) / a0,
    }
}

/// Design a 2nd-order Butterworth high-pass via the bilinear transform.
pub fn butter2_highpass(wn: f64) -> Biquad {
    let wc = (PI * wn / 2.0).tan();
    let k = wc * wc;
    let a0 = 1.0 + SQRT_2 * wc + k;
    Biquad {
        b0: 1.0 / a0,
        b1: -2.0 / a0,
        b2: 1.0 / a0,
        a1: 2.0 * (k - 1.0) / a0,
        a2: (1.0 - SQRT_2 * wc + k) / a0,
    }
}

/// Apply a biquad in place over a mono signal, transposed direct form II,
/// zero initial conditions.
pub fn lfilter(c: &Biquad, data: &mut [f64]) {
    let mut z1 = 0.0f64;
    let mut z2 = 0.0f64;
    for x in data.iter_mut() {
        let input = *x;
        let y = c.b0 * input + z1;
        z1 = c.b1 * input - c.a1 * y + z2;
        z2 = c.b2 * input - c.a2 * y;
        *x = y;
    }
}

/// A sampled piecewise-linear function: linear interpolation on a sorted
/// grid, zero outside its support.
#[derive(Debug, Clone, Default)]
pub struct PiecewiseLinear {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl PiecewiseLinear {
    pub fn new(xs: Vec<f64>, ys: Vec<f64>) -> Self {
        debug_assert_eq!(xs.len(), ys.len());
        debug_assert!(xs.windows(2).all(|w| w[0] < w[1]));
        Self { xs, ys }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    pub fn eval(&self, x: f64) -> f64 {
        if self.xs.is_empty() {
            return 0.0;
        }
        let first = self.xs[0];
        let last = self.xs[self.xs.len() - 1];
        if x < first || x > last {
            return 0.0;
        }
        match self.xs.binary_search_by(|probe| probe.total_cmp(&x)) {
            Ok(i) => self.ys[i],
            Err(i) => {
                let (x0, x1) = (self.xs[i - 1], self.xs[i]);
                let (y0, y1) = (self.ys[i - 1], self.ys[i]);
                y0 + (y1 - y0) * (x - x0) / (x1 - x0)
            }
        }
    }

    /// Sum of two piecewise-linear functions, sampled on the union of both
    /// grids.
    pub fn add(&self, other: &PiecewiseLinear) -> PiecewiseLinear {
        let mut grid: Vec<f64> = Vec::with_capacity(self.xs.len() + other.xs.len());
        grid.extend_from_slice(&self.xs);
        grid.extend_from_slice(&other.xs);
        grid.sort_by(f64::total_cmp);
        grid.dedup();
        let ys: Vec<f64> = grid.iter().map(|&x| self.eval(x) + other.eval(x)).collect();
        PiecewiseLinear { xs: grid, ys }
    }

    /// Keep only the grid points inside `[lo, hi]`.
    pub fn restrict(&self, lo: f64, hi: f64) -> PiecewiseLinear {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for (&x, &y) in self.xs.iter().zip(self.ys.iter()) {
            if x >= lo && x <= hi {
                xs.push(x);
                ys.push(y);
            }
        }
        PiecewiseLinear { xs, ys }
    }

    /// Subtract a quadratic trend fitted over the grid values.
    pub fn detrend_quadratic(&mut self) {
        let trend = poly_trend(&self.xs, &self.ys, 2);
        for (y, t) in self.ys.iter_mut().zip(trend) {
            *y -= t;
        }
    }

    /// `(x, y)` of the maximum grid value.
    pub fn argmax(&self) -> Option<(f64, f64)> {
        self.xs
            .iter()
            .zip(self.ys.iter())
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(&x, &y)| (x, y))
    }
}

/// Index of the maximum value, first occurrence on ties.
pub fn argmax(data: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in data.iter().enumerate() {
        if *v > data[best] {
            best = i;
        }
    }
    best
}
