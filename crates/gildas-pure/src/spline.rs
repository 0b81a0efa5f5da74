//! Natural cubic spline interpolation.

use crate::error::{Error, Result};

/// Natural cubic spline through a set of strictly increasing knots.
///
/// Segment `j` covers `[x[j], x[j+1]]` and evaluates
/// `y[j] + b[j]·t + c[j]·t² + d[j]·t³` with `t = x - x[j]`.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
    d: Vec<f64>,
}

impl CubicSpline {
    /// Fit the spline. Needs at least two knots with increasing abscissae.
    pub fn new(x: &[f64], y: &[f64]) -> Result<Self> {
        if x.len() != y.len() {
            return Err(Error::InvalidValue("spline abscissae and ordinates differ in length"));
        }
        let m = x.len();
        if m < 2 {
            return Err(Error::InvalidValue("spline needs at least two knots"));
        }
        if x.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::InvalidValue("spline knots must increase strictly"));
        }
        let k = m - 1;
        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();

        let mut alpha = vec![0.0; m];
        for i in 1..k {
            alpha[i] = 3.0 / h[i] * (y[i + 1] - y[i]) - 3.0 / h[i - 1] * (y[i] - y[i - 1]);
        }

        // Thomas algorithm with natural end conditions.
        let mut l = vec![1.0; m];
        let mut mu = vec![0.0; m];
        let mut z = vec![0.0; m];
        for i in 1..k {
            l[i] = 2.0 * (x[i + 1] - x[i - 1]) - h[i - 1] * mu[i - 1];
            mu[i] = h[i] / l[i];
            z[i] = (alpha[i] - h[i - 1] * z[i - 1]) / l[i];
        }

        let mut c = vec![0.0; m];
        let mut b = vec![0.0; k];
        let mut d = vec![0.0; k];
        for j in (0..k).rev() {
            c[j] = z[j] - mu[j] * c[j + 1];
            b[j] = (y[j + 1] - y[j]) / h[j] - h[j] * (c[j + 1] + 2.0 * c[j]) / 3.0;
            d[j] = (c[j + 1] - c[j]) / (3.0 * h[j]);
        }
        Ok(CubicSpline {
            x: x.to_vec(),
            y: y.to_vec(),
            b,
            c,
            d,
        })
    }

    /// Abscissa range covered by the knots.
    pub fn domain(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    /// Evaluate at `x`, clamping to the end knots outside the domain.
    pub fn eval(&self, x: f64) -> f64 {
        if x.is_nan() {
            return f64::NAN;
        }
        let (lo, hi) = self.domain();
        if x <= lo {
            return self.y[0];
        }
        if x >= hi {
            return self.y[self.y.len() - 1];
        }
        let j = self.x.partition_point(|&k| k <= x).saturating_sub(1);
        let t = x - self.x[j];
        self.y[j] + t * (self.b[j] + t * (self.c[j] + t * self.d[j]))
    }

    /// Evaluate at `x`, or `None` outside the knot range.
    pub fn eval_inside(&self, x: f64) -> Option<f64> {
        let (lo, hi) = self.domain();
        (x >= lo && x <= hi).then(|| self.eval(x))
    }
}

/// Resample `values`, sampled at pixel centers 1..=n, onto `n_out` pixels
/// covering the same extent.
///
/// Output pixel `p'` maps to input position `0.5 + (p' - 0.5)·n/n_out`.
pub fn resample_uniform(values: &[f64], n_out: usize) -> Result<Vec<f64>> {
    let n = values.len();
    if n == 0 || n_out == 0 {
        return Err(Error::InvalidValue("cannot resample an empty axis"));
    }
    if n == 1 {
        return Ok(vec![values[0]; n_out]);
    }
    let x: Vec<f64> = (1..=n).map(|i| i as f64).collect();
    let spline = CubicSpline::new(&x, values)?;
    let scale = n as f64 / n_out as f64;
    Ok((1..=n_out)
        .map(|p| spline.eval(0.5 + (p as f64 - 0.5) * scale))
        .collect())
}
