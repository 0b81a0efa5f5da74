//! Single-Gaussian least-squares fitting (Levenberg–Marquardt).
//!
//! The model is `peak · exp(-4 ln 2 · (x - center)² / fwhm²)` with all
//! three parameters free and abscissae in channels.

use core::f64::consts::LN_2;

use crate::error::{Error, Result};

const FOUR_LN2: f64 = 4.0 * LN_2;

/// Parameters of one Gaussian profile, in channel units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gaussian {
    pub center: f64,
    pub fwhm: f64,
    pub peak: f64,
}

impl Gaussian {
    pub fn new(center: f64, fwhm: f64, peak: f64) -> Self {
        Gaussian { center, fwhm, peak }
    }

    pub fn eval(&self, x: f64) -> f64 {
        let d = x - self.center;
        self.peak * (-FOUR_LN2 * d * d / (self.fwhm * self.fwhm)).exp()
    }

    /// Partial derivatives with respect to (center, fwhm, peak).
    fn gradient(&self, x: f64) -> [f64; 3] {
        let d = x - self.center;
        let w2 = self.fwhm * self.fwhm;
        let e = (-FOUR_LN2 * d * d / w2).exp();
        let pe = self.peak * e;
        [
            pe * 2.0 * FOUR_LN2 * d / w2,
            pe * 2.0 * FOUR_LN2 * d * d / (w2 * self.fwhm),
            e,
        ]
    }

    fn params(&self) -> [f64; 3] {
        [self.center, self.fwhm, self.peak]
    }

    fn from_params(p: [f64; 3]) -> Self {
        Gaussian::new(p[0], p[1], p[2])
    }
}

/// Outcome of [`fit_gaussian`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianFit {
    pub gaussian: Gaussian,
    /// Covariance of (center, fwhm, peak), scaled by the per-point sigma.
    pub covariance: [[f64; 3]; 3],
    pub chi_square: f64,
    pub iterations: usize,
}

impl GaussianFit {
    /// One-sigma errors on (center, fwhm, peak). May be NaN when the
    /// covariance is not positive on the diagonal.
    pub fn errors(&self) -> [f64; 3] {
        [0, 1, 2].map(|i| {
            let v = self.covariance[i][i];
            if v >= 0.0 {
                v.sqrt()
            } else {
                f64::NAN
            }
        })
    }
}

/// Fit one Gaussian to `(x, y)` samples with uniform per-point error `sigma`.
///
/// Starts from `guess` and iterates at most `max_iterations` damped
/// Gauss–Newton steps. Fails with [`Error::FitDivergence`] when the normal
/// matrix is singular or the solution is not finite.
pub fn fit_gaussian(
    x: &[f64],
    y: &[f64],
    sigma: f64,
    guess: Gaussian,
    max_iterations: usize,
) -> Result<GaussianFit> {
    if x.len() != y.len() || x.len() < 3 {
        return Err(Error::InvalidValue("gaussian fit needs at least three samples"));
    }
    if sigma <= 0.0 || !sigma.is_finite() || guess.fwhm <= 0.0 {
        return Err(Error::InvalidValue("gaussian fit needs positive sigma and width"));
    }
    let w = 1.0 / (sigma * sigma);
    let mut current = guess;
    let mut chi2 = chi_square(x, y, &current, w);
    let mut lambda = 1e-3;
    let mut iterations = 0;

    while iterations < max_iterations {
        iterations += 1;
        let (alpha, beta) = normal_equations(x, y, &current, w);
        let mut damped = alpha;
        for (i, row) in damped.iter_mut().enumerate() {
            row[i] = alpha[i][i] * (1.0 + lambda);
        }
        let Some(delta) = solve_3x3(damped, beta) else {
            lambda *= 10.0;
            if lambda > 1e12 {
                break;
            }
            continue;
        };
        let p = current.params();
        let trial = Gaussian::from_params([p[0] + delta[0], p[1] + delta[1], p[2] + delta[2]]);
        let trial_chi2 = if trial.fwhm > 0.0 {
            chi_square(x, y, &trial, w)
        } else {
            f64::INFINITY
        };
        if trial_chi2.is_finite() && trial_chi2 <= chi2 {
            let converged = chi2 - trial_chi2 <= 1e-12 * chi2.max(1e-300)
                || delta.iter().zip(&p).all(|(d, v)| d.abs() <= 1e-10 * v.abs().max(1e-10));
            current = trial;
            chi2 = trial_chi2;
            lambda = (lambda / 10.0).max(1e-12);
            if converged {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e12 {
                break;
            }
        }
    }

    let (alpha, _) = normal_equations(x, y, &current, w);
    let covariance = invert_3x3(alpha).ok_or(Error::FitDivergence)?;
    let g = current;
    if !(g.center.is_finite() && g.fwhm.is_finite() && g.peak.is_finite() && chi2.is_finite()) {
        return Err(Error::FitDivergence);
    }
    log::trace!("gaussian fit converged after {iterations} iterations, chi2 {chi2:.4e}");
    Ok(GaussianFit {
        gaussian: g,
        covariance,
        chi_square: chi2,
        iterations,
    })
}

fn chi_square(x: &[f64], y: &[f64], g: &Gaussian, w: f64) -> f64 {
    x.iter().zip(y).map(|(&xi, &yi)| (yi - g.eval(xi)).powi(2) * w).sum()
}

/// `JᵀWJ` and `JᵀW r` for the current parameters.
fn normal_equations(x: &[f64], y: &[f64], g: &Gaussian, w: f64) -> ([[f64; 3]; 3], [f64; 3]) {
    let mut alpha = [[0.0f64; 3]; 3];
    let mut beta = [0.0f64; 3];
    for (&xi, &yi) in x.iter().zip(y) {
        let r = yi - g.eval(xi);
        let j = g.gradient(xi);
        for a in 0..3 {
            beta[a] += w * j[a] * r;
            for b in 0..3 {
                alpha[a][b] += w * j[a] * j[b];
            }
        }
    }
    (alpha, beta)
}

fn determinant(a: &[[f64; 3]; 3]) -> f64 {
    a[0][0] * (a[1][1] * a[2][2] - a[1][2] * a[2][1])
        - a[0][1] * (a[1][0] * a[2][2] - a[1][2] * a[2][0])
        + a[0][2] * (a[1][0] * a[2][1] - a[1][1] * a[2][0])
}

/// Solve `A·x = b` by Cramer's rule.
fn solve_3x3(a: [[f64; 3]; 3], b: [f64; 3]) -> Option<[f64; 3]> {
    let det = determinant(&a);
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    let mut out = [0.0; 3];
    for (col, slot) in out.iter_mut().enumerate() {
        let mut m = a;
        for row in 0..3 {
            m[row][col] = b[row];
        }
        *slot = determinant(&m) / det;
    }
    out.iter().all(|v| v.is_finite()).then_some(out)
}

fn invert_3x3(a: [[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let det = determinant(&a);
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    let inv = 1.0 / det;
    let mut out = [[0.0f64; 3]; 3];
    out[0][0] = inv * (a[1][1] * a[2][2] - a[1][2] * a[2][1]);
    out[0][1] = inv * (a[0][2] * a[2][1] - a[0][1] * a[2][2]);
    out[0][2] = inv * (a[0][1] * a[1][2] - a[0][2] * a[1][1]);
    out[1][0] = inv * (a[1][2] * a[2][0] - a[1][0] * a[2][2]);
    out[1][1] = inv * (a[0][0] * a[2][2] - a[0][2] * a[2][0]);
    out[1][2] = inv * (a[0][2] * a[1][0] - a[0][0] * a[1][2]);
    out[2][0] = inv * (a[1][0] * a[2][1] - a[1][1] * a[2][0]);
    out[2][1] = inv * (a[0][1] * a[2][0] - a[0][0] * a[2][1]);
    out[2][2] = inv * (a[0][0] * a[1][1] - a[0][1] * a[1][0]);
    Some(out)
}
