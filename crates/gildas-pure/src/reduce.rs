//! Automated detection and Gaussian fitting of spectral lines.
//!
//! A reduction repeatedly takes the strongest remaining feature of the
//! residual, bounds it, fits a Gaussian and either subtracts the fit or
//! marks the channels as unexplained. It stops once nothing left exceeds
//! `times_sigma · sigma`. An optional refinement pass then refits every line
//! against the spectrum with all other lines removed.

use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gaussfit::{fit_gaussian, Gaussian};
use crate::line::SpectrumLine;
use crate::noise;
use crate::spectrum::{SpectralAxis, SpectrumRecord};

/// A feature window keeps growing while it stays within this many sigmas of
/// the extremum...
pub const WALK_NEAR_PEAK_SIGMAS: f64 = 8.0;
/// ...and above this many sigmas.
pub const WALK_SIGNIFICANT_SIGMAS: f64 = 3.0;

/// Minimum number of baseline channels fitted on each side of a feature.
const MIN_PADDING: usize = 3;

/// Tuning of a [`LineFittingEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceConfig {
    /// Detection threshold in units of the residual sigma.
    pub times_sigma: f64,
    /// Stop after this many accepted lines.
    pub max_lines: Option<usize>,
    /// Iteration cap of a single Gaussian fit.
    pub max_fit_iterations: usize,
    /// Passes of the sigma-clipping noise estimator.
    pub sigma_iterations: usize,
    /// Run the per-line refinement pass after detection.
    pub refine: bool,
    /// Width (channels) of the boxcar producing the baseline.
    pub baseline_smoothing: usize,
    /// Species never proposed by catalog identification.
    pub impossible_molecules: Vec<String>,
    /// Weakest catalog intensity (log10 units) considered when identifying.
    pub catalog_min_intensity: f64,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        ReduceConfig {
            times_sigma: 3.0,
            max_lines: None,
            max_fit_iterations: 200,
            sigma_iterations: 10,
            refine: true,
            baseline_smoothing: 5,
            impossible_molecules: ["NaCl", "KCl", "AlCl", "AlF", "NaCN", "MgNC", "SiC2"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            catalog_min_intensity: -6.0,
        }
    }
}

/// Number of refinement passes for a given line count; zero disables it.
pub fn refinement_iterations(lines: usize) -> usize {
    match lines {
        0..=40 => 10,
        41..=80 => 3,
        81..=150 => 2,
        _ => 0,
    }
}

/// Result of [`LineFittingEngine::reduce`]. All arrays are indexed from
/// channel 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    /// Accepted lines, ordered by center channel.
    pub lines: Vec<SpectrumLine>,
    /// Spectrum minus every accepted line.
    pub residual: Vec<f64>,
    /// Boxcar-smoothed residual.
    pub baseline: Vec<f64>,
    /// Residual left in the windows of rejected fits.
    pub bad_fit_residual: Vec<f64>,
    /// Final noise estimate.
    pub sigma: f64,
    pub repaired_channels: usize,
    pub rejected_fits: usize,
}

/// Sum of the profiles of the active `lines`, sampled on `nchan` channels.
pub fn line_model(lines: &[SpectrumLine], axis: &SpectralAxis, nchan: usize) -> Vec<f64> {
    let mut model = vec![0.0; nchan];
    for line in lines.iter().filter(|l| l.is_active()) {
        line.add_to(&mut model, axis);
    }
    model
}

/// Detects and fits Gaussian lines.
#[derive(Debug, Clone, Default)]
pub struct LineFittingEngine {
    config: ReduceConfig,
}

impl LineFittingEngine {
    pub fn new(config: ReduceConfig) -> Self {
        LineFittingEngine { config }
    }

    pub fn config(&self) -> &ReduceConfig {
        &self.config
    }

    /// Reduce a spectrum: repair blanked channels, then detect, fit and
    /// optionally refine.
    pub fn reduce(&self, spectrum: &SpectrumRecord) -> Result<Reduction> {
        let axis = spectrum.axis()?;
        let blank = spectrum.blanking();
        let mut data: Vec<f64> = spectrum.data().iter().map(|&v| v as f64).collect();
        let repaired =
            noise::repair_bad_channels(&mut data, |v| blank.is_some_and(|b| b != 0.0 && v as f32 == b));
        if repaired > 0 {
            log::debug!("repaired {repaired} bad channels before reduction");
        }
        let mut out = self.reduce_samples(&data, &axis)?;
        out.repaired_channels = repaired;
        Ok(out)
    }

    /// Reduce already-clean samples (index 0 is channel 1).
    pub fn reduce_samples(&self, data: &[f64], axis: &SpectralAxis) -> Result<Reduction> {
        let n = data.len();
        let floor = noise::noise_floor(data);
        let mut residual = data.to_vec();
        let mut bad_fit_residual = vec![0.0; n];
        let mut masked = vec![false; n];
        let mut lines: Vec<SpectrumLine> = Vec::new();
        let mut rejected_fits = 0;

        // Every pass either subtracts a line or masks at least one channel.
        for _ in 0..2 * n {
            if self.config.max_lines.is_some_and(|m| lines.len() >= m) {
                break;
            }
            let sigma = self.sigma(&residual, floor);
            let Some(p) = strongest(&residual, &masked) else {
                break;
            };
            if residual[p].abs() < self.config.times_sigma * sigma {
                break;
            }
            let window = bound_feature(&residual, p, sigma);
            let guess = Gaussian::new(p as f64 + 1.0, initial_fwhm(&residual, p, window), residual[p]);
            match self.fit_window(&residual, window, guess, sigma, axis) {
                Some(line) => {
                    log::debug!(
                        "line at channel {:.2}: peak {:.4}, fwhm {:.3} km/s",
                        line.channel,
                        line.peak.value,
                        line.width.value
                    );
                    line.subtract_from(&mut residual, axis);
                    lines.push(line);
                }
                None => {
                    rejected_fits += 1;
                    for i in window.0..=window.1 {
                        if !masked[i] {
                            bad_fit_residual[i] += residual[i];
                            masked[i] = true;
                        }
                    }
                }
            }
        }

        if self.config.refine && !lines.is_empty() {
            self.refine(data, &mut lines, axis, floor);
        }
        lines.sort_by(|a, b| a.channel.total_cmp(&b.channel));

        let model = line_model(&lines, axis, n);
        let residual: Vec<f64> = data.iter().zip(&model).map(|(d, m)| d - m).collect();
        let sigma = self.sigma(&residual, floor);
        let baseline = noise::boxcar(&residual, self.config.baseline_smoothing);
        log::info!(
            "reduction found {} lines ({} fits rejected), residual sigma {:.4e}",
            lines.len(),
            rejected_fits,
            sigma
        );
        Ok(Reduction {
            lines,
            residual,
            baseline,
            bad_fit_residual,
            sigma,
            repaired_channels: 0,
            rejected_fits,
        })
    }

    /// Refit each line alone against `data` with all other lines removed,
    /// strongest first. A new fit is kept only when it does not raise the
    /// global residual rms.
    pub fn refine(&self, data: &[f64], lines: &mut [SpectrumLine], axis: &SpectralAxis, floor: f64) {
        let passes = refinement_iterations(lines.len());
        if passes == 0 {
            log::warn!("{} lines is too many to refine; keeping first-pass fits", lines.len());
            return;
        }
        lines.sort_by(|a, b| b.peak.value.abs().total_cmp(&a.peak.value.abs()));
        let n = data.len();
        for pass in 0..passes {
            let mut improved = false;
            for idx in 0..lines.len() {
                let model = line_model(lines, axis, n);
                let residual: Vec<f64> = data.iter().zip(&model).map(|(d, m)| d - m).collect();
                let Some(current) = noise::rms(&residual) else {
                    return;
                };
                let sigma = self.sigma(&residual, floor);
                let mut others = residual;
                if lines[idx].is_active() {
                    lines[idx].add_to(&mut others, axis);
                }
                let first = lines[idx].first_channel.max(1) - 1;
                let last = lines[idx].last_channel.clamp(1, n) - 1;
                let guess = lines[idx].profile(axis);
                let Some(mut candidate) = self.fit_window(&others, (first, last.max(first)), guess, sigma, axis)
                else {
                    continue;
                };
                let mut trial = others;
                candidate.subtract_from(&mut trial, axis);
                let Some(trial_rms) = noise::rms(&trial) else {
                    continue;
                };
                if trial_rms <= current {
                    improved |= trial_rms < current * (1.0 - 1e-9);
                    candidate.label = core::mem::take(&mut lines[idx].label);
                    candidate.comment = core::mem::take(&mut lines[idx].comment);
                    lines[idx] = candidate;
                }
            }
            if !improved {
                log::debug!("refinement settled after {} passes", pass + 1);
                break;
            }
        }
    }

    fn sigma(&self, residual: &[f64], floor: f64) -> f64 {
        noise::clipped_sigma(residual, self.config.sigma_iterations)
            .unwrap_or(floor)
            .max(floor)
    }

    /// Fit `guess` over the 0-based inclusive `window` widened by padding,
    /// returning `None` when the fit fails or is rejected.
    fn fit_window(
        &self,
        residual: &[f64],
        window: (usize, usize),
        guess: Gaussian,
        sigma: f64,
        axis: &SpectralAxis,
    ) -> Option<SpectrumLine> {
        let n = residual.len();
        let (lo, hi) = window;
        let pad = (hi - lo + 1).max(MIN_PADDING);
        let a = lo.saturating_sub(pad);
        let b = (hi + pad).min(n - 1);
        let xs: Vec<f64> = (a..=b).map(|i| i as f64 + 1.0).collect();
        let ys = &residual[a..=b];

        let fit = match fit_gaussian(&xs, ys, sigma, guess, self.config.max_fit_iterations) {
            Ok(fit) => fit,
            Err(e) => {
                log::debug!("fit near channel {:.1} discarded: {e}", guess.center);
                return None;
            }
        };
        let g = fit.gaussian;
        let threshold = self.config.times_sigma * sigma;
        if g.peak == 0.0 || g.peak.abs() < threshold || g.peak.signum() != guess.peak.signum() {
            return None;
        }
        if g.fwhm < 1.0 || g.fwhm > n as f64 {
            return None;
        }
        if g.center < xs[0] || g.center > xs[xs.len() - 1] {
            return None;
        }
        let before = noise::rms(ys)?;
        let cleaned: Vec<f64> = xs.iter().zip(ys).map(|(&x, &y)| y - g.eval(x)).collect();
        let after = noise::rms(&cleaned)?;
        if after >= before {
            return None;
        }
        Some(SpectrumLine::from_fit(&fit, axis, sigma, (lo + 1, hi + 1)))
    }
}

/// Index of the largest unmasked `|value|`.
fn strongest(residual: &[f64], masked: &[bool]) -> Option<usize> {
    residual
        .iter()
        .zip(masked)
        .enumerate()
        .filter(|(_, (v, m))| !**m && v.is_finite())
        .max_by(|(_, (a, _)), (_, (b, _))| a.abs().total_cmp(&b.abs()))
        .map(|(i, _)| i)
}

/// Channel window (0-based, inclusive) of the feature peaking at `p`.
///
/// The walk continues while the signal keeps falling and is still above one
/// sigma, or while it stays within the near-peak band and above the
/// significance level.
fn bound_feature(residual: &[f64], p: usize, sigma: f64) -> (usize, usize) {
    let s = residual[p].signum();
    let peak = s * residual[p];
    let step = |cur: f64, next: f64| {
        (next <= cur && next > sigma)
            || (peak - next <= WALK_NEAR_PEAK_SIGMAS * sigma && next >= WALK_SIGNIFICANT_SIGMAS * sigma)
    };
    let mut lo = p;
    while lo > 0 && step(s * residual[lo], s * residual[lo - 1]) {
        lo -= 1;
    }
    let mut hi = p;
    while hi + 1 < residual.len() && step(s * residual[hi], s * residual[hi + 1]) {
        hi += 1;
    }
    (lo, hi)
}

/// Width guess in channels: samples of the window above half the peak.
fn initial_fwhm(residual: &[f64], p: usize, window: (usize, usize)) -> f64 {
    let half = residual[p].abs() / 2.0;
    let s = residual[p].signum();
    let above = residual[window.0..=window.1].iter().filter(|v| s * **v >= half).count();
    (above as f64).max(1.0)
}
