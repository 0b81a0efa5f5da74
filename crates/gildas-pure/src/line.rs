//! Fitted spectral lines.

use alloc::string::String;
use serde::{Deserialize, Serialize};

use crate::gaussfit::{Gaussian, GaussianFit};
use crate::spectrum::SpectralAxis;

/// Area constant `2·sqrt(2 ln 2)`: `area = k · peak · width`.
pub const GAUSSIAN_AREA_FACTOR: f64 = 2.354_820_045_030_949_3;

/// A value with its one-sigma error.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Measured {
    pub value: f64,
    pub error: f64,
}

impl Measured {
    pub fn new(value: f64, error: f64) -> Self {
        Measured { value, error }
    }
}

/// One Gaussian line found in a spectrum.
///
/// Velocities and widths in km/s, peak in the spectrum's intensity unit,
/// area in unit·km/s. Channel bounds are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumLine {
    pub velocity: Measured,
    /// Full width at half maximum.
    pub width: Measured,
    pub peak: Measured,
    pub area: Measured,
    /// Rest-frame frequency of the line center (MHz).
    pub frequency: f64,
    /// Fractional center channel.
    pub channel: f64,
    pub first_channel: usize,
    pub last_channel: usize,
    pub enabled: bool,
    pub deleted: bool,
    pub fitted: bool,
    pub label: String,
    pub comment: String,
}

impl SpectrumLine {
    /// Physical line parameters from a channel-space fit.
    ///
    /// Errors come from the fit covariance. A NaN error is rebuilt from the
    /// other two through `area = k · peak · width`. Velocity, width and peak
    /// errors are then floored at `sigma` and the area error at
    /// `sigma · sqrt(width / |vres|)`; an error still NaN takes its floor.
    pub fn from_fit(fit: &GaussianFit, axis: &SpectralAxis, sigma: f64, window: (usize, usize)) -> Self {
        let g = fit.gaussian;
        let [e_center, e_fwhm, e_peak] = fit.errors();
        let vres = axis.vel_resol.abs();
        let k = GAUSSIAN_AREA_FACTOR;

        let width = g.fwhm * vres;
        let area = k * g.peak * width;
        let c = &fit.covariance;
        let mut width_err = e_fwhm * vres;
        let mut peak_err = e_peak;
        let var_area = k * k
            * (width * width * c[2][2]
                + g.peak * g.peak * c[1][1] * vres * vres
                + 2.0 * g.peak * width * c[2][1] * vres);
        let mut area_err = if var_area >= 0.0 { var_area.sqrt() } else { f64::NAN };

        let rel = |e: f64, v: f64| e / v.abs();
        if area_err.is_nan() && !peak_err.is_nan() && !width_err.is_nan() {
            area_err = area.abs() * rel(peak_err, g.peak).hypot(rel(width_err, width));
        }
        if width_err.is_nan() && !area_err.is_nan() && !peak_err.is_nan() {
            let r = rel(area_err, area).powi(2) - rel(peak_err, g.peak).powi(2);
            width_err = width * r.abs().sqrt();
        }
        if peak_err.is_nan() && !area_err.is_nan() && !width_err.is_nan() {
            let r = rel(area_err, area).powi(2) - rel(width_err, width).powi(2);
            peak_err = g.peak.abs() * r.abs().sqrt();
        }
        let floored = |e: f64, floor: f64| if e.is_nan() { floor } else { e.max(floor) };
        let area_floor = sigma * (width / vres).sqrt();

        let velocity = axis.velocity(g.center);
        SpectrumLine {
            velocity: Measured::new(velocity, floored(e_center * vres, sigma)),
            width: Measured::new(width, floored(width_err, sigma)),
            peak: Measured::new(g.peak, floored(peak_err, sigma)),
            area: Measured::new(area, floored(area_err, area_floor)),
            frequency: axis.frequency(velocity),
            channel: g.center,
            first_channel: window.0,
            last_channel: window.1,
            enabled: true,
            deleted: false,
            fitted: true,
            label: String::new(),
            comment: String::new(),
        }
    }

    /// Channel-space Gaussian of this line on `axis`.
    pub fn profile(&self, axis: &SpectralAxis) -> Gaussian {
        let center = axis.channel_of_velocity(self.velocity.value);
        Gaussian::new(center, self.width.value / axis.vel_resol.abs(), self.peak.value)
    }

    /// Subtract the line from `data`, whose index 0 is channel 1.
    pub fn subtract_from(&self, data: &mut [f64], axis: &SpectralAxis) {
        let g = self.profile(axis);
        for (i, v) in data.iter_mut().enumerate() {
            *v -= g.eval(i as f64 + 1.0);
        }
    }

    /// Add the line back onto `data`.
    pub fn add_to(&self, data: &mut [f64], axis: &SpectralAxis) {
        let g = self.profile(axis);
        for (i, v) in data.iter_mut().enumerate() {
            *v += g.eval(i as f64 + 1.0);
        }
    }

    /// Whether this line still contributes to models and listings.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.deleted
    }

    /// True for absorption features.
    pub fn is_absorption(&self) -> bool {
        self.peak.value < 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis() -> SpectralAxis {
        SpectralAxis::new(32.0, 0.0, 0.5, 115271.2).unwrap()
    }

    fn fit(center: f64, fwhm: f64, peak: f64) -> GaussianFit {
        GaussianFit {
            gaussian: Gaussian::new(center, fwhm, peak),
            covariance: [[0.01, 0.0, 0.0], [0.0, 0.04, 0.0], [0.0, 0.0, 0.0001]],
            chi_square: 1.0,
            iterations: 3,
        }
    }

    #[test]
    fn area_factor_constant() {
        let k = 2.0 * (2.0 * core::f64::consts::LN_2).sqrt();
        assert!((k - GAUSSIAN_AREA_FACTOR).abs() < 1e-15);
    }

    #[test]
    fn physical_units() {
        let l = SpectrumLine::from_fit(&fit(34.0, 4.0, 2.0), &axis(), 0.05, (28, 40));
        assert_eq!(l.velocity.value, 1.0);
        assert_eq!(l.width.value, 2.0);
        assert!((l.area.value - GAUSSIAN_AREA_FACTOR * 4.0).abs() < 1e-12);
        assert!((l.velocity.error - 0.05).abs() < 1e-12);
        assert!((l.width.error - 0.1).abs() < 1e-12);
        assert_eq!((l.first_channel, l.last_channel), (28, 40));
        assert!(l.fitted && l.is_active());
        assert!(l.frequency < 115271.2);
    }

    #[test]
    fn errors_floored_at_noise() {
        let l = SpectrumLine::from_fit(&fit(34.0, 4.0, 2.0), &axis(), 0.5, (28, 40));
        assert_eq!(l.peak.error, 0.5);
        assert_eq!(l.velocity.error, 0.5);
        assert_eq!(l.width.error, 0.5);
        // sigma · sqrt(width / vres) = 0.5 · sqrt(4)
        assert_eq!(l.area.error, 1.0);
    }

    #[test]
    fn nan_velocity_error_takes_floor() {
        let mut f = fit(34.0, 4.0, 2.0);
        f.covariance[0][0] = -0.01;
        let l = SpectrumLine::from_fit(&f, &axis(), 0.05, (28, 40));
        assert_eq!(l.velocity.error, 0.05);
    }

    #[test]
    fn nan_width_and_area_errors_take_floor() {
        let mut f = fit(34.0, 4.0, 2.0);
        f.covariance[1][1] = -1.0;
        let l = SpectrumLine::from_fit(&f, &axis(), 0.05, (28, 40));
        assert_eq!(l.width.error, 0.05);
        assert!((l.area.error - 0.05 * 2.0).abs() < 1e-12);
        assert!((l.peak.error - 0.05).abs() < 1e-12);
    }

    #[test]
    fn nan_error_rebuilt() {
        let mut f = fit(34.0, 4.0, 2.0);
        f.covariance[2][2] = 0.01;
        f.covariance[1][1] = -0.001;
        let l = SpectrumLine::from_fit(&f, &axis(), 0.0, (28, 40));
        assert!(l.width.error.is_finite());
        assert!(l.area.error.is_finite());
    }

    #[test]
    fn subtract_then_add_restores() {
        let l = SpectrumLine::from_fit(&fit(34.0, 4.0, 2.0), &axis(), 0.05, (28, 40));
        let mut d = vec![1.0; 64];
        l.subtract_from(&mut d, &axis());
        assert!((d[33] - (1.0 - 2.0)).abs() < 1e-12);
        l.add_to(&mut d, &axis());
        assert!(d.iter().all(|v| (v - 1.0).abs() < 1e-12));
    }

    #[test]
    fn json_roundtrip() {
        let mut l = SpectrumLine::from_fit(&fit(30.0, 3.0, -1.5), &axis(), 0.05, (25, 35));
        l.label = String::from("CO v=0 1-0");
        let s = serde_json::to_string(&l).unwrap();
        let back: SpectrumLine = serde_json::from_str(&s).unwrap();
        assert_eq!(back, l);
        assert!(back.is_absorption());
    }
}
