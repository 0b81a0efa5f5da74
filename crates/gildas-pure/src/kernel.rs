//! Elliptical Gaussian kernels and spatial convolution of cube planes.

use core::f64::consts::{FRAC_1_SQRT_2, LN_2};

use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::cube_header::{Beam, CubeHeader};
use crate::error::{Error, Result};

/// Conversion factor from FWHM to Gaussian sigma.
pub const FWHM_TO_SIGMA: f64 = 0.424_660_900_144_009_5;

/// Warnings emitted per call before further numeric anomalies go quiet.
pub const ANOMALY_WARNING_CAP: usize = 10;

/// Options controlling how a kernel is applied at the map edges and on NaNs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvolutionOptions {
    /// Let the footprint extend past the map, contributing `outside_value`.
    pub include_outside: bool,
    pub outside_value: f32,
    /// Replace a NaN center pixel with the convolved value instead of keeping it.
    pub fix_nan: bool,
    /// Kernel truncation radius in units of the beam FWHM.
    pub sampling_radius: f64,
}

impl Default for ConvolutionOptions {
    fn default() -> Self {
        ConvolutionOptions {
            include_outside: false,
            outside_value: 0.0,
            fix_nan: false,
            sampling_radius: 3.0,
        }
    }
}

/// Counts NaN/Inf samples met during one call and warns about the first few.
#[derive(Debug, Default)]
pub(crate) struct AnomalyLog {
    seen: usize,
}

impl AnomalyLog {
    pub(crate) fn report(&mut self, what: &str, i: usize, j: usize, k: usize) {
        if self.seen < ANOMALY_WARNING_CAP {
            log::warn!("{what}: non-finite sample at pixel ({i}, {j}) plane {k} skipped");
        } else if self.seen == ANOMALY_WARNING_CAP {
            log::warn!("{what}: further non-finite samples will not be reported");
        }
        self.seen += 1;
    }

    pub(crate) fn seen(&self) -> usize {
        self.seen
    }
}

/// Normalized 2-D weight matrix, indexed `[dj + half_y, di + half_x]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    weights: Array2<f64>,
    half_x: usize,
    half_y: usize,
}

impl Kernel {
    /// Sample an elliptical Gaussian beam on a grid with pixel increments
    /// `inc_x`, `inc_y` (radians, signed).
    ///
    /// Axis-aligned beams are integrated over each pixel with `erf`; rotated
    /// beams are sampled at pixel centers.
    pub fn from_beam(beam: &Beam, inc_x: f64, inc_y: f64, sampling_radius: f64) -> Result<Self> {
        if !beam.is_defined() {
            return Err(Error::InvalidValue("beam axes must be positive"));
        }
        if inc_x == 0.0 || inc_y == 0.0 {
            return Err(Error::InvalidValue("pixel increment must be non-zero"));
        }
        let major = beam.major as f64;
        let minor = beam.minor as f64;
        let pa = beam.position_angle as f64;
        let reach = sampling_radius.max(0.0) * major;
        let half_x = (reach / inc_x.abs()).ceil() as usize;
        let half_y = (reach / inc_y.abs()).ceil() as usize;

        let (sp, cp) = pa.sin_cos();
        let aligned = sp.abs() < 1e-9 || cp.abs() < 1e-9;
        // Extent of the beam along x and y when it is axis-aligned.
        let (fx, fy) = if cp.abs() < 1e-9 { (major, minor) } else { (minor, major) };

        let mut weights = Array2::<f64>::zeros((2 * half_y + 1, 2 * half_x + 1));
        for ((r, c), w) in weights.indexed_iter_mut() {
            let di = c as f64 - half_x as f64;
            let dj = r as f64 - half_y as f64;
            let (dx, dy) = (di * inc_x, dj * inc_y);
            let u = dx * sp + dy * cp;
            let v = dx * cp - dy * sp;
            let q = (u / major).powi(2) + (v / minor).powi(2);
            if q.sqrt() > sampling_radius {
                continue;
            }
            *w = if aligned {
                pixel_integral(di, inc_x.abs() / (fx * FWHM_TO_SIGMA))
                    * pixel_integral(dj, inc_y.abs() / (fy * FWHM_TO_SIGMA))
            } else {
                (-4.0 * LN_2 * q).exp()
            };
        }
        Self::from_weights(weights)
    }

    /// Build a kernel from raw weights; both dimensions must be odd.
    pub fn from_weights(mut weights: Array2<f64>) -> Result<Self> {
        let (ny, nx) = weights.dim();
        if nx % 2 == 0 || ny % 2 == 0 {
            return Err(Error::InvalidValue("kernel dimensions must be odd"));
        }
        let sum: f64 = weights.sum();
        if sum <= 0.0 || !sum.is_finite() {
            return Err(Error::InvalidValue("kernel weights must sum to a positive value"));
        }
        weights /= sum;
        Ok(Kernel {
            weights,
            half_x: nx / 2,
            half_y: ny / 2,
        })
    }

    /// Kernel bringing a `source` beam to a `target` beam, or `None` when
    /// the source is already at least as wide as the target.
    ///
    /// The deconvolved width is `sqrt(target² - source²)` along each axis,
    /// keeping the target's position angle.
    pub fn matching(
        source: &Beam,
        target: &Beam,
        inc_x: f64,
        inc_y: f64,
        sampling_radius: f64,
    ) -> Result<Option<Self>> {
        let sq = |t: f32, s: f32| (t as f64).powi(2) - (s as f64).powi(2);
        let (dmaj, dmin) = (sq(target.major, source.major), sq(target.minor, source.minor));
        if dmaj <= 0.0 || dmin <= 0.0 {
            return Ok(None);
        }
        let beam = Beam {
            major: dmaj.sqrt() as f32,
            minor: dmin.sqrt() as f32,
            position_angle: target.position_angle,
        };
        Self::from_beam(&beam, inc_x, inc_y, sampling_radius).map(Some)
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    pub fn half_width(&self) -> (usize, usize) {
        (self.half_x, self.half_y)
    }

    /// Convolve every channel of the spectrum at pixel `(i, j)` (0-based).
    pub fn convolve_at(
        &self,
        volume: &Array3<f32>,
        header: &CubeHeader,
        i: usize,
        j: usize,
        opts: &ConvolutionOptions,
    ) -> Result<Vec<f32>> {
        let mut anomalies = AnomalyLog::default();
        let (nz, ny, nx) = volume.dim();
        if i >= nx {
            return Err(Error::ChannelRange { index: i, len: nx });
        }
        if j >= ny {
            return Err(Error::ChannelRange { index: j, len: ny });
        }
        Ok((0..nz)
            .map(|k| self.apply(volume, header, i, j, k, opts, &mut anomalies))
            .collect())
    }

    /// Convolve the whole volume plane by plane.
    pub fn convolve_all(
        &self,
        volume: &Array3<f32>,
        header: &CubeHeader,
        opts: &ConvolutionOptions,
    ) -> Array3<f32> {
        let mut anomalies = AnomalyLog::default();
        let mut out = Array3::<f32>::zeros(volume.dim());
        for (k, mut plane) in out.axis_iter_mut(Axis(0)).enumerate() {
            for ((j, i), v) in plane.indexed_iter_mut() {
                *v = self.apply(volume, header, i, j, k, opts, &mut anomalies);
            }
        }
        if anomalies.seen() > 0 {
            log::warn!("convolution skipped {} non-finite samples", anomalies.seen());
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn apply(
        &self,
        volume: &Array3<f32>,
        header: &CubeHeader,
        i: usize,
        j: usize,
        k: usize,
        opts: &ConvolutionOptions,
        anomalies: &mut AnomalyLog,
    ) -> f32 {
        let (_, ny, nx) = volume.dim();
        let center = volume[[k, j, i]];
        if center.is_nan() && !opts.fix_nan {
            return f32::NAN;
        }
        let mut acc = 0.0f64;
        let mut wsum = 0.0f64;
        for ((r, c), &w) in self.weights.indexed_iter() {
            if w == 0.0 {
                continue;
            }
            let ii = i as isize + c as isize - self.half_x as isize;
            let jj = j as isize + r as isize - self.half_y as isize;
            if ii < 0 || jj < 0 || ii >= nx as isize || jj >= ny as isize {
                if opts.include_outside {
                    acc += opts.outside_value as f64 * w;
                    wsum += w;
                }
                continue;
            }
            let v = volume[[k, jj as usize, ii as usize]];
            if !v.is_finite() {
                anomalies.report("convolution", ii as usize, jj as usize, k);
                continue;
            }
            if header.is_blank(v) {
                continue;
            }
            acc += v as f64 * w;
            wsum += w;
        }
        if wsum > 0.0 {
            (acc / wsum) as f32
        } else {
            header.blank_value()
        }
    }
}

/// Mass of a unit Gaussian over the pixel `[d - 0.5, d + 0.5]`, where
/// `scale` is the pixel size in units of sigma.
fn pixel_integral(d: f64, scale: f64) -> f64 {
    let phi = |x: f64| 0.5 * (1.0 + libm::erf(x * FRAC_1_SQRT_2));
    phi((d + 0.5) * scale) - phi((d - 0.5) * scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encoding;

    fn beam(major: f32, minor: f32, pa: f32) -> Beam {
        Beam {
            major,
            minor,
            position_angle: pa,
        }
    }

    fn header(nx: usize, ny: usize, nz: usize) -> CubeHeader {
        CubeHeader::new(Encoding::Ieee, nx, ny, nz)
    }

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let k = Kernel::from_beam(&beam(3.0, 3.0, 0.0), -1.0, 1.0, 2.0).unwrap();
        let w = k.weights();
        assert!((w.sum() - 1.0).abs() < 1e-12);
        let (hx, hy) = k.half_width();
        assert_eq!((hx, hy), (6, 6));
        assert!((w[[hy, 0]] - w[[hy, 2 * hx]]).abs() < 1e-15);
        assert!(w[[hy, hx]] > w[[hy, hx + 1]]);
    }

    #[test]
    fn elongated_beam_spreads_along_major_axis() {
        // Position angle zero puts the major axis along y.
        let k = Kernel::from_beam(&beam(6.0, 2.0, 0.0), 1.0, 1.0, 2.0).unwrap();
        let (hx, hy) = k.half_width();
        let w = k.weights();
        assert!(w[[hy + 2, hx]] > w[[hy, hx + 2]]);
    }

    #[test]
    fn rotated_beam_sampled_at_centers() {
        let k = Kernel::from_beam(&beam(4.0, 2.0, 0.7), 1.0, 1.0, 2.0).unwrap();
        assert!((k.weights().sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn even_or_empty_kernels_rejected() {
        assert!(Kernel::from_weights(Array2::ones((2, 3))).is_err());
        assert!(Kernel::from_weights(Array2::zeros((3, 3))).is_err());
        assert!(Kernel::from_beam(&beam(0.0, 1.0, 0.0), 1.0, 1.0, 3.0).is_err());
    }

    #[test]
    fn uniform_plane_stays_uniform() {
        let vol = Array3::<f32>::from_elem((2, 9, 11), 4.5);
        let k = Kernel::from_beam(&beam(3.0, 2.0, 0.4), 1.0, 1.0, 3.0).unwrap();
        let out = k.convolve_all(&vol, &header(11, 9, 2), &ConvolutionOptions::default());
        assert!(out.iter().all(|v| (v - 4.5).abs() < 1e-5));
    }

    #[test]
    fn outside_value_pulls_edges() {
        let vol = Array3::<f32>::from_elem((1, 9, 9), 1.0);
        let k = Kernel::from_beam(&beam(3.0, 3.0, 0.0), 1.0, 1.0, 3.0).unwrap();
        let opts = ConvolutionOptions {
            include_outside: true,
            outside_value: 0.0,
            ..ConvolutionOptions::default()
        };
        let out = k.convolve_all(&vol, &header(9, 9, 1), &opts);
        assert!(out[[0, 0, 0]] < 0.9);
        assert!(out[[0, 4, 4]] > out[[0, 0, 0]]);
    }

    #[test]
    fn nan_center_kept_unless_fixed() {
        let mut vol = Array3::<f32>::from_elem((1, 5, 5), 2.0);
        vol[[0, 2, 2]] = f32::NAN;
        let k = Kernel::from_weights(Array2::ones((3, 3))).unwrap();
        let h = header(5, 5, 1);
        let kept = k.convolve_at(&vol, &h, 2, 2, &ConvolutionOptions::default()).unwrap();
        assert!(kept[0].is_nan());
        let opts = ConvolutionOptions {
            fix_nan: true,
            ..ConvolutionOptions::default()
        };
        let fixed = k.convolve_at(&vol, &h, 2, 2, &opts).unwrap();
        assert_eq!(fixed[0], 2.0);
        // Neighbours skip the NaN rather than propagating it.
        let next = k.convolve_at(&vol, &h, 1, 2, &ConvolutionOptions::default()).unwrap();
        assert_eq!(next[0], 2.0);
    }

    #[test]
    fn blanked_samples_excluded() {
        let mut vol = Array3::<f32>::from_elem((1, 3, 3), 1.0);
        vol[[0, 0, 0]] = -1000.0;
        let mut h = header(3, 3, 1);
        h.blank = -1000.0;
        h.blank_tolerance = 0.0;
        let k = Kernel::from_weights(Array2::ones((3, 3))).unwrap();
        let out = k.convolve_at(&vol, &h, 1, 1, &ConvolutionOptions::default()).unwrap();
        assert_eq!(out[0], 1.0);
    }

    #[test]
    fn matching_kernel_skips_when_already_wide() {
        let src = beam(4.0, 4.0, 0.0);
        let tgt = beam(3.0, 3.0, 0.0);
        assert!(Kernel::matching(&src, &tgt, 1.0, 1.0, 3.0).unwrap().is_none());
        let k = Kernel::matching(&tgt, &beam(5.0, 5.0, 0.0), 1.0, 1.0, 3.0).unwrap();
        assert!(k.is_some());
    }

    #[test]
    fn out_of_map_pixel_rejected() {
        let vol = Array3::<f32>::zeros((1, 3, 3));
        let k = Kernel::from_weights(Array2::ones((1, 1))).unwrap();
        assert!(k
            .convolve_at(&vol, &header(3, 3, 1), 3, 0, &ConvolutionOptions::default())
            .is_err());
    }
}
