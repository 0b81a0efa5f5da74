//! Reprojection of one cube onto the grid, beam and velocity axis of another.

use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::cube::{bilinear, CubeRecord};
use crate::cube_header::{AxisFormula, CubeHeader};
use crate::error::Result;
use crate::kernel::{ConvolutionOptions, Kernel};
use crate::spectrum::SpectralAxis;
use crate::spline::CubicSpline;

/// Which stages of [`reproject`] run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReprojectOptions {
    /// Smooth the source to the target beam first.
    pub convolve: bool,
    /// Interpolate every spectrum onto the target's velocity sampling.
    pub velocity_axis: bool,
    /// Re-express source velocities at the target's rest frequency and
    /// reference velocity.
    pub shift_to_rest_frequency: bool,
    pub convolution: ConvolutionOptions,
}

impl Default for ReprojectOptions {
    fn default() -> Self {
        ReprojectOptions {
            convolve: true,
            velocity_axis: true,
            shift_to_rest_frequency: false,
            convolution: ConvolutionOptions::default(),
        }
    }
}

/// Resample `source` onto the pixel grid described by `target`.
///
/// Spatial resampling goes target pixel → target offsets → sky → source
/// offsets → source pixel, interpolating bilinearly. Target pixels that fall
/// off the source map, or outside a projection's domain, are blanked.
pub fn reproject(source: &CubeRecord, target: &CubeHeader, opts: &ReprojectOptions) -> Result<CubeRecord> {
    let src = source.header();
    let mut volume = source.to_volume()?;
    let mut beam = src.beam;

    if opts.convolve {
        match smoothing_kernel(src, target, &opts.convolution)? {
            Some(kernel) => {
                volume = kernel.convolve_all(&volume, src, &opts.convolution);
                beam = target.beam;
            }
            None => log::warn!("source beam is not smaller than the target beam; not convolving"),
        }
    }

    let spatial = resample_spatial(&volume, src, target)?;

    let mut src_velocity = src.axes[2];
    let mut rest_freq = src.rest_freq;
    if opts.shift_to_rest_frequency {
        src_velocity = shifted_velocity_formula(src, target)?;
        rest_freq = target.rest_freq;
    }

    let (data, velocity) = if opts.velocity_axis {
        let out = resample_velocity(&spatial, src, src_velocity, target)?;
        (out, target.axes[2])
    } else {
        (spatial, src_velocity)
    };

    let (nz, ny, nx) = data.dim();
    let mut header = target.clone();
    header.set_dims(nx, ny, nz);
    header.axes[2] = velocity;
    header.vel_resol = velocity.increment as f32;
    header.blank = src.blank;
    header.blank_tolerance = src.blank_tolerance;
    header.unit = src.unit.clone();
    header.source = src.source.clone();
    header.line = src.line.clone();
    header.rest_freq = rest_freq;
    header.beam = beam;
    log::debug!("reprojected cube onto {nx}x{ny}x{nz} grid");
    CubeRecord::new(header, data)
}

fn smoothing_kernel(
    src: &CubeHeader,
    target: &CubeHeader,
    opts: &ConvolutionOptions,
) -> Result<Option<Kernel>> {
    if !src.beam.is_defined() || !target.beam.is_defined() {
        log::warn!("beam missing from source or target header; not convolving");
        return Ok(None);
    }
    Kernel::matching(
        &src.beam,
        &target.beam,
        src.axes[0].increment,
        src.axes[1].increment,
        opts.sampling_radius,
    )
}

fn resample_spatial(volume: &Array3<f32>, src: &CubeHeader, target: &CubeHeader) -> Result<Array3<f32>> {
    let (nz, _, _) = volume.dim();
    let (nx, ny) = (target.nx(), target.ny());
    let from = src.projection();
    let to = target.projection();
    // Surface reserved projection codes before looping.
    to.to_sky(0.0, 0.0)?;
    from.to_offsets(src.a0, src.d0)?;

    let blank = src.blank_value();
    let mut out = Array3::<f32>::from_elem((nz, ny, nx), blank);
    for j in 0..ny {
        for i in 0..nx {
            let x = target.axes[0].world(i as f64 + 1.0);
            let y = target.axes[1].world(j as f64 + 1.0);
            let Ok((lon, lat)) = to.to_sky(x, y) else {
                continue;
            };
            let Ok((sx, sy)) = from.to_offsets(lon, lat) else {
                continue;
            };
            let pi = src.axes[0].pixel(sx) - 1.0;
            let pj = src.axes[1].pixel(sy) - 1.0;
            for k in 0..nz {
                if let Some(v) = bilinear(volume.index_axis(Axis(0), k), src, pi, pj) {
                    out[[k, j, i]] = v;
                }
            }
        }
    }
    Ok(out)
}

/// Velocity formula of the source channels once re-expressed at the
/// target's rest frequency and reference velocity.
fn shifted_velocity_formula(src: &CubeHeader, target: &CubeHeader) -> Result<AxisFormula> {
    let f = src.axes[2];
    if src.rest_freq <= 0.0 || target.rest_freq <= 0.0 {
        log::warn!("rest frequency missing; velocity axis left unshifted");
        return Ok(f);
    }
    let from = SpectralAxis::new(f.reference, f.value, f.increment, src.rest_freq)?;
    let to = SpectralAxis::new(f.reference, target.axes[2].value, f.increment, target.rest_freq)?;
    let v_at = |pixel: f64| to.velocity_of_frequency(from.channel_frequency(pixel));
    let v0 = v_at(f.reference);
    let v1 = v_at(f.reference + 1.0);
    Ok(AxisFormula::new(f.reference, v0, v1 - v0))
}

fn resample_velocity(
    data: &Array3<f32>,
    src: &CubeHeader,
    src_velocity: AxisFormula,
    target: &CubeHeader,
) -> Result<Array3<f32>> {
    let (nz, ny, nx) = data.dim();
    let tnz = target.nz();
    let blank = src.blank_value();
    let mut out = Array3::<f32>::from_elem((tnz, ny, nx), blank);
    let mut order: Vec<usize> = (0..nz).collect();
    if src_velocity.increment < 0.0 {
        order.reverse();
    }
    let target_v: Vec<f64> = (1..=tnz).map(|k| target.axes[2].world(k as f64)).collect();
    for j in 0..ny {
        for i in 0..nx {
            let mut xs = Vec::with_capacity(nz);
            let mut ys = Vec::with_capacity(nz);
            for &k in &order {
                let v = data[[k, j, i]];
                if v.is_finite() && !src.is_blank(v) {
                    xs.push(src_velocity.world(k as f64 + 1.0));
                    ys.push(v as f64);
                }
            }
            if xs.len() < 2 {
                continue;
            }
            let spline = CubicSpline::new(&xs, &ys)?;
            for (k, &v) in target_v.iter().enumerate() {
                if let Some(y) = spline.eval_inside(v) {
                    out[[k, j, i]] = y as f32;
                }
            }
        }
    }
    Ok(out)
}
