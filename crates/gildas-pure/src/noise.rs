//! Noise estimation and channel conditioning for line fitting.

use alloc::vec::Vec;

/// Fraction of the strongest sample used as the lowest admissible sigma.
///
/// Keeps noise-free synthetic spectra from producing a zero threshold.
pub const NOISE_FLOOR_FRACTION: f64 = 1e-4;

/// Rejection threshold, in sigmas, of the clipping estimator.
pub const CLIP_SIGMAS: f64 = 3.0;

/// Root mean square of `data`, or `None` when empty.
pub fn rms(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    Some((data.iter().map(|v| v * v).sum::<f64>() / data.len() as f64).sqrt())
}

fn mean_std(data: &[f64], keep: &[bool]) -> Option<(f64, f64)> {
    let (sum, n) = data
        .iter()
        .zip(keep)
        .filter(|(_, k)| **k)
        .fold((0.0, 0usize), |(s, n), (v, _)| (s + v, n + 1));
    if n == 0 {
        return None;
    }
    let mean = sum / n as f64;
    let var = data
        .iter()
        .zip(keep)
        .filter(|(_, k)| **k)
        .map(|(v, _)| (v - mean).powi(2))
        .sum::<f64>()
        / n as f64;
    Some((mean, var.sqrt()))
}

/// Standard deviation after iterative clipping at [`CLIP_SIGMAS`].
///
/// Each pass drops the samples further than `CLIP_SIGMAS · σ` from the mean
/// of the survivors; stops once the surviving set no longer changes or after
/// `iterations` passes.
pub fn clipped_sigma(data: &[f64], iterations: usize) -> Option<f64> {
    let mut keep: Vec<bool> = data.iter().map(|v| v.is_finite()).collect();
    let (mut mean, mut sigma) = mean_std(data, &keep)?;
    for _ in 0..iterations {
        let mut changed = false;
        for (v, k) in data.iter().zip(keep.iter_mut()) {
            let inside = v.is_finite() && (v - mean).abs() <= CLIP_SIGMAS * sigma;
            if *k != inside {
                *k = inside;
                changed = true;
            }
        }
        match mean_std(data, &keep) {
            Some((m, s)) => {
                mean = m;
                sigma = s;
            }
            None => break,
        }
        if !changed {
            break;
        }
    }
    Some(sigma)
}

/// Smallest sigma accepted for `data`.
pub fn noise_floor(data: &[f64]) -> f64 {
    let peak = data
        .iter()
        .filter(|v| v.is_finite())
        .fold(0.0f64, |m, v| m.max(v.abs()));
    (peak * NOISE_FLOOR_FRACTION).max(f64::MIN_POSITIVE)
}

/// Replace bad channels with a linear interpolation of their nearest good
/// neighbours (or the single neighbour at the edges).
///
/// Returns the number of channels repaired. A spectrum with no good channel
/// is zeroed.
pub fn repair_bad_channels(data: &mut [f64], is_bad: impl Fn(f64) -> bool) -> usize {
    let bad: Vec<bool> = data.iter().map(|&v| !v.is_finite() || is_bad(v)).collect();
    let count = bad.iter().filter(|b| **b).count();
    if count == 0 {
        return 0;
    }
    if count == data.len() {
        data.iter_mut().for_each(|v| *v = 0.0);
        return count;
    }
    let mut i = 0;
    while i < data.len() {
        if !bad[i] {
            i += 1;
            continue;
        }
        let start = i;
        while i < data.len() && bad[i] {
            i += 1;
        }
        let left = start.checked_sub(1).map(|l| (l, data[l]));
        let right = (i < data.len()).then(|| (i, data[i]));
        for k in start..i {
            data[k] = match (left, right) {
                (Some((l, a)), Some((r, b))) => a + (b - a) * (k - l) as f64 / (r - l) as f64,
                (Some((_, a)), None) => a,
                (None, Some((_, b))) => b,
                (None, None) => 0.0,
            };
        }
    }
    count
}

/// Centered moving average of `width` channels; the window shrinks at the
/// edges.
pub fn boxcar(data: &[f64], width: usize) -> Vec<f64> {
    if width <= 1 || data.is_empty() {
        return data.to_vec();
    }
    let half = width / 2;
    let mut prefix = Vec::with_capacity(data.len() + 1);
    prefix.push(0.0);
    for v in data {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + v);
    }
    (0..data.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + width - half).min(data.len());
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect()
}
