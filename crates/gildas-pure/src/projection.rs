//! Sky projections used by cube spatial axes.
//!
//! A [`Projection`] maps absolute sky coordinates (longitude, latitude in
//! radians) to angular offsets from the projection center and back. Offsets
//! are rotated by the projection angle after projecting.

use core::f64::consts::SQRT_2;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Projection type code stored in a cube header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionKind {
    /// Offsets are plain coordinate differences.
    None,
    Gnomonic,
    Orthographic,
    /// Azimuthal equidistant.
    Azimuthal,
    Stereographic,
    /// Lambert azimuthal equal area.
    Lambert,
    /// Hammer-Aitoff equal area.
    Aitoff,
    /// Global sinusoidal, as used by single-dish radio maps.
    Radio,
    /// Code defined by the format but with no projection attached.
    Reserved(i32),
}

impl ProjectionKind {
    pub fn from_code(code: i32) -> Result<Self> {
        Ok(match code {
            0 => ProjectionKind::None,
            1 => ProjectionKind::Gnomonic,
            2 => ProjectionKind::Orthographic,
            3 => ProjectionKind::Azimuthal,
            4 => ProjectionKind::Stereographic,
            5 => ProjectionKind::Lambert,
            6 => ProjectionKind::Aitoff,
            7 => ProjectionKind::Radio,
            8 | 9 => ProjectionKind::Reserved(code),
            _ => return Err(Error::Format("unknown projection code")),
        })
    }

    pub fn code(self) -> i32 {
        match self {
            ProjectionKind::None => 0,
            ProjectionKind::Gnomonic => 1,
            ProjectionKind::Orthographic => 2,
            ProjectionKind::Azimuthal => 3,
            ProjectionKind::Stereographic => 4,
            ProjectionKind::Lambert => 5,
            ProjectionKind::Aitoff => 6,
            ProjectionKind::Radio => 7,
            ProjectionKind::Reserved(c) => c,
        }
    }

    fn is_azimuthal(self) -> bool {
        matches!(
            self,
            ProjectionKind::Gnomonic
                | ProjectionKind::Orthographic
                | ProjectionKind::Azimuthal
                | ProjectionKind::Stereographic
                | ProjectionKind::Lambert
        )
    }
}

/// A projection anchored at `(a0, d0)` and rotated by `angle` (radians).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub kind: ProjectionKind,
    pub a0: f64,
    pub d0: f64,
    pub angle: f64,
}

impl Projection {
    pub fn new(kind: ProjectionKind, a0: f64, d0: f64, angle: f64) -> Self {
        Projection { kind, a0, d0, angle }
    }

    /// Offsets of the sky position `(lon, lat)` from the projection center.
    pub fn to_offsets(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        let (x, y) = match self.kind {
            ProjectionKind::Reserved(_) => {
                return Err(Error::Format("projection code is reserved and cannot be evaluated"))
            }
            ProjectionKind::None => (wrap_pi(lon - self.a0), lat - self.d0),
            ProjectionKind::Radio => (wrap_pi(lon - self.a0) * lat.cos(), lat - self.d0),
            kind => {
                let (n1, n2, n3) = self.native_vector(lon, lat);
                if kind == ProjectionKind::Aitoff {
                    hammer_forward(n1, n2, n3)
                } else {
                    azimuthal_forward(kind, n1, n2, n3)?
                }
            }
        };
        let (s, c) = self.angle.sin_cos();
        Ok((x * c + y * s, -x * s + y * c))
    }

    /// Sky position of the offsets `(x, y)`.
    pub fn to_sky(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let (s, c) = self.angle.sin_cos();
        let (x, y) = (x * c - y * s, x * s + y * c);
        match self.kind {
            ProjectionKind::Reserved(_) => {
                Err(Error::Format("projection code is reserved and cannot be evaluated"))
            }
            ProjectionKind::None => Ok((self.a0 + x, self.d0 + y)),
            ProjectionKind::Radio => {
                let lat = self.d0 + y;
                let cos_lat = lat.cos();
                if cos_lat.abs() < 1e-15 {
                    return Ok((self.a0, lat));
                }
                Ok((self.a0 + x / cos_lat, lat))
            }
            ProjectionKind::Aitoff => {
                let (n1, n2, n3) = hammer_inverse(x, y)?;
                Ok(self.sky_from_native(n1, n2, n3))
            }
            kind => {
                debug_assert!(kind.is_azimuthal());
                let (n1, n2, n3) = azimuthal_inverse(kind, x, y)?;
                Ok(self.sky_from_native(n1, n2, n3))
            }
        }
    }

    /// Unit vector of `(lon, lat)` in the frame whose first axis points at
    /// the projection center, second east and third north.
    fn native_vector(&self, lon: f64, lat: f64) -> (f64, f64, f64) {
        let (sd0, cd0) = self.d0.sin_cos();
        let (sd, cd) = lat.sin_cos();
        let (sa, ca) = (lon - self.a0).sin_cos();
        (sd0 * sd + cd0 * cd * ca, cd * sa, sd * cd0 - cd * sd0 * ca)
    }

    fn sky_from_native(&self, n1: f64, n2: f64, n3: f64) -> (f64, f64) {
        let (sd0, cd0) = self.d0.sin_cos();
        let sin_lat = (n3 * cd0 + n1 * sd0).clamp(-1.0, 1.0);
        let lat = sin_lat.asin();
        let east = n2;
        let toward = n1 * cd0 - n3 * sd0;
        (self.a0 + east.atan2(toward), lat)
    }
}

fn wrap_pi(a: f64) -> f64 {
    let two_pi = 2.0 * core::f64::consts::PI;
    let mut r = a % two_pi;
    if r > core::f64::consts::PI {
        r -= two_pi;
    } else if r < -core::f64::consts::PI {
        r += two_pi;
    }
    r
}

fn azimuthal_forward(kind: ProjectionKind, cos_c: f64, e: f64, n: f64) -> Result<(f64, f64)> {
    let k = match kind {
        ProjectionKind::Gnomonic => {
            if cos_c <= 0.0 {
                return Err(Error::InvalidValue("position lies outside the gnomonic hemisphere"));
            }
            1.0 / cos_c
        }
        ProjectionKind::Orthographic => {
            if cos_c < 0.0 {
                return Err(Error::InvalidValue("position lies on the far hemisphere"));
            }
            1.0
        }
        ProjectionKind::Azimuthal => {
            let c = cos_c.clamp(-1.0, 1.0).acos();
            let sin_c = c.sin();
            if sin_c.abs() < 1e-15 {
                1.0
            } else {
                c / sin_c
            }
        }
        ProjectionKind::Stereographic => {
            if 1.0 + cos_c <= 0.0 {
                return Err(Error::InvalidValue("antipode of the stereographic center"));
            }
            2.0 / (1.0 + cos_c)
        }
        _ => {
            if 1.0 + cos_c <= 0.0 {
                return Err(Error::InvalidValue("antipode of the Lambert center"));
            }
            (2.0 / (1.0 + cos_c)).sqrt()
        }
    };
    Ok((k * e, k * n))
}

fn azimuthal_inverse(kind: ProjectionKind, x: f64, y: f64) -> Result<(f64, f64, f64)> {
    let rho = x.hypot(y);
    if rho == 0.0 {
        return Ok((1.0, 0.0, 0.0));
    }
    let c = match kind {
        ProjectionKind::Gnomonic => rho.atan(),
        ProjectionKind::Orthographic => {
            if rho > 1.0 {
                return Err(Error::InvalidValue("offset beyond the orthographic disk"));
            }
            rho.asin()
        }
        ProjectionKind::Azimuthal => rho,
        ProjectionKind::Stereographic => 2.0 * (rho / 2.0).atan(),
        _ => {
            if rho > 2.0 {
                return Err(Error::InvalidValue("offset beyond the Lambert disk"));
            }
            2.0 * (rho / 2.0).asin()
        }
    };
    let (sc, cc) = c.sin_cos();
    Ok((cc, x * sc / rho, y * sc / rho))
}

fn hammer_forward(n1: f64, n2: f64, n3: f64) -> (f64, f64) {
    let lon = n2.atan2(n1);
    let lat = n3.clamp(-1.0, 1.0).asin();
    let (sh, ch) = (lon / 2.0).sin_cos();
    let z = (1.0 + lat.cos() * ch).sqrt();
    (2.0 * SQRT_2 * lat.cos() * sh / z, SQRT_2 * lat.sin() / z)
}

fn hammer_inverse(x: f64, y: f64) -> Result<(f64, f64, f64)> {
    let zz = 1.0 - (x / 4.0).powi(2) - (y / 2.0).powi(2);
    if zz < 0.5 {
        return Err(Error::InvalidValue("offset outside the Hammer-Aitoff ellipse"));
    }
    let z = zz.sqrt();
    let lon = 2.0 * (z * x).atan2(2.0 * (2.0 * zz - 1.0));
    let lat = (z * y).clamp(-1.0, 1.0).asin();
    let (sl, cl) = lon.sin_cos();
    Ok((lat.cos() * cl, lat.cos() * sl, lat.sin()))
}
