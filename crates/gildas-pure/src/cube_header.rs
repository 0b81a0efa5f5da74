//! Fixed-layout header of a GILDAS image cube.
//!
//! The header occupies the first 512 bytes of the file, magic included:
//!
//! | offset  | content                                                     |
//! |---------|-------------------------------------------------------------|
//! | 0       | magic, `GILDAS-IMAGE` (IEEE) or `GILDAS.IMAGE` (EEEI)       |
//! | 12      | format code (-32 for 4-byte floats), block count            |
//! | 28      | number of axes, four axis lengths                           |
//! | 48      | conversion formula, (reference, value, increment) per axis  |
//! | 144     | blanking value and tolerance, extrema and their pixels      |
//! | 192     | unit, four axis names, coordinate system (12 bytes each)    |
//! | 264     | source name, RA/Dec, l/b, epoch                             |
//! | 312     | projection type, center, angle, spatial axes               |
//! | 348     | line name, frequency resolution, image and rest frequency   |
//! | 384     | velocity resolution and offset, frequency axis             |
//! | 396     | beam major, minor, position angle                           |
//! | 408     | noise, rms, proper motion, parallax                         |
//!
//! Pixels are 1-based: `world = value + (pixel - reference) * increment`.

use alloc::string::String;

use serde::{Deserialize, Serialize};

use crate::block::CUBE_HEADER_SIZE;
use crate::codec::{ByteCodec, Codec, Encoding};
use crate::error::{Error, Result};
use crate::projection::{Projection, ProjectionKind};

const MAGIC_PREFIX: &[u8; 6] = b"GILDAS";
const MAGIC_SUFFIX: &[u8; 5] = b"IMAGE";

/// Format code for 4-byte IEEE floats.
pub const FORMAT_REAL: i32 = -32;

/// Width of every text field in the header.
pub const LABEL_WIDTH: usize = 12;

/// Number of axes described by the header.
pub const MAX_AXES: usize = 4;

/// Pixel to world conversion along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisFormula {
    pub reference: f64,
    pub value: f64,
    pub increment: f64,
}

impl Default for AxisFormula {
    fn default() -> Self {
        AxisFormula {
            reference: 1.0,
            value: 0.0,
            increment: 1.0,
        }
    }
}

impl AxisFormula {
    pub fn new(reference: f64, value: f64, increment: f64) -> Self {
        AxisFormula {
            reference,
            value,
            increment,
        }
    }

    /// World coordinate of a 1-based pixel position.
    pub fn world(&self, pixel: f64) -> f64 {
        self.value + (pixel - self.reference) * self.increment
    }

    /// 1-based pixel position of a world coordinate.
    pub fn pixel(&self, world: f64) -> f64 {
        self.reference + (world - self.value) / self.increment
    }
}

/// Elliptical beam; axes and angle in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Beam {
    pub major: f32,
    pub minor: f32,
    pub position_angle: f32,
}

impl Beam {
    pub fn is_defined(&self) -> bool {
        self.major > 0.0 && self.minor > 0.0
    }
}

/// Decoded cube header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeHeader {
    pub encoding: Encoding,
    pub format: i32,
    pub blocks: i32,
    pub ndim: i32,
    pub dims: [i32; MAX_AXES],
    pub axes: [AxisFormula; MAX_AXES],
    pub blank: f32,
    /// Negative tolerance disables blanking.
    pub blank_tolerance: f32,
    pub min: f32,
    pub max: f32,
    pub min_loc: [i32; MAX_AXES],
    pub max_loc: [i32; MAX_AXES],
    pub unit: String,
    pub axis_names: [String; MAX_AXES],
    pub system: String,
    pub source: String,
    pub ra: f64,
    pub dec: f64,
    pub lii: f64,
    pub bii: f64,
    pub epoch: f32,
    pub projection: ProjectionKind,
    pub a0: f64,
    pub d0: f64,
    pub projection_angle: f64,
    pub x_axis: i32,
    pub y_axis: i32,
    pub line: String,
    pub freq_resol: f64,
    pub image_freq: f64,
    pub rest_freq: f64,
    pub vel_resol: f32,
    pub vel_offset: f32,
    pub f_axis: i32,
    pub beam: Beam,
    pub noise: f32,
    pub rms: f32,
    pub mu_ra: f32,
    pub mu_dec: f32,
    pub parallax: f32,
}

impl CubeHeader {
    /// Header for an `nx`×`ny`×`nz` cube with unit formulas and no blanking.
    pub fn new(encoding: Encoding, nx: usize, ny: usize, nz: usize) -> Self {
        let data_bytes = nx * ny * nz * 4;
        CubeHeader {
            encoding,
            format: FORMAT_REAL,
            blocks: crate::block::blocks_needed(data_bytes) as i32,
            ndim: 3,
            dims: [nx as i32, ny as i32, nz as i32, 1],
            axes: [AxisFormula::default(); MAX_AXES],
            blank: 0.0,
            blank_tolerance: -1.0,
            min: 0.0,
            max: 0.0,
            min_loc: [1; MAX_AXES],
            max_loc: [1; MAX_AXES],
            unit: String::from("K"),
            axis_names: [
                String::from("RA"),
                String::from("DEC"),
                String::from("VELOCITY"),
                String::new(),
            ],
            system: String::from("EQUATORIAL"),
            source: String::new(),
            ra: 0.0,
            dec: 0.0,
            lii: 0.0,
            bii: 0.0,
            epoch: 2000.0,
            projection: ProjectionKind::Radio,
            a0: 0.0,
            d0: 0.0,
            projection_angle: 0.0,
            x_axis: 1,
            y_axis: 2,
            line: String::new(),
            freq_resol: 0.0,
            image_freq: 0.0,
            rest_freq: 0.0,
            vel_resol: 1.0,
            vel_offset: 0.0,
            f_axis: 3,
            beam: Beam::default(),
            noise: 0.0,
            rms: 0.0,
            mu_ra: 0.0,
            mu_dec: 0.0,
            parallax: 0.0,
        }
    }

    /// Decode the 512-byte header at the start of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < CUBE_HEADER_SIZE {
            return Err(Error::Format("cube shorter than its header"));
        }
        if &buf[..6] != MAGIC_PREFIX || &buf[7..12] != MAGIC_SUFFIX {
            return Err(Error::Format("bad cube magic"));
        }
        let codec = Codec::from_image_code(buf[6])?;
        let c = &codec;
        let format = c.read_i32(buf, 12)?;
        if format != FORMAT_REAL {
            return Err(Error::Format("only 4-byte float cubes are supported"));
        }
        let i32x4 = |off: usize| -> Result<[i32; MAX_AXES]> {
            Ok([
                c.read_i32(buf, off)?,
                c.read_i32(buf, off + 4)?,
                c.read_i32(buf, off + 8)?,
                c.read_i32(buf, off + 12)?,
            ])
        };
        let axis = |a: usize| -> Result<AxisFormula> {
            Ok(AxisFormula {
                reference: c.read_f64(buf, 48 + 24 * a)?,
                value: c.read_f64(buf, 56 + 24 * a)?,
                increment: c.read_f64(buf, 64 + 24 * a)?,
            })
        };
        let text = |off: usize| c.read_string(buf, off, LABEL_WIDTH);
        let header = CubeHeader {
            encoding: codec.encoding(),
            format,
            blocks: c.read_i32(buf, 16)?,
            ndim: c.read_i32(buf, 28)?,
            dims: i32x4(32)?,
            axes: [axis(0)?, axis(1)?, axis(2)?, axis(3)?],
            blank: c.read_f32(buf, 144)?,
            blank_tolerance: c.read_f32(buf, 148)?,
            min: c.read_f32(buf, 152)?,
            max: c.read_f32(buf, 156)?,
            min_loc: i32x4(160)?,
            max_loc: i32x4(176)?,
            unit: text(192)?,
            axis_names: [text(204)?, text(216)?, text(228)?, text(240)?],
            system: text(252)?,
            source: text(264)?,
            ra: c.read_f64(buf, 276)?,
            dec: c.read_f64(buf, 284)?,
            lii: c.read_f64(buf, 292)?,
            bii: c.read_f64(buf, 300)?,
            epoch: c.read_f32(buf, 308)?,
            projection: ProjectionKind::from_code(c.read_i32(buf, 312)?)?,
            a0: c.read_f64(buf, 316)?,
            d0: c.read_f64(buf, 324)?,
            projection_angle: c.read_f64(buf, 332)?,
            x_axis: c.read_i32(buf, 340)?,
            y_axis: c.read_i32(buf, 344)?,
            line: text(348)?,
            freq_resol: c.read_f64(buf, 360)?,
            image_freq: c.read_f64(buf, 368)?,
            rest_freq: c.read_f64(buf, 376)?,
            vel_resol: c.read_f32(buf, 384)?,
            vel_offset: c.read_f32(buf, 388)?,
            f_axis: c.read_i32(buf, 392)?,
            beam: Beam {
                major: c.read_f32(buf, 396)?,
                minor: c.read_f32(buf, 400)?,
                position_angle: c.read_f32(buf, 404)?,
            },
            noise: c.read_f32(buf, 408)?,
            rms: c.read_f32(buf, 412)?,
            mu_ra: c.read_f32(buf, 416)?,
            mu_dec: c.read_f32(buf, 420)?,
            parallax: c.read_f32(buf, 424)?,
        };
        if header.dims.iter().any(|&d| d < 0) {
            return Err(Error::Format("negative cube dimension"));
        }
        Ok(header)
    }

    /// Encode into a 512-byte header block.
    pub fn to_bytes(&self) -> Result<[u8; CUBE_HEADER_SIZE]> {
        let mut buf = [0u8; CUBE_HEADER_SIZE];
        buf[..6].copy_from_slice(MAGIC_PREFIX);
        buf[6] = self.encoding.image_code();
        buf[7..12].copy_from_slice(MAGIC_SUFFIX);
        let c = Codec::for_encoding(self.encoding);
        let b = &mut buf;
        c.write_i32(b, 12, self.format)?;
        c.write_i32(b, 16, self.blocks)?;
        c.write_i32(b, 28, self.ndim)?;
        for a in 0..MAX_AXES {
            c.write_i32(b, 32 + 4 * a, self.dims[a])?;
            c.write_f64(b, 48 + 24 * a, self.axes[a].reference)?;
            c.write_f64(b, 56 + 24 * a, self.axes[a].value)?;
            c.write_f64(b, 64 + 24 * a, self.axes[a].increment)?;
            c.write_i32(b, 160 + 4 * a, self.min_loc[a])?;
            c.write_i32(b, 176 + 4 * a, self.max_loc[a])?;
            c.write_string(b, 204 + LABEL_WIDTH * a, LABEL_WIDTH, &self.axis_names[a])?;
        }
        c.write_f32(b, 144, self.blank)?;
        c.write_f32(b, 148, self.blank_tolerance)?;
        c.write_f32(b, 152, self.min)?;
        c.write_f32(b, 156, self.max)?;
        c.write_string(b, 192, LABEL_WIDTH, &self.unit)?;
        c.write_string(b, 252, LABEL_WIDTH, &self.system)?;
        c.write_string(b, 264, LABEL_WIDTH, &self.source)?;
        c.write_f64(b, 276, self.ra)?;
        c.write_f64(b, 284, self.dec)?;
        c.write_f64(b, 292, self.lii)?;
        c.write_f64(b, 300, self.bii)?;
        c.write_f32(b, 308, self.epoch)?;
        c.write_i32(b, 312, self.projection.code())?;
        c.write_f64(b, 316, self.a0)?;
        c.write_f64(b, 324, self.d0)?;
        c.write_f64(b, 332, self.projection_angle)?;
        c.write_i32(b, 340, self.x_axis)?;
        c.write_i32(b, 344, self.y_axis)?;
        c.write_string(b, 348, LABEL_WIDTH, &self.line)?;
        c.write_f64(b, 360, self.freq_resol)?;
        c.write_f64(b, 368, self.image_freq)?;
        c.write_f64(b, 376, self.rest_freq)?;
        c.write_f32(b, 384, self.vel_resol)?;
        c.write_f32(b, 388, self.vel_offset)?;
        c.write_i32(b, 392, self.f_axis)?;
        c.write_f32(b, 396, self.beam.major)?;
        c.write_f32(b, 400, self.beam.minor)?;
        c.write_f32(b, 404, self.beam.position_angle)?;
        c.write_f32(b, 408, self.noise)?;
        c.write_f32(b, 412, self.rms)?;
        c.write_f32(b, 416, self.mu_ra)?;
        c.write_f32(b, 420, self.mu_dec)?;
        c.write_f32(b, 424, self.parallax)?;
        Ok(buf)
    }

    pub fn nx(&self) -> usize {
        self.dims[0].max(0) as usize
    }

    pub fn ny(&self) -> usize {
        self.dims[1].max(0) as usize
    }

    /// Number of velocity planes; a 2-D image has one.
    pub fn nz(&self) -> usize {
        if self.ndim < 3 {
            1
        } else {
            self.dims[2].max(1) as usize
        }
    }

    pub fn plane_len(&self) -> usize {
        self.nx() * self.ny()
    }

    /// Byte length of the data volume, or `None` if it does not fit in memory
    /// addressing.
    pub fn data_bytes(&self) -> Option<usize> {
        self.nx()
            .checked_mul(self.ny())?
            .checked_mul(self.nz())?
            .checked_mul(4)
    }

    /// Set the three data dimensions and the matching block count.
    pub fn set_dims(&mut self, nx: usize, ny: usize, nz: usize) {
        self.dims = [nx as i32, ny as i32, nz as i32, 1];
        self.ndim = self.ndim.max(3);
        self.blocks = crate::block::blocks_needed(nx * ny * nz * 4) as i32;
    }

    /// True for samples that carry no data.
    pub fn is_blank(&self, v: f32) -> bool {
        v.is_nan() || (self.blank_tolerance >= 0.0 && (v - self.blank).abs() <= self.blank_tolerance)
    }

    /// Value written where a computation produced no data.
    pub fn blank_value(&self) -> f32 {
        if self.blank_tolerance >= 0.0 {
            self.blank
        } else {
            f32::NAN
        }
    }

    pub fn projection(&self) -> Projection {
        Projection::new(self.projection, self.a0, self.d0, self.projection_angle)
    }

    /// Pixel size along x and y (radians, absolute).
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.axes[0].increment.abs(), self.axes[1].increment.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(enc: Encoding) -> CubeHeader {
        let mut h = CubeHeader::new(enc, 32, 24, 16);
        h.axes[0] = AxisFormula::new(16.5, 0.0, -4.8e-6);
        h.axes[1] = AxisFormula::new(12.5, 0.0, 4.8e-6);
        h.axes[2] = AxisFormula::new(8.0, 10.0, 0.25);
        h.blank = -1000.0;
        h.blank_tolerance = 0.0;
        h.source = "NGC1333-IRAS4".into();
        h.line = "HCN(1-0)".into();
        h.rest_freq = 88631.847;
        h.beam = Beam {
            major: 1.3e-4,
            minor: 1.1e-4,
            position_angle: 0.3,
        };
        h.projection = ProjectionKind::Reserved(9);
        h
    }

    #[test]
    fn roundtrip_both_encodings() {
        for enc in [Encoding::Ieee, Encoding::Eeei] {
            let h = sample(enc);
            let bytes = h.to_bytes().unwrap();
            let back = CubeHeader::parse(&bytes).unwrap();
            // Source name is truncated to the label width.
            assert_eq!(back.source, "NGC1333-IRAS");
            let mut expected = h.clone();
            expected.source = back.source.clone();
            assert_eq!(back, expected);
        }
    }

    #[test]
    fn magic_selects_encoding() {
        let bytes = sample(Encoding::Ieee).to_bytes().unwrap();
        assert_eq!(&bytes[..12], b"GILDAS-IMAGE");
        let bytes = sample(Encoding::Eeei).to_bytes().unwrap();
        assert_eq!(&bytes[..12], b"GILDAS.IMAGE");
    }

    #[test]
    fn bad_magic_and_vax_rejected() {
        let mut bytes = sample(Encoding::Ieee).to_bytes().unwrap();
        bytes[6] = b'_';
        assert!(matches!(CubeHeader::parse(&bytes), Err(Error::Format(_))));
        bytes[..6].copy_from_slice(b"SIMPLE");
        assert!(matches!(CubeHeader::parse(&bytes), Err(Error::Format(_))));
    }

    #[test]
    fn formula_is_one_based() {
        let f = AxisFormula::new(8.0, 10.0, 0.25);
        assert_eq!(f.world(8.0), 10.0);
        assert_eq!(f.world(9.0), 10.25);
        assert_eq!(f.pixel(f.world(3.5)), 3.5);
    }

    #[test]
    fn blanking_rules() {
        let mut h = sample(Encoding::Ieee);
        assert!(h.is_blank(-1000.0));
        assert!(h.is_blank(f32::NAN));
        assert!(!h.is_blank(-999.0));
        h.blank_tolerance = -1.0;
        assert!(!h.is_blank(-1000.0));
        assert!(h.blank_value().is_nan());
    }
}
