//! Header-field lists for exchange with FITS-style image libraries.
//!
//! Cubes and spectra are described by a list of keyword/value/comment
//! triples plus the flat channel array; encoding those into an actual
//! interchange file is left to an external library.
//!
//! Angles are exported in degrees, velocities in m/s and frequencies in Hz.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::codec::{Encoding, GildasDate};
use crate::cube::CubeRecord;
use crate::cube_header::{AxisFormula, Beam, CubeHeader};
use crate::entry::SpectrumHeader;
use crate::error::{Error, Result};
use crate::parameter::keys;
use crate::projection::ProjectionKind;
use crate::spectrum::{SpectralAxis, SpectrumRecord};

const DEG: f64 = 180.0 / core::f64::consts::PI;
const KMS_TO_MS: f64 = 1000.0;
const MHZ_TO_HZ: f64 = 1.0e6;

/// Value of a header field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Logical(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderField {
    pub keyword: String,
    pub value: FieldValue,
    pub comment: String,
}

impl HeaderField {
    pub fn new(keyword: &str, value: FieldValue, comment: &str) -> Self {
        HeaderField {
            keyword: keyword.to_string(),
            value,
            comment: comment.to_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match &self.value {
            FieldValue::Real(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

fn real(k: &str, v: f64, c: &str) -> HeaderField {
    HeaderField::new(k, FieldValue::Real(v), c)
}

fn int(k: &str, v: i64, c: &str) -> HeaderField {
    HeaderField::new(k, FieldValue::Integer(v), c)
}

fn text(k: &str, v: &str, c: &str) -> HeaderField {
    HeaderField::new(k, FieldValue::Text(v.to_string()), c)
}

fn find<'a>(fields: &'a [HeaderField], keyword: &str) -> Option<&'a HeaderField> {
    fields.iter().find(|f| f.keyword == keyword)
}

fn get_f64(fields: &[HeaderField], keyword: &str) -> Option<f64> {
    find(fields, keyword).and_then(HeaderField::as_f64)
}

fn require_f64(fields: &[HeaderField], keyword: &'static str) -> Result<f64> {
    get_f64(fields, keyword).ok_or(Error::MissingParameter(keyword))
}

fn get_text(fields: &[HeaderField], keyword: &str) -> String {
    find(fields, keyword)
        .and_then(HeaderField::as_str)
        .unwrap_or("")
        .to_string()
}

fn projection_code(kind: ProjectionKind) -> &'static str {
    match kind {
        ProjectionKind::Gnomonic => "TAN",
        ProjectionKind::Orthographic => "SIN",
        ProjectionKind::Azimuthal => "ARC",
        ProjectionKind::Stereographic => "STG",
        ProjectionKind::Lambert => "ZEA",
        ProjectionKind::Aitoff => "AIT",
        ProjectionKind::Radio => "GLS",
        ProjectionKind::None | ProjectionKind::Reserved(_) => "",
    }
}

fn projection_from_ctype(ctype: &str) -> ProjectionKind {
    let code = ctype.rsplit('-').next().unwrap_or("");
    match code {
        "TAN" => ProjectionKind::Gnomonic,
        "SIN" => ProjectionKind::Orthographic,
        "ARC" => ProjectionKind::Azimuthal,
        "STG" => ProjectionKind::Stereographic,
        "ZEA" => ProjectionKind::Lambert,
        "AIT" => ProjectionKind::Aitoff,
        "GLS" | "SFL" => ProjectionKind::Radio,
        _ => ProjectionKind::None,
    }
}

fn ctype(prefix: &str, kind: ProjectionKind) -> String {
    let code = projection_code(kind);
    if code.is_empty() {
        return prefix.to_string();
    }
    let dashes = 8usize.saturating_sub(prefix.len() + code.len());
    format!("{prefix}{}{code}", "-".repeat(dashes))
}

/// Fields describing a cube.
///
/// The spatial reference pixel is moved to the projection center so that
/// CRVAL carries absolute sky coordinates.
pub fn cube_fields(h: &CubeHeader) -> Vec<HeaderField> {
    let mut out = Vec::with_capacity(32);
    out.push(int("NAXIS", 3, "number of axes"));
    out.push(int("NAXIS1", h.nx() as i64, ""));
    out.push(int("NAXIS2", h.ny() as i64, ""));
    out.push(int("NAXIS3", h.nz() as i64, ""));
    out.push(text("BUNIT", &h.unit, "intensity unit"));
    out.push(text("OBJECT", &h.source, "source name"));
    out.push(text("LINE", &h.line, "line name"));

    let (x, y, v) = (h.axes[0], h.axes[1], h.axes[2]);
    out.push(text("CTYPE1", &ctype("RA", h.projection), ""));
    out.push(real("CRPIX1", x.pixel(0.0), ""));
    out.push(real("CRVAL1", h.a0 * DEG, "deg"));
    out.push(real("CDELT1", x.increment * DEG, "deg"));
    out.push(text("CTYPE2", &ctype("DEC", h.projection), ""));
    out.push(real("CRPIX2", y.pixel(0.0), ""));
    out.push(real("CRVAL2", h.d0 * DEG, "deg"));
    out.push(real("CDELT2", y.increment * DEG, "deg"));
    out.push(text("CTYPE3", "VRAD", "radio velocity"));
    out.push(real("CRPIX3", v.reference, ""));
    out.push(real("CRVAL3", v.value * KMS_TO_MS, "m/s"));
    out.push(real("CDELT3", v.increment * KMS_TO_MS, "m/s"));
    out.push(real("CROTA2", h.projection_angle * DEG, "deg"));
    out.push(real("EQUINOX", h.epoch as f64, ""));
    out.push(real("RESTFREQ", h.rest_freq * MHZ_TO_HZ, "Hz"));
    if h.beam.is_defined() {
        out.push(real("BMAJ", h.beam.major as f64 * DEG, "deg"));
        out.push(real("BMIN", h.beam.minor as f64 * DEG, "deg"));
        out.push(real("BPA", h.beam.position_angle as f64 * DEG, "deg"));
    }
    out.push(real("DATAMIN", h.min as f64, ""));
    out.push(real("DATAMAX", h.max as f64, ""));
    out
}

/// Rebuild a cube from fields and a flat array with x varying fastest.
pub fn cube_from_fields(fields: &[HeaderField], data: Vec<f32>, encoding: Encoding) -> Result<CubeRecord> {
    let dim = |k: &'static str| -> Result<usize> {
        let v = require_f64(fields, k)?;
        if v < 1.0 {
            return Err(Error::InvalidValue("axis length must be positive"));
        }
        Ok(v as usize)
    };
    let (nx, ny) = (dim("NAXIS1")?, dim("NAXIS2")?);
    let nz = match get_f64(fields, "NAXIS3") {
        Some(v) if v >= 1.0 => v as usize,
        _ => 1,
    };
    let volume = Array3::from_shape_vec((nz, ny, nx), data)
        .map_err(|_| Error::InvalidValue("data length does not match NAXISn"))?;

    let mut h = CubeHeader::new(encoding, nx, ny, nz);
    let axis = |n: u8, scale: f64| -> Result<AxisFormula> {
        let key = |p: &str| format!("{p}{n}");
        let get = |p: &str| get_f64(fields, &key(p));
        Ok(AxisFormula::new(
            get("CRPIX").unwrap_or(1.0),
            get("CRVAL").unwrap_or(0.0) / scale,
            get("CDELT").ok_or(Error::MissingParameter("CDELTn"))? / scale,
        ))
    };
    let x = axis(1, DEG)?;
    let y = axis(2, DEG)?;
    h.a0 = x.value;
    h.d0 = y.value;
    h.axes[0] = AxisFormula::new(x.reference, 0.0, x.increment);
    h.axes[1] = AxisFormula::new(y.reference, 0.0, y.increment);
    if nz > 1 || get_f64(fields, "CDELT3").is_some() {
        h.axes[2] = axis(3, KMS_TO_MS)?;
        h.vel_resol = h.axes[2].increment as f32;
    }
    h.projection = projection_from_ctype(&get_text(fields, "CTYPE1"));
    h.projection_angle = get_f64(fields, "CROTA2").unwrap_or(0.0) / DEG;
    h.ra = h.a0;
    h.dec = h.d0;
    h.unit = get_text(fields, "BUNIT");
    h.source = get_text(fields, "OBJECT");
    h.line = get_text(fields, "LINE");
    h.epoch = get_f64(fields, "EQUINOX").unwrap_or(2000.0) as f32;
    h.rest_freq = get_f64(fields, "RESTFREQ").unwrap_or(0.0) / MHZ_TO_HZ;
    if let (Some(major), Some(minor)) = (get_f64(fields, "BMAJ"), get_f64(fields, "BMIN")) {
        h.beam = Beam {
            major: (major / DEG) as f32,
            minor: (minor / DEG) as f32,
            position_angle: (get_f64(fields, "BPA").unwrap_or(0.0) / DEG) as f32,
        };
    }
    CubeRecord::new(h, volume)
}

/// Fields describing a spectrum; the channel array is `spectrum.data()`.
pub fn spectrum_fields(spectrum: &SpectrumRecord) -> Result<Vec<HeaderField>> {
    let axis = spectrum.axis()?;
    let h = spectrum.header();
    let p = spectrum.params();
    let (year, month, day) = h.observed.ymd();
    let mut out = vec![
        int("NAXIS", 1, "number of axes"),
        int("NAXIS1", spectrum.nchan() as i64, "channels"),
        text("CTYPE1", "VRAD", "radio velocity"),
        real("CRPIX1", axis.ref_chan, ""),
        real("CRVAL1", axis.ref_vel * KMS_TO_MS, "m/s"),
        real("CDELT1", axis.vel_resol * KMS_TO_MS, "m/s"),
        real("RESTFREQ", axis.ref_freq * MHZ_TO_HZ, "Hz"),
        text("OBJECT", &h.source, "source name"),
        text("LINE", &h.line, "line name"),
        text("TELESCOP", &h.telescope, ""),
        int("OBSNUM", h.observation as i64, "observation number"),
        int("SCAN", h.scan as i64, ""),
        text("DATE-OBS", &format!("{year:04}-{month:02}-{day:02}"), ""),
        real("CRVAL2", p.get_f64(keys::LAMBDA).unwrap_or(0.0) * DEG, "deg"),
        real("CRVAL3", p.get_f64(keys::BETA).unwrap_or(0.0) * DEG, "deg"),
        real("OFFSET1", h.offset1 as f64 * DEG, "deg"),
        real("OFFSET2", h.offset2 as f64 * DEG, "deg"),
    ];
    if let Some(t) = p.get_f64(keys::INTEGRATION_TIME) {
        out.push(real("OBSTIME", t, "s"));
    }
    if let Some(t) = p.get_f64(keys::TSYS) {
        out.push(real("TSYS", t, "K"));
    }
    if let Some(b) = spectrum.blanking() {
        out.push(real("BLANK", b as f64, "blanking value"));
    }
    Ok(out)
}

fn parse_date(s: &str) -> Option<GildasDate> {
    let mut it = s.get(..10)?.split('-');
    let y = it.next()?.parse().ok()?;
    let m = it.next()?.parse().ok()?;
    let d = it.next()?.parse().ok()?;
    GildasDate::from_ymd(y, m, d)
}

/// Rebuild a spectrum from fields and its channel array.
pub fn spectrum_from_fields(fields: &[HeaderField], data: Vec<f32>) -> Result<SpectrumRecord> {
    if let Some(n) = get_f64(fields, "NAXIS1") {
        if n as usize != data.len() {
            return Err(Error::InvalidValue("data length does not match NAXIS1"));
        }
    }
    let axis = SpectralAxis::new(
        require_f64(fields, "CRPIX1")?,
        get_f64(fields, "CRVAL1").unwrap_or(0.0) / KMS_TO_MS,
        require_f64(fields, "CDELT1")? / KMS_TO_MS,
        require_f64(fields, "RESTFREQ")? / MHZ_TO_HZ,
    )?;
    let header = SpectrumHeader {
        observation: get_f64(fields, "OBSNUM").unwrap_or(0.0) as i32,
        scan: get_f64(fields, "SCAN").unwrap_or(0.0) as i32,
        source: get_text(fields, "OBJECT"),
        line: get_text(fields, "LINE"),
        telescope: get_text(fields, "TELESCOP"),
        observed: parse_date(&get_text(fields, "DATE-OBS")).unwrap_or_default(),
        offset1: (get_f64(fields, "OFFSET1").unwrap_or(0.0) / DEG) as f32,
        offset2: (get_f64(fields, "OFFSET2").unwrap_or(0.0) / DEG) as f32,
        ..SpectrumHeader::default()
    };
    let mut rec = SpectrumRecord::from_axis(header, axis, data);
    let p = rec.params_mut();
    p.set_f64(keys::LAMBDA, get_f64(fields, "CRVAL2").unwrap_or(0.0) / DEG);
    p.set_f64(keys::BETA, get_f64(fields, "CRVAL3").unwrap_or(0.0) / DEG);
    for (field, key) in [("OBSTIME", keys::INTEGRATION_TIME), ("TSYS", keys::TSYS), ("BLANK", keys::BLANKING)] {
        if let Some(v) = get_f64(fields, field) {
            p.set_f64(key, v);
        }
    }
    Ok(rec)
}
