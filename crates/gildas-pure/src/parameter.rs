//! Typed spectrum parameters keyed by short mnemonics.
//!
//! Every section of a CLASS observation is flattened into a
//! [`ParameterTable`]. Keys are fixed mnemonic strings (see [`keys`]); each
//! known key carries a canonical human-readable description, and the mapping
//! is reversible through [`key_for_description`].

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Double(f64),
    Integer(i64),
    Text(String),
}

impl core::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ParamValue::Double(v) => write!(f, "{v}"),
            ParamValue::Integer(v) => write!(f, "{v}"),
            ParamValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// A typed value paired with its description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    value: ParamValue,
    description: String,
}

impl Parameter {
    pub fn new(value: ParamValue, description: impl Into<String>) -> Self {
        Parameter {
            value,
            description: description.into(),
        }
    }

    pub fn value(&self) -> &ParamValue {
        &self.value
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Numeric view; integers are widened, text is `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self.value {
            ParamValue::Double(v) => Some(v),
            ParamValue::Integer(v) => Some(v as f64),
            ParamValue::Text(_) => None,
        }
    }

    /// Integer view; doubles are accepted only when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self.value {
            ParamValue::Integer(v) => Some(v),
            ParamValue::Double(v) if v.fract() == 0.0 && v.is_finite() => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Canonical parameter keys.
pub mod keys {
    // General section.
    pub const UT: &str = "UT";
    pub const LST: &str = "LST";
    pub const AZIMUTH: &str = "AZIMUTH";
    pub const ELEVATION: &str = "ELEVATION";
    pub const TAU: &str = "TAU";
    pub const TSYS: &str = "TSYS";
    pub const INTEGRATION_TIME: &str = "INTEGRATION_TIME";

    // Position section.
    pub const SOURCE: &str = "SOURCE";
    pub const EPOCH: &str = "EPOCH";
    pub const LAMBDA: &str = "LAMBDA";
    pub const BETA: &str = "BETA";
    pub const LAMBDA_OFFSET: &str = "LAMBDA_OFFSET";
    pub const BETA_OFFSET: &str = "BETA_OFFSET";
    pub const PROJECTION: &str = "PROJECTION";

    // Spectroscopy section.
    pub const LINE: &str = "LINE";
    pub const REF_FREQ: &str = "REF_FREQ";
    pub const NCHAN: &str = "NCHAN";
    pub const REF_CHAN: &str = "REF_CHAN";
    pub const FREQ_RESOL: &str = "FREQ_RESOL";
    pub const FREQ_OFFSET: &str = "FREQ_OFFSET";
    pub const VEL_RESOL: &str = "VEL_RESOL";
    pub const REF_VEL: &str = "REF_VEL";
    pub const BLANKING: &str = "BLANKING";
    pub const IMAGE_FREQ: &str = "IMAGE_FREQ";
    pub const VEL_TYPE: &str = "VEL_TYPE";
    pub const DOPPLER: &str = "DOPPLER";

    // Baseline section.
    pub const BASELINE_DEG: &str = "BASELINE_DEG";
    pub const BASELINE_SIGMA: &str = "BASELINE_SIGMA";
    pub const BASELINE_AREA: &str = "BASELINE_AREA";
    pub const BASELINE_NWIN: &str = "BASELINE_NWIN";
    pub const BASELINE_W1: &str = "BASELINE_W1";
    pub const BASELINE_W2: &str = "BASELINE_W2";

    // Frequency switching section.
    pub const FSW_NPHASES: &str = "FSW_NPHASES";
    pub const FSW_MODE: &str = "FSW_MODE";
    pub const FSW_OFFSET: &str = "FSW_OFFSET";
    pub const FSW_DURATION: &str = "FSW_DURATION";
    pub const FSW_WEIGHT: &str = "FSW_WEIGHT";

    // Continuum drift section.
    pub const CONT_FREQ: &str = "CONT_FREQ";
    pub const CONT_WIDTH: &str = "CONT_WIDTH";
    pub const CONT_NPOINTS: &str = "CONT_NPOINTS";
    pub const CONT_REF_POINT: &str = "CONT_REF_POINT";
    pub const CONT_TIME_REF: &str = "CONT_TIME_REF";
    pub const CONT_ANGLE_REF: &str = "CONT_ANGLE_REF";
    pub const CONT_ANGLE_POS: &str = "CONT_ANGLE_POS";
    pub const CONT_TIME_RES: &str = "CONT_TIME_RES";
    pub const CONT_ANGLE_RES: &str = "CONT_ANGLE_RES";
    pub const CONT_BLANKING: &str = "CONT_BLANKING";
    pub const CONT_TYPE: &str = "CONT_TYPE";
    pub const CONT_IMAGE_FREQ: &str = "CONT_IMAGE_FREQ";
    pub const CONT_COLL_AZ: &str = "CONT_COLL_AZ";
    pub const CONT_COLL_EL: &str = "CONT_COLL_EL";

    // Calibration section.
    pub const BEAM_EFF: &str = "BEAM_EFF";
    pub const FORWARD_EFF: &str = "FORWARD_EFF";
    pub const GAIN_IMAGE: &str = "GAIN_IMAGE";
    pub const WATER_VAPOR: &str = "WATER_VAPOR";
    pub const PRESSURE: &str = "PRESSURE";
    pub const AMBIENT_TEMP: &str = "AMBIENT_TEMP";
    pub const ATM_TEMP_SIGNAL: &str = "ATM_TEMP_SIGNAL";
    pub const CHOPPER_TEMP: &str = "CHOPPER_TEMP";
    pub const COLD_TEMP: &str = "COLD_TEMP";
    pub const TAU_SIGNAL: &str = "TAU_SIGNAL";
    pub const TAU_IMAGE: &str = "TAU_IMAGE";
    pub const ATM_TEMP_IMAGE: &str = "ATM_TEMP_IMAGE";
    pub const RECEIVER_TEMP: &str = "RECEIVER_TEMP";
    pub const CAL_MODE: &str = "CAL_MODE";
    pub const ATM_FACTOR: &str = "ATM_FACTOR";
    pub const ALTITUDE: &str = "ALTITUDE";
    pub const CAL_LAMBDA_OFFSET: &str = "CAL_LAMBDA_OFFSET";
    pub const CAL_BETA_OFFSET: &str = "CAL_BETA_OFFSET";
    pub const LONGITUDE: &str = "LONGITUDE";
    pub const LATITUDE: &str = "LATITUDE";

    // Data descriptor section.
    pub const DATA_DIM1: &str = "DATA_DIM1";
    pub const DATA_DIM2: &str = "DATA_DIM2";
    pub const DATA_TYPE: &str = "DATA_TYPE";
    pub const X_UNIT: &str = "X_UNIT";
}

const DESCRIPTIONS: &[(&str, &str)] = &[
    (keys::UT, "Universal time of observation (rad)"),
    (keys::LST, "Local sidereal time (rad)"),
    (keys::AZIMUTH, "Azimuth (rad)"),
    (keys::ELEVATION, "Elevation (rad)"),
    (keys::TAU, "Atmospheric opacity"),
    (keys::TSYS, "System temperature (K)"),
    (keys::INTEGRATION_TIME, "Integration time (s)"),
    (keys::SOURCE, "Source name"),
    (keys::EPOCH, "Epoch of coordinates"),
    (keys::LAMBDA, "Lambda coordinate (rad)"),
    (keys::BETA, "Beta coordinate (rad)"),
    (keys::LAMBDA_OFFSET, "Offset in lambda (rad)"),
    (keys::BETA_OFFSET, "Offset in beta (rad)"),
    (keys::PROJECTION, "Projection system code"),
    (keys::LINE, "Line name"),
    (keys::REF_FREQ, "Rest frequency (MHz)"),
    (keys::NCHAN, "Number of channels"),
    (keys::REF_CHAN, "Reference channel"),
    (keys::FREQ_RESOL, "Frequency resolution (MHz)"),
    (keys::FREQ_OFFSET, "Frequency offset (MHz)"),
    (keys::VEL_RESOL, "Velocity resolution (km/s)"),
    (keys::REF_VEL, "Velocity at reference channel (km/s)"),
    (keys::BLANKING, "Blanking value"),
    (keys::IMAGE_FREQ, "Image frequency (MHz)"),
    (keys::VEL_TYPE, "Velocity type code"),
    (keys::DOPPLER, "Doppler correction"),
    (keys::BASELINE_DEG, "Baseline polynomial degree"),
    (keys::BASELINE_SIGMA, "Baseline rms (K)"),
    (keys::BASELINE_AREA, "Area under windows"),
    (keys::BASELINE_NWIN, "Number of baseline windows"),
    (keys::FSW_NPHASES, "Number of switching phases"),
    (keys::FSW_MODE, "Switching mode code"),
    (keys::CONT_FREQ, "Continuum rest frequency (MHz)"),
    (keys::CONT_WIDTH, "Continuum bandwidth (MHz)"),
    (keys::CONT_NPOINTS, "Number of drift points"),
    (keys::CONT_REF_POINT, "Drift reference point"),
    (keys::CONT_TIME_REF, "Time at reference point"),
    (keys::CONT_ANGLE_REF, "Angle at reference point"),
    (keys::CONT_ANGLE_POS, "Drift position angle"),
    (keys::CONT_TIME_RES, "Drift time resolution"),
    (keys::CONT_ANGLE_RES, "Drift angular resolution"),
    (keys::CONT_BLANKING, "Drift blanking value"),
    (keys::CONT_TYPE, "Drift coordinate type code"),
    (keys::CONT_IMAGE_FREQ, "Drift image frequency (MHz)"),
    (keys::CONT_COLL_AZ, "Collimation error in azimuth"),
    (keys::CONT_COLL_EL, "Collimation error in elevation"),
    (keys::BEAM_EFF, "Beam efficiency"),
    (keys::FORWARD_EFF, "Forward efficiency"),
    (keys::GAIN_IMAGE, "Image to signal gain ratio"),
    (keys::WATER_VAPOR, "Precipitable water vapor (mm)"),
    (keys::PRESSURE, "Ambient pressure (hPa)"),
    (keys::AMBIENT_TEMP, "Ambient temperature (K)"),
    (keys::ATM_TEMP_SIGNAL, "Atmospheric temperature in signal band (K)"),
    (keys::CHOPPER_TEMP, "Chopper temperature (K)"),
    (keys::COLD_TEMP, "Cold load temperature (K)"),
    (keys::TAU_SIGNAL, "Opacity in signal band"),
    (keys::TAU_IMAGE, "Opacity in image band"),
    (keys::ATM_TEMP_IMAGE, "Atmospheric temperature in image band (K)"),
    (keys::RECEIVER_TEMP, "Receiver temperature (K)"),
    (keys::CAL_MODE, "Calibration mode code"),
    (keys::ATM_FACTOR, "Atmospheric calibration factor"),
    (keys::ALTITUDE, "Site altitude (m)"),
    (keys::CAL_LAMBDA_OFFSET, "Calibration offset in lambda (rad)"),
    (keys::CAL_BETA_OFFSET, "Calibration offset in beta (rad)"),
    (keys::LONGITUDE, "Site longitude (rad)"),
    (keys::LATITUDE, "Site latitude (rad)"),
    (keys::DATA_DIM1, "Data first dimension"),
    (keys::DATA_DIM2, "Data second dimension"),
    (keys::DATA_TYPE, "Data type code"),
    (keys::X_UNIT, "X axis unit code"),
];

/// Families of keys that carry a 1-based index suffix, e.g. `FSW_OFFSET_2`.
const INDEXED: &[(&str, &str)] = &[
    (keys::BASELINE_W1, "Baseline window start"),
    (keys::BASELINE_W2, "Baseline window end"),
    (keys::FSW_OFFSET, "Switching frequency offset (MHz)"),
    (keys::FSW_DURATION, "Switching phase duration (s)"),
    (keys::FSW_WEIGHT, "Switching phase weight"),
];

/// Build the key of the `n`-th (1-based) member of an indexed family.
pub fn indexed_key(family: &str, n: usize) -> String {
    format!("{family}_{n}")
}

/// Canonical description of a key, or `None` for unknown keys.
pub fn description_of(key: &str) -> Option<String> {
    if let Some((_, d)) = DESCRIPTIONS.iter().find(|(k, _)| *k == key) {
        return Some((*d).to_string());
    }
    let (family, n) = key.rsplit_once('_')?;
    let n: usize = n.parse().ok()?;
    INDEXED
        .iter()
        .find(|(k, _)| *k == family)
        .map(|(_, d)| format!("{d} #{n}"))
}

/// Reverse lookup from a description back to its canonical key.
pub fn key_for_description(description: &str) -> Option<String> {
    if let Some((k, _)) = DESCRIPTIONS.iter().find(|(_, d)| *d == description) {
        return Some((*k).to_string());
    }
    let (prefix, n) = description.rsplit_once(" #")?;
    let n: usize = n.parse().ok()?;
    INDEXED
        .iter()
        .find(|(_, d)| *d == prefix)
        .map(|(k, _)| indexed_key(k, n))
}

/// Ordered key → parameter map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterTable {
    entries: BTreeMap<String, Parameter>,
}

impl ParameterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under `key` with the key's canonical description.
    pub fn set(&mut self, key: &str, value: ParamValue) {
        let description = description_of(key).unwrap_or_else(|| key.to_string());
        self.entries
            .insert(key.to_string(), Parameter::new(value, description));
    }

    pub fn set_f64(&mut self, key: &str, value: f64) {
        self.set(key, ParamValue::Double(value));
    }

    pub fn set_i64(&mut self, key: &str, value: i64) {
        self.set(key, ParamValue::Integer(value));
    }

    pub fn set_text(&mut self, key: &str, value: &str) {
        self.set(key, ParamValue::Text(value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&Parameter> {
        self.entries.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Parameter::as_f64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Parameter::as_i64)
    }

    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Parameter::as_str)
    }

    /// Numeric value of a parameter the caller cannot do without.
    pub fn require_f64(&self, key: &'static str) -> Result<f64> {
        self.get_f64(key).ok_or(Error::MissingParameter(key))
    }

    pub fn require_i64(&self, key: &'static str) -> Result<i64> {
        self.get_i64(key).ok_or(Error::MissingParameter(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Parameter> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy every entry of `other` into this table, replacing existing keys.
    pub fn merge(&mut self, other: ParameterTable) {
        self.entries.extend(other.entries);
    }
}
