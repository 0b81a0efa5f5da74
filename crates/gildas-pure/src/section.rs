//! Tagged sections of a CLASS observation record.
//!
//! Each section is a fixed little table of scalars at known byte offsets. The
//! layouts below drive both parsing into a [`ParameterTable`] and
//! serialization back out, so the two directions cannot drift apart.

use alloc::vec;
use alloc::vec::Vec;

use crate::codec::ByteCodec;
use crate::entry::DataKind;
use crate::error::{Error, Result};
use crate::parameter::{indexed_key, keys, ParameterTable};

/// Maximum number of baseline windows held by the baseline section.
pub const MAX_BASELINE_WINDOWS: usize = 5;

/// Maximum number of frequency-switching phases.
pub const MAX_SWITCH_PHASES: usize = 8;

/// Kinds of section understood by this crate, with their on-disk codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    General,
    Position,
    Spectroscopy,
    Baseline,
    FrequencySwitching,
    Continuum,
    Calibration,
    DataDescriptor,
}

impl SectionKind {
    pub const ALL: [SectionKind; 8] = [
        SectionKind::General,
        SectionKind::Position,
        SectionKind::Spectroscopy,
        SectionKind::Baseline,
        SectionKind::FrequencySwitching,
        SectionKind::Continuum,
        SectionKind::Calibration,
        SectionKind::DataDescriptor,
    ];

    pub fn code(self) -> i32 {
        match self {
            SectionKind::General => -2,
            SectionKind::Position => -3,
            SectionKind::Spectroscopy => -4,
            SectionKind::Baseline => -5,
            SectionKind::FrequencySwitching => -8,
            SectionKind::Continuum => -10,
            SectionKind::Calibration => -14,
            SectionKind::DataDescriptor => -30,
        }
    }

    /// Map an on-disk code to a kind; unknown codes yield `None` and are skipped
    /// by the reader.
    pub fn from_code(code: i32) -> Option<Self> {
        SectionKind::ALL.into_iter().find(|k| k.code() == code)
    }

    fn fields(self) -> &'static [Field] {
        match self {
            SectionKind::General => GENERAL,
            SectionKind::Position => POSITION,
            SectionKind::Spectroscopy => SPECTROSCOPY,
            SectionKind::Baseline => BASELINE,
            SectionKind::FrequencySwitching => FREQ_SWITCH,
            SectionKind::Continuum => CONTINUUM,
            SectionKind::Calibration => CALIBRATION,
            SectionKind::DataDescriptor => DATA_DESCRIPTOR,
        }
    }

    /// Serialized length in bytes for the parameters in `table`.
    pub fn byte_len(self, table: &ParameterTable) -> usize {
        match self {
            SectionKind::General => 36,
            SectionKind::Position => 44,
            SectionKind::Spectroscopy => 68,
            SectionKind::Baseline => 56,
            SectionKind::FrequencySwitching => 8 + 16 * switch_phases(table),
            SectionKind::Continuum => 64,
            SectionKind::Calibration => 88,
            SectionKind::DataDescriptor => 16,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FieldType {
    I32,
    F32,
    F64,
    Text(usize),
}

#[derive(Debug, Clone, Copy)]
struct Field {
    key: &'static str,
    offset: usize,
    ty: FieldType,
}

const fn i32_at(key: &'static str, offset: usize) -> Field {
    Field {
        key,
        offset,
        ty: FieldType::I32,
    }
}

const fn f32_at(key: &'static str, offset: usize) -> Field {
    Field {
        key,
        offset,
        ty: FieldType::F32,
    }
}

const fn f64_at(key: &'static str, offset: usize) -> Field {
    Field {
        key,
        offset,
        ty: FieldType::F64,
    }
}

const fn text_at(key: &'static str, offset: usize, width: usize) -> Field {
    Field {
        key,
        offset,
        ty: FieldType::Text(width),
    }
}

const GENERAL: &[Field] = &[
    f64_at(keys::UT, 0),
    f64_at(keys::LST, 8),
    f32_at(keys::AZIMUTH, 16),
    f32_at(keys::ELEVATION, 20),
    f32_at(keys::TAU, 24),
    f32_at(keys::TSYS, 28),
    f32_at(keys::INTEGRATION_TIME, 32),
];

const POSITION: &[Field] = &[
    text_at(keys::SOURCE, 0, 12),
    f32_at(keys::EPOCH, 12),
    f64_at(keys::LAMBDA, 16),
    f64_at(keys::BETA, 24),
    f32_at(keys::LAMBDA_OFFSET, 32),
    f32_at(keys::BETA_OFFSET, 36),
    i32_at(keys::PROJECTION, 40),
];

const SPECTROSCOPY: &[Field] = &[
    text_at(keys::LINE, 0, 12),
    f64_at(keys::REF_FREQ, 12),
    i32_at(keys::NCHAN, 20),
    f32_at(keys::REF_CHAN, 24),
    f32_at(keys::FREQ_RESOL, 28),
    f32_at(keys::FREQ_OFFSET, 32),
    f32_at(keys::VEL_RESOL, 36),
    f32_at(keys::REF_VEL, 40),
    f32_at(keys::BLANKING, 44),
    f64_at(keys::IMAGE_FREQ, 48),
    i32_at(keys::VEL_TYPE, 56),
    f64_at(keys::DOPPLER, 60),
];

const BASELINE: &[Field] = &[
    i32_at(keys::BASELINE_DEG, 0),
    f32_at(keys::BASELINE_SIGMA, 4),
    f32_at(keys::BASELINE_AREA, 8),
    i32_at(keys::BASELINE_NWIN, 12),
];
const BASELINE_W1_OFFSET: usize = 16;
const BASELINE_W2_OFFSET: usize = 36;

const FREQ_SWITCH: &[Field] = &[i32_at(keys::FSW_NPHASES, 0), i32_at(keys::FSW_MODE, 4)];
const FREQ_SWITCH_PHASES_OFFSET: usize = 8;

const CONTINUUM: &[Field] = &[
    f64_at(keys::CONT_FREQ, 0),
    f32_at(keys::CONT_WIDTH, 8),
    i32_at(keys::CONT_NPOINTS, 12),
    f32_at(keys::CONT_REF_POINT, 16),
    f32_at(keys::CONT_TIME_REF, 20),
    f32_at(keys::CONT_ANGLE_REF, 24),
    f32_at(keys::CONT_ANGLE_POS, 28),
    f32_at(keys::CONT_TIME_RES, 32),
    f32_at(keys::CONT_ANGLE_RES, 36),
    f32_at(keys::CONT_BLANKING, 40),
    i32_at(keys::CONT_TYPE, 44),
    f64_at(keys::CONT_IMAGE_FREQ, 48),
    f32_at(keys::CONT_COLL_AZ, 56),
    f32_at(keys::CONT_COLL_EL, 60),
];

const CALIBRATION: &[Field] = &[
    f32_at(keys::BEAM_EFF, 0),
    f32_at(keys::FORWARD_EFF, 4),
    f32_at(keys::GAIN_IMAGE, 8),
    f32_at(keys::WATER_VAPOR, 12),
    f32_at(keys::PRESSURE, 16),
    f32_at(keys::AMBIENT_TEMP, 20),
    f32_at(keys::ATM_TEMP_SIGNAL, 24),
    f32_at(keys::CHOPPER_TEMP, 28),
    f32_at(keys::COLD_TEMP, 32),
    f32_at(keys::TAU_SIGNAL, 36),
    f32_at(keys::TAU_IMAGE, 40),
    f32_at(keys::ATM_TEMP_IMAGE, 44),
    f32_at(keys::RECEIVER_TEMP, 48),
    i32_at(keys::CAL_MODE, 52),
    f32_at(keys::ATM_FACTOR, 56),
    f32_at(keys::ALTITUDE, 60),
    f32_at(keys::CAL_LAMBDA_OFFSET, 64),
    f32_at(keys::CAL_BETA_OFFSET, 68),
    f64_at(keys::LONGITUDE, 72),
    f64_at(keys::LATITUDE, 80),
];

const DATA_DESCRIPTOR: &[Field] = &[
    i32_at(keys::DATA_DIM1, 0),
    i32_at(keys::DATA_DIM2, 4),
    i32_at(keys::DATA_TYPE, 8),
    i32_at(keys::X_UNIT, 12),
];

fn switch_phases(table: &ParameterTable) -> usize {
    table
        .get_i64(keys::FSW_NPHASES)
        .unwrap_or(0)
        .clamp(0, MAX_SWITCH_PHASES as i64) as usize
}

fn read_fields<C: ByteCodec>(
    codec: &C,
    buf: &[u8],
    fields: &[Field],
    table: &mut ParameterTable,
) -> Result<()> {
    for f in fields {
        match f.ty {
            FieldType::I32 => table.set_i64(f.key, codec.read_i32(buf, f.offset)? as i64),
            FieldType::F32 => table.set_f64(f.key, codec.read_f32(buf, f.offset)? as f64),
            FieldType::F64 => table.set_f64(f.key, codec.read_f64(buf, f.offset)?),
            FieldType::Text(w) => table.set_text(f.key, &codec.read_string(buf, f.offset, w)?),
        }
    }
    Ok(())
}

fn write_fields<C: ByteCodec>(
    codec: &C,
    buf: &mut [u8],
    fields: &[Field],
    table: &ParameterTable,
) -> Result<()> {
    for f in fields {
        match f.ty {
            FieldType::I32 => {
                codec.write_i32(buf, f.offset, table.get_i64(f.key).unwrap_or(0) as i32)?
            }
            FieldType::F32 => {
                codec.write_f32(buf, f.offset, table.get_f64(f.key).unwrap_or(0.0) as f32)?
            }
            FieldType::F64 => codec.write_f64(buf, f.offset, table.get_f64(f.key).unwrap_or(0.0))?,
            FieldType::Text(w) => {
                codec.write_string(buf, f.offset, w, table.get_text(f.key).unwrap_or(""))?
            }
        }
    }
    Ok(())
}

/// Decode one section body into `table`.
pub fn parse_section<C: ByteCodec>(
    codec: &C,
    kind: SectionKind,
    buf: &[u8],
    table: &mut ParameterTable,
) -> Result<()> {
    read_fields(codec, buf, kind.fields(), table)?;
    match kind {
        SectionKind::Baseline => {
            let nwin = table
                .get_i64(keys::BASELINE_NWIN)
                .unwrap_or(0)
                .clamp(0, MAX_BASELINE_WINDOWS as i64) as usize;
            for n in 0..nwin {
                let w1 = codec.read_f32(buf, BASELINE_W1_OFFSET + 4 * n)?;
                let w2 = codec.read_f32(buf, BASELINE_W2_OFFSET + 4 * n)?;
                table.set_f64(&indexed_key(keys::BASELINE_W1, n + 1), w1 as f64);
                table.set_f64(&indexed_key(keys::BASELINE_W2, n + 1), w2 as f64);
            }
        }
        SectionKind::FrequencySwitching => {
            for n in 0..switch_phases(table) {
                let base = FREQ_SWITCH_PHASES_OFFSET + 16 * n;
                table.set_f64(
                    &indexed_key(keys::FSW_OFFSET, n + 1),
                    codec.read_f64(buf, base)?,
                );
                table.set_f64(
                    &indexed_key(keys::FSW_DURATION, n + 1),
                    codec.read_f32(buf, base + 8)? as f64,
                );
                table.set_f64(
                    &indexed_key(keys::FSW_WEIGHT, n + 1),
                    codec.read_f32(buf, base + 12)? as f64,
                );
            }
        }
        _ => {}
    }
    Ok(())
}

/// Encode one section body from `table`. Absent parameters are written as zero.
pub fn write_section<C: ByteCodec>(
    codec: &C,
    kind: SectionKind,
    table: &ParameterTable,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; kind.byte_len(table)];
    write_fields(codec, &mut buf, kind.fields(), table)?;
    match kind {
        SectionKind::Baseline => {
            for n in 0..MAX_BASELINE_WINDOWS {
                let w1 = table.get_f64(&indexed_key(keys::BASELINE_W1, n + 1));
                let w2 = table.get_f64(&indexed_key(keys::BASELINE_W2, n + 1));
                codec.write_f32(&mut buf, BASELINE_W1_OFFSET + 4 * n, w1.unwrap_or(0.0) as f32)?;
                codec.write_f32(&mut buf, BASELINE_W2_OFFSET + 4 * n, w2.unwrap_or(0.0) as f32)?;
            }
        }
        SectionKind::FrequencySwitching => {
            codec.write_i32(&mut buf, 0, switch_phases(table) as i32)?;
            for n in 0..switch_phases(table) {
                let base = FREQ_SWITCH_PHASES_OFFSET + 16 * n;
                let get = |family| table.get_f64(&indexed_key(family, n + 1)).unwrap_or(0.0);
                codec.write_f64(&mut buf, base, get(keys::FSW_OFFSET))?;
                codec.write_f32(&mut buf, base + 8, get(keys::FSW_DURATION) as f32)?;
                codec.write_f32(&mut buf, base + 12, get(keys::FSW_WEIGHT) as f32)?;
            }
        }
        _ => {}
    }
    Ok(buf)
}

/// Sections the writer emits for a record of `kind` carrying `table`.
///
/// General, position and the data descriptor are always written; the others
/// only when their leading parameter is present.
pub fn sections_for(kind: DataKind, table: &ParameterTable) -> Vec<SectionKind> {
    let mut out = vec![SectionKind::General, SectionKind::Position];
    match kind {
        DataKind::Continuum => out.push(SectionKind::Continuum),
        _ => out.push(SectionKind::Spectroscopy),
    }
    if table.contains(keys::BASELINE_DEG) {
        out.push(SectionKind::Baseline);
    }
    if table.contains(keys::FSW_NPHASES) {
        out.push(SectionKind::FrequencySwitching);
    }
    if table.contains(keys::BEAM_EFF) {
        out.push(SectionKind::Calibration);
    }
    out.push(SectionKind::DataDescriptor);
    out
}

/// Fixed part of an observation record: identifier, sizes and the section
/// directory. Section addresses and the data address are byte offsets from
/// the start of the record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObservationDescriptor {
    /// Number of 512-byte blocks the record spans.
    pub blocks: i32,
    /// Bytes actually used.
    pub used_bytes: i32,
    pub data_address: i32,
    /// Number of f32 values in the data array.
    pub data_len: i32,
    pub observation: i32,
    /// `(code, length, address)` per section, in directory order.
    pub sections: Vec<(i32, i32, i32)>,
}

const OBS_FIXED_LEN: usize = 28;

impl ObservationDescriptor {
    /// Encoded length for `nsec` sections.
    pub const fn encoded_len(nsec: usize) -> usize {
        OBS_FIXED_LEN + 12 * nsec
    }

    /// Decode a descriptor from the start of `buf`.
    pub fn parse<C: ByteCodec>(codec: &C, buf: &[u8]) -> Result<Self> {
        let nsec = codec.read_i32(buf, 24)?;
        if nsec < 0 {
            return Err(Error::Format("negative section count"));
        }
        let nsec = nsec as usize;
        if nsec
            .checked_mul(12)
            .and_then(|n| n.checked_add(OBS_FIXED_LEN))
            .is_none_or(|n| n > buf.len())
        {
            return Err(Error::Format("section count exceeds the observation record"));
        }
        let mut sections = Vec::with_capacity(nsec);
        for s in 0..nsec {
            sections.push((
                codec.read_i32(buf, OBS_FIXED_LEN + 4 * s)?,
                codec.read_i32(buf, OBS_FIXED_LEN + 4 * (nsec + s))?,
                codec.read_i32(buf, OBS_FIXED_LEN + 4 * (2 * nsec + s))?,
            ));
        }
        Ok(ObservationDescriptor {
            blocks: codec.read_i32(buf, 4)?,
            used_bytes: codec.read_i32(buf, 8)?,
            data_address: codec.read_i32(buf, 12)?,
            data_len: codec.read_i32(buf, 16)?,
            observation: codec.read_i32(buf, 20)?,
            sections,
        })
    }

    /// Write the descriptor at the start of `buf`, tagged with `code`.
    pub fn write<C: ByteCodec>(&self, codec: &C, code: u8, buf: &mut [u8]) -> Result<()> {
        codec.write_string(buf, 0, 4, "2")?;
        if let Some(b) = buf.get_mut(1) {
            *b = code;
        }
        let nsec = self.sections.len();
        codec.write_i32(buf, 4, self.blocks)?;
        codec.write_i32(buf, 8, self.used_bytes)?;
        codec.write_i32(buf, 12, self.data_address)?;
        codec.write_i32(buf, 16, self.data_len)?;
        codec.write_i32(buf, 20, self.observation)?;
        codec.write_i32(buf, 24, nsec as i32)?;
        for (s, &(c, len, addr)) in self.sections.iter().enumerate() {
            codec.write_i32(buf, OBS_FIXED_LEN + 4 * s, c)?;
            codec.write_i32(buf, OBS_FIXED_LEN + 4 * (nsec + s), len)?;
            codec.write_i32(buf, OBS_FIXED_LEN + 4 * (2 * nsec + s), addr)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, Encoding};

    #[test]
    fn codes_roundtrip() {
        for kind in SectionKind::ALL {
            assert_eq!(SectionKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(SectionKind::from_code(-99), None);
        assert_eq!(SectionKind::from_code(-4), Some(SectionKind::Spectroscopy));
    }

    #[test]
    fn observation_descriptor_roundtrip() {
        let codec = Codec::for_encoding(Encoding::Ieee);
        let d = ObservationDescriptor {
            blocks: 2,
            used_bytes: 700,
            data_address: 212,
            data_len: 64,
            observation: 7,
            sections: vec![(-2, 36, 64), (-3, 44, 100), (-4, 68, 144)],
        };
        let mut buf = vec![0u8; ObservationDescriptor::encoded_len(3)];
        d.write(&codec, b'C', &mut buf).unwrap();
        assert_eq!(&buf[..4], b"2C  ");
        assert_eq!(ObservationDescriptor::parse(&codec, &buf).unwrap(), d);
    }

    #[test]
    fn section_count_beyond_record_rejected() {
        let codec = Codec::for_encoding(Encoding::Ieee);
        let d = ObservationDescriptor {
            blocks: 1,
            used_bytes: 64,
            data_address: 40,
            data_len: 4,
            observation: 3,
            sections: vec![(-2, 36, 64)],
        };
        let mut buf = vec![0u8; 512];
        d.write(&codec, b'C', &mut buf).unwrap();
        codec.write_i32(&mut buf, 24, i32::MAX).unwrap();
        assert!(matches!(ObservationDescriptor::parse(&codec, &buf), Err(Error::Format(_))));
        // 40 sections need 28 + 480 bytes, just inside one block.
        codec.write_i32(&mut buf, 24, 40).unwrap();
        assert_eq!(ObservationDescriptor::parse(&codec, &buf).unwrap().sections.len(), 40);
        codec.write_i32(&mut buf, 24, 41).unwrap();
        assert!(ObservationDescriptor::parse(&codec, &buf).is_err());
    }

    #[test]
    fn spectroscopy_section_roundtrip() {
        let codec = Codec::for_encoding(Encoding::Eeei);
        let mut t = ParameterTable::new();
        t.set_text(keys::LINE, "CO(1-0)");
        t.set_f64(keys::REF_FREQ, 115271.2018);
        t.set_i64(keys::NCHAN, 64);
        t.set_f64(keys::REF_CHAN, 32.0);
        t.set_f64(keys::VEL_RESOL, 1.0);
        t.set_f64(keys::BLANKING, -1000.0);

        let bytes = write_section(&codec, SectionKind::Spectroscopy, &t).unwrap();
        assert_eq!(bytes.len(), 68);

        let mut back = ParameterTable::new();
        parse_section(&codec, SectionKind::Spectroscopy, &bytes, &mut back).unwrap();
        assert_eq!(back.get_text(keys::LINE), Some("CO(1-0)"));
        assert_eq!(back.get_f64(keys::REF_FREQ), Some(115271.2018));
        assert_eq!(back.get_i64(keys::NCHAN), Some(64));
        assert_eq!(back.get_f64(keys::REF_VEL), Some(0.0));
    }

    #[test]
    fn baseline_windows_roundtrip() {
        let codec = Codec::for_encoding(Encoding::Ieee);
        let mut t = ParameterTable::new();
        t.set_i64(keys::BASELINE_DEG, 1);
        t.set_i64(keys::BASELINE_NWIN, 2);
        t.set_f64(&indexed_key(keys::BASELINE_W1, 1), -10.0);
        t.set_f64(&indexed_key(keys::BASELINE_W2, 1), -5.0);
        t.set_f64(&indexed_key(keys::BASELINE_W1, 2), 5.0);
        t.set_f64(&indexed_key(keys::BASELINE_W2, 2), 10.0);

        let bytes = write_section(&codec, SectionKind::Baseline, &t).unwrap();
        let mut back = ParameterTable::new();
        parse_section(&codec, SectionKind::Baseline, &bytes, &mut back).unwrap();
        assert_eq!(back.get_f64("BASELINE_W1_2"), Some(5.0));
        assert_eq!(back.get_f64("BASELINE_W2_1"), Some(-5.0));
        assert!(!back.contains("BASELINE_W1_3"));
    }

    #[test]
    fn switching_section_length_follows_phase_count() {
        let codec = Codec::for_encoding(Encoding::Ieee);
        let mut t = ParameterTable::new();
        t.set_i64(keys::FSW_NPHASES, 2);
        t.set_f64(&indexed_key(keys::FSW_OFFSET, 2), 7.8);
        t.set_f64(&indexed_key(keys::FSW_WEIGHT, 2), -1.0);
        let bytes = write_section(&codec, SectionKind::FrequencySwitching, &t).unwrap();
        assert_eq!(bytes.len(), 8 + 32);

        let mut back = ParameterTable::new();
        parse_section(&codec, SectionKind::FrequencySwitching, &bytes, &mut back).unwrap();
        assert_eq!(back.get_f64("FSW_OFFSET_2"), Some(7.8));
        assert_eq!(back.get_f64("FSW_WEIGHT_2"), Some(-1.0));
        assert_eq!(back.get_f64("FSW_OFFSET_1"), Some(0.0));
    }

    #[test]
    fn truncated_section_is_an_error() {
        let codec = Codec::for_encoding(Encoding::Ieee);
        let mut t = ParameterTable::new();
        assert!(parse_section(&codec, SectionKind::Calibration, &[0u8; 20], &mut t).is_err());
    }

    #[test]
    fn writer_section_selection() {
        let mut t = ParameterTable::new();
        let plain = sections_for(DataKind::Spectrum, &t);
        assert_eq!(
            plain,
            vec![
                SectionKind::General,
                SectionKind::Position,
                SectionKind::Spectroscopy,
                SectionKind::DataDescriptor
            ]
        );
        t.set_f64(keys::BEAM_EFF, 0.8);
        let cont = sections_for(DataKind::Continuum, &t);
        assert!(cont.contains(&SectionKind::Continuum));
        assert!(cont.contains(&SectionKind::Calibration));
        assert!(!cont.contains(&SectionKind::Spectroscopy));
    }
}
