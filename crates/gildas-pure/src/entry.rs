//! The 128-byte per-spectrum index entry.

use alloc::string::String;

use serde::{Deserialize, Serialize};

use crate::block::ENTRY_SIZE;
use crate::codec::{ByteCodec, GildasDate};
use crate::error::Result;

/// Width of the source, line and telescope fields.
pub const NAME_WIDTH: usize = 12;

/// Data kind stored in an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataKind {
    Spectrum,
    Continuum,
    /// Kind code this crate does not interpret.
    Other(i32),
}

impl DataKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => DataKind::Spectrum,
            1 => DataKind::Continuum,
            other => DataKind::Other(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            DataKind::Spectrum => 0,
            DataKind::Continuum => 1,
            DataKind::Other(c) => c,
        }
    }
}

/// The fifteen fixed fields describing one observation, in on-disk order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumHeader {
    pub observation: i32,
    /// First 512-byte block of the observation record (1-based).
    pub block: i32,
    pub version: i32,
    pub source: String,
    pub line: String,
    pub telescope: String,
    pub observed: GildasDate,
    pub reduced: GildasDate,
    /// Lambda offset (rad).
    pub offset1: f32,
    /// Beta offset (rad).
    pub offset2: f32,
    pub coord_type: i32,
    pub kind: DataKind,
    pub quality: i32,
    pub scan: i32,
    /// Position angle (rad).
    pub position_angle: f32,
}

// Byte offsets of each field inside the entry.
const OFF_OBS: usize = 0;
const OFF_BLOCK: usize = 4;
const OFF_VERSION: usize = 8;
const OFF_SOURCE: usize = 12;
const OFF_LINE: usize = 24;
const OFF_TELESCOPE: usize = 36;
const OFF_DOBS: usize = 48;
const OFF_DRED: usize = 52;
const OFF_OFF1: usize = 56;
const OFF_OFF2: usize = 60;
const OFF_TYPE: usize = 64;
const OFF_KIND: usize = 68;
const OFF_QUALITY: usize = 72;
const OFF_SCAN: usize = 76;
const OFF_POSA: usize = 80;

impl Default for SpectrumHeader {
    fn default() -> Self {
        SpectrumHeader {
            observation: 0,
            block: 0,
            version: 1,
            source: String::new(),
            line: String::new(),
            telescope: String::new(),
            observed: GildasDate::default(),
            reduced: GildasDate::default(),
            offset1: 0.0,
            offset2: 0.0,
            coord_type: 0,
            kind: DataKind::Spectrum,
            quality: 0,
            scan: 0,
            position_angle: 0.0,
        }
    }
}

impl SpectrumHeader {
    /// Parse an entry from the first 128 bytes of `buf`.
    pub fn parse<C: ByteCodec>(codec: &C, buf: &[u8]) -> Result<Self> {
        Ok(SpectrumHeader {
            observation: codec.read_i32(buf, OFF_OBS)?,
            block: codec.read_i32(buf, OFF_BLOCK)?,
            version: codec.read_i32(buf, OFF_VERSION)?,
            source: codec.read_string(buf, OFF_SOURCE, NAME_WIDTH)?,
            line: codec.read_string(buf, OFF_LINE, NAME_WIDTH)?,
            telescope: codec.read_string(buf, OFF_TELESCOPE, NAME_WIDTH)?,
            observed: codec.read_date(buf, OFF_DOBS)?,
            reduced: codec.read_date(buf, OFF_DRED)?,
            offset1: codec.read_f32(buf, OFF_OFF1)?,
            offset2: codec.read_f32(buf, OFF_OFF2)?,
            coord_type: codec.read_i32(buf, OFF_TYPE)?,
            kind: DataKind::from_code(codec.read_i32(buf, OFF_KIND)?),
            quality: codec.read_i32(buf, OFF_QUALITY)?,
            scan: codec.read_i32(buf, OFF_SCAN)?,
            position_angle: codec.read_f32(buf, OFF_POSA)?,
        })
    }

    /// Serialize into a zero-padded 128-byte entry.
    pub fn to_bytes<C: ByteCodec>(&self, codec: &C) -> Result<[u8; ENTRY_SIZE]> {
        let mut buf = [0u8; ENTRY_SIZE];
        codec.write_i32(&mut buf, OFF_OBS, self.observation)?;
        codec.write_i32(&mut buf, OFF_BLOCK, self.block)?;
        codec.write_i32(&mut buf, OFF_VERSION, self.version)?;
        codec.write_string(&mut buf, OFF_SOURCE, NAME_WIDTH, &self.source)?;
        codec.write_string(&mut buf, OFF_LINE, NAME_WIDTH, &self.line)?;
        codec.write_string(&mut buf, OFF_TELESCOPE, NAME_WIDTH, &self.telescope)?;
        codec.write_date(&mut buf, OFF_DOBS, self.observed)?;
        codec.write_date(&mut buf, OFF_DRED, self.reduced)?;
        codec.write_f32(&mut buf, OFF_OFF1, self.offset1)?;
        codec.write_f32(&mut buf, OFF_OFF2, self.offset2)?;
        codec.write_i32(&mut buf, OFF_TYPE, self.coord_type)?;
        codec.write_i32(&mut buf, OFF_KIND, self.kind.code())?;
        codec.write_i32(&mut buf, OFF_QUALITY, self.quality)?;
        codec.write_i32(&mut buf, OFF_SCAN, self.scan)?;
        codec.write_f32(&mut buf, OFF_POSA, self.position_angle)?;
        Ok(buf)
    }

    pub fn is_spectral(&self) -> bool {
        self.kind == DataKind::Spectrum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, Encoding};

    fn sample() -> SpectrumHeader {
        SpectrumHeader {
            observation: 22,
            block: 17,
            version: 3,
            source: "ORION-KL".into(),
            line: "CO(1-0)".into(),
            telescope: "IRAM-30M".into(),
            observed: GildasDate::from_ymd(2009, 3, 4).unwrap(),
            reduced: GildasDate::from_ymd(2009, 3, 5).unwrap(),
            offset1: 1.5e-5,
            offset2: -3.0e-5,
            coord_type: 2,
            kind: DataKind::Continuum,
            quality: 1,
            scan: 4411,
            position_angle: 0.25,
        }
    }

    #[test]
    fn roundtrip_both_encodings() {
        let h = sample();
        for enc in [Encoding::Ieee, Encoding::Eeei] {
            let codec = Codec::for_encoding(enc);
            let bytes = h.to_bytes(&codec).unwrap();
            assert_eq!(SpectrumHeader::parse(&codec, &bytes).unwrap(), h);
        }
    }

    #[test]
    fn fields_sit_at_fixed_offsets() {
        let codec = Codec::for_encoding(Encoding::Eeei);
        let bytes = sample().to_bytes(&codec).unwrap();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 22]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 17]);
        assert_eq!(&bytes[12..24], b"ORION-KL    ");
        assert_eq!(&bytes[68..72], &[0, 0, 0, 1]);
        assert!(bytes[84..].iter().all(|&b| b == 0));
    }

    #[test]
    fn short_buffer_is_an_error() {
        let codec = Codec::for_encoding(Encoding::Ieee);
        assert!(SpectrumHeader::parse(&codec, &[0u8; 40]).is_err());
    }

    #[test]
    fn kind_codes() {
        assert_eq!(DataKind::from_code(0), DataKind::Spectrum);
        assert_eq!(DataKind::from_code(1), DataKind::Continuum);
        assert_eq!(DataKind::from_code(9).code(), 9);
    }
}
