//! Byte-order codecs for GILDAS binary data.
//!
//! GILDAS files come in two IEEE encodings: little-endian (`IEEE`) and
//! big-endian (`EEEI`). A file's encoding is named by a single byte of its
//! preamble; [`Codec::for_encoding`] turns that into one of two codecs, one
//! that copies bytes straight into the in-memory representation and one that
//! reverses each scalar. Every access is bounds-checked and reports
//! [`Error::OutOfBounds`] instead of panicking.

use alloc::string::String;
use alloc::vec::Vec;

use bytemuck::pod_collect_to_vec;

use crate::error::{Error, Result};

/// On-disk numeric encoding of a GILDAS file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Encoding {
    /// IEEE floats, little-endian words.
    Ieee,
    /// IEEE floats, big-endian words.
    Eeei,
}

impl Encoding {
    /// Encoding whose byte order matches the running host.
    pub fn host() -> Self {
        if cfg!(target_endian = "little") {
            Encoding::Ieee
        } else {
            Encoding::Eeei
        }
    }

    /// Decode the selector byte of a container tag (`"1B  "` / `"1C  "`).
    pub fn from_container_code(code: u8) -> Result<Self> {
        match code {
            b'B' => Ok(Encoding::Ieee),
            b'C' => Ok(Encoding::Eeei),
            b'A' => Err(Error::Format("VAX container encoding is not supported")),
            _ => Err(Error::Format("unrecognized container encoding tag")),
        }
    }

    /// Decode the selector byte of a cube magic (`GILDAS-IMAGE` / `GILDAS.IMAGE`).
    pub fn from_image_code(code: u8) -> Result<Self> {
        match code {
            b'-' => Ok(Encoding::Ieee),
            b'.' => Ok(Encoding::Eeei),
            b'_' => Err(Error::Format("VAX image encoding is not supported")),
            _ => Err(Error::Format("unrecognized image encoding code")),
        }
    }

    /// Selector byte written into a container tag.
    pub fn container_code(self) -> u8 {
        match self {
            Encoding::Ieee => b'B',
            Encoding::Eeei => b'C',
        }
    }

    /// Selector byte written into a cube magic.
    pub fn image_code(self) -> u8 {
        match self {
            Encoding::Ieee => b'-',
            Encoding::Eeei => b'.',
        }
    }
}

/// A calendar date packed as a day count.
///
/// Day zero is MJD 60549; earlier dates are negative.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize, serde::Deserialize,
)]
pub struct GildasDate(pub i32);

/// Modified Julian Date of GILDAS day zero.
pub const GILDAS_DAY_ZERO_MJD: i64 = 60549;

/// Modified Julian Date of 1970-01-01.
const UNIX_EPOCH_MJD: i64 = 40587;

impl GildasDate {
    /// Build the packed value from a Modified Julian Date (fractions truncated).
    pub fn from_mjd(mjd: i64) -> Self {
        GildasDate((mjd - GILDAS_DAY_ZERO_MJD) as i32)
    }

    /// Modified Julian Date of this day.
    pub fn mjd(self) -> i64 {
        self.0 as i64 + GILDAS_DAY_ZERO_MJD
    }

    /// Build from a proleptic Gregorian calendar date.
    ///
    /// Returns `None` for impossible month or day numbers.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        if !(1..=12).contains(&month) || day == 0 || day > days_in_month(year, month) {
            return None;
        }
        Some(Self::from_mjd(days_from_civil(year, month, day) + UNIX_EPOCH_MJD))
    }

    /// Calendar date as `(year, month, day)`.
    pub fn ymd(self) -> (i32, u32, u32) {
        civil_from_days(self.mjd() - UNIX_EPOCH_MJD)
    }
}

impl core::fmt::Display for GildasDate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (y, m, d) = self.ymd();
        const MONTHS: [&str; 12] = [
            "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
        ];
        write!(f, "{:02}-{}-{:04}", d, MONTHS[(m - 1) as usize], y)
    }
}

fn is_leap(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ if is_leap(year) => 29,
        _ => 28,
    }
}

// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i32, month: u32, day: u32) -> i64 {
    let y = (if month <= 2 { year - 1 } else { year }) as i64;
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    let yoe = y - era * 400;
    let m = month as i64;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

fn civil_from_days(days: i64) -> (i32, u32, u32) {
    let z = days + 719468;
    let era = (if z >= 0 { z } else { z - 146096 }) / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = if m <= 2 { y + 1 } else { y };
    (year as i32, m, d)
}

/// Copy `N` bytes starting at `offset`, or report the access as out of bounds.
#[inline]
fn take<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N]> {
    let end = offset.checked_add(N).ok_or(Error::OutOfBounds {
        offset,
        len: buf.len(),
    })?;
    let src = buf.get(offset..end).ok_or(Error::OutOfBounds {
        offset,
        len: buf.len(),
    })?;
    let mut out = [0u8; N];
    out.copy_from_slice(src);
    Ok(out)
}

#[inline]
fn place<const N: usize>(buf: &mut [u8], offset: usize, bytes: [u8; N]) -> Result<()> {
    let len = buf.len();
    let end = offset
        .checked_add(N)
        .ok_or(Error::OutOfBounds { offset, len })?;
    let dst = buf
        .get_mut(offset..end)
        .ok_or(Error::OutOfBounds { offset, len })?;
    dst.copy_from_slice(&bytes);
    Ok(())
}

/// Fixed-width scalar access at a byte offset inside a buffer.
///
/// Implementations differ only in how the bytes of each scalar are ordered;
/// strings and bulk arrays are provided on top of the scalar primitives.
pub trait ByteCodec {
    /// Read a 16-bit integer.
    fn read_i16(&self, buf: &[u8], offset: usize) -> Result<i16>;
    /// Read a 32-bit integer.
    fn read_i32(&self, buf: &[u8], offset: usize) -> Result<i32>;
    /// Read an IEEE single.
    fn read_f32(&self, buf: &[u8], offset: usize) -> Result<f32>;
    /// Read an IEEE double.
    fn read_f64(&self, buf: &[u8], offset: usize) -> Result<f64>;

    /// Write a 16-bit integer.
    fn write_i16(&self, buf: &mut [u8], offset: usize, val: i16) -> Result<()>;
    /// Write a 32-bit integer.
    fn write_i32(&self, buf: &mut [u8], offset: usize, val: i32) -> Result<()>;
    /// Write an IEEE single.
    fn write_f32(&self, buf: &mut [u8], offset: usize, val: f32) -> Result<()>;
    /// Write an IEEE double.
    fn write_f64(&self, buf: &mut [u8], offset: usize, val: f64) -> Result<()>;

    /// Reorder a 32-bit word taken verbatim from the file into host order.
    fn word_to_host(&self, word: u32) -> u32;

    /// Read a packed date.
    fn read_date(&self, buf: &[u8], offset: usize) -> Result<GildasDate> {
        self.read_i32(buf, offset).map(GildasDate)
    }

    /// Write a packed date.
    fn write_date(&self, buf: &mut [u8], offset: usize, date: GildasDate) -> Result<()> {
        self.write_i32(buf, offset, date.0)
    }

    /// Read a fixed-width ASCII field, trimming trailing spaces and NULs.
    fn read_string(&self, buf: &[u8], offset: usize, width: usize) -> Result<String> {
        let end = offset.checked_add(width).ok_or(Error::OutOfBounds {
            offset,
            len: buf.len(),
        })?;
        let raw = buf.get(offset..end).ok_or(Error::OutOfBounds {
            offset,
            len: buf.len(),
        })?;
        let text: String = raw.iter().map(|&b| b as char).collect();
        Ok(text.trim_end_matches([' ', '\0']).into())
    }

    /// Write `text` into a fixed-width field, truncating or space-padding it.
    fn write_string(&self, buf: &mut [u8], offset: usize, width: usize, text: &str) -> Result<()> {
        let len = buf.len();
        let end = offset
            .checked_add(width)
            .ok_or(Error::OutOfBounds { offset, len })?;
        let dst = buf
            .get_mut(offset..end)
            .ok_or(Error::OutOfBounds { offset, len })?;
        dst.fill(b' ');
        let bytes = text.as_bytes();
        let n = bytes.len().min(width);
        dst[..n].copy_from_slice(&bytes[..n]);
        Ok(())
    }

    /// Read `count` consecutive IEEE singles.
    fn read_f32_array(&self, buf: &[u8], offset: usize, count: usize) -> Result<Vec<f32>> {
        let len = buf.len();
        let end = count
            .checked_mul(4)
            .and_then(|n| n.checked_add(offset))
            .ok_or(Error::OutOfBounds { offset, len })?;
        let raw = buf.get(offset..end).ok_or(Error::OutOfBounds { offset, len })?;
        let words: Vec<u32> = pod_collect_to_vec(raw);
        Ok(words
            .into_iter()
            .map(|w| f32::from_bits(self.word_to_host(w)))
            .collect())
    }

    /// Write consecutive IEEE singles starting at `offset`.
    fn write_f32_array(&self, buf: &mut [u8], offset: usize, values: &[f32]) -> Result<()> {
        let len = buf.len();
        let end = (values.len() * 4)
            .checked_add(offset)
            .ok_or(Error::OutOfBounds { offset, len })?;
        let dst = buf
            .get_mut(offset..end)
            .ok_or(Error::OutOfBounds { offset, len })?;
        let words: Vec<u32> = values
            .iter()
            .map(|v| self.word_to_host(v.to_bits()))
            .collect();
        dst.copy_from_slice(bytemuck::cast_slice(&words));
        Ok(())
    }
}

/// Scalars stored byte-for-byte as their in-memory representation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NativeOrder;

/// Scalars stored with each 2/4/8-byte unit reversed relative to the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwappedOrder;

impl ByteCodec for NativeOrder {
    #[inline]
    fn read_i16(&self, buf: &[u8], offset: usize) -> Result<i16> {
        take(buf, offset).map(i16::from_ne_bytes)
    }

    #[inline]
    fn read_i32(&self, buf: &[u8], offset: usize) -> Result<i32> {
        take(buf, offset).map(i32::from_ne_bytes)
    }

    #[inline]
    fn read_f32(&self, buf: &[u8], offset: usize) -> Result<f32> {
        take(buf, offset).map(f32::from_ne_bytes)
    }

    #[inline]
    fn read_f64(&self, buf: &[u8], offset: usize) -> Result<f64> {
        take(buf, offset).map(f64::from_ne_bytes)
    }

    #[inline]
    fn write_i16(&self, buf: &mut [u8], offset: usize, val: i16) -> Result<()> {
        place(buf, offset, val.to_ne_bytes())
    }

    #[inline]
    fn write_i32(&self, buf: &mut [u8], offset: usize, val: i32) -> Result<()> {
        place(buf, offset, val.to_ne_bytes())
    }

    #[inline]
    fn write_f32(&self, buf: &mut [u8], offset: usize, val: f32) -> Result<()> {
        place(buf, offset, val.to_ne_bytes())
    }

    #[inline]
    fn write_f64(&self, buf: &mut [u8], offset: usize, val: f64) -> Result<()> {
        place(buf, offset, val.to_ne_bytes())
    }

    #[inline]
    fn word_to_host(&self, word: u32) -> u32 {
        word
    }
}

impl ByteCodec for SwappedOrder {
    #[inline]
    fn read_i16(&self, buf: &[u8], offset: usize) -> Result<i16> {
        take(buf, offset).map(|b: [u8; 2]| i16::from_ne_bytes(b).swap_bytes())
    }

    #[inline]
    fn read_i32(&self, buf: &[u8], offset: usize) -> Result<i32> {
        take(buf, offset).map(|b: [u8; 4]| i32::from_ne_bytes(b).swap_bytes())
    }

    #[inline]
    fn read_f32(&self, buf: &[u8], offset: usize) -> Result<f32> {
        take(buf, offset).map(|b: [u8; 4]| f32::from_bits(u32::from_ne_bytes(b).swap_bytes()))
    }

    #[inline]
    fn read_f64(&self, buf: &[u8], offset: usize) -> Result<f64> {
        take(buf, offset).map(|b: [u8; 8]| f64::from_bits(u64::from_ne_bytes(b).swap_bytes()))
    }

    #[inline]
    fn write_i16(&self, buf: &mut [u8], offset: usize, val: i16) -> Result<()> {
        place(buf, offset, val.swap_bytes().to_ne_bytes())
    }

    #[inline]
    fn write_i32(&self, buf: &mut [u8], offset: usize, val: i32) -> Result<()> {
        place(buf, offset, val.swap_bytes().to_ne_bytes())
    }

    #[inline]
    fn write_f32(&self, buf: &mut [u8], offset: usize, val: f32) -> Result<()> {
        place(buf, offset, val.to_bits().swap_bytes().to_ne_bytes())
    }

    #[inline]
    fn write_f64(&self, buf: &mut [u8], offset: usize, val: f64) -> Result<()> {
        place(buf, offset, val.to_bits().swap_bytes().to_ne_bytes())
    }

    #[inline]
    fn word_to_host(&self, word: u32) -> u32 {
        word.swap_bytes()
    }
}

/// The codec selected for one open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Native(NativeOrder),
    Swapped(SwappedOrder),
}

impl Codec {
    /// Pick the codec that decodes `encoding` on this host.
    pub fn for_encoding(encoding: Encoding) -> Self {
        if encoding == Encoding::host() {
            Codec::Native(NativeOrder)
        } else {
            Codec::Swapped(SwappedOrder)
        }
    }

    /// Factory keyed on the container preamble's selector byte.
    pub fn from_container_code(code: u8) -> Result<Self> {
        Encoding::from_container_code(code).map(Self::for_encoding)
    }

    /// Factory keyed on the cube magic's selector byte.
    pub fn from_image_code(code: u8) -> Result<Self> {
        Encoding::from_image_code(code).map(Self::for_encoding)
    }

    /// Encoding this codec reads and writes on the current host.
    pub fn encoding(&self) -> Encoding {
        match (self, Encoding::host()) {
            (Codec::Native(_), host) => host,
            (Codec::Swapped(_), Encoding::Ieee) => Encoding::Eeei,
            (Codec::Swapped(_), Encoding::Eeei) => Encoding::Ieee,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $c:ident => $e:expr) => {
        match $self {
            Codec::Native($c) => $e,
            Codec::Swapped($c) => $e,
        }
    };
}

impl ByteCodec for Codec {
    fn read_i16(&self, buf: &[u8], offset: usize) -> Result<i16> {
        dispatch!(self, c => c.read_i16(buf, offset))
    }

    fn read_i32(&self, buf: &[u8], offset: usize) -> Result<i32> {
        dispatch!(self, c => c.read_i32(buf, offset))
    }

    fn read_f32(&self, buf: &[u8], offset: usize) -> Result<f32> {
        dispatch!(self, c => c.read_f32(buf, offset))
    }

    fn read_f64(&self, buf: &[u8], offset: usize) -> Result<f64> {
        dispatch!(self, c => c.read_f64(buf, offset))
    }

    fn write_i16(&self, buf: &mut [u8], offset: usize, val: i16) -> Result<()> {
        dispatch!(self, c => c.write_i16(buf, offset, val))
    }

    fn write_i32(&self, buf: &mut [u8], offset: usize, val: i32) -> Result<()> {
        dispatch!(self, c => c.write_i32(buf, offset, val))
    }

    fn write_f32(&self, buf: &mut [u8], offset: usize, val: f32) -> Result<()> {
        dispatch!(self, c => c.write_f32(buf, offset, val))
    }

    fn write_f64(&self, buf: &mut [u8], offset: usize, val: f64) -> Result<()> {
        dispatch!(self, c => c.write_f64(buf, offset, val))
    }

    fn word_to_host(&self, word: u32) -> u32 {
        dispatch!(self, c => c.word_to_host(word))
    }
}
