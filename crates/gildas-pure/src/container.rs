//! Random-access reader for CLASS spectrum containers.
//!
//! A container starts with a 1024-byte preamble:
//!
//! | offset | size  | field                                            |
//! |--------|-------|--------------------------------------------------|
//! | 0      | 4     | tag, `"1B  "` (IEEE) or `"1C  "` (EEEI)          |
//! | 4      | 4     | next free block                                  |
//! | 8      | 4     | entries per index extension                      |
//! | 12     | 4     | extensions in use                                |
//! | 16     | 4     | next free entry (1-based)                        |
//! | 20     | 4*251 | first block of each index extension (1-based)    |
//!
//! Index entries are 128 bytes, four per block. Each entry points at an
//! observation record made of a descriptor, tagged sections and the data.
//!
//! Opening a container only reads the preamble. The index of entries is built
//! the first time spectra are listed or fetched.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::block::{
    block_offset, entry_offset, BLOCK_SIZE, ENTRY_SIZE, PREAMBLE_SIZE, PRIMARY_INDEX_SLOTS,
};
use crate::codec::{ByteCodec, Codec, Encoding};
use crate::entry::{DataKind, SpectrumHeader};
use crate::error::{Error, Result};
use crate::parameter::{keys, ParameterTable};
use crate::section::{parse_section, ObservationDescriptor, SectionKind};
use crate::spectrum::SpectrumRecord;

/// Decoded container preamble.
#[derive(Debug, Clone, PartialEq)]
pub struct Preamble {
    pub encoding: Encoding,
    pub next_block: i32,
    pub entries_per_extension: i32,
    pub extensions_in_use: i32,
    /// Next free entry number; the container holds `next_entry - 1` entries.
    pub next_entry: i32,
    pub extension_blocks: Vec<i32>,
}

impl Preamble {
    /// Decode the preamble, choosing the codec from the tag.
    pub fn parse(buf: &[u8]) -> Result<(Self, Codec)> {
        if buf.len() < PREAMBLE_SIZE {
            return Err(Error::Format("container shorter than its preamble"));
        }
        if buf[0] != b'1' {
            return Err(Error::Format("not a CLASS container"));
        }
        let codec = Codec::from_container_code(buf[1])?;
        let mut extension_blocks = Vec::with_capacity(PRIMARY_INDEX_SLOTS);
        for slot in 0..PRIMARY_INDEX_SLOTS {
            extension_blocks.push(codec.read_i32(buf, 20 + 4 * slot)?);
        }
        let preamble = Preamble {
            encoding: codec.encoding(),
            next_block: codec.read_i32(buf, 4)?,
            entries_per_extension: codec.read_i32(buf, 8)?,
            extensions_in_use: codec.read_i32(buf, 12)?,
            next_entry: codec.read_i32(buf, 16)?,
            extension_blocks,
        };
        Ok((preamble, codec))
    }

    /// Encode into a full 1024-byte preamble.
    pub fn to_bytes(&self, codec: &Codec) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; PREAMBLE_SIZE];
        codec.write_string(&mut buf, 0, 4, "1")?;
        buf[1] = self.encoding.container_code();
        codec.write_i32(&mut buf, 4, self.next_block)?;
        codec.write_i32(&mut buf, 8, self.entries_per_extension)?;
        codec.write_i32(&mut buf, 12, self.extensions_in_use)?;
        codec.write_i32(&mut buf, 16, self.next_entry)?;
        for (slot, &b) in self.extension_blocks.iter().take(PRIMARY_INDEX_SLOTS).enumerate() {
            codec.write_i32(&mut buf, 20 + 4 * slot, b)?;
        }
        Ok(buf)
    }

    /// Number of entries recorded in the container.
    pub fn entry_count(&self) -> usize {
        (self.next_entry - 1).max(0) as usize
    }

    fn extensions(&self) -> &[i32] {
        let n = (self.extensions_in_use.max(0) as usize).min(self.extension_blocks.len());
        &self.extension_blocks[..n]
    }
}

/// One row of the lazily built index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Position of the entry in the file's index area.
    pub physical: usize,
    pub observation: i32,
    pub kind: DataKind,
}

/// Logical view of the container: entries sorted by observation number.
///
/// Equal observation numbers keep their file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectrumIndex {
    logical: Vec<IndexEntry>,
}

impl SpectrumIndex {
    fn from_file_order(mut entries: Vec<IndexEntry>) -> Self {
        entries.sort_by_key(|e| e.observation);
        SpectrumIndex { logical: entries }
    }

    pub fn len(&self) -> usize {
        self.logical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logical.is_empty()
    }

    /// Entry at a logical (observation-sorted) position.
    pub fn get(&self, logical: usize) -> Option<&IndexEntry> {
        self.logical.get(logical)
    }

    /// Logical position of the first entry with observation number `obs`.
    pub fn position_of(&self, obs: i32) -> Option<usize> {
        let i = self.logical.partition_point(|e| e.observation < obs);
        (self.logical.get(i)?.observation == obs).then_some(i)
    }

    /// Entries in the order they appear in the file.
    pub fn file_order(&self) -> Vec<IndexEntry> {
        let mut out = self.logical.clone();
        out.sort_by_key(|e| e.physical);
        out
    }
}

enum IndexState {
    Unindexed,
    Indexed(SpectrumIndex),
}

struct OpenContainer<R> {
    reader: R,
    file_len: u64,
    codec: Codec,
    preamble: Preamble,
    index: IndexState,
    /// Cap on the number of entries indexed, set by recovery mode.
    limit: Option<usize>,
}

enum ContainerState<R> {
    Open(OpenContainer<R>),
    Closed,
}

/// Handle on a CLASS container.
///
/// Every read goes through `&mut self`; one handle serves one caller at a time.
pub struct SpectrumContainer<R = File> {
    state: ContainerState<R>,
}

impl SpectrumContainer<File> {
    /// Open a container file and decode its preamble.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    /// Open a damaged container, indexing only its first `max_spectra` entries.
    pub fn open_recovering(path: impl AsRef<Path>, max_spectra: usize) -> Result<Self> {
        let mut c = Self::open(path)?;
        c.recover_damaged_file(max_spectra)?;
        Ok(c)
    }
}

impl<R: Read + Seek> SpectrumContainer<R> {
    /// Wrap any seekable byte source holding a container.
    pub fn from_reader(mut reader: R) -> Result<Self> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        let mut buf = vec![0u8; PREAMBLE_SIZE];
        reader
            .read_exact(&mut buf)
            .map_err(|_| Error::Format("container shorter than its preamble"))?;
        let (preamble, codec) = Preamble::parse(&buf)?;
        log::debug!(
            "opened {:?} container: {} entries, {} per extension",
            preamble.encoding,
            preamble.entry_count(),
            preamble.entries_per_extension
        );
        Ok(SpectrumContainer {
            state: ContainerState::Open(OpenContainer {
                reader,
                file_len,
                codec,
                preamble,
                index: IndexState::Unindexed,
                limit: None,
            }),
        })
    }

    fn open_mut(&mut self) -> Result<&mut OpenContainer<R>> {
        match &mut self.state {
            ContainerState::Open(c) => Ok(c),
            ContainerState::Closed => Err(Error::Closed),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ContainerState::Closed)
    }

    /// Release the underlying reader. Later calls fail with [`Error::Closed`].
    pub fn close(&mut self) {
        self.state = ContainerState::Closed;
    }

    pub fn preamble(&self) -> Result<&Preamble> {
        match &self.state {
            ContainerState::Open(c) => Ok(&c.preamble),
            ContainerState::Closed => Err(Error::Closed),
        }
    }

    pub fn encoding(&self) -> Result<Encoding> {
        Ok(self.preamble()?.encoding)
    }

    /// Rebuild the index from the first `max_spectra` entries only.
    ///
    /// Entries past a damaged region are never touched, so an index that
    /// fails with [`Error::CorruptOffset`] can usually be recovered this way.
    pub fn recover_damaged_file(&mut self, max_spectra: usize) -> Result<()> {
        let c = self.open_mut()?;
        log::warn!(
            "recovery mode: indexing at most {max_spectra} of {} entries",
            c.preamble.entry_count()
        );
        c.limit = Some(max_spectra);
        c.index = IndexState::Unindexed;
        c.build_index()?;
        Ok(())
    }

    /// The index, building it on first use.
    pub fn index(&mut self) -> Result<&SpectrumIndex> {
        let c = self.open_mut()?;
        c.build_index()?;
        match &c.index {
            IndexState::Indexed(idx) => Ok(idx),
            IndexState::Unindexed => Err(Error::Format("index unavailable")),
        }
    }

    pub fn is_indexed(&self) -> bool {
        matches!(
            &self.state,
            ContainerState::Open(OpenContainer {
                index: IndexState::Indexed(_),
                ..
            })
        )
    }

    pub fn spectrum_count(&mut self) -> Result<usize> {
        Ok(self.index()?.len())
    }

    /// Observation numbers in file order, optionally only spectral entries.
    pub fn list_spectra(&mut self, only_spectral: bool) -> Result<Vec<i32>> {
        Ok(self
            .index()?
            .file_order()
            .into_iter()
            .filter(|e| !only_spectral || e.kind == DataKind::Spectrum)
            .map(|e| e.observation)
            .collect())
    }

    /// Header of the spectrum at a logical position.
    pub fn entry(&mut self, logical: usize) -> Result<SpectrumHeader> {
        let physical = self.physical(logical)?;
        let c = self.open_mut()?;
        c.read_header(physical)
    }

    /// Fully decode the spectrum at a logical position.
    pub fn get_spectrum(&mut self, logical: usize) -> Result<SpectrumRecord> {
        let physical = self.physical(logical)?;
        let c = self.open_mut()?;
        let header = c.read_header(physical)?;
        c.read_observation(physical, header)
    }

    /// Logical position of observation number `obs`.
    pub fn find_by_observation(&mut self, obs: i32) -> Result<Option<usize>> {
        Ok(self.index()?.position_of(obs))
    }

    /// Fully decode the spectrum with observation number `obs`.
    pub fn get_by_observation(&mut self, obs: i32) -> Result<Option<SpectrumRecord>> {
        match self.find_by_observation(obs)? {
            Some(i) => self.get_spectrum(i).map(Some),
            None => Ok(None),
        }
    }

    fn physical(&mut self, logical: usize) -> Result<usize> {
        let idx = self.index()?;
        idx.get(logical)
            .map(|e| e.physical)
            .ok_or(Error::ChannelRange {
                index: logical,
                len: idx.len(),
            })
    }
}

impl<R: Read + Seek> OpenContainer<R> {
    fn read_at(&mut self, record: usize, offset: u64, buf: &mut [u8]) -> Result<()> {
        if offset + buf.len() as u64 > self.file_len {
            return Err(Error::CorruptOffset {
                record,
                offset,
                file_len: self.file_len,
            });
        }
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader.read_exact(buf)?;
        Ok(())
    }

    fn header_offset(&self, physical: usize) -> Result<u64> {
        entry_offset(
            self.preamble.extensions(),
            self.preamble.entries_per_extension.max(0) as usize,
            physical,
        )
        .ok_or(Error::CorruptOffset {
            record: physical,
            offset: 0,
            file_len: self.file_len,
        })
    }

    fn read_header(&mut self, physical: usize) -> Result<SpectrumHeader> {
        let offset = self.header_offset(physical)?;
        let mut buf = [0u8; ENTRY_SIZE];
        self.read_at(physical, offset, &mut buf)?;
        SpectrumHeader::parse(&self.codec, &buf)
    }

    fn build_index(&mut self) -> Result<()> {
        if matches!(self.index, IndexState::Indexed(_)) {
            return Ok(());
        }
        let total = self.preamble.entry_count();
        let count = self.limit.map_or(total, |l| l.min(total));
        let mut entries = Vec::with_capacity(count.min((self.file_len / ENTRY_SIZE as u64) as usize));
        for physical in 0..count {
            let h = self.read_header(physical)?;
            entries.push(IndexEntry {
                physical,
                observation: h.observation,
                kind: h.kind,
            });
        }
        log::debug!("indexed {count} entries");
        self.index = IndexState::Indexed(SpectrumIndex::from_file_order(entries));
        Ok(())
    }

    fn read_observation(&mut self, physical: usize, header: SpectrumHeader) -> Result<SpectrumRecord> {
        let start = block_offset(header.block as i64).ok_or(Error::CorruptOffset {
            record: physical,
            offset: 0,
            file_len: self.file_len,
        })?;
        let mut first = vec![0u8; BLOCK_SIZE];
        self.read_at(physical, start, &mut first)?;
        if first[0] != b'2' {
            return Err(Error::Format("observation record has a bad identifier"));
        }
        let nbloc = self.codec.read_i32(&first, 4)?;
        if nbloc < 1 {
            return Err(Error::Format("observation record spans no blocks"));
        }
        let span = (nbloc as u64)
            .checked_mul(BLOCK_SIZE as u64)
            .filter(|len| start.checked_add(*len).is_some_and(|end| end <= self.file_len))
            .ok_or(Error::CorruptOffset {
                record: physical,
                offset: start,
                file_len: self.file_len,
            })?;
        let mut buf = vec![0u8; span as usize];
        self.read_at(physical, start, &mut buf)?;
        let desc = ObservationDescriptor::parse(&self.codec, &buf)?;

        let mut params = ParameterTable::new();
        for &(code, len, addr) in &desc.sections {
            let Some(kind) = SectionKind::from_code(code) else {
                log::debug!("observation {}: skipping unknown section {code}", header.observation);
                continue;
            };
            let (lo, hi) = (addr.max(0) as usize, addr.max(0) as usize + len.max(0) as usize);
            let body = buf.get(lo..hi).ok_or(Error::CorruptOffset {
                record: physical,
                offset: start + lo as u64,
                file_len: self.file_len,
            })?;
            parse_section(&self.codec, kind, body, &mut params)?;
        }

        let n = desc.data_len.max(0) as usize;
        let data = self
            .codec
            .read_f32_array(&buf, desc.data_address.max(0) as usize, n)
            .map_err(|_| Error::CorruptOffset {
                record: physical,
                offset: start + desc.data_address.max(0) as u64,
                file_len: self.file_len,
            })?;
        if params.get_i64(keys::NCHAN).is_some_and(|c| c != n as i64) {
            log::warn!(
                "observation {}: NCHAN disagrees with {n} stored channels",
                header.observation
            );
        }
        params.set_i64(keys::NCHAN, n as i64);
        SpectrumRecord::new(header, params, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::SpectralAxis;
    use crate::writer::ContainerWriter;
    use std::io::Cursor;

    fn record(obs: i32, kind: DataKind) -> SpectrumRecord {
        let header = SpectrumHeader {
            observation: obs,
            source: "W3OH".into(),
            line: "HCO+".into(),
            kind,
            ..SpectrumHeader::default()
        };
        let axis = SpectralAxis::new(8.0, -45.0, 0.5, 89188.5).unwrap();
        let data = (0..16).map(|i| (obs * 100 + i) as f32).collect();
        SpectrumRecord::from_axis(header, axis, data)
    }

    fn container(records: &[SpectrumRecord], enc: Encoding) -> SpectrumContainer<Cursor<Vec<u8>>> {
        let bytes = ContainerWriter::to_bytes(records, enc).unwrap();
        SpectrumContainer::from_reader(Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn preamble_roundtrip() {
        let p = Preamble {
            encoding: Encoding::Eeei,
            next_block: 9,
            entries_per_extension: 4,
            extensions_in_use: 1,
            next_entry: 3,
            extension_blocks: vec![3; PRIMARY_INDEX_SLOTS],
        };
        let codec = Codec::for_encoding(Encoding::Eeei);
        let bytes = p.to_bytes(&codec).unwrap();
        assert_eq!(&bytes[..4], b"1C  ");
        let (back, _) = Preamble::parse(&bytes).unwrap();
        assert_eq!(back, p);
        assert_eq!(back.entry_count(), 2);
    }

    #[test]
    fn vax_and_garbage_rejected() {
        let mut bytes = vec![0u8; PREAMBLE_SIZE];
        bytes[..4].copy_from_slice(b"1A  ");
        assert!(matches!(Preamble::parse(&bytes), Err(Error::Format(_))));
        bytes[..4].copy_from_slice(b"XYZW");
        assert!(matches!(Preamble::parse(&bytes), Err(Error::Format(_))));
        assert!(Preamble::parse(&bytes[..100]).is_err());
    }

    #[test]
    fn index_is_lazy() {
        let mut c = container(&[record(1, DataKind::Spectrum)], Encoding::Ieee);
        assert!(!c.is_indexed());
        assert_eq!(c.spectrum_count().unwrap(), 1);
        assert!(c.is_indexed());
    }

    #[test]
    fn list_in_file_order_and_fetch_by_number() {
        for enc in [Encoding::Ieee, Encoding::Eeei] {
            let recs = [
                record(10, DataKind::Spectrum),
                record(7, DataKind::Spectrum),
                record(22, DataKind::Spectrum),
            ];
            let mut c = container(&recs, enc);
            assert_eq!(c.list_spectra(false).unwrap(), vec![10, 7, 22]);
            for r in &recs {
                let got = c.get_by_observation(r.observation_number()).unwrap().unwrap();
                assert_eq!(got.data(), r.data());
                assert_eq!(got.header().source, "W3OH");
            }
            // Logical positions follow observation numbers.
            assert_eq!(c.get_spectrum(0).unwrap().observation_number(), 7);
            assert_eq!(c.find_by_observation(99).unwrap(), None);
        }
    }

    #[test]
    fn spectral_filter_skips_continuum() {
        let recs = [
            record(1, DataKind::Spectrum),
            record(2, DataKind::Continuum),
            record(3, DataKind::Spectrum),
        ];
        let mut c = container(&recs, Encoding::Ieee);
        assert_eq!(c.list_spectra(true).unwrap(), vec![1, 3]);
        assert_eq!(c.list_spectra(false).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn parameters_survive() {
        let mut c = container(&[record(4, DataKind::Spectrum)], Encoding::Eeei);
        let r = c.get_spectrum(0).unwrap();
        assert_eq!(r.params().get_i64(keys::NCHAN), Some(16));
        assert_eq!(r.params().get_f64(keys::REF_FREQ), Some(89188.5));
        let axis = r.axis().unwrap();
        assert_eq!(axis.ref_chan, 8.0);
        assert_eq!(axis.vel_resol, 0.5);
        assert_eq!(axis.ref_vel, -45.0);
    }

    #[test]
    fn out_of_range_logical_index() {
        let mut c = container(&[record(1, DataKind::Spectrum)], Encoding::Ieee);
        assert!(matches!(
            c.get_spectrum(5),
            Err(Error::ChannelRange { index: 5, len: 1 })
        ));
    }

    #[test]
    fn closed_handle_refuses_work() {
        let mut c = container(&[record(1, DataKind::Spectrum)], Encoding::Ieee);
        c.close();
        assert!(c.is_closed());
        assert!(matches!(c.list_spectra(false), Err(Error::Closed)));
        assert!(matches!(c.get_spectrum(0), Err(Error::Closed)));
    }

    #[test]
    fn truncated_file_reports_offset_then_recovers() {
        let recs: Vec<_> = (1..=6).map(|o| record(o, DataKind::Spectrum)).collect();
        let mut bytes = ContainerWriter::to_bytes(&recs, Encoding::Ieee).unwrap();
        // Claim far more entries than the file holds.
        let codec = Codec::for_encoding(Encoding::Ieee);
        codec.write_i32(&mut bytes, 16, 5000).unwrap();
        codec.write_i32(&mut bytes, 8, 8000).unwrap();

        let mut c = SpectrumContainer::from_reader(Cursor::new(bytes)).unwrap();
        assert!(matches!(c.spectrum_count(), Err(Error::CorruptOffset { .. })));

        c.recover_damaged_file(6).unwrap();
        assert_eq!(c.spectrum_count().unwrap(), 6);
        assert_eq!(c.get_by_observation(6).unwrap().unwrap().data()[0], 600.0);
    }

    #[test]
    fn observation_past_eof_is_corrupt_offset() {
        let mut bytes = ContainerWriter::to_bytes(&[record(1, DataKind::Spectrum)], Encoding::Ieee).unwrap();
        let len = bytes.len();
        bytes.truncate(len - BLOCK_SIZE);
        let mut c = SpectrumContainer::from_reader(Cursor::new(bytes)).unwrap();
        assert_eq!(c.spectrum_count().unwrap(), 1);
        assert!(matches!(
            c.get_spectrum(0),
            Err(Error::CorruptOffset { record: 0, .. })
        ));
    }

    #[test]
    fn oversized_block_count_is_corrupt_offset() {
        let mut bytes = ContainerWriter::to_bytes(&[record(1, DataKind::Spectrum)], Encoding::Ieee).unwrap();
        let block = container(&[record(1, DataKind::Spectrum)], Encoding::Ieee)
            .entry(0)
            .unwrap()
            .block;
        let at = block_offset(block as i64).unwrap() as usize + 4;
        bytes[at..at + 4].copy_from_slice(&i32::MAX.to_le_bytes());
        let mut c = SpectrumContainer::from_reader(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            c.get_spectrum(0),
            Err(Error::CorruptOffset { record: 0, .. })
        ));
    }
}
