//! Serialization of spectra into a fresh CLASS container.
//!
//! The writer always produces a single index extension starting at block 3,
//! directly after the two-block preamble. Unused primary index slots carry
//! the padding value so that readers expecting 251 populated slots accept
//! the file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::block::{
    blocks_needed, BLOCK_SIZE, ENTRIES_PER_BLOCK, ENTRY_SIZE, INDEX_PADDING_VALUE, PREAMBLE_SIZE,
    PRIMARY_INDEX_SLOTS,
};
use crate::codec::{ByteCodec, Codec, Encoding};
use crate::container::Preamble;
use crate::error::{Error, Result};
use crate::section::{sections_for, write_section, ObservationDescriptor};
use crate::spectrum::SpectrumRecord;

/// First block (1-based) of the index area.
const FIRST_INDEX_BLOCK: i32 = (PREAMBLE_SIZE / BLOCK_SIZE) as i32 + 1;

/// Stateless container writer.
pub struct ContainerWriter;

impl ContainerWriter {
    /// Write `records` to `path`, replacing any existing file.
    pub fn write(path: impl AsRef<Path>, records: &[SpectrumRecord], encoding: Encoding) -> Result<()> {
        let bytes = Self::to_bytes(records, encoding)?;
        let mut out = BufWriter::new(File::create(path.as_ref())?);
        out.write_all(&bytes)?;
        out.flush()?;
        log::info!(
            "wrote {} spectra ({} bytes) to {}",
            records.len(),
            bytes.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Encode `records` into the bytes of a complete container.
    pub fn to_bytes(records: &[SpectrumRecord], encoding: Encoding) -> Result<Vec<u8>> {
        let codec = Codec::for_encoding(encoding);
        let count = records.len();
        let entries_per_ext = (count.div_ceil(ENTRIES_PER_BLOCK) * ENTRIES_PER_BLOCK).max(ENTRIES_PER_BLOCK);
        let index_blocks = entries_per_ext / ENTRIES_PER_BLOCK;

        let mut observations = Vec::with_capacity(count);
        let mut next_block = FIRST_INDEX_BLOCK + index_blocks as i32;
        for rec in records {
            let body = encode_observation(&codec, rec)?;
            let blocks = (body.len() / BLOCK_SIZE) as i32;
            observations.push((next_block, body));
            next_block += blocks;
        }

        let preamble = Preamble {
            encoding,
            next_block,
            entries_per_extension: entries_per_ext as i32,
            extensions_in_use: 1,
            next_entry: count as i32 + 1,
            extension_blocks: vec![INDEX_PADDING_VALUE; PRIMARY_INDEX_SLOTS],
        };
        let mut out = preamble.to_bytes(&codec)?;
        out.resize(PREAMBLE_SIZE.div_ceil(BLOCK_SIZE) * BLOCK_SIZE, 0);

        let mut index = vec![0u8; index_blocks * BLOCK_SIZE];
        for (i, (rec, (block, _))) in records.iter().zip(&observations).enumerate() {
            let mut header = rec.header().clone();
            header.block = *block;
            let entry = header.to_bytes(&codec)?;
            index[i * ENTRY_SIZE..(i + 1) * ENTRY_SIZE].copy_from_slice(&entry);
        }
        out.extend_from_slice(&index);
        for (_, body) in observations {
            out.extend_from_slice(&body);
        }
        Ok(out)
    }
}

/// Encode one observation record, padded to whole blocks.
fn encode_observation(codec: &Codec, rec: &SpectrumRecord) -> Result<Vec<u8>> {
    let params = rec.params();
    let kinds = sections_for(rec.kind(), params);
    let bodies = kinds
        .iter()
        .map(|&k| write_section(codec, k, params))
        .collect::<Result<Vec<_>>>()?;

    let mut addr = ObservationDescriptor::encoded_len(kinds.len());
    let mut sections = Vec::with_capacity(kinds.len());
    for (k, body) in kinds.iter().zip(&bodies) {
        sections.push((k.code(), body.len() as i32, addr as i32));
        addr += body.len();
    }
    let data_address = addr;
    let used = data_address + rec.nchan() * 4;
    let blocks = blocks_needed(used).max(1);
    if blocks > i32::MAX as usize {
        return Err(Error::InvalidValue("observation record too large"));
    }

    let desc = ObservationDescriptor {
        blocks: blocks as i32,
        used_bytes: used as i32,
        data_address: data_address as i32,
        data_len: rec.nchan() as i32,
        observation: rec.observation_number(),
        sections,
    };
    let mut buf = vec![0u8; blocks * BLOCK_SIZE];
    desc.write(codec, codec.encoding().container_code(), &mut buf)?;
    for ((_, _, a), body) in desc.sections.iter().zip(&bodies) {
        let a = *a as usize;
        buf[a..a + body.len()].copy_from_slice(body);
    }
    codec.write_f32_array(&mut buf, data_address, rec.data())?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::SpectrumHeader;
    use crate::spectrum::SpectralAxis;

    fn spectra(n: usize) -> Vec<SpectrumRecord> {
        (0..n)
            .map(|i| {
                let h = SpectrumHeader {
                    observation: i as i32 + 1,
                    ..SpectrumHeader::default()
                };
                let axis = SpectralAxis::new(1.0, 0.0, 1.0, 100000.0).unwrap();
                SpectrumRecord::from_axis(h, axis, vec![1.0; 10])
            })
            .collect()
    }

    #[test]
    fn layout_is_block_aligned() {
        let bytes = ContainerWriter::to_bytes(&spectra(3), Encoding::Ieee).unwrap();
        assert_eq!(bytes.len() % BLOCK_SIZE, 0);
        assert_eq!(&bytes[..4], b"1B  ");
    }

    #[test]
    fn primary_index_padded_with_sentinel() {
        let codec = Codec::for_encoding(Encoding::Eeei);
        let bytes = ContainerWriter::to_bytes(&spectra(2), Encoding::Eeei).unwrap();
        for slot in 0..PRIMARY_INDEX_SLOTS {
            assert_eq!(codec.read_i32(&bytes, 20 + 4 * slot).unwrap(), INDEX_PADDING_VALUE);
        }
        assert_eq!(codec.read_i32(&bytes, 8).unwrap(), 4);
        assert_eq!(codec.read_i32(&bytes, 12).unwrap(), 1);
        assert_eq!(codec.read_i32(&bytes, 16).unwrap(), 3);
    }

    #[test]
    fn entries_point_at_their_records() {
        let codec = Codec::for_encoding(Encoding::Ieee);
        let bytes = ContainerWriter::to_bytes(&spectra(5), Encoding::Ieee).unwrap();
        // Five entries need two index blocks (3 and 4), so data starts at block 5.
        let first = SpectrumHeader::parse(&codec, &bytes[1024..1152]).unwrap();
        assert_eq!(first.block, 5);
        assert_eq!(bytes[4 * BLOCK_SIZE], b'2');
        let next_block = codec.read_i32(&bytes, 4).unwrap();
        assert_eq!((next_block as usize - 1) * BLOCK_SIZE, bytes.len());
    }

    #[test]
    fn empty_container_still_valid() {
        let bytes = ContainerWriter::to_bytes(&[], Encoding::Ieee).unwrap();
        assert_eq!(bytes.len(), 3 * BLOCK_SIZE);
    }
}
