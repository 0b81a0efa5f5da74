/// Size of one record block in bytes; both container and cube files are
/// organized in units of 512 bytes.
pub const BLOCK_SIZE: usize = 512;

/// Size of one per-spectrum index entry in bytes.
pub const ENTRY_SIZE: usize = 128;

/// Number of index entries that fit in a single block.
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / ENTRY_SIZE;

/// Number of extension pointers held by the primary index. Fixed by the format.
pub const PRIMARY_INDEX_SLOTS: usize = 251;

/// Value written into every primary index slot that does not point at a real
/// extension.
pub const INDEX_PADDING_VALUE: i32 = 3;

/// Length of the container preamble: five 4-byte words plus the primary index.
pub const PREAMBLE_SIZE: usize = 20 + PRIMARY_INDEX_SLOTS * 4;

/// Length of the cube header, magic included. Plane data starts right after it.
pub const CUBE_HEADER_SIZE: usize = BLOCK_SIZE;

/// Returns the number of blocks required to hold `num_bytes` bytes.
///
/// Ceiling division: 0 bytes requires 0 blocks, 1 byte requires 1 block,
/// 512 bytes requires 1 block, 513 bytes requires 2 blocks.
pub const fn blocks_needed(num_bytes: usize) -> usize {
    if num_bytes == 0 {
        return 0;
    }
    num_bytes.div_ceil(BLOCK_SIZE)
}

/// Returns the total byte length (in whole blocks) required to hold `num_bytes`.
pub const fn padded_byte_len(num_bytes: usize) -> usize {
    blocks_needed(num_bytes) * BLOCK_SIZE
}

/// Byte offset of a 1-based block number.
///
/// Block numbers below 1 are invalid and map to `None`.
pub fn block_offset(block: i64) -> Option<u64> {
    if block < 1 {
        return None;
    }
    Some((block as u64 - 1) * BLOCK_SIZE as u64)
}

/// Locate the 0-based block holding index entry `entry` (0-based).
///
/// `extensions` are the 1-based first blocks of each index extension and
/// `entries_per_extension` is the container's `ilex`. Returns `None` when the
/// entry falls in an extension that is not listed.
pub fn entry_block(extensions: &[i32], entries_per_extension: usize, entry: usize) -> Option<i64> {
    if entries_per_extension == 0 {
        return None;
    }
    let ext = *extensions.get(entry / entries_per_extension)?;
    let within = (entry % entries_per_extension) / ENTRIES_PER_BLOCK;
    Some(ext as i64 + within as i64 - 1)
}

/// Byte position of index entry `entry`, or `None` if its extension is unknown
/// or the computed block is negative.
pub fn entry_offset(extensions: &[i32], entries_per_extension: usize, entry: usize) -> Option<u64> {
    let block = entry_block(extensions, entries_per_extension, entry)?;
    if block < 0 {
        return None;
    }
    Some(block as u64 * BLOCK_SIZE as u64 + ((entry % ENTRIES_PER_BLOCK) * ENTRY_SIZE) as u64)
}
