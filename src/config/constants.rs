//! # Keyfile Layout Constants
//!
//! This module centralizes every constant that shapes the on-disk format and
//! the in-memory control block. Several of them are interdependent: the
//! file-info block must fit in block 0, the keyspace is whatever the block
//! header leaves over, and the minimum control block size is derived from the
//! minimum buffer count. Those relationships are checked at compile time.
//!
//! ## Dependency Graph
//!
//! ```text
//! BLOCK_LC (4096 bytes)
//!       │
//!       ├─> BLOCK_SHIFT (derived: log2(BLOCK_LC))
//!       │     File offset of a block is `block << BLOCK_SHIFT`.
//!       │
//!       ├─> BLOCK_HEADER_LC (28 bytes, fixed)
//!       │
//!       ├─> KEYSPACE_LC (derived: BLOCK_LC - BLOCK_HEADER_LC)
//!       │     Holds the offset array, the shared prefix and the entries.
//!       │
//!       └─> BUFFER_LC (BLOCK_LC + per-buffer bookkeeping)
//!             │
//!             ├─> HASH_ENTRIES_PER_BUF (buffers carved out as hash table)
//!             │
//!             └─> MIN_FCB_LC (FCB_FIXED_LC + MIN_BUFFER_CNT * BUFFER_LC)
//!
//! MAX_LEVEL x MAX_INDEX, MAX_SEGMENT
//!       │
//!       └─> FIB_LC (file-info block, must fit in block 0 of segment 0)
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `BLOCK_LC == 1 << BLOCK_SHIFT`
//! 2. `FIB_LC <= BLOCK_LC`
//! 3. Three maximal entries fit in one keyspace, so a split always produces
//!    two blocks that each hold at least one entry.
//! 4. `MAX_SEGMENT` fits in the 16-bit segment field and doubles as the
//!    "record embedded in the index block" sentinel.

// ============================================================================
// BLOCK LAYOUT
// The index block is the unit of I/O and caching
// ============================================================================

/// Size of one index block on disk.
pub const BLOCK_LC: usize = 4096;

/// Shift turning a block number into a byte offset within its segment.
pub const BLOCK_SHIFT: u32 = block_shift(BLOCK_LC);

/// keys_in_block(2) chars_in_use(2) index_type(1) prefix_lc(1) unused(1)
/// level(1) next(2+8) prev(2+8).
pub const BLOCK_HEADER_LC: usize = 28;

/// Bytes available for offsets, the shared prefix and entries.
pub const KEYSPACE_LC: usize = BLOCK_LC - BLOCK_HEADER_LC;

/// Width of one entry in the packed offset array.
pub const KEY_PTR_LC: usize = 2;

/// The shared prefix length is stored in a single byte.
pub const MAX_PREFIX_LC: usize = u8::MAX as usize;

const fn block_shift(lc: usize) -> u32 {
    let mut shift = 0;
    while (1usize << shift) < lc {
        shift += 1;
    }
    shift
}

const _: () = assert!(
    BLOCK_LC == 1 << BLOCK_SHIFT,
    "BLOCK_LC must be a power of two"
);

const _: () = assert!(
    KEYSPACE_LC <= u16::MAX as usize,
    "entry offsets are stored as u16"
);

// ============================================================================
// KEYS AND INDEXES
// ============================================================================

/// Keys are 1..MAXKEY_LC bytes long (the bound itself is excluded).
pub const MAXKEY_LC: usize = 512;

/// Number of logical indexes sharing one keyed file: user keys, free
/// records by location and free records by length.
pub const MAX_INDEX: usize = 3;

/// Maximum depth of any index tree.
pub const MAX_LEVEL: usize = 32;

/// Longest compressed u64 (ten 7-bit groups).
pub const MAX_COMPRESSED_U64_LC: usize = 10;

/// Longest compressed u32 (five 7-bit groups).
pub const MAX_COMPRESSED_U32_LC: usize = 5;

/// Longest compressed u16 (three 7-bit groups).
pub const MAX_COMPRESSED_U16_LC: usize = 3;

/// Largest value `encode_key_lc` can represent (14 bits).
pub const MAX_KEY_LC_VALUE: usize = (1 << 14) - 1;

/// Compressed length plus locator plus optional segment.
pub const MAX_LEVEL0_PNTR_LC: usize =
    MAX_COMPRESSED_U32_LC + MAX_COMPRESSED_U64_LC + MAX_COMPRESSED_U16_LC;

/// Locator plus optional segment.
pub const MAX_LEVELN_PNTR_LC: usize = MAX_COMPRESSED_U64_LC + MAX_COMPRESSED_U16_LC;

const _: () = assert!(MAXKEY_LC <= MAX_KEY_LC_VALUE, "key length must fit encode_key_lc");

// ============================================================================
// RECORD PLACEMENT
// ============================================================================

/// Records up to this many bytes are embedded in the leaf by default.
pub const DEFAULT_DATA_IN_INDEX_LC: u32 = 16;

/// Upper bound for the configurable inline threshold.
pub const MAX_DATA_IN_INDEX_LC: u32 = 512;

/// Out-of-line records start on multiples of this many bytes.
pub const REC_ALLOCATION_UNIT: u64 = 8;

/// Worst-case size of one packed entry including its offset slot.
pub const MAX_ENTRY_LC: usize = KEY_PTR_LC
    + 2
    + MAXKEY_LC
    + MAX_LEVEL0_PNTR_LC
    + MAX_DATA_IN_INDEX_LC as usize;

const _: () = assert!(
    3 * MAX_ENTRY_LC <= KEYSPACE_LC,
    "a block must hold at least three maximal entries for splits to succeed"
);

const _: () = assert!(
    REC_ALLOCATION_UNIT.is_power_of_two(),
    "record offsets are stored scaled by REC_ALLOCATION_UNIT"
);

// ============================================================================
// SEGMENTS
// A keyed file spans up to MAX_SEGMENT physical files
// ============================================================================

/// Segment count limit. Also the segment value of an embedded record.
pub const MAX_SEGMENT: usize = 127;

/// Open segment handles kept by one control block.
pub const MAX_FILES: usize = 8;

/// Default maximum length of one segment file (1 GiB).
pub const DEFAULT_MAX_SEGMENT_LC: u64 = 1 << 30;

/// Smallest accepted maximum segment length.
pub const MIN_SEGMENT_LC: u64 = 16 * BLOCK_LC as u64;

/// Largest segment length; free extent lengths are keyed as `u32`.
pub const MAX_SEGMENT_LC: u64 = (u32::MAX as u64) & !(BLOCK_LC as u64 - 1);

/// Separator between the stem and the segment number in segment names.
pub const SEGMENT_NAME_SEPARATOR: char = '$';

const _: () = assert!(MAX_SEGMENT < u16::MAX as usize, "segments are stored as u16");

// ============================================================================
// FILE-INFO BLOCK
// Fixed layout persisted at offset 0 of segment 0
// ============================================================================

/// On-disk format version. Stored in the second word of the file.
pub const CURRENT_VERSION: u32 = 7;

/// Sub-version written by this implementation.
pub const CURRENT_SUB_VERSION: u32 = 0;

/// Marker identifying a keyed file ("keyf").
pub const KEYF_MARKER: u32 = 0x6b65_7966;

/// On-disk size of one (segment u16, block u64) pointer.
pub const LEVELN_PNTR_DISK_LC: usize = 2 + 8;

/// Exact byte length of the serialized file-info block.
pub const FIB_LC: usize = 4 * 4
    + 4 * MAX_INDEX
    + 4
    + 4
    + 3 * MAX_LEVEL * MAX_INDEX * LEVELN_PNTR_DISK_LC
    + 8
    + 8 * MAX_SEGMENT
    + 4;

const _: () = assert!(FIB_LC <= BLOCK_LC, "file-info block must fit in block 0");

// ============================================================================
// BUFFER POOL AND CONTROL BLOCK SIZING
// These are tightly coupled: see init sizing in storage::cache
// ============================================================================

/// Bookkeeping charged per buffer on top of the block itself.
pub const BUFFER_HEADER_LC: usize = 32;

/// Memory charged for one buffer.
pub const BUFFER_LC: usize = BLOCK_LC + BUFFER_HEADER_LC;

/// Memory charged for the control block outside the buffer pool.
pub const FCB_FIXED_LC: usize = 16 * 1024;

/// Buffers every control block gets regardless of cache size.
pub const MIN_BUFFER_CNT: usize = 8;

/// Smallest cache size accepted by open and create.
pub const MIN_FCB_LC: usize = FCB_FIXED_LC + MIN_BUFFER_CNT * BUFFER_LC;

/// Cache size used when the builder is not given one.
pub const DEFAULT_CACHE_SIZE: usize = 1 << 20;

/// Hash entries per buffer allocated to the buffer hash table.
pub const BUF_HASH_LOAD_FACTOR: usize = 3;

/// Hash slots that fit in the memory of one buffer.
pub const HASH_ENTRIES_PER_BUF: usize = BUFFER_LC / std::mem::size_of::<u32>();

/// Maximum distance scanned on each side of a victim for dirty neighbours.
pub const BUDDY_WINDOW: u64 = 32;

const _: () = assert!(DEFAULT_CACHE_SIZE >= MIN_FCB_LC);

const _: () = assert!(
    MIN_BUFFER_CNT * BUF_HASH_LOAD_FACTOR <= HASH_ENTRIES_PER_BUF,
    "the minimum pool must only give up one buffer to the hash table"
);

// ============================================================================
// DIAGNOSTICS
// ============================================================================

/// File name of the diagnostic error log, created next to the keyed file.
pub const ERROR_LOG_NAME: &str = "kf_error_log";
