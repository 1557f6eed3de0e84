//! # Storage Configuration Constants
//!
//! Interdependent constants are co-located and their relationships enforced
//! through compile-time assertions.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_GRANULARITY (64 KiB)
//!       │   Multiple of every supported OS allocation granularity
//!       │   (4 KiB / 16 KiB pages, 64 KiB Windows allocation granularity).
//!       │
//!       ├─> DEFAULT_CHUNK_SIZE (1 MiB, must be a multiple)
//!       │     Minimum size of a MappedFile growth step.
//!       │
//!       └─> STORE_HEADER_SIZE, SECTION_RECORD_SIZE (128 bytes each)
//!             The header and table sections are padded up to it.
//!
//! SECTION_RECORD_SIZE (128 bytes)
//!       │
//!       └─> SECTION_FIELD_BYTES (8 x u64) + DESCRIPTION_CAPACITY (64)
//! ```

// ============================================================================
// GRANULARITY AND GROWTH
// ============================================================================

/// Default storage granularity. Offsets, lengths and mapping boundaries are
/// all multiples of it.
pub const DEFAULT_GRANULARITY: u64 = 64 * 1024;

/// Default minimum growth step of a `MappedFile`.
pub const DEFAULT_CHUNK_SIZE: u64 = 16 * DEFAULT_GRANULARITY;

/// Default capacity of the write buffer used by the plain-file log sink.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Allocation granularity assumed on Windows, where mappings must start on a
/// 64 KiB boundary regardless of the page size.
pub const WINDOWS_ALLOCATION_GRANULARITY: u64 = 64 * 1024;

const _: () = assert!(
    DEFAULT_CHUNK_SIZE % DEFAULT_GRANULARITY == 0,
    "DEFAULT_CHUNK_SIZE must be a multiple of DEFAULT_GRANULARITY"
);

const _: () = assert!(
    DEFAULT_GRANULARITY % WINDOWS_ALLOCATION_GRANULARITY == 0,
    "DEFAULT_GRANULARITY must be usable on every supported platform"
);

// ============================================================================
// SECTION TABLE LAYOUT
// ============================================================================

/// Upper bound (inclusive) for `element_size` and `element_count`.
pub const MAX_ELEMENT_VALUE: u64 = 1 << 40;

/// Bytes available for a section description (UTF-8, zero padded).
pub const DESCRIPTION_CAPACITY: usize = 64;

/// Bytes taken by the eight u64 fields of a section record.
pub const SECTION_FIELD_BYTES: usize = 8 * 8;

/// Serialized size of one section table entry.
pub const SECTION_RECORD_SIZE: usize = SECTION_FIELD_BYTES + DESCRIPTION_CAPACITY;

const _: () = assert!(SECTION_RECORD_SIZE == 128);

// ============================================================================
// RECORD STORE HEADER
// ============================================================================

pub const STORE_HEADER_SIZE: usize = 128;

pub const STORE_MAGIC: &[u8; 16] = b"mfstore v1\x00\x00\x00\x00\x00\x00";

pub const STORE_VERSION: u32 = 1;

/// Index of the section holding the `StoreHeader`.
pub const HEADER_SECTION: usize = 0;

/// Index of the section holding the serialized section table.
pub const TABLE_SECTION: usize = 1;

/// First index available to callers.
pub const FIRST_USER_SECTION: usize = 2;

const _: () = assert!(STORE_HEADER_SIZE as u64 <= DEFAULT_GRANULARITY);
