//! # On-Disk Record Definitions
//!
//! Zerocopy structs for the two fixed-layout records a section-table store
//! persists: the `StoreHeader` (section 0) and one `SectionRecord` per table
//! entry (section 1, the self-describing table).
//!
//! ## StoreHeader (128 bytes)
//!
//! ```text
//! Offset  Size  Description
//! 0       16    Magic: "mfstore v1\0\0\0\0\0\0"
//! 16      4     Format version
//! 20      4     Header size (128)
//! 24      8     Granularity
//! 32      8     Committed file size
//! 40      8     Pending file size
//! 48      8     Section count
//! 56      8     Index of the table section
//! 64      8     Byte offset of the table section
//! 72      8     Flags
//! 80      48    Reserved
//! ```
//!
//! ## SectionRecord (128 bytes)
//!
//! Eight u64 fields in fixed order followed by the description:
//!
//! ```text
//! index, element_size, element_count, offset,
//! length_actual, length_padded, flags, reserved,
//! description[64]   UTF-8, zero padded
//! ```
//!
//! ## Endianness
//!
//! All multi-byte fields are little-endian (`zerocopy::little_endian`), and
//! every struct is `Unaligned` so it can be read straight out of a mapping.

use eyre::Result;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{
    DESCRIPTION_CAPACITY, SECTION_RECORD_SIZE, STORE_HEADER_SIZE, STORE_MAGIC, STORE_VERSION,
};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct StoreHeader {
    magic: [u8; 16],
    version: U32,
    header_size: U32,
    granularity: U64,
    committed_size: U64,
    pending_size: U64,
    section_count: U64,
    table_index: U64,
    table_offset: U64,
    flags: U64,
    reserved: [u8; 48],
}

const _: () = assert!(std::mem::size_of::<StoreHeader>() == STORE_HEADER_SIZE);

impl StoreHeader {
    pub fn new(
        granularity: u64,
        file_size: u64,
        section_count: u64,
        table_index: u64,
        table_offset: u64,
    ) -> Self {
        Self {
            magic: *STORE_MAGIC,
            version: U32::new(STORE_VERSION),
            header_size: U32::new(STORE_HEADER_SIZE as u32),
            granularity: U64::new(granularity),
            committed_size: U64::new(file_size),
            pending_size: U64::new(file_size),
            section_count: U64::new(section_count),
            table_index: U64::new(table_index),
            table_offset: U64::new(table_offset),
            flags: U64::new(0),
            reserved: [0u8; 48],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure_arg!(
            bytes.len() >= STORE_HEADER_SIZE,
            "buffer too small for StoreHeader: {} < {}",
            bytes.len(),
            STORE_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..STORE_HEADER_SIZE])
            .map_err(|e| logic_err!("failed to parse StoreHeader: {:?}", e))?;
        header.validate()?;
        Ok(header)
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        ensure_arg!(
            bytes.len() >= STORE_HEADER_SIZE,
            "buffer too small for StoreHeader: {} < {}",
            bytes.len(),
            STORE_HEADER_SIZE
        );

        let header = Self::mut_from_bytes(&mut bytes[..STORE_HEADER_SIZE])
            .map_err(|e| logic_err!("failed to parse StoreHeader: {:?}", e))?;
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if &self.magic != STORE_MAGIC {
            return Err(logic_err!("invalid magic bytes in store header"));
        }
        if self.version.get() != STORE_VERSION {
            return Err(logic_err!(
                "unsupported store version: {} (expected {})",
                self.version.get(),
                STORE_VERSION
            ));
        }
        if self.header_size.get() as usize != STORE_HEADER_SIZE {
            return Err(logic_err!(
                "unexpected store header size {} (expected {})",
                self.header_size.get(),
                STORE_HEADER_SIZE
            ));
        }
        if self.pending_size.get() < self.committed_size.get() {
            return Err(logic_err!(
                "pending size {} is below committed size {}",
                self.pending_size.get(),
                self.committed_size.get()
            ));
        }
        Ok(())
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    zerocopy_accessors! {
        granularity: u64,
        committed_size: u64,
        pending_size: u64,
        section_count: u64,
        table_index: u64,
        table_offset: u64,
        flags: u64,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SectionRecord {
    index: U64,
    element_size: U64,
    element_count: U64,
    offset: U64,
    length_actual: U64,
    length_padded: U64,
    flags: U64,
    reserved: U64,
    description: [u8; DESCRIPTION_CAPACITY],
}

const _: () = assert!(std::mem::size_of::<SectionRecord>() == SECTION_RECORD_SIZE);

impl SectionRecord {
    pub fn new_zeroed() -> Self {
        <Self as FromZeros>::new_zeroed()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure_arg!(
            bytes.len() >= SECTION_RECORD_SIZE,
            "buffer too small for SectionRecord: {} < {}",
            bytes.len(),
            SECTION_RECORD_SIZE
        );

        Self::ref_from_bytes(&bytes[..SECTION_RECORD_SIZE])
            .map_err(|e| logic_err!("failed to parse SectionRecord: {:?}", e))
    }

    /// Stores `text` zero padded. Longer text is rejected, never truncated.
    pub fn set_description(&mut self, text: &str) -> Result<()> {
        ensure_arg!(
            text.len() <= DESCRIPTION_CAPACITY,
            "section description '{}' is {} bytes, capacity is {}",
            text,
            text.len(),
            DESCRIPTION_CAPACITY
        );
        ensure_arg!(
            !text.contains('\0'),
            "section description {:?} contains a NUL byte",
            text
        );
        self.description = [0u8; DESCRIPTION_CAPACITY];
        self.description[..text.len()].copy_from_slice(text.as_bytes());
        Ok(())
    }

    pub fn description(&self) -> Result<&str> {
        let len = self
            .description
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(DESCRIPTION_CAPACITY);
        std::str::from_utf8(&self.description[..len])
            .map_err(|e| logic_err!("section {} description is not UTF-8: {}", self.index.get(), e))
    }

    zerocopy_accessors! {
        index: u64,
        element_size: u64,
        element_count: u64,
        offset: u64,
        length_actual: u64,
        length_padded: u64,
        flags: u64,
        reserved: u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kind_of, ErrorKind};

    #[test]
    fn store_header_size_is_128() {
        assert_eq!(std::mem::size_of::<StoreHeader>(), 128);
    }

    #[test]
    fn section_record_size_is_128() {
        assert_eq!(std::mem::size_of::<SectionRecord>(), 128);
    }

    #[test]
    fn store_header_fields_land_at_documented_offsets() {
        let mut header = StoreHeader::new(65536, 196608, 3, 1, 65536);
        header.set_pending_size(262144);

        let bytes = header.as_bytes();

        assert_eq!(&bytes[..16], STORE_MAGIC);
        assert_eq!(u64::from_le_bytes(bytes[24..32].try_into().unwrap()), 65536);
        assert_eq!(u64::from_le_bytes(bytes[32..40].try_into().unwrap()), 196608);
        assert_eq!(u64::from_le_bytes(bytes[40..48].try_into().unwrap()), 262144);
        assert_eq!(u64::from_le_bytes(bytes[64..72].try_into().unwrap()), 65536);
    }

    #[test]
    fn store_header_parses_in_place() {
        let mut bytes = [0u8; 128];
        bytes.copy_from_slice(StoreHeader::new(65536, 131072, 2, 1, 65536).as_bytes());

        let header = StoreHeader::from_bytes_mut(&mut bytes).unwrap();
        header.set_pending_size(196608);

        let header = StoreHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.granularity(), 65536);
        assert_eq!(header.committed_size(), 131072);
        assert_eq!(header.pending_size(), 196608);
        assert_eq!(header.section_count(), 2);
        assert_eq!(header.version(), STORE_VERSION);
    }

    #[test]
    fn store_header_rejects_invalid_magic() {
        let mut bytes = [0u8; 128];
        bytes[..16].copy_from_slice(b"Invalid Magic!!!");

        let err = StoreHeader::from_bytes(&bytes).unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::Logic));
    }

    #[test]
    fn store_header_rejects_pending_below_committed() {
        let mut header = StoreHeader::new(65536, 131072, 2, 1, 65536);
        header.set_pending_size(65536);

        let err = StoreHeader::from_bytes(header.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("below committed"));
    }

    #[test]
    fn store_header_rejects_short_buffer() {
        let err = StoreHeader::from_bytes(&[0u8; 64]).unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::InvalidArgument));
    }

    #[test]
    fn section_record_field_order() {
        let mut record = SectionRecord::new_zeroed();
        record.set_index(1);
        record.set_element_size(2);
        record.set_element_count(3);
        record.set_offset(4);
        record.set_length_actual(5);
        record.set_length_padded(6);
        record.set_flags(7);
        record.set_reserved(8);
        record.set_description("names").unwrap();

        let bytes = record.as_bytes();
        for (i, expected) in (1u64..=8).enumerate() {
            let field = u64::from_le_bytes(bytes[i * 8..i * 8 + 8].try_into().unwrap());
            assert_eq!(field, expected);
        }
        assert_eq!(&bytes[64..69], b"names");
        assert!(bytes[69..].iter().all(|&b| b == 0));
    }

    #[test]
    fn section_record_description_capacity() {
        let mut record = SectionRecord::new_zeroed();

        record.set_description(&"x".repeat(DESCRIPTION_CAPACITY)).unwrap();
        assert_eq!(record.description().unwrap().len(), DESCRIPTION_CAPACITY);

        let err = record
            .set_description(&"x".repeat(DESCRIPTION_CAPACITY + 1))
            .unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::InvalidArgument));
        assert_eq!(record.description().unwrap().len(), DESCRIPTION_CAPACITY);
    }
}
