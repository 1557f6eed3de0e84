//! # Sections
//!
//! A [`Section`] describes one named, fixed-stride region of a store file. A
//! [`SectionTable`] is the ordered, gap-free list of them:
//!
//! ```text
//! offset 0                     offset[1]                   offset[2]
//! ├── section 0 ──────┬ pad ───┼── section 1 ───────┬ pad ──┼── ...
//! │ length_actual     │        │ length_actual      │       │
//! └───────── length_padded ────┴───────── length_padded ────┘
//! ```
//!
//! - `length_actual = element_size * element_count`
//! - `length_padded = round_up(length_actual, granularity)`
//! - `offset[0] = 0`, `offset[i] = offset[i-1] + length_padded[i-1]`
//!
//! Callers only choose `description`, `element_size`, `element_count`,
//! `flags` and `reserved`. The derived fields (`index`, `offset`,
//! `length_actual`, `length_padded`) are computed by the table and are never
//! settable from outside this module, so a layout cannot drift by hand edits.

mod table;

pub use table::{SectionTable, TableState};

use eyre::Result;

use crate::config::DESCRIPTION_CAPACITY;
use crate::storage::SectionRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    index: u64,
    element_size: u64,
    element_count: u64,
    offset: u64,
    length_actual: u64,
    length_padded: u64,
    flags: u64,
    reserved: u64,
    description: String,
}

impl Section {
    /// Creates an unplaced section. Element bounds are checked when the
    /// section is appended to a table; the description is checked here.
    pub fn new(description: &str, element_size: u64, element_count: u64) -> Result<Self> {
        check_description(description)?;
        Ok(Self {
            index: 0,
            element_size,
            element_count,
            offset: 0,
            length_actual: 0,
            length_padded: 0,
            flags: 0,
            reserved: 0,
            description: description.to_string(),
        })
    }

    pub fn with_flags(mut self, flags: u64) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_reserved(mut self, reserved: u64) -> Self {
        self.reserved = reserved;
        self
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    pub fn element_count(&self) -> u64 {
        self.element_count
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length_actual(&self) -> u64 {
        self.length_actual
    }

    pub fn length_padded(&self) -> u64 {
        self.length_padded
    }

    pub fn flags(&self) -> u64 {
        self.flags
    }

    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// First byte past this section's padded region.
    pub fn end(&self) -> u64 {
        self.offset + self.length_padded
    }

    /// Unplaced copy with a different element count, for rebuilding a table.
    pub(crate) fn with_element_count(&self, element_count: u64) -> Self {
        Self {
            index: 0,
            element_count,
            offset: 0,
            length_actual: 0,
            length_padded: 0,
            ..self.clone()
        }
    }

    pub fn to_record(&self) -> Result<SectionRecord> {
        let mut record = SectionRecord::new_zeroed();
        record.set_index(self.index);
        record.set_element_size(self.element_size);
        record.set_element_count(self.element_count);
        record.set_offset(self.offset);
        record.set_length_actual(self.length_actual);
        record.set_length_padded(self.length_padded);
        record.set_flags(self.flags);
        record.set_reserved(self.reserved);
        record.set_description(&self.description)?;
        Ok(record)
    }

    /// Copies every field verbatim; the result is only trustworthy once the
    /// owning table passed `check_all`.
    pub fn from_record(record: &SectionRecord) -> Result<Self> {
        Ok(Self {
            index: record.index(),
            element_size: record.element_size(),
            element_count: record.element_count(),
            offset: record.offset(),
            length_actual: record.length_actual(),
            length_padded: record.length_padded(),
            flags: record.flags(),
            reserved: record.reserved(),
            description: record.description()?.to_string(),
        })
    }
}

fn check_description(description: &str) -> Result<()> {
    ensure_arg!(
        description.len() <= DESCRIPTION_CAPACITY,
        "section description '{}' is {} bytes, capacity is {}",
        description,
        description.len(),
        DESCRIPTION_CAPACITY
    );
    ensure_arg!(
        !description.contains('\0'),
        "section description {:?} contains a NUL byte",
        description
    );
    Ok(())
}
