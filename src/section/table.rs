//! # Section Table
//!
//! The table is either being *built* (append-only, derived fields computed on
//! every append) or *frozen* (decoded from an existing file and only checked).
//! Sections are never edited positionally: growth rebuilds a fresh table from
//! an append sequence, and a frozen layout is validated by re-deriving every
//! offset from scratch.
//!
//! ## Self-Describing Tables
//!
//! A store keeps its own serialized table in one of the sections it lays out.
//! `check_self_describing` verifies that this section is exactly one
//! `SectionRecord` per table entry, which lets a reader find and size the
//! table from the table itself.

use eyre::Result;
use zerocopy::IntoBytes;

use super::Section;
use crate::config::{MAX_ELEMENT_VALUE, SECTION_RECORD_SIZE};
use crate::granularity::{check_extent, check_granularity, round_up, OnViolation};
use crate::storage::SectionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Building,
    Frozen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionTable {
    sections: Vec<Section>,
    state: TableState,
}

impl Default for SectionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Derived fields of one section, recomputed from scratch.
struct Placement {
    length_actual: u64,
    length_padded: u64,
    offset: u64,
}

fn place(section: &Section, previous_end: u64, granularity: u64) -> Result<Placement> {
    let length_actual = section
        .element_size
        .checked_mul(section.element_count)
        .ok_or_else(|| {
            invalid_arg!(
                "section '{}' length {} x {} overflows",
                section.description,
                section.element_size,
                section.element_count
            )
        })?;
    Ok(Placement {
        length_actual,
        length_padded: round_up(length_actual, granularity)?,
        offset: previous_end,
    })
}

/// First of `element_size` / `element_count` outside
/// `[lower, MAX_ELEMENT_VALUE]`, with the lower bound that applied.
fn element_out_of_bounds(section: &Section, allow_empty: bool) -> Option<(&'static str, u64, u64)> {
    let lower = if allow_empty { 0 } else { 1 };
    [
        ("element_size", section.element_size),
        ("element_count", section.element_count),
    ]
    .into_iter()
    .find(|(_, value)| !(lower..=MAX_ELEMENT_VALUE).contains(value))
    .map(|(name, value)| (name, value, lower))
}

fn end_of(placement: &Placement) -> Result<u64> {
    placement
        .offset
        .checked_add(placement.length_padded)
        .ok_or_else(|| invalid_arg!("section table end overflows u64"))
}

impl SectionTable {
    pub fn new() -> Self {
        Self {
            sections: Vec::new(),
            state: TableState::Building,
        }
    }

    /// Appends every section, then runs `fixup_all` and `check_all`.
    pub fn build<I>(sections: I, granularity: u64) -> Result<Self>
    where
        I: IntoIterator<Item = Section>,
    {
        let mut table = Self::new();
        for section in sections {
            table.append_section(section, granularity, false)?;
        }
        table.fixup_all(granularity)?;
        table.check_all(granularity, 0)?;
        Ok(table)
    }

    /// Validates `section` and appends it at the end, computing its index,
    /// offset and padded length. On failure the table is unchanged.
    pub fn append_section(
        &mut self,
        mut section: Section,
        granularity: u64,
        allow_empty: bool,
    ) -> Result<usize> {
        if self.state == TableState::Frozen {
            return Err(logic_err!(
                "cannot append section '{}' to a frozen table",
                section.description
            ));
        }
        check_granularity(granularity)?;

        if let Some((name, value, lower)) = element_out_of_bounds(&section, allow_empty) {
            return Err(invalid_arg!(
                "section '{}' {} {} is outside [{}, {}]",
                section.description,
                name,
                value,
                lower,
                MAX_ELEMENT_VALUE
            ));
        }

        let previous_end = self.sections.last().map_or(0, Section::end);
        let placement = place(&section, previous_end, granularity)?;
        end_of(&placement)?;

        let index = self.sections.len();
        section.index = index as u64;
        section.offset = placement.offset;
        section.length_actual = placement.length_actual;
        section.length_padded = placement.length_padded;
        self.sections.push(section);
        Ok(index)
    }

    /// Re-derives index, offset and both lengths of every section in order.
    pub fn fixup_all(&mut self, granularity: u64) -> Result<()> {
        if self.state == TableState::Frozen {
            return Err(logic_err!("cannot fix up a frozen section table"));
        }
        ensure_arg!(!self.sections.is_empty(), "cannot fix up an empty section table");
        check_granularity(granularity)?;

        let mut placements = Vec::with_capacity(self.sections.len());
        let mut end = 0u64;
        for section in &self.sections {
            let placement = place(section, end, granularity)?;
            end = end_of(&placement)?;
            placements.push(placement);
        }

        for (i, (section, placement)) in self.sections.iter_mut().zip(placements).enumerate() {
            section.index = i as u64;
            section.offset = placement.offset;
            section.length_actual = placement.length_actual;
            section.length_padded = placement.length_padded;
        }
        Ok(())
    }

    /// Compares every section's derived fields with freshly recomputed ones
    /// and reports the first mismatch. A non-zero `file_size` additionally
    /// requires every non-empty section to lie inside the file.
    pub fn check_all(&self, granularity: u64, file_size: u64) -> Result<()> {
        ensure_arg!(!self.sections.is_empty(), "cannot check an empty section table");
        check_granularity(granularity)?;
        self.check_element_bounds(true)?;

        let mut end = 0u64;
        for (i, section) in self.sections.iter().enumerate() {
            let expected = place(section, end, granularity)?;
            let mismatch = if section.index != i as u64 {
                Some(("index", section.index, i as u64))
            } else if section.offset != expected.offset {
                Some(("offset", section.offset, expected.offset))
            } else if section.length_actual != expected.length_actual {
                Some(("length_actual", section.length_actual, expected.length_actual))
            } else if section.length_padded != expected.length_padded {
                Some(("length_padded", section.length_padded, expected.length_padded))
            } else {
                None
            };

            if let Some((field, found, wanted)) = mismatch {
                return Err(logic_err!(
                    "section {} '{}' has {} {} but {} was expected",
                    i,
                    section.description,
                    field,
                    found,
                    wanted
                ));
            }

            if file_size != 0
                && section.length_padded != 0
                && !check_extent(file_size, section.offset, section.length_padded, OnViolation::ReturnFalse)?
            {
                return Err(logic_err!(
                    "section {} '{}' [{}, {}) does not fit inside file size {}",
                    i,
                    section.description,
                    section.offset,
                    section.end(),
                    file_size
                ));
            }

            end = end_of(&expected)?;
        }
        Ok(())
    }

    /// Re-checks every section's element fields against
    /// `[1, MAX_ELEMENT_VALUE]`, or `[0, MAX_ELEMENT_VALUE]` with
    /// `allow_empty`. `check_all` always applies the upper bound.
    pub fn check_element_bounds(&self, allow_empty: bool) -> Result<()> {
        for (i, section) in self.sections.iter().enumerate() {
            if let Some((name, value, lower)) = element_out_of_bounds(section, allow_empty) {
                return Err(logic_err!(
                    "section {} '{}' has {} {} outside [{}, {}]",
                    i,
                    section.description,
                    name,
                    value,
                    lower,
                    MAX_ELEMENT_VALUE
                ));
            }
        }
        Ok(())
    }

    /// `check_all`, plus: the section at `self_index` holds exactly one
    /// serialized record per table entry.
    pub fn check_self_describing(&self, self_index: usize, granularity: u64) -> Result<()> {
        self.check_all(granularity, 0)?;

        let Some(section) = self.sections.get(self_index) else {
            return Err(invalid_arg!(
                "self-describing section index {} is out of range (table has {} sections)",
                self_index,
                self.sections.len()
            ));
        };

        if section.element_size != SECTION_RECORD_SIZE as u64 {
            return Err(logic_err!(
                "section {} '{}' has element_size {} but {} was expected",
                self_index,
                section.description,
                section.element_size,
                SECTION_RECORD_SIZE
            ));
        }
        if section.element_count != self.sections.len() as u64 {
            return Err(logic_err!(
                "section {} '{}' has element_count {} but {} was expected",
                self_index,
                section.description,
                section.element_count,
                self.sections.len()
            ));
        }
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.state = TableState::Frozen;
    }

    pub fn state(&self) -> TableState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Section> {
        self.sections.iter()
    }

    /// Bytes covered by the table: end of the last padded region.
    pub fn total_size(&self) -> u64 {
        self.sections.last().map_or(0, Section::end)
    }

    /// Serializes the table as consecutive `SectionRecord`s.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.sections.len() * SECTION_RECORD_SIZE);
        for section in &self.sections {
            bytes.extend_from_slice(section.to_record()?.as_bytes());
        }
        Ok(bytes)
    }

    /// Decodes `count` records into a frozen table. The layout is not
    /// trusted until the caller runs `check_all`.
    pub fn decode(bytes: &[u8], count: usize) -> Result<Self> {
        let needed = count
            .checked_mul(SECTION_RECORD_SIZE)
            .ok_or_else(|| invalid_arg!("section count {} overflows", count))?;
        ensure_arg!(
            bytes.len() >= needed,
            "section table needs {} bytes for {} records, only {} available",
            needed,
            count,
            bytes.len()
        );

        let sections = bytes[..needed]
            .chunks_exact(SECTION_RECORD_SIZE)
            .map(|chunk| SectionRecord::from_bytes(chunk).and_then(Section::from_record))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            sections,
            state: TableState::Frozen,
        })
    }
}

impl<'a> IntoIterator for &'a SectionTable {
    type Item = &'a Section;
    type IntoIter = std::slice::Iter<'a, Section>;

    fn into_iter(self) -> Self::IntoIter {
        self.sections.iter()
    }
}
