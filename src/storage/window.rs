//! The writable mapping window of a [`MappedFile`](super::MappedFile).
//!
//! A window maps `[mapping_offset, mapping_offset + mapping_size)` of the file
//! and tracks a cursor, `write_offset`, relative to the window start:
//!
//! ```text
//! file:    |.......|========== window ==========|
//!                  ^ mapping_offset
//!                  |---- write_offset ---->|
//!                                          ^ next byte written
//!                                          |-- remaining --|
//! ```
//!
//! `mapping_offset` and `mapping_size` are always multiples of the file's
//! granularity and `write_offset <= mapping_size`.

use std::fs::File;
use std::path::Path;

use eyre::Result;
use memmap2::{MmapMut, MmapOptions};

use crate::error::StoreError;

/// Position of the window inside the file, as reported by
/// [`MappedFile::window_layout`](super::MappedFile::window_layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLayout {
    pub mapping_offset: u64,
    pub mapping_size: u64,
    pub write_offset: u64,
}

#[derive(Debug)]
pub struct MappingWindow {
    mmap: MmapMut,
    mapping_offset: u64,
    write_offset: usize,
}

impl MappingWindow {
    /// Maps `[mapping_offset, mapping_offset + mapping_size)` of `file` with
    /// the cursor at `write_offset`. The range must already be backed by
    /// storage.
    pub fn map(
        file: &File,
        path: &Path,
        mapping_offset: u64,
        mapping_size: u64,
        write_offset: u64,
    ) -> Result<Self> {
        ensure_arg!(mapping_size > 0, "mapping size must be greater than zero");
        ensure_arg!(
            write_offset <= mapping_size,
            "write offset {} is past the end of a {} byte window",
            write_offset,
            mapping_size
        );
        let len = usize::try_from(mapping_size).map_err(|_| {
            invalid_arg!("mapping size {} does not fit in memory", mapping_size)
        })?;

        // SAFETY: MmapOptions::map_mut is unsafe because the file could be
        // resized or modified by another process while mapped. This is safe
        // because:
        // 1. The caller holds the exclusive writer lock on `file`
        // 2. [mapping_offset, mapping_offset + mapping_size) was committed by
        //    ensure_backing_store before this call, so no access can fault
        // 3. The file is only truncated after the window has been dropped
        let mmap = unsafe {
            MmapOptions::new()
                .offset(mapping_offset)
                .len(len)
                .map_mut(file)
                .map_err(|e| StoreError::io("map", path, mapping_offset, mapping_size, e))?
        };

        Ok(Self {
            mmap,
            mapping_offset,
            write_offset: write_offset as usize,
        })
    }

    pub fn mapping_offset(&self) -> u64 {
        self.mapping_offset
    }

    pub fn mapping_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset as u64
    }

    pub fn remaining(&self) -> u64 {
        (self.mmap.len() - self.write_offset) as u64
    }

    /// Absolute file position of the next byte written.
    pub fn position(&self) -> u64 {
        self.mapping_offset + self.write_offset as u64
    }

    pub fn layout(&self) -> WindowLayout {
        WindowLayout {
            mapping_offset: self.mapping_offset,
            mapping_size: self.mapping_size(),
            write_offset: self.write_offset(),
        }
    }

    #[cfg(test)]
    fn written(&self) -> &[u8] {
        &self.mmap[..self.write_offset]
    }

    /// Copies `bytes` at the cursor and advances it. Fails without writing
    /// anything when `bytes` does not fit.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        ensure_arg!(
            bytes.len() as u64 <= self.remaining(),
            "{} bytes do not fit in the {} bytes left in the window at {}",
            bytes.len(),
            self.remaining(),
            self.position()
        );
        let end = self.write_offset + bytes.len();
        self.mmap[self.write_offset..end].copy_from_slice(bytes);
        self.write_offset = end;
        Ok(())
    }

    pub fn flush(&self, path: &Path) -> Result<()> {
        self.mmap.flush().map_err(|e| {
            StoreError::io(
                "flush",
                path,
                self.mapping_offset,
                self.mapping_size(),
                e,
            )
            .into()
        })
    }
}
