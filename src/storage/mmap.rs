//! # Memory-Mapped Record Store
//!
//! `StorageFile` lays out a fixed set of [`Section`]s in one file and maps the
//! whole committed size. Section and element access returns slices that point
//! straight into the mapping.
//!
//! ## File Layout
//!
//! ```text
//! Offset 0            section 0: StoreHeader (128 bytes, padded)
//! Offset g            section 1: section table, one SectionRecord per entry
//! Offset 2g           section 2: first user section
//! ...                 further user sections, each padded to the granularity
//! ```
//!
//! The table describes itself: section 1 has `element_size = 128` and
//! `element_count = section_count`. A reader finds the table through
//! `StoreHeader::table_offset` and checks it against the header.
//!
//! ## Growth
//!
//! The only growth a store allows is appending elements to its last section
//! ([`StorageFile::extend_last_section`]). The file is grown with the
//! pending/committed protocol:
//!
//! ```text
//! header.pending   = target; flush header
//! ensure_backing_store [committed, target)
//! remap [0, target)
//! header.committed = target; flush header
//! rewrite section table
//! ```
//!
//! A crash anywhere in that sequence is repaired by [`reconcile`] on the next
//! writer open. A growth that fails in-process restores the persisted
//! pending size, so the file never carries a half-recorded attempt that could
//! confuse the next open.
//!
//! ## Safety Model
//!
//! Growth replaces the mapping, which would invalidate any slice into the
//! old one. As in the rest of the storage layer, the borrow checker rules
//! that out:
//!
//! ```text
//! section(&self) -> &[u8]              // immutable borrow
//! section_mut(&mut self) -> &mut [u8]  // mutable borrow
//! extend_last_section(&mut self)       // exclusive borrow
//! ```
//!
//! ## Readers
//!
//! `open_read_only` takes no lock and does not reconcile. It maps
//! `[0, committed)` and tolerates a file that is larger than that, since a
//! writer may be growing it.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use memmap2::{Mmap, MmapMut, MmapOptions};
use tracing::{debug, info, warn};
use zerocopy::IntoBytes;

use super::{
    acquire_writer_lock, ensure_backing_store, reconcile, PersistedSizes, Reconciliation,
    StoreHeader,
};
use crate::config::{
    StoreOptions, FIRST_USER_SECTION, HEADER_SECTION, SECTION_RECORD_SIZE, STORE_HEADER_SIZE,
    TABLE_SECTION,
};
use crate::error::StoreError;
use crate::granularity::{check_granularity, check_multiple};
use crate::section::{Section, SectionTable};

#[derive(Debug)]
enum Mapping {
    ReadOnly(Mmap),
    Writable(MmapMut),
}

impl Mapping {
    fn bytes(&self) -> &[u8] {
        match self {
            Mapping::ReadOnly(mmap) => &mmap[..],
            Mapping::Writable(mmap) => &mmap[..],
        }
    }

    fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            Mapping::ReadOnly(_) => None,
            Mapping::Writable(mmap) => Some(&mut mmap[..]),
        }
    }

    fn len(&self) -> u64 {
        self.bytes().len() as u64
    }

    fn flush_range(&self, offset: usize, len: usize) -> std::io::Result<()> {
        match self {
            Mapping::ReadOnly(_) => Ok(()),
            Mapping::Writable(mmap) => mmap.flush_range(offset, len),
        }
    }

    fn flush(&self) -> std::io::Result<()> {
        match self {
            Mapping::ReadOnly(_) => Ok(()),
            Mapping::Writable(mmap) => mmap.flush(),
        }
    }
}

#[derive(Debug)]
pub struct StorageFile {
    path: PathBuf,
    file: File,
    mapping: Mapping,
    granularity: u64,
    file_size: u64,
    file_size_pending: u64,
    table: SectionTable,
    is_writer: bool,
    closed: bool,
}

impl StorageFile {
    /// Creates a store holding the header section, the table section and
    /// `sections` in order. An existing file at `path` is replaced, but only
    /// after the writer lock was taken.
    pub fn create<P, I>(path: P, sections: I, options: &StoreOptions) -> Result<Self>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = Section>,
    {
        let path = path.as_ref();
        options.validate()?;
        let granularity = options.granularity_value();

        let user: Vec<Section> = sections.into_iter().collect();
        let section_count = (FIRST_USER_SECTION + user.len()) as u64;

        let mut table = SectionTable::new();
        table.append_section(
            Section::new("store header", STORE_HEADER_SIZE as u64, 1)?,
            granularity,
            false,
        )?;
        table.append_section(
            Section::new("section table", SECTION_RECORD_SIZE as u64, section_count)?,
            granularity,
            false,
        )?;
        for section in user {
            table.append_section(section, granularity, false)?;
        }
        table.fixup_all(granularity)?;
        table.check_self_describing(TABLE_SECTION, granularity)?;
        table.freeze();

        let total = table.total_size();
        let table_offset = table_section(&table)?.offset();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StoreError::io("create", path, 0, 0, e))?;

        acquire_writer_lock(&file, path)?;

        file.set_len(0)
            .map_err(|e| StoreError::io("truncate", path, 0, 0, e))?;
        ensure_backing_store(&file, path, 0, total)?;

        let mut mmap = map_writable(&file, path, total)?;
        let header = StoreHeader::new(
            granularity,
            total,
            section_count,
            TABLE_SECTION as u64,
            table_offset,
        );
        mmap[..STORE_HEADER_SIZE].copy_from_slice(header.as_bytes());
        let encoded = table.encode()?;
        let start = table_offset as usize;
        mmap[start..start + encoded.len()].copy_from_slice(&encoded);
        mmap.flush()
            .map_err(|e| StoreError::io("flush", path, 0, total, e))?;

        debug!(
            path = %path.display(),
            granularity,
            section_count,
            file_size = total,
            "created storage file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mapping: Mapping::Writable(mmap),
            granularity,
            file_size: total,
            file_size_pending: total,
            table,
            is_writer: true,
            closed: false,
        })
    }

    /// Opens an existing store as its single writer, repairing an
    /// interrupted growth first.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::io("open", path, 0, 0, e))?;

        acquire_writer_lock(&file, path)?;

        let actual = file_len(&file, path)?;
        let mut header = read_header(&file, path, actual)?;
        let granularity = header.granularity();

        let mut sizes = PersistedSizes {
            committed: header.committed_size(),
            pending: header.pending_size(),
        };
        let outcome = reconcile(&mut sizes, actual, |offset, length| {
            ensure_backing_store(&file, path, offset, length)
        })
        .wrap_err_with(|| format!("failed to reconcile '{}'", path.display()))?;

        if outcome != Reconciliation::Clean {
            header.set_committed_size(sizes.committed);
            header.set_pending_size(sizes.pending);
            write_header(&file, path, &header)?;
            info!(
                path = %path.display(),
                ?outcome,
                file_size = sizes.committed,
                "reconciled interrupted growth"
            );
        }

        if actual < sizes.committed {
            return Err(logic_err!(
                "'{}' is {} bytes, shorter than its committed size {}",
                path.display(),
                actual,
                sizes.committed
            ));
        }

        let mmap = map_writable(&file, path, sizes.committed)?;
        let table = load_table(&mmap, &header, path)?;

        debug!(
            path = %path.display(),
            file_size = sizes.committed,
            sections = table.len(),
            "opened storage file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mapping: Mapping::Writable(mmap),
            granularity,
            file_size: sizes.committed,
            file_size_pending: sizes.pending,
            table,
            is_writer: true,
            closed: false,
        })
    }

    /// Opens an existing store for reading. Takes no lock and never writes.
    ///
    /// A concurrent writer may grow the file but never shrinks the mapped
    /// prefix. Re-creating the store with [`create`](Self::create) while a
    /// reader is open truncates the file under it and is not supported.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| StoreError::io("open", path, 0, 0, e))?;

        let actual = file_len(&file, path)?;
        let header = read_header(&file, path, actual)?;
        let committed = header.committed_size();

        if actual < committed {
            return Err(logic_err!(
                "'{}' is {} bytes, shorter than its committed size {}",
                path.display(),
                actual,
                committed
            ));
        }

        let len = to_usize(committed)?;
        // SAFETY: Mmap::map is unsafe because another process may modify or
        // truncate the file while it is mapped. This is acceptable because:
        // 1. A writer that opened the store only grows it, so [0, committed)
        //    is never shrunk. `create` on the same path truncates it to zero;
        //    replacing a store while readers hold it is unsupported
        // 2. The range was checked to lie inside the file above
        // 3. All access goes through section()/element(), which bounds-check
        let mmap = unsafe {
            MmapOptions::new()
                .len(len)
                .map(&file)
                .map_err(|e| StoreError::io("map", path, 0, committed, e))?
        };
        let table = load_table(&mmap, &header, path)?;

        debug!(path = %path.display(), file_size = committed, "opened storage file read-only");

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mapping: Mapping::ReadOnly(mmap),
            granularity: header.granularity(),
            file_size: committed,
            file_size_pending: header.pending_size(),
            table,
            is_writer: false,
            closed: false,
        })
    }

    pub fn file_name(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn file_size_pending(&self) -> u64 {
        self.file_size_pending
    }

    pub fn mmap_size(&self) -> u64 {
        self.mapping.len()
    }

    pub fn granularity(&self) -> u64 {
        self.granularity
    }

    pub fn is_writer(&self) -> bool {
        self.is_writer
    }

    pub fn section_table(&self) -> &SectionTable {
        &self.table
    }

    /// The `length_actual` bytes of section `index`.
    pub fn section(&self, index: usize) -> Result<&[u8]> {
        let (start, end) = self.section_range(index)?;
        Ok(&self.mapping.bytes()[start..end])
    }

    /// Writable view of user section `index`. The header and table sections
    /// are only written by the store itself.
    pub fn section_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        ensure_arg!(
            index >= FIRST_USER_SECTION,
            "section {} of '{}' is reserved for store metadata",
            index,
            self.path.display()
        );
        let (start, end) = self.section_range(index)?;
        let bytes = self.writable_bytes()?;
        Ok(&mut bytes[start..end])
    }

    /// Element `element` of section `index`, `element_size` bytes long.
    pub fn element(&self, index: usize, element: u64) -> Result<&[u8]> {
        let (start, end) = self.element_range(index, element)?;
        Ok(&self.mapping.bytes()[start..end])
    }

    pub fn element_mut(&mut self, index: usize, element: u64) -> Result<&mut [u8]> {
        ensure_arg!(
            index >= FIRST_USER_SECTION,
            "section {} of '{}' is reserved for store metadata",
            index,
            self.path.display()
        );
        let (start, end) = self.element_range(index, element)?;
        let bytes = self.writable_bytes()?;
        Ok(&mut bytes[start..end])
    }

    /// Appends `additional` zeroed elements to the last section, growing the
    /// file when the padded region runs out.
    pub fn extend_last_section(&mut self, additional: u64) -> Result<()> {
        ensure_arg!(
            self.is_writer,
            "'{}' was opened read-only",
            self.path.display()
        );
        ensure_arg!(additional > 0, "element count increase must be greater than zero");
        ensure_arg!(
            self.table.len() > FIRST_USER_SECTION,
            "'{}' has no user section to extend",
            self.path.display()
        );

        let last_index = self.table.len() - 1;
        let rebuilt = {
            let last = self
                .table
                .get(last_index)
                .ok_or_else(|| logic_err!("section table of '{}' lost its last entry", self.path.display()))?;
            let count = last.element_count().checked_add(additional).ok_or_else(|| {
                invalid_arg!(
                    "section '{}' element count {} + {} overflows",
                    last.description(),
                    last.element_count(),
                    additional
                )
            })?;

            let sections = self
                .table
                .iter()
                .take(last_index)
                .map(|s| s.with_element_count(s.element_count()))
                .chain(std::iter::once(last.with_element_count(count)));
            let mut rebuilt = SectionTable::build(sections, self.granularity)?;
            rebuilt.check_self_describing(TABLE_SECTION, self.granularity)?;
            rebuilt.freeze();
            rebuilt
        };

        for (old, new) in self.table.iter().zip(rebuilt.iter()).take(last_index) {
            if old != new {
                return Err(logic_err!(
                    "extending '{}' moved section {} '{}'",
                    self.path.display(),
                    old.index(),
                    old.description()
                ));
            }
        }

        let target = rebuilt.total_size();
        if target > self.file_size {
            self.grow(target)?;
        }

        let encoded = rebuilt.encode()?;
        let table_offset = to_usize(table_section(&rebuilt)?.offset())?;
        let bytes = self.writable_bytes()?;
        bytes[table_offset..table_offset + encoded.len()].copy_from_slice(&encoded);
        self.mapping
            .flush_range(table_offset, encoded.len())
            .map_err(|e| {
                StoreError::io(
                    "flush",
                    &self.path,
                    table_offset as u64,
                    encoded.len() as u64,
                    e,
                )
            })?;

        debug!(
            path = %self.path.display(),
            section = last_index,
            additional,
            file_size = self.file_size,
            "extended last section"
        );
        self.table = rebuilt;
        Ok(())
    }

    fn grow(&mut self, target: u64) -> Result<()> {
        check_multiple(target, self.granularity, "file size")?;
        let committed = self.file_size;

        self.persist_sizes(committed, target)?;
        self.file_size_pending = target;

        if let Err(e) = self.grow_mapping(committed, target) {
            self.file_size_pending = committed;
            if let Err(restore) = self.persist_sizes(committed, committed) {
                warn!(
                    path = %self.path.display(),
                    error = ?restore,
                    "failed to restore pending size after failed growth"
                );
            }
            return Err(e);
        }

        self.persist_sizes(target, target)?;
        self.file_size = target;
        Ok(())
    }

    fn grow_mapping(&mut self, committed: u64, target: u64) -> Result<()> {
        ensure_backing_store(&self.file, &self.path, committed, target - committed)?;
        self.mapping.flush().map_err(|e| {
            StoreError::io("flush", &self.path, 0, committed, e)
        })?;
        let grown = map_writable(&self.file, &self.path, target)?;
        self.mapping = Mapping::Writable(grown);
        debug!(path = %self.path.display(), from = committed, to = target, "grew storage file");
        Ok(())
    }

    fn persist_sizes(&mut self, committed: u64, pending: u64) -> Result<()> {
        let path = self.path.clone();
        let bytes = self.writable_bytes()?;
        let header = StoreHeader::from_bytes_mut(bytes)
            .wrap_err_with(|| format!("corrupt header in '{}'", path.display()))?;
        header.set_pending_size(pending);
        header.set_committed_size(committed);
        self.mapping
            .flush_range(0, STORE_HEADER_SIZE)
            .map_err(|e| StoreError::io("flush", &path, 0, STORE_HEADER_SIZE as u64, e))?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.mapping
            .flush()
            .map_err(|e| StoreError::io("flush", &self.path, 0, self.mapping.len(), e).into())
    }

    /// Flushes and closes the store, propagating failures.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.flush()?;
        if self.is_writer {
            self.file
                .sync_all()
                .map_err(|e| StoreError::io("fsync", &self.path, 0, self.file_size, e))?;
        }
        debug!(path = %self.path.display(), "closed storage file");
        Ok(())
    }

    fn section_range(&self, index: usize) -> Result<(usize, usize)> {
        let section = self.table.get(index).ok_or_else(|| {
            invalid_arg!(
                "section {} out of bounds (section_count={})",
                index,
                self.table.len()
            )
        })?;
        let start = to_usize(section.offset())?;
        let end = to_usize(section.offset() + section.length_actual())?;
        Ok((start, end))
    }

    fn element_range(&self, index: usize, element: u64) -> Result<(usize, usize)> {
        let section = self.table.get(index).ok_or_else(|| {
            invalid_arg!(
                "section {} out of bounds (section_count={})",
                index,
                self.table.len()
            )
        })?;
        ensure_arg!(
            element < section.element_count(),
            "element {} of section {} '{}' out of bounds (element_count={})",
            element,
            index,
            section.description(),
            section.element_count()
        );
        let start = section.offset() + element * section.element_size();
        Ok((to_usize(start)?, to_usize(start + section.element_size())?))
    }

    fn writable_bytes(&mut self) -> Result<&mut [u8]> {
        let path = &self.path;
        self.mapping
            .bytes_mut()
            .ok_or_else(|| invalid_arg!("'{}' was opened read-only", path.display()))
    }
}

impl Drop for StorageFile {
    fn drop(&mut self) {
        if self.closed || !self.is_writer {
            return;
        }
        if let Err(e) = self.flush() {
            warn!(path = %self.path.display(), error = ?e, "failed to flush storage file on drop");
        }
    }
}

fn table_section(table: &SectionTable) -> Result<&Section> {
    table
        .get(TABLE_SECTION)
        .ok_or_else(|| logic_err!("section table has no table section"))
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| invalid_arg!("{} does not fit in memory", value))
}

fn file_len(file: &File, path: &Path) -> Result<u64> {
    Ok(file
        .metadata()
        .map_err(|e| StoreError::io("stat", path, 0, 0, e))?
        .len())
}

fn map_writable(file: &File, path: &Path, len: u64) -> Result<MmapMut> {
    let map_len = to_usize(len)?;
    // SAFETY: MmapMut::map_mut is unsafe because the file could be modified
    // or truncated externally while mapped. This is safe because:
    // 1. The caller holds the exclusive writer lock on `file`
    // 2. [0, len) was committed by ensure_backing_store or checked against
    //    the actual file size before this call
    // 3. Every slice handed out borrows the StorageFile, so none survives a
    //    remap (remapping needs &mut self)
    unsafe {
        MmapOptions::new()
            .len(map_len)
            .map_mut(file)
            .map_err(|e| StoreError::io("map", path, 0, len, e).into())
    }
}

fn read_header(file: &File, path: &Path, actual: u64) -> Result<StoreHeader> {
    if actual < STORE_HEADER_SIZE as u64 {
        return Err(logic_err!(
            "'{}' is {} bytes, too small for a store header",
            path.display(),
            actual
        ));
    }

    let mut bytes = [0u8; STORE_HEADER_SIZE];
    let mut reader = file;
    reader
        .seek(SeekFrom::Start(0))
        .and_then(|_| reader.read_exact(&mut bytes))
        .map_err(|e| StoreError::io("read header", path, 0, STORE_HEADER_SIZE as u64, e))?;

    let header = *StoreHeader::from_bytes(&bytes)
        .wrap_err_with(|| format!("invalid store header in '{}'", path.display()))?;

    let granularity = header.granularity();
    check_granularity(granularity)
        .wrap_err_with(|| format!("invalid granularity in '{}'", path.display()))?;
    check_multiple(header.committed_size(), granularity, "committed size")
        .wrap_err_with(|| format!("invalid store header in '{}'", path.display()))?;
    check_multiple(header.pending_size(), granularity, "pending size")
        .wrap_err_with(|| format!("invalid store header in '{}'", path.display()))?;

    Ok(header)
}

fn write_header(file: &File, path: &Path, header: &StoreHeader) -> Result<()> {
    let mut writer = file;
    writer
        .seek(SeekFrom::Start(0))
        .and_then(|_| writer.write_all(header.as_bytes()))
        .and_then(|_| file.sync_data())
        .map_err(|e| StoreError::io("write header", path, 0, STORE_HEADER_SIZE as u64, e))?;
    Ok(())
}

fn load_table(bytes: &[u8], header: &StoreHeader, path: &Path) -> Result<SectionTable> {
    let granularity = header.granularity();
    let count = usize::try_from(header.section_count())
        .ok()
        .filter(|&count| count >= FIRST_USER_SECTION)
        .ok_or_else(|| {
            logic_err!(
                "'{}' records {} sections, a store has at least {}",
                path.display(),
                header.section_count(),
                FIRST_USER_SECTION
            )
        })?;
    if header.table_index() != TABLE_SECTION as u64 {
        return Err(logic_err!(
            "'{}' keeps its table in section {}, expected {}",
            path.display(),
            header.table_index(),
            TABLE_SECTION
        ));
    }

    let offset = usize::try_from(header.table_offset())
        .ok()
        .filter(|&offset| offset < bytes.len())
        .ok_or_else(|| {
            logic_err!(
                "'{}' table offset {} is outside the mapped {} bytes",
                path.display(),
                header.table_offset(),
                bytes.len()
            )
        })?;

    let table = SectionTable::decode(&bytes[offset..], count)
        .and_then(|table| {
            table.check_all(granularity, bytes.len() as u64)?;
            table.check_element_bounds(false)?;
            table.check_self_describing(TABLE_SECTION, granularity)?;
            Ok(table)
        })
        .wrap_err_with(|| format!("invalid section table in '{}'", path.display()))?;

    let header_section = table
        .get(HEADER_SECTION)
        .ok_or_else(|| logic_err!("'{}' has no header section", path.display()))?;
    if header_section.element_size() != STORE_HEADER_SIZE as u64
        || header_section.element_count() != 1
    {
        return Err(logic_err!(
            "'{}' header section is {} x {}, expected {} x 1",
            path.display(),
            header_section.element_size(),
            header_section.element_count(),
            STORE_HEADER_SIZE
        ));
    }
    if table_section(&table)?.offset() != header.table_offset() {
        return Err(logic_err!(
            "'{}' header places the table at {} but the table says {}",
            path.display(),
            header.table_offset(),
            table_section(&table)?.offset()
        ));
    }

    Ok(table)
}
