//! # Growable Append Mapping
//!
//! `MappedFile` is the steady-state write path for append-only data (log
//! files). It keeps one writable [`MappingWindow`] over the tail of the file
//! and grows file and window together, in whole chunks, whenever an append
//! would not fit.
//!
//! ## States
//!
//! ```text
//!            open_for_write                    flush_and_truncate / close
//!  Closed ─────────────────────▶ Open ─────────────────────────────────▶ Closed
//!                                 │ ▲
//!                                 └─┘ write / ensure_space (grow + remap)
//! ```
//!
//! ## Growth
//!
//! When `needed >= remaining`, a new window is computed from the absolute
//! write position `p`:
//!
//! ```text
//! mapping_offset = align_down(p, granularity)
//! mapping_size   = max(chunk_size, round_up(needed, granularity) + granularity)
//! ```
//!
//! Storage for the new tail is committed with `ensure_backing_store` before
//! the new window is mapped. The old window is flushed and stays installed
//! until the new one exists, so a failed growth leaves the previous window
//! usable and `file_size` unchanged. `file_size_pending` is set to the target
//! before any of this and keeps naming it if growth fails.
//!
//! ## Recovery
//!
//! Bytes past the end of data inside the current chunk are zero (committed
//! storage reads back as zero) and a clean close truncates them away. After an
//! unclean shutdown the file still carries that zero tail, so
//! `open_for_write` scans backward from the end of the file, one granularity
//! chunk at a time, for the last non-zero byte, and resumes right after it.
//! The scan keeps going into earlier chunks when a whole chunk is zero, since
//! one growth can pre-commit several granularity units at once.
//!
//! **Limitation:** the scan cannot tell padding from data that really ends in
//! zero bytes. Such trailing zeros are lost on recovery from an unclean
//! shutdown. A clean close truncates at the exact write position and is not
//! affected.
//!
//! ## Concurrency
//!
//! All state sits behind one `parking_lot::Mutex`, held for the whole of each
//! call, including pre-commit and remap. No write can be in flight against a
//! window that is being replaced, and no reference to the window escapes the
//! lock. Across processes the writer lock from [`super::acquire_writer_lock`]
//! admits a single writer.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use memmap2::MmapOptions;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{acquire_writer_lock, ensure_backing_store, MappingWindow, WindowLayout};
use crate::config::StoreOptions;
use crate::error::StoreError;
use crate::granularity::{align_down, round_up};

#[derive(Debug)]
pub struct MappedFile {
    path: PathBuf,
    granularity: u64,
    chunk_size: u64,
    inner: Mutex<MappedState>,
}

#[derive(Debug)]
struct MappedState {
    open: Option<OpenFile>,
    file_size: u64,
    file_size_pending: u64,
}

/// Present while the file is open. Dropping it unmaps the window and closes
/// the handle, which releases the writer lock.
#[derive(Debug)]
struct OpenFile {
    window: MappingWindow,
    file: File,
}

impl MappedFile {
    /// Opens `path` for appending, creating it when missing. An existing file
    /// resumes after its last non-zero byte.
    pub fn open_for_write<P: AsRef<Path>>(path: P, options: &StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        options.validate()?;
        let granularity = options.granularity_value();
        let chunk_size = options.chunk_size_value();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StoreError::io("open", path, 0, 0, e))?;

        acquire_writer_lock(&file, path)?;

        let actual = file
            .metadata()
            .map_err(|e| StoreError::io("stat", path, 0, 0, e))?
            .len();

        let (window, file_size) = if actual == 0 {
            ensure_backing_store(&file, path, 0, chunk_size)?;
            let window = MappingWindow::map(&file, path, 0, chunk_size, 0)?;
            debug!(path = %path.display(), chunk_size, "created mapped file");
            (window, chunk_size)
        } else {
            Self::recover(&file, path, actual, granularity)
                .wrap_err_with(|| format!("failed to recover '{}'", path.display()))?
        };

        Ok(Self {
            path: path.to_path_buf(),
            granularity,
            chunk_size,
            inner: Mutex::new(MappedState {
                open: Some(OpenFile { window, file }),
                file_size,
                file_size_pending: file_size,
            }),
        })
    }

    fn recover(
        file: &File,
        path: &Path,
        actual: u64,
        granularity: u64,
    ) -> Result<(MappingWindow, u64)> {
        let rounded = round_up(actual, granularity)?;
        if rounded != actual {
            ensure_backing_store(file, path, actual, rounded - actual)?;
        }

        let data_end = scan_data_end(file, path, rounded, granularity)?;
        let mapping_offset = align_down(data_end, granularity)?;
        let mapping_end = rounded.max(mapping_offset + granularity);
        if mapping_end > rounded {
            ensure_backing_store(file, path, rounded, mapping_end - rounded)?;
        }

        let window = MappingWindow::map(
            file,
            path,
            mapping_offset,
            mapping_end - mapping_offset,
            data_end - mapping_offset,
        )?;

        info!(
            path = %path.display(),
            actual_size = actual,
            file_size = mapping_end,
            write_position = data_end,
            "resumed mapped file after last non-zero byte"
        );
        Ok((window, mapping_end))
    }

    /// Appends `bytes`, growing file and window first when they do not fit.
    /// An empty slice is a no-op.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut state = self.inner.lock();
        self.ensure_space_locked(&mut state, bytes.len() as u64)?;
        state
            .open
            .as_mut()
            .ok_or_else(|| self.closed_error())?
            .window
            .append(bytes)
    }

    /// Makes sure `needed` more bytes fit in the window.
    pub fn ensure_space(&self, needed: u64) -> Result<()> {
        let mut state = self.inner.lock();
        self.ensure_space_locked(&mut state, needed)
    }

    fn ensure_space_locked(&self, state: &mut MappedState, needed: u64) -> Result<()> {
        let open = state.open.as_mut().ok_or_else(|| self.closed_error())?;
        if needed < open.window.remaining() {
            return Ok(());
        }

        let position = open.window.position();
        let mapping_offset = align_down(position, self.granularity)?;
        let overflow = || {
            invalid_arg!(
                "growing '{}' by {} bytes overflows",
                self.path.display(),
                needed
            )
        };
        let mapping_size = round_up(needed, self.granularity)?
            .checked_add(self.granularity)
            .ok_or_else(overflow)?
            .max(self.chunk_size);
        let target = mapping_offset
            .checked_add(mapping_size)
            .ok_or_else(overflow)?;

        let committed = state.file_size;
        let pending = target.max(committed);
        state.file_size_pending = pending;

        if pending > committed {
            ensure_backing_store(&open.file, &self.path, committed, pending - committed)?;
        }
        open.window.flush(&self.path)?;

        let grown = MappingWindow::map(
            &open.file,
            &self.path,
            mapping_offset,
            mapping_size,
            position - mapping_offset,
        )?;
        open.window = grown;
        state.file_size = pending;

        debug!(
            path = %self.path.display(),
            mapping_offset,
            mapping_size,
            file_size = state.file_size,
            "grew mapped file"
        );
        Ok(())
    }

    /// Flushes the live window to the file.
    pub fn flush(&self) -> Result<()> {
        let state = self.inner.lock();
        match &state.open {
            Some(open) => open.window.flush(&self.path),
            None => Ok(()),
        }
    }

    /// Flushes, unmaps and truncates the file to the exact write position,
    /// propagating every failure. Calling it on a closed file does nothing.
    pub fn flush_and_truncate(&self) -> Result<()> {
        let mut state = self.inner.lock();
        let Some(open) = state.open.take() else {
            return Ok(());
        };

        let end = open.window.position();
        if let Err(e) = open.window.flush(&self.path) {
            state.open = Some(open);
            return Err(e);
        }
        let OpenFile { window, file } = open;
        drop(window);

        file.set_len(end)
            .map_err(|e| StoreError::io("truncate", &self.path, end, 0, e))?;
        file.sync_all()
            .map_err(|e| StoreError::io("fsync", &self.path, 0, end, e))?;
        state.file_size = end;
        state.file_size_pending = end;

        debug!(path = %self.path.display(), file_size = end, "closed mapped file");
        Ok(())
    }

    /// Best-effort close. Failures are logged, not returned; use
    /// [`flush_and_truncate`](Self::flush_and_truncate) to observe them.
    pub fn close(self) {
        drop(self);
    }

    pub fn file_name(&self) -> &Path {
        &self.path
    }

    pub fn granularity(&self) -> u64 {
        self.granularity
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn file_size(&self) -> u64 {
        self.inner.lock().file_size
    }

    pub fn file_size_pending(&self) -> u64 {
        self.inner.lock().file_size_pending
    }

    /// End of the address range backed by the live window, measured from
    /// the start of the file. Never below `file_size` while open; 0 once
    /// closed.
    pub fn mmap_size(&self) -> u64 {
        self.inner.lock().open.as_ref().map_or(0, |open| {
            open.window.mapping_offset() + open.window.mapping_size()
        })
    }

    /// Absolute offset of the next byte written; the final file length once
    /// closed.
    pub fn write_position(&self) -> u64 {
        let state = self.inner.lock();
        state
            .open
            .as_ref()
            .map_or(state.file_size, |open| open.window.position())
    }

    pub fn window_layout(&self) -> Option<WindowLayout> {
        self.inner.lock().open.as_ref().map(|open| open.window.layout())
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().open.is_some()
    }

    fn closed_error(&self) -> eyre::Report {
        logic_err!("mapped file '{}' is closed", self.path.display())
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if let Err(e) = self.flush_and_truncate() {
            warn!(path = %self.path.display(), error = ?e, "failed to close mapped file");
        }
    }
}

/// Returns one past the last non-zero byte of the first `size` bytes of
/// `file`, or 0 when they are all zero. `size` is a multiple of `granularity`.
fn scan_data_end(file: &File, path: &Path, size: u64, granularity: u64) -> Result<u64> {
    let len = usize::try_from(granularity)
        .map_err(|_| invalid_arg!("granularity {} does not fit in memory", granularity))?;
    let mut chunk_end = size;

    while chunk_end > 0 {
        let chunk_start = chunk_end - granularity;

        // SAFETY: Mmap::map is unsafe because the file could change while
        // mapped. This is safe because:
        // 1. The caller holds the exclusive writer lock on `file`
        // 2. [chunk_start, chunk_end) lies inside the file, which was just
        //    extended to at least `size` bytes
        // 3. The mapping is dropped before this function returns
        let chunk = unsafe {
            MmapOptions::new()
                .offset(chunk_start)
                .len(len)
                .map(file)
                .map_err(|e| StoreError::io("map", path, chunk_start, granularity, e))?
        };

        if let Some(pos) = chunk.iter().rposition(|&b| b != 0) {
            return Ok(chunk_start + pos as u64 + 1);
        }
        chunk_end = chunk_start;
    }

    Ok(0)
}
