//! Advisory single-writer lock.
//!
//! A writer takes a non-blocking exclusive lock on the open file before it
//! touches any size or mapping. The lock belongs to the open file handle and
//! is released when that handle closes, including on process death, so a
//! crashed writer never leaves a stale lock behind.
//!
//! Read-only opens take no lock.

use std::fs::File;
use std::io;
use std::path::Path;

use eyre::Result;
use tracing::debug;

use crate::error::StoreError;

/// Takes the exclusive writer lock on `file` without blocking. Another holder
/// is a `LockContention` error; any other failure is an `Io` error.
pub fn acquire_writer_lock(file: &File, path: &Path) -> Result<()> {
    match fs2::FileExt::try_lock_exclusive(file) {
        Ok(()) => {
            debug!(path = %path.display(), "writer lock acquired");
            Ok(())
        }
        Err(e) if is_contention(&e) => Err(StoreError::LockContention {
            path: path.to_path_buf(),
            source: e,
        }
        .into()),
        Err(e) => Err(StoreError::io("lock", path, 0, 0, e).into()),
    }
}

fn is_contention(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || (e.raw_os_error().is_some()
            && e.raw_os_error() == fs2::lock_contended_error().raw_os_error())
}
