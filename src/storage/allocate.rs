//! # Backing Store Pre-Allocation
//!
//! Makes the OS commit real disk blocks for a byte range instead of leaving a
//! sparse hole. Growth and crash recovery both rely on this: a hole would let
//! a later write fail with `ENOSPC`/`SIGBUS` through the mapping, and the
//! zero-scan in `MappedFile` assumes the tail it scans is real, zero-filled
//! storage.
//!
//! ## Strategies
//!
//! | Platform        | Preferred                    | Fallback                           |
//! |-----------------|------------------------------|------------------------------------|
//! | Linux/Android   | `posix_fallocate(off, len)`  | `fs2::FileExt::allocate(end)`      |
//! | macOS/BSD       | `fs2::FileExt::allocate`     | (F_PREALLOCATE + ftruncate)        |
//! | Windows         | `fs2::FileExt::allocate`     | (SetFileInformationByHandle)       |
//! | anything else   | none: `LogicError`           |                                    |
//!
//! The range form is preferred because it is a single atomic call for exactly
//! the requested bytes. The fallback extends the file to `offset + length`
//! and commits blocks for all of it. Either way the file never shrinks, so
//! calling this twice for the same range is a no-op the second time.

use std::fs::File;
use std::path::Path;

use eyre::Result;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AllocationStrategy {
    RangeAllocate,
    ExtendAndTruncate,
}

/// Commits storage for `[offset, offset + length)` of `file`. A zero length
/// is a no-op.
pub fn ensure_backing_store(file: &File, path: &Path, offset: u64, length: u64) -> Result<()> {
    if length == 0 {
        return Ok(());
    }
    let end = offset
        .checked_add(length)
        .filter(|&end| end <= i64::MAX as u64)
        .ok_or_else(|| {
            invalid_arg!(
                "backing store range offset {} + length {} for '{}' is out of range",
                offset,
                length,
                path.display()
            )
        })?;

    let strategy = platform::allocate(file, path, offset, length, end)?;

    debug!(
        path = %path.display(),
        offset,
        length,
        ?strategy,
        "backing store committed"
    );
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod platform {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;
    use std::path::Path;

    use eyre::Result;

    use super::AllocationStrategy;
    use crate::error::StoreError;

    pub(super) fn allocate(
        file: &File,
        path: &Path,
        offset: u64,
        length: u64,
        end: u64,
    ) -> Result<AllocationStrategy> {
        // SAFETY: posix_fallocate only operates on the descriptor, which is
        // valid for the lifetime of `file`. Both values were checked to fit
        // in off_t by the caller.
        let rc = unsafe {
            libc::posix_fallocate(
                file.as_raw_fd(),
                offset as libc::off_t,
                length as libc::off_t,
            )
        };

        match rc {
            0 => Ok(AllocationStrategy::RangeAllocate),
            libc::EOPNOTSUPP => super::extend_and_truncate(file, path, offset, length, end),
            errno => Err(StoreError::io(
                "posix_fallocate",
                path,
                offset,
                length,
                io::Error::from_raw_os_error(errno),
            )
            .into()),
        }
    }
}

#[cfg(all(
    any(unix, windows),
    not(any(target_os = "linux", target_os = "android"))
))]
mod platform {
    use std::fs::File;
    use std::path::Path;

    use eyre::Result;

    use super::AllocationStrategy;

    pub(super) fn allocate(
        file: &File,
        path: &Path,
        offset: u64,
        length: u64,
        end: u64,
    ) -> Result<AllocationStrategy> {
        super::extend_and_truncate(file, path, offset, length, end)
    }
}

#[cfg(not(any(unix, windows)))]
mod platform {
    use std::fs::File;
    use std::path::Path;

    use eyre::Result;

    use super::AllocationStrategy;

    pub(super) fn allocate(
        _file: &File,
        path: &Path,
        offset: u64,
        length: u64,
        _end: u64,
    ) -> Result<AllocationStrategy> {
        Err(logic_err!(
            "no backing store allocation facility on this platform for '{}' [{}, {})",
            path.display(),
            offset,
            offset + length
        ))
    }
}

#[cfg(any(unix, windows))]
fn extend_and_truncate(
    file: &File,
    path: &Path,
    offset: u64,
    length: u64,
    end: u64,
) -> Result<AllocationStrategy> {
    fs2::FileExt::allocate(file, end).map_err(|e| {
        crate::error::StoreError::io("allocate", path, offset, length, e)
    })?;
    Ok(AllocationStrategy::ExtendAndTruncate)
}
