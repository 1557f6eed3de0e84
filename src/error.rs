//! # Error Taxonomy
//!
//! Every fallible operation in this crate returns `eyre::Result`, with file and
//! range context attached through `WrapErr`. The root cause of every error the
//! crate raises itself is a [`StoreError`], so callers can recover the
//! category with [`kind_of`] no matter how much context was layered on top:
//!
//! ```ignore
//! match mfstore::kind_of(&report) {
//!     Some(ErrorKind::LockContention) => { /* another writer is active */ }
//!     Some(ErrorKind::InvalidArgument) => { /* nothing was mutated */ }
//!     _ => return Err(report),
//! }
//! ```
//!
//! ## Categories
//!
//! | Kind              | Raised when                                         | Mutation |
//! |-------------------|-----------------------------------------------------|----------|
//! | `InvalidArgument` | zero, non-granular, or out-of-range caller input    | none     |
//! | `Io`              | open, pre-allocate, truncate, map or flush failed   | none*    |
//! | `LockContention`  | the writer advisory lock is held elsewhere          | none     |
//! | `Logic`           | unsupported platform, or unrecoverable on-disk state| n/a      |
//!
//! (*) a failed remap leaves the previous window installed.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{op} failed on '{}' (offset={offset}, length={length})", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        offset: u64,
        length: u64,
        #[source]
        source: io::Error,
    },

    #[error("'{}' is locked by another writer", .path.display())]
    LockContention {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("logic error: {0}")]
    Logic(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    Io,
    LockContention,
    Logic,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            StoreError::Io { .. } => ErrorKind::Io,
            StoreError::LockContention { .. } => ErrorKind::LockContention,
            StoreError::Logic(_) => ErrorKind::Logic,
        }
    }

    pub(crate) fn io(
        op: &'static str,
        path: impl Into<PathBuf>,
        offset: u64,
        length: u64,
        source: io::Error,
    ) -> Self {
        StoreError::Io {
            op,
            path: path.into(),
            offset,
            length,
            source,
        }
    }
}

/// Returns the category of the first [`StoreError`] found in the report's
/// cause chain.
pub fn kind_of(report: &eyre::Report) -> Option<ErrorKind> {
    report
        .chain()
        .find_map(|cause| cause.downcast_ref::<StoreError>())
        .map(StoreError::kind)
}
