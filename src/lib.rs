//! # mfstore - Growable Memory-Mapped File Storage
//!
//! mfstore lays out named, fixed-stride regions ("sections") inside a single
//! file, grows the file and its memory mapping in page-granular chunks as
//! data is appended, repairs an interrupted growth after an unclean shutdown,
//! and admits one writer at a time through an OS advisory lock.
//!
//! - **Zero-copy access**: sections, elements and the append window are
//!   slices straight into the mapping
//! - **No sparse holes**: every byte a mapping can touch is committed on disk
//!   before it is mapped
//! - **Crash repair without a journal**: a pending/committed size pair for
//!   record stores, a backward zero-scan for append files
//!
//! ## Quick Start
//!
//! ```ignore
//! use mfstore::{MappedFile, Section, StorageFile, StoreOptions};
//!
//! let options = StoreOptions::new();
//!
//! // Record store: fixed sections, the last one can grow.
//! let mut store = StorageFile::create(
//!     "points.mfs",
//!     [Section::new("points", 16, 1024)?],
//!     &options,
//! )?;
//! store.element_mut(2, 0)?.copy_from_slice(&[0u8; 16]);
//! store.extend_last_section(1024)?;
//! store.close()?;
//!
//! // Append file: grows by chunks, truncated to the data on close.
//! let log = MappedFile::open_for_write("events.log", &options)?;
//! log.write(b"started\n")?;
//! log.flush_and_truncate()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │        LogSink  (PlainFile | MappedFile)     │
//! ├──────────────────────┬───────────────────────┤
//! │ StorageFile          │ MappedFile            │
//! │ header + SectionTable│ MappingWindow         │
//! │ reconcile on open    │ zero-scan on open     │
//! ├──────────────────────┴───────────────────────┤
//! │ ensure_backing_store │ acquire_writer_lock   │
//! ├──────────────────────────────────────────────┤
//! │ granularity checks   │ StoreError / kind_of  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## File Layout (record store)
//!
//! ```text
//! [0, g)        StoreHeader: magic, granularity, committed/pending sizes
//! [g, 2g)       section table, one 128-byte SectionRecord per section
//! [2g, ...)     user sections, each padded to the granularity
//! ```
//!
//! ## Module Overview
//!
//! - [`granularity`]: alignment and range checks shared by everything else
//! - [`section`]: section descriptors and the self-describing table
//! - [`storage`]: allocation, locking, mapping, reconciliation, both stores
//! - [`sink`]: line-oriented log sinks over a plain or mapped file
//! - [`config`]: constants and per-instance [`StoreOptions`]
//! - [`error`]: the [`StoreError`] taxonomy and [`kind_of`]

#[macro_use]
mod macros;

pub mod config;
pub mod error;
pub mod granularity;
pub mod section;
pub mod sink;
pub mod storage;

pub use config::StoreOptions;
pub use error::{kind_of, ErrorKind, StoreError};
pub use granularity::{check_extent, check_granularity, check_multiple, OnViolation};
pub use section::{Section, SectionTable, TableState};
pub use sink::{LogSink, PlainFileSink};
pub use storage::{
    ensure_backing_store, MappedFile, Reconciliation, StorageFile, WindowLayout,
};
