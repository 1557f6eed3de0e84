//! # Storage Module
//!
//! The OS-facing half of the crate: files, advisory locks, committed disk
//! blocks and memory mappings. Everything above it works on plain offsets and
//! byte slices.
//!
//! ## Components
//!
//! ```text
//!            ┌──────────────┐        ┌──────────────┐
//!            │ StorageFile  │        │  MappedFile  │
//!            │ record store │        │ append path  │
//!            └──────┬───────┘        └──────┬───────┘
//!                   │ reconcile             │ MappingWindow
//!                   ▼                       ▼
//!        ┌─────────────────────┬────────────────────────┐
//!        │ acquire_writer_lock │ ensure_backing_store   │
//!        └─────────────────────┴────────────────────────┘
//! ```
//!
//! - [`StorageFile`]: a fixed section layout with a persisted header. Grows
//!   only by appending elements to its last section, using the
//!   pending/committed protocol that [`reconcile`] repairs after a crash.
//! - [`MappedFile`]: a growable window over the tail of an append-only file.
//!   Recovers its write position by scanning back over the zero tail.
//! - [`ensure_backing_store`]: commits real blocks for a byte range so no
//!   write through a mapping can hit a sparse hole.
//! - [`acquire_writer_lock`]: non-blocking exclusive advisory lock, released
//!   when the file handle closes.
//!
//! ## Safety Model
//!
//! A remap invalidates the old mapping. The two front ends keep that from
//! being observable in different ways:
//!
//! | Type          | Guard                                               |
//! |---------------|-----------------------------------------------------|
//! | `StorageFile` | borrow checker: slices borrow `&self`, growth needs `&mut self` |
//! | `MappedFile`  | one mutex around all state; no slice leaves the lock |
//!
//! ## Platform Behavior
//!
//! ### Linux/Android
//! - `posix_fallocate` commits ranges; `flock` backs the writer lock
//!
//! ### macOS/BSD
//! - `F_PREALLOCATE` + `ftruncate` through `fs2`; `flock` lock
//!
//! ### Windows
//! - `SetFileInformationByHandle` through `fs2`; `LockFileEx` lock
//! - The default granularity (64 KiB) matches the allocation granularity

mod allocate;
mod headers;
mod lock;
mod mapping;
mod mmap;
mod reconcile;
mod window;

pub use allocate::ensure_backing_store;
pub use headers::{SectionRecord, StoreHeader};
pub use lock::acquire_writer_lock;
pub use mapping::MappedFile;
pub use mmap::StorageFile;
pub use reconcile::{reconcile, PersistedSizes, Reconciliation};
pub use window::{MappingWindow, WindowLayout};
