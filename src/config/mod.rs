//! # Configuration
//!
//! - [`constants`]: numeric configuration values with dependency documentation
//! - [`StoreOptions`]: per-instance settings for `StorageFile`, `MappedFile`
//!   and the log sinks
//!
//! ## StoreOptions
//!
//! | Option        | Default                 | Description                             |
//! |---------------|-------------------------|-----------------------------------------|
//! | granularity   | `DEFAULT_GRANULARITY`   | Alignment of offsets, lengths, mappings |
//! | chunk_size    | `DEFAULT_CHUNK_SIZE`    | Minimum growth step of a `MappedFile`   |
//! | buffer_size   | `DEFAULT_BUFFER_SIZE`   | Write buffer of the plain-file sink     |
//!
//! Each store keeps its own copy of the options; nothing is shared between
//! instances.
//!
//! ```ignore
//! let options = StoreOptions::new()
//!     .granularity(4 * 65536)
//!     .chunk_size(16 * 65536);
//! let log = MappedFile::open_for_write("app.log", &options)?;
//! ```

pub mod constants;
pub use constants::*;

use eyre::{Result, WrapErr};

use crate::granularity::{check_granularity, check_multiple};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    granularity: u64,
    chunk_size: u64,
    buffer_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self {
            granularity: DEFAULT_GRANULARITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Sets the storage granularity. The chunk size must remain a multiple
    /// of it.
    pub fn granularity(mut self, granularity: u64) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn granularity_value(&self) -> u64 {
        self.granularity
    }

    pub fn chunk_size_value(&self) -> u64 {
        self.chunk_size
    }

    pub fn buffer_size_value(&self) -> usize {
        self.buffer_size
    }

    /// Checks every field. Nothing is adjusted: a non-granular chunk size is
    /// rejected rather than rounded.
    pub fn validate(&self) -> Result<()> {
        check_granularity(self.granularity).wrap_err("invalid store options")?;
        check_multiple(self.chunk_size, self.granularity, "chunk size")
            .wrap_err("invalid store options")?;
        ensure_arg!(
            self.buffer_size > 0,
            "buffer size must be greater than zero"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kind_of, ErrorKind};

    #[test]
    fn defaults_are_valid() {
        let options = StoreOptions::default();

        options.validate().unwrap();
        assert_eq!(options.granularity_value(), DEFAULT_GRANULARITY);
        assert_eq!(options.chunk_size_value(), DEFAULT_CHUNK_SIZE);
        assert_eq!(options.buffer_size_value(), DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn chunk_size_must_be_granular() {
        let options = StoreOptions::new().chunk_size(DEFAULT_GRANULARITY + 1);

        let err = options.validate().unwrap_err();

        assert_eq!(kind_of(&err), Some(ErrorKind::InvalidArgument));
        assert!(format!("{:?}", err).contains("chunk size"));
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        let err = StoreOptions::new().buffer_size(0).validate().unwrap_err();

        assert_eq!(kind_of(&err), Some(ErrorKind::InvalidArgument));
    }

    #[test]
    fn instances_are_independent() {
        let a = StoreOptions::new().buffer_size(1024);
        let b = StoreOptions::new().buffer_size(4096);

        assert_eq!(a.buffer_size_value(), 1024);
        assert_eq!(b.buffer_size_value(), 4096);
    }
}
