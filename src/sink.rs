//! # Log Sinks
//!
//! A log front end formats lines; a [`LogSink`] places the bytes. The set of
//! sinks is closed, so it is an enum dispatched by `match`:
//!
//! | Variant      | Backing                                   | Unclean shutdown            |
//! |--------------|-------------------------------------------|-----------------------------|
//! | `PlainFile`  | append-mode file behind a `BufWriter`     | loses the unflushed buffer  |
//! | `MappedFile` | [`MappedFile`] growable mapping           | recovered by the zero-scan  |
//!
//! The plain sink's buffer size comes from the instance's [`StoreOptions`];
//! no buffer is shared between sinks.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use eyre::Result;
use tracing::debug;

use crate::config::StoreOptions;
use crate::error::StoreError;
use crate::storage::MappedFile;

#[derive(Debug)]
pub struct PlainFileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
}

impl PlainFileSink {
    pub fn open<P: AsRef<Path>>(path: P, options: &StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        options.validate()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StoreError::io("open", path, 0, 0, e))?;

        debug!(
            path = %path.display(),
            buffer_size = options.buffer_size_value(),
            "opened plain log sink"
        );

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::with_capacity(options.buffer_size_value(), file),
            bytes_written: 0,
        })
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .map_err(|e| StoreError::io("write", &self.path, self.bytes_written, bytes.len() as u64, e))?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| StoreError::io("flush", &self.path, 0, self.bytes_written, e).into())
    }

    pub fn buffer_size(&self) -> usize {
        self.writer.capacity()
    }

    /// Bytes accepted by this sink since it was opened.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| StoreError::io("fsync", &self.path, 0, self.bytes_written, e))?;
        Ok(())
    }
}

#[derive(Debug)]
pub enum LogSink {
    PlainFile(PlainFileSink),
    MappedFile(MappedFile),
}

impl LogSink {
    pub fn open_plain<P: AsRef<Path>>(path: P, options: &StoreOptions) -> Result<Self> {
        Ok(LogSink::PlainFile(PlainFileSink::open(path, options)?))
    }

    pub fn open_mapped<P: AsRef<Path>>(path: P, options: &StoreOptions) -> Result<Self> {
        Ok(LogSink::MappedFile(MappedFile::open_for_write(path, options)?))
    }

    /// Appends `line` followed by a newline.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.write_bytes(&bytes)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            LogSink::PlainFile(sink) => sink.write_bytes(bytes),
            LogSink::MappedFile(mapped) => mapped.write(bytes),
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        match self {
            LogSink::PlainFile(sink) => sink.flush(),
            LogSink::MappedFile(mapped) => mapped.flush(),
        }
    }

    pub fn file_name(&self) -> &Path {
        match self {
            LogSink::PlainFile(sink) => &sink.path,
            LogSink::MappedFile(mapped) => mapped.file_name(),
        }
    }

    /// Flushes and releases the sink. A mapped sink is truncated to its
    /// write position. Failures propagate.
    pub fn close(self) -> Result<()> {
        match self {
            LogSink::PlainFile(sink) => sink.close(),
            LogSink::MappedFile(mapped) => mapped.flush_and_truncate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::granularity::os_allocation_granularity;
    use tempfile::tempdir;

    fn options() -> StoreOptions {
        let g = os_allocation_granularity();
        StoreOptions::new().granularity(g).chunk_size(2 * g)
    }

    #[test]
    fn plain_sink_appends_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.log");

        let mut sink = LogSink::open_plain(&path, &options()).unwrap();
        sink.write_line("first").unwrap();
        sink.write_line("second").unwrap();
        sink.close().unwrap();

        let mut sink = LogSink::open_plain(&path, &options()).unwrap();
        sink.write_line("third").unwrap();
        sink.close().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\nthird\n");
    }

    #[test]
    fn plain_sinks_keep_their_own_buffer_size() {
        let dir = tempdir().unwrap();

        let small = PlainFileSink::open(dir.path().join("a.log"), &options().buffer_size(64)).unwrap();
        let large = PlainFileSink::open(dir.path().join("b.log"), &options().buffer_size(1 << 16)).unwrap();

        assert_eq!(small.buffer_size(), 64);
        assert_eq!(large.buffer_size(), 1 << 16);
    }

    #[test]
    fn plain_sink_holds_data_until_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.log");

        let mut sink = PlainFileSink::open(&path, &options().buffer_size(1024)).unwrap();
        sink.write_bytes(b"buffered").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"");

        sink.flush().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"buffered");
        assert_eq!(sink.bytes_written(), 8);
    }

    #[test]
    fn mapped_sink_truncates_on_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mapped.log");

        let mut sink = LogSink::open_mapped(&path, &options()).unwrap();
        sink.write_line("alpha").unwrap();
        sink.write_line("beta").unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.file_name(), path.as_path());
        sink.close().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "alpha\nbeta\n");
    }

    #[test]
    fn mapped_sink_spans_many_chunks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mapped.log");
        let line = "x".repeat(999);

        let mut sink = LogSink::open_mapped(&path, &options()).unwrap();
        for _ in 0..100 {
            sink.write_line(&line).unwrap();
        }
        sink.close().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.len(), 100_000);
        assert!(text.lines().all(|l| l == line));
    }
}
