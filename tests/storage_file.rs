//! # Record Store Tests
//!
//! End-to-end behaviour of `StorageFile`:
//! 1. Section layout matches the table rules on disk
//! 2. Interrupted growth is repaired on the next writer open
//! 3. States no recovery rule covers are refused
//!
//! ## Simulating Interrupted Growth
//!
//! Growth persists `pending = target` before touching the file and
//! `committed = target` after. The tests reproduce each crash point by
//! patching those two header fields (bytes 32..48) and resizing the file.

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use mfstore::granularity::os_allocation_granularity;
use mfstore::storage::StoreHeader;
use mfstore::{kind_of, ErrorKind, Section, StorageFile, StoreOptions};
use tempfile::tempdir;

fn g() -> u64 {
    os_allocation_granularity()
}

fn options() -> StoreOptions {
    StoreOptions::new().granularity(g()).chunk_size(g())
}

fn create_store(path: &Path) {
    let sections = vec![
        Section::new("points", 8, 10).unwrap(),
        Section::new("labels", 100, 3).unwrap(),
    ];
    let mut store = StorageFile::create(path, sections, &options()).unwrap();
    store.section_mut(2).unwrap().fill(0x11);
    store.section_mut(3).unwrap().fill(0x22);
    store.close().unwrap();
}

fn patch_sizes(path: &Path, committed: u64, pending: u64) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(32)).unwrap();
    file.write_all(&committed.to_le_bytes()).unwrap();
    file.write_all(&pending.to_le_bytes()).unwrap();
    file.sync_all().unwrap();
}

fn resize(path: &Path, len: u64) {
    OpenOptions::new()
        .write(true)
        .open(path)
        .unwrap()
        .set_len(len)
        .unwrap();
}

fn persisted_sizes(path: &Path) -> (u64, u64) {
    let bytes = fs::read(path).unwrap();
    let header = StoreHeader::from_bytes(&bytes).unwrap();
    (header.committed_size(), header.pending_size())
}

mod layout {
    use super::*;

    #[test]
    fn user_sections_follow_header_and_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mfs");
        create_store(&path);

        let store = StorageFile::open(&path).unwrap();
        let table = store.section_table();

        let points = table.get(2).unwrap();
        assert_eq!(points.offset(), 2 * g());
        assert_eq!(points.length_actual(), 80);
        assert_eq!(points.length_padded(), g());

        let labels = table.get(3).unwrap();
        assert_eq!(labels.offset(), 3 * g());
        assert_eq!(labels.length_actual(), 300);
        assert_eq!(labels.length_padded(), g());

        assert!(store.section(2).unwrap().iter().all(|&b| b == 0x11));
        assert!(store.section(3).unwrap().iter().all(|&b| b == 0x22));
    }

    #[test]
    fn padding_between_sections_is_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mfs");
        create_store(&path);

        let bytes = fs::read(&path).unwrap();
        let start = (2 * g() + 80) as usize;
        let end = (3 * g()) as usize;

        assert_eq!(bytes.len() as u64, 4 * g());
        assert!(bytes[start..end].iter().all(|&b| b == 0));
    }

    #[test]
    fn table_describes_itself() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mfs");
        create_store(&path);

        let store = StorageFile::open_read_only(&path).unwrap();
        let table = store.section_table();
        let own = table.get(1).unwrap();

        assert_eq!(own.element_size(), 128);
        assert_eq!(own.element_count(), table.len() as u64);
        table.check_self_describing(1, store.granularity()).unwrap();
    }

    #[test]
    fn create_replaces_an_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mfs");
        fs::write(&path, vec![0xFFu8; (10 * g()) as usize]).unwrap();

        create_store(&path);

        assert_eq!(fs::metadata(&path).unwrap().len(), 4 * g());
        StorageFile::open(&path).unwrap();
    }
}

mod reconciliation {
    use super::*;

    #[test]
    fn growth_that_never_reached_the_file_is_rolled_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mfs");
        create_store(&path);
        patch_sizes(&path, 4 * g(), 6 * g());

        let store = StorageFile::open(&path).unwrap();

        assert_eq!(store.file_size(), 4 * g());
        assert_eq!(store.file_size_pending(), 4 * g());
        store.close().unwrap();
        assert_eq!(persisted_sizes(&path), (4 * g(), 4 * g()));
    }

    #[test]
    fn growth_that_reached_the_file_is_committed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mfs");
        create_store(&path);
        patch_sizes(&path, 4 * g(), 6 * g());
        resize(&path, 6 * g());

        let store = StorageFile::open(&path).unwrap();

        assert_eq!(store.file_size(), 6 * g());
        assert_eq!(store.file_size_pending(), 6 * g());
        assert_eq!(store.mmap_size(), 6 * g());
        assert!(store.section(3).unwrap().iter().all(|&b| b == 0x22));
        store.close().unwrap();
        assert_eq!(persisted_sizes(&path), (6 * g(), 6 * g()));
    }

    #[test]
    fn size_between_committed_and_pending_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mfs");
        create_store(&path);
        patch_sizes(&path, 4 * g(), 6 * g());
        resize(&path, 5 * g());

        let err = StorageFile::open(&path).unwrap_err();

        assert_eq!(kind_of(&err), Some(ErrorKind::Logic));
        let report = format!("{:?}", err);
        assert!(report.contains(&(5 * g()).to_string()), "{report}");
        assert_eq!(persisted_sizes(&path), (4 * g(), 6 * g()));
    }

    #[test]
    fn file_shrunk_below_committed_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mfs");
        create_store(&path);
        resize(&path, 3 * g());

        let err = StorageFile::open(&path).unwrap_err();

        assert_eq!(kind_of(&err), Some(ErrorKind::Logic));
    }

    #[test]
    fn file_beyond_pending_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mfs");
        create_store(&path);
        patch_sizes(&path, 4 * g(), 6 * g());
        resize(&path, 8 * g());

        let err = StorageFile::open(&path).unwrap_err();

        assert_eq!(kind_of(&err), Some(ErrorKind::Logic));
    }

    #[test]
    fn reader_tolerates_a_file_mid_growth() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mfs");
        create_store(&path);
        patch_sizes(&path, 4 * g(), 6 * g());
        resize(&path, 5 * g());

        let store = StorageFile::open_read_only(&path).unwrap();

        assert_eq!(store.file_size(), 4 * g());
        assert_eq!(store.file_size_pending(), 6 * g());
        assert!(store.section(2).unwrap().iter().all(|&b| b == 0x11));
    }
}

mod growth {
    use super::*;

    #[test]
    fn repeated_extension_keeps_earlier_sections_in_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mfs");
        create_store(&path);

        let mut store = StorageFile::open(&path).unwrap();
        let before = store.section_table().get(2).unwrap().clone();
        for round in 0..5u64 {
            store.extend_last_section(g() / 50).unwrap();
            let last = store.section_table().get(3).unwrap().element_count() - 1;
            store.element_mut(3, last).unwrap()[0] = round as u8 + 1;
        }

        assert_eq!(store.section_table().get(2).unwrap(), &before);
        assert_eq!(store.file_size(), store.section_table().total_size());
        assert_eq!(store.file_size() % g(), 0);
        store.close().unwrap();

        let (committed, pending) = persisted_sizes(&path);
        assert_eq!(committed, pending);
        assert_eq!(committed, fs::metadata(&path).unwrap().len());

        let store = StorageFile::open(&path).unwrap();
        let last = store.section_table().get(3).unwrap().element_count() - 1;
        assert_eq!(store.element(3, last).unwrap()[0], 5);
        assert!(store.section(2).unwrap().iter().all(|&b| b == 0x11));
    }

    #[test]
    fn zero_extension_is_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mfs");
        create_store(&path);

        let mut store = StorageFile::open(&path).unwrap();
        let err = store.extend_last_section(0).unwrap_err();

        assert_eq!(kind_of(&err), Some(ErrorKind::InvalidArgument));
        assert_eq!(store.file_size(), 4 * g());
    }

    #[test]
    fn store_without_user_sections_cannot_extend() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.mfs");

        let mut store = StorageFile::create(&path, Vec::new(), &options()).unwrap();

        assert_eq!(store.section_table().len(), 2);
        assert_eq!(store.file_size(), 2 * g());
        let err = store.extend_last_section(1).unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::InvalidArgument));
    }
}
