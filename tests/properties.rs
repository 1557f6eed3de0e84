//! # Property Tests
//!
//! Quantified checks over the pure layer and the append path:
//! - `check_multiple` accepts exactly the positive multiples of a granularity
//! - any appended section sequence is contiguous and passes `check_all`
//! - `ensure_backing_store` is idempotent
//! - arbitrary write sequences through `MappedFile` read back unchanged

use mfstore::granularity::os_allocation_granularity;
use mfstore::{
    check_granularity, check_multiple, ensure_backing_store, MappedFile, Section, SectionTable,
    StoreOptions,
};
use proptest::prelude::*;
use tempfile::tempdir;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn check_multiple_accepts_exactly_positive_multiples(
        factor in 1u64..64,
        quotient in 0u64..10_000,
        remainder_seed in 0u64..u64::MAX,
    ) {
        let g = factor * os_allocation_granularity();
        prop_assert!(check_granularity(g).is_ok());

        let remainder = remainder_seed % g;
        let value = quotient * g + remainder;
        let expected = value > 0 && remainder == 0;

        prop_assert_eq!(check_multiple(value, g, "value").is_ok(), expected);
    }

    #[test]
    fn appended_sections_are_contiguous(
        shapes in prop::collection::vec((1u64..5_000, 1u64..64), 1..12),
        factor in 1u64..4,
    ) {
        let g = factor * os_allocation_granularity();
        let mut table = SectionTable::new();
        for (i, (size, count)) in shapes.iter().enumerate() {
            let section = Section::new(&format!("s{i}"), *size, *count).unwrap();
            table.append_section(section, g, false).unwrap();
        }
        table.fixup_all(g).unwrap();
        table.check_all(g, 0).unwrap();

        let mut expected_offset = 0;
        for (i, section) in table.iter().enumerate() {
            prop_assert_eq!(section.index(), i as u64);
            prop_assert_eq!(section.offset(), expected_offset);
            prop_assert_eq!(section.length_actual(), shapes[i].0 * shapes[i].1);
            prop_assert_eq!(section.length_padded() % g, 0);
            prop_assert!(section.length_padded() >= section.length_actual());
            prop_assert!(section.length_padded() - section.length_actual() < g);
            expected_offset += section.length_padded();
        }
        prop_assert_eq!(table.total_size(), expected_offset);
        table.check_all(g, expected_offset).unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn ensure_backing_store_twice_leaves_size_unchanged(
        offset_units in 0u64..8,
        length_units in 1u64..8,
    ) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alloc.bin");
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        let g = os_allocation_granularity();

        ensure_backing_store(&file, &path, offset_units * g, length_units * g).unwrap();
        let first = file.metadata().unwrap().len();
        ensure_backing_store(&file, &path, offset_units * g, length_units * g).unwrap();

        prop_assert_eq!(first, (offset_units + length_units) * g);
        prop_assert_eq!(file.metadata().unwrap().len(), first);
    }

    #[test]
    fn mapped_writes_read_back_unchanged(
        pieces in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..20_000), 0..12),
    ) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.log");
        let g = os_allocation_granularity();
        let options = StoreOptions::new().granularity(g).chunk_size(2 * g);

        let mapped = MappedFile::open_for_write(&path, &options).unwrap();
        for piece in &pieces {
            mapped.write(piece).unwrap();
        }
        mapped.flush_and_truncate().unwrap();

        let expected: Vec<u8> = pieces.concat();
        prop_assert_eq!(std::fs::read(&path).unwrap(), expected);
    }
}
