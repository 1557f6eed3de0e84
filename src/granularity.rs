//! # Granularity Validation
//!
//! Pure argument checks shared by every other component. A *granularity* is a
//! positive byte count that is an integral multiple of the OS allocation
//! granularity (the smallest unit the platform can map or truncate to). All
//! persisted offsets and lengths are multiples of the store's granularity.
//!
//! None of these functions adjust their input: a bad value is an
//! `InvalidArgument`, never silently rounded. Arithmetic that would overflow
//! `u64` fails instead of wrapping or saturating.
//!
//! ## OS Allocation Granularity
//!
//! | Platform      | Source                          | Typical value |
//! |---------------|---------------------------------|---------------|
//! | Linux/macOS   | `sysconf(_SC_PAGESIZE)`         | 4 KiB / 16 KiB|
//! | Windows       | fixed allocation granularity    | 64 KiB        |
//!
//! The value is queried once per process and cached.

use std::sync::OnceLock;

use eyre::Result;

/// What `check_extent` does when the range does not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnViolation {
    ReturnFalse,
    Fail,
}

pub fn os_allocation_granularity() -> u64 {
    static GRANULARITY: OnceLock<u64> = OnceLock::new();
    *GRANULARITY.get_or_init(query_allocation_granularity)
}

#[cfg(unix)]
fn query_allocation_granularity() -> u64 {
    // SAFETY: sysconf has no preconditions and only reads process-wide
    // configuration.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}

#[cfg(windows)]
fn query_allocation_granularity() -> u64 {
    crate::config::WINDOWS_ALLOCATION_GRANULARITY
}

#[cfg(not(any(unix, windows)))]
fn query_allocation_granularity() -> u64 {
    4096
}

/// Fails unless `granularity` is a positive multiple of the OS allocation
/// granularity.
pub fn check_granularity(granularity: u64) -> Result<()> {
    check_granularity_against(granularity, os_allocation_granularity())
}

pub(crate) fn check_granularity_against(granularity: u64, base: u64) -> Result<()> {
    ensure_arg!(granularity > 0, "granularity must be greater than zero");
    ensure_arg!(
        granularity % base == 0,
        "granularity {} is not a multiple of the OS allocation granularity {}",
        granularity,
        base
    );
    Ok(())
}

/// Fails unless `value` is a positive multiple of `granularity`. `role`
/// names the value in the error message ("file size", "offset", ...).
pub fn check_multiple(value: u64, granularity: u64, role: &str) -> Result<()> {
    ensure_arg!(
        granularity > 0,
        "cannot check {} {} against a zero granularity",
        role,
        value
    );
    ensure_arg!(value > 0, "{} must be greater than zero", role);
    ensure_arg!(
        value % granularity == 0,
        "{} {} is not a multiple of granularity {}",
        role,
        value,
        granularity
    );
    Ok(())
}

/// Returns whether `[offset, offset + length)` lies inside `total_size`
/// (`offset < total_size` and `offset + length <= total_size`). With
/// `OnViolation::Fail` a range that does not fit is an error instead of
/// `Ok(false)`. An overflowing range always fails.
pub fn check_extent(
    total_size: u64,
    offset: u64,
    length: u64,
    on_violation: OnViolation,
) -> Result<bool> {
    let Some(end) = offset.checked_add(length) else {
        return Err(invalid_arg!(
            "extent offset {} + length {} overflows",
            offset,
            length
        ));
    };

    let fits = offset < total_size && end <= total_size;

    match (fits, on_violation) {
        (true, _) => Ok(true),
        (false, OnViolation::ReturnFalse) => Ok(false),
        (false, OnViolation::Fail) => Err(invalid_arg!(
            "extent [{}, {}) does not fit inside {} bytes",
            offset,
            end,
            total_size
        )),
    }
}

/// Rounds `value` up to the next multiple of `granularity`. Zero stays zero.
pub fn round_up(value: u64, granularity: u64) -> Result<u64> {
    ensure_arg!(granularity > 0, "cannot round {} to a zero granularity", value);
    let remainder = value % granularity;
    if remainder == 0 {
        return Ok(value);
    }
    value
        .checked_add(granularity - remainder)
        .ok_or_else(|| invalid_arg!("rounding {} up to {} overflows", value, granularity))
}

/// Rounds `value` down to a multiple of `granularity`.
pub fn align_down(value: u64, granularity: u64) -> Result<u64> {
    ensure_arg!(granularity > 0, "cannot align {} to a zero granularity", value);
    Ok(value - value % granularity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kind_of, ErrorKind};

    #[test]
    fn os_granularity_is_a_power_of_two() {
        let base = os_allocation_granularity();

        assert!(base >= 512);
        assert!(base.is_power_of_two());
        assert_eq!(base, os_allocation_granularity());
    }

    #[test]
    fn granularity_must_be_positive_multiple_of_base() {
        assert!(check_granularity_against(4096, 4096).is_ok());
        assert!(check_granularity_against(65536, 4096).is_ok());

        let zero = check_granularity_against(0, 4096).unwrap_err();
        assert_eq!(kind_of(&zero), Some(ErrorKind::InvalidArgument));

        let odd = check_granularity_against(6000, 4096).unwrap_err();
        assert_eq!(kind_of(&odd), Some(ErrorKind::InvalidArgument));
        assert!(odd.to_string().contains("6000"));
    }

    #[test]
    fn default_granularity_passes_on_this_platform() {
        check_granularity(crate::config::DEFAULT_GRANULARITY).unwrap();
    }

    #[test]
    fn check_multiple_names_the_role() {
        assert!(check_multiple(8192, 4096, "file size").is_ok());

        let err = check_multiple(8193, 4096, "file size").unwrap_err();
        assert!(err.to_string().contains("file size 8193"));

        let err = check_multiple(0, 4096, "offset").unwrap_err();
        assert!(err.to_string().contains("offset must be greater than zero"));

        assert!(check_multiple(4096, 0, "offset").is_err());
    }

    #[test]
    fn check_extent_policies() {
        assert!(check_extent(100, 0, 100, OnViolation::Fail).unwrap());
        assert!(check_extent(100, 99, 1, OnViolation::Fail).unwrap());
        assert!(!check_extent(100, 100, 0, OnViolation::ReturnFalse).unwrap());
        assert!(!check_extent(100, 50, 51, OnViolation::ReturnFalse).unwrap());

        let err = check_extent(100, 50, 51, OnViolation::Fail).unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::InvalidArgument));
        assert!(err.to_string().contains("[50, 101)"));
    }

    #[test]
    fn check_extent_overflow_always_fails() {
        let err = check_extent(u64::MAX, u64::MAX, 2, OnViolation::ReturnFalse).unwrap_err();
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn rounding() {
        assert_eq!(round_up(0, 4096).unwrap(), 0);
        assert_eq!(round_up(1, 4096).unwrap(), 4096);
        assert_eq!(round_up(4096, 4096).unwrap(), 4096);
        assert_eq!(round_up(4097, 4096).unwrap(), 8192);
        assert!(round_up(u64::MAX, 4096).is_err());
        assert!(round_up(10, 0).is_err());

        assert_eq!(align_down(0, 4096).unwrap(), 0);
        assert_eq!(align_down(4095, 4096).unwrap(), 0);
        assert_eq!(align_down(8191, 4096).unwrap(), 4096);
        assert!(align_down(10, 0).is_err());
    }
}
