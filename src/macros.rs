//! # Internal Macros
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that use
//! little-endian wrapper types (U32, U64). Used by the on-disk records in
//! `storage::headers`.
//!
//! ```ignore
//! impl StoreHeader {
//!     zerocopy_accessors! {
//!         committed_size: u64,
//!         header_size: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn committed_size(&self) -> u64 { self.committed_size.get() }
//! // pub fn set_committed_size(&mut self, val: u64) { ... }
//! ```
//!
//! ## invalid_arg! / logic_err! / ensure_arg!
//!
//! Typed counterparts of `eyre::eyre!` and `eyre::ensure!`. They produce an
//! `eyre::Report` whose root cause is a [`StoreError`](crate::StoreError), so
//! the error category stays recoverable through [`kind_of`](crate::kind_of).

macro_rules! zerocopy_accessors {
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::little_endian::U32::new(val);
            }
        }
    };
    (@impl $field:ident, u64) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u64 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u64) {
                self.$field = ::zerocopy::little_endian::U64::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}

macro_rules! invalid_arg {
    ($($arg:tt)*) => {
        ::eyre::Report::new($crate::error::StoreError::InvalidArgument(format!($($arg)*)))
    };
}

macro_rules! logic_err {
    ($($arg:tt)*) => {
        ::eyre::Report::new($crate::error::StoreError::Logic(format!($($arg)*)))
    };
}

macro_rules! ensure_arg {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(invalid_arg!($($arg)*));
        }
    };
}
