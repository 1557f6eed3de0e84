//! # Pending / Committed Size Reconciliation
//!
//! Growth of a record store is a two-phase protocol:
//!
//! ```text
//! 1. persist pending = target        (committed unchanged)
//! 2. ensure backing store [committed, target)
//! 3. persist committed = target      (pending == committed again)
//! ```
//!
//! A crash can stop the sequence anywhere. On the next writer open the
//! persisted pair is compared with the file's actual size:
//!
//! | State                          | Action                                   |
//! |--------------------------------|------------------------------------------|
//! | `pending == committed`         | nothing to do                            |
//! | `actual == committed`          | growth never started: pending = committed|
//! | `actual == pending`            | redo step 2, then committed = pending    |
//! | any other `actual`             | `Logic` error                            |
//!
//! The caller persists the reconciled sizes. Step 2 is idempotent, which is
//! what makes redoing it safe.

use eyre::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedSizes {
    pub committed: u64,
    pub pending: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Clean,
    /// The interrupted growth had not touched the file; `abandoned` was its
    /// target.
    RolledBack { abandoned: u64 },
    /// The interrupted growth was finished.
    Completed { from: u64, to: u64 },
}

/// Brings `sizes` back to `pending == committed` given the file's actual
/// size. `ensure_backing_store(offset, length)` re-runs step 2. On error
/// `sizes` is left untouched.
pub fn reconcile<F>(
    sizes: &mut PersistedSizes,
    actual_size: u64,
    ensure_backing_store: F,
) -> Result<Reconciliation>
where
    F: FnOnce(u64, u64) -> Result<()>,
{
    let PersistedSizes { committed, pending } = *sizes;

    if pending == committed {
        return Ok(Reconciliation::Clean);
    }
    if pending < committed {
        return Err(logic_err!(
            "pending size {} is below committed size {}",
            pending,
            committed
        ));
    }
    if actual_size < committed {
        return Err(logic_err!(
            "file size {} is below committed size {} (pending {})",
            actual_size,
            committed,
            pending
        ));
    }
    if actual_size > pending {
        return Err(logic_err!(
            "file size {} is beyond pending size {} (committed {})",
            actual_size,
            pending,
            committed
        ));
    }

    if actual_size == committed {
        sizes.pending = committed;
        return Ok(Reconciliation::RolledBack { abandoned: pending });
    }
    if actual_size == pending {
        ensure_backing_store(committed, pending - committed)?;
        sizes.committed = pending;
        return Ok(Reconciliation::Completed {
            from: committed,
            to: pending,
        });
    }

    Err(logic_err!(
        "file size {} matches neither committed size {} nor pending size {}",
        actual_size,
        committed,
        pending
    ))
}
