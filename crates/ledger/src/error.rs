//! Ledger-layer error model.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::account::StockAccountId;
use crate::entry::LedgerEntryId;
use crate::period::PeriodStatus;

/// Deterministic business failures of the stock ledger.
///
/// All variants are recoverable validation failures returned to the
/// calling document. `LockedEntry` and `ImmutableEntry` signal a caller
/// trying to mutate history; they are raised as ordinary errors but should
/// be treated as defects to fix in the caller. `ReconciliationMismatch` is
/// the one condition serious enough to halt further writes to the account
/// until someone investigates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The change would drive the balance negative and the account's
    /// policy forbids that.
    #[error("insufficient stock: {available} available, {requested} requested")]
    InsufficientStock {
        available: Decimal,
        requested: Decimal,
    },

    /// The accounting period owning the transaction date rejects postings.
    #[error("accounting period {period} is {status} and rejects new entries")]
    PeriodClosed { period: String, status: PeriodStatus },

    /// The entry was locked by a period close and can no longer change.
    #[error("ledger entry {0} is locked")]
    LockedEntry(LedgerEntryId),

    /// Ledger entries are never deleted. Not a default, a hard invariant.
    #[error("ledger entry {0} is immutable and cannot be deleted")]
    ImmutableEntry(LedgerEntryId),

    /// The stored balance does not match the replayed ledger history.
    #[error("reconciliation mismatch on account {account}: expected {expected}, found {actual}")]
    ReconciliationMismatch {
        account: StockAccountId,
        /// Balance the ledger history replays to.
        expected: Decimal,
        /// Balance actually captured or stored.
        actual: Decimal,
    },

    /// The account was halted after a reconciliation mismatch and rejects
    /// postings until the hold is released.
    #[error("account {0} is halted pending reconciliation review")]
    AccountHalted(StockAccountId),

    /// A period lifecycle operation was attempted from the wrong state.
    #[error("invalid period transition: {from} -> {to}")]
    InvalidTransition { from: PeriodStatus, to: PeriodStatus },

    /// Two periods would cover overlapping date ranges.
    #[error("period {candidate} overlaps existing period {existing}")]
    OverlappingPeriod { candidate: String, existing: String },

    /// A period's start date lies after its end date.
    #[error("period start {start} is after end {end}")]
    InvalidPeriodRange { start: NaiveDate, end: NaiveDate },

    /// A quantity failed validation (zero movement, non-positive
    /// reservation amount, non-positive factor snapshot).
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// A posting or replay was handed entries of a different account.
    #[error("expected account {expected}, got {actual}")]
    AccountMismatch {
        expected: StockAccountId,
        actual: StockAccountId,
    },
}
