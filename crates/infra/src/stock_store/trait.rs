use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use wardstock_core::ActorId;
use wardstock_ledger::{
    AccountingPeriod, LedgerEntry, LedgerEntryId, LedgerError, PeriodId, Posting, StockAccount,
    StockAccountId,
};

/// Stock store operation error.
///
/// Splits deterministic domain rejections (the caller's problem) from
/// storage faults (connections, serialization, corrupt rows). Domain
/// rejections carry the full [`LedgerError`] taxonomy so callers can
/// translate them into actionable messages.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A business rule rejected the operation.
    #[error(transparent)]
    Domain(#[from] LedgerError),

    #[error("stock account not found: {0}")]
    AccountNotFound(StockAccountId),

    #[error("accounting period not found: {0}")]
    PeriodNotFound(PeriodId),

    #[error("ledger entry not found: {0}")]
    EntryNotFound(LedgerEntryId),

    /// Infrastructure failure. Retryable from the caller's point of view;
    /// the enclosing transaction has been rolled back.
    #[error("storage failure in {operation}: {message}")]
    Storage { operation: String, message: String },
}

impl StoreError {
    pub(crate) fn storage(operation: &str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

/// The single writer of stock balances.
///
/// Every implementation must guarantee, for [`record`](StockStore::record):
///
/// 1. An exclusive lock on the target account for the whole
///    read-modify-write sequence. Concurrent calls against the same
///    account serialize; different accounts proceed independently.
/// 2. The accounting period is resolved from the transaction date unless
///    the posting targets a period explicitly, and a period that rejects
///    postings fails the call with [`LedgerError::PeriodClosed`].
/// 3. Entry insertion and balance update commit as one atomic unit. A
///    failure anywhere rolls back both; no partial state is observable.
///
/// For a single account, the recorded before/after values form a total
/// order consistent with lock-acquisition order. Entries are never
/// deleted; period closing is the only caller of the bulk entry lock.
#[async_trait]
pub trait StockStore: Send + Sync {
    async fn create_account(&self, account: StockAccount) -> Result<(), StoreError>;

    async fn account(&self, id: StockAccountId) -> Result<StockAccount, StoreError>;

    /// Record one stock movement: lock the account row, validate the
    /// period gate, capture before/after, insert the immutable entry and
    /// update the balance, atomically.
    async fn record(&self, posting: Posting) -> Result<LedgerEntry, StoreError>;

    /// Set stock aside under the same row lock discipline as `record`.
    /// Writes no ledger entry.
    async fn reserve(
        &self,
        id: StockAccountId,
        quantity: Decimal,
    ) -> Result<Decimal, StoreError>;

    /// Return reserved stock to the available pool.
    async fn release(
        &self,
        id: StockAccountId,
        quantity: Decimal,
    ) -> Result<Decimal, StoreError>;

    /// Full ledger history of an account, in creation order.
    async fn entries(&self, id: StockAccountId) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Attach a note to an unlocked entry. Fails with
    /// [`LedgerError::LockedEntry`] once the owning period has closed.
    async fn annotate_entry(
        &self,
        id: LedgerEntryId,
        note: &str,
    ) -> Result<LedgerEntry, StoreError>;

    /// Always fails with [`LedgerError::ImmutableEntry`] for an existing
    /// entry. The method exists so the invariant has a single, testable
    /// enforcement point.
    async fn delete_entry(&self, id: LedgerEntryId) -> Result<(), StoreError>;

    /// Persist a period after validating it overlaps no existing one.
    async fn create_period(&self, period: AccountingPeriod) -> Result<(), StoreError>;

    async fn period(&self, id: PeriodId) -> Result<AccountingPeriod, StoreError>;

    /// Close a period: bulk-lock its unlocked entries, stamp who and
    /// when, transition the state. One transaction; a reader never
    /// observes a half-locked set of entries.
    async fn close_period(
        &self,
        id: PeriodId,
        actor: ActorId,
    ) -> Result<AccountingPeriod, StoreError>;

    /// Undo a close before locking: bulk-unlock entries, clear the stamp.
    async fn reopen_period(&self, id: PeriodId) -> Result<AccountingPeriod, StoreError>;

    /// Permanently lock a closed period.
    async fn lock_period(&self, id: PeriodId) -> Result<AccountingPeriod, StoreError>;

    /// Replay the account's history against its stored balance. On a
    /// mismatch the account is halted and the mismatch returned.
    async fn verify_account(&self, id: StockAccountId) -> Result<(), StoreError>;

    /// Lift a reconciliation hold after investigation.
    async fn release_hold(&self, id: StockAccountId) -> Result<(), StoreError>;
}
