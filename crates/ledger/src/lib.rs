//! Stock ledger domain module.
//!
//! This crate contains the business rules of the stock ledger: per-account
//! balances, immutable ledger entries capturing every quantity change with
//! its before/after balance, accounting-period lifecycle gates, the pure
//! posting decision and the reconciliation check. Deterministic domain
//! logic only; locking and transactions live in the storage layer.

pub mod account;
pub mod entry;
pub mod error;
pub mod period;
pub mod posting;
pub mod reconcile;

pub use account::{StockAccount, StockAccountId};
pub use entry::{DocumentRef, LedgerEntry, LedgerEntryId, MovementKind};
pub use error::LedgerError;
pub use period::{AccountingPeriod, PeriodId, PeriodStatus};
pub use posting::{post, Posting};
pub use reconcile::reconcile;
