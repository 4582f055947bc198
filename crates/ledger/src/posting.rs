//! The pure posting decision.
//!
//! Everything that can be decided without IO lives here: period gating,
//! the negative-balance policy, balance capture and entry construction.
//! The storage layer wraps this in a row lock and a transaction; by the
//! time `post` runs, the account state it sees is the locked-in truth.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use wardstock_core::{ActorId, ValueObject};
use wardstock_units::UnitId;

use crate::account::{StockAccount, StockAccountId};
use crate::entry::{DocumentRef, LedgerEntry, LedgerEntryId, MovementKind};
use crate::error::LedgerError;
use crate::period::{AccountingPeriod, PeriodId};

/// A request to record one stock movement.
///
/// `quantity_change` is signed and already normalized into the account's
/// base unit; converting is the calling document's job. The transaction
/// unit and factor ride along as an audit snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub account_id: StockAccountId,
    pub kind: MovementKind,
    pub quantity_change: Decimal,
    pub transaction_unit: UnitId,
    pub conversion_factor: Decimal,
    pub unit_cost: Option<Decimal>,
    pub document: DocumentRef,
    pub transaction_date: NaiveDate,
    /// Explicitly targeted period. When set, it overrides resolution by
    /// transaction date.
    pub period_id: Option<PeriodId>,
    pub recorded_by: ActorId,
}

impl ValueObject for Posting {}

/// Validate a posting against the locked account and resolved period,
/// apply the balance change and build the immutable entry.
///
/// `period` is whichever period the caller resolved: the explicitly
/// targeted one when `posting.period_id` is set, otherwise the period
/// containing the transaction date. `None` means no period governs the
/// date and posting is unrestricted.
pub fn post(
    account: &mut StockAccount,
    posting: &Posting,
    period: Option<&AccountingPeriod>,
    entry_id: LedgerEntryId,
    recorded_at: DateTime<Utc>,
) -> Result<LedgerEntry, LedgerError> {
    if account.id_typed() != posting.account_id {
        return Err(LedgerError::AccountMismatch {
            expected: posting.account_id,
            actual: account.id_typed(),
        });
    }
    if account.is_halted() {
        return Err(LedgerError::AccountHalted(account.id_typed()));
    }
    if posting.quantity_change == Decimal::ZERO {
        return Err(LedgerError::InvalidQuantity(
            "quantity change cannot be zero".to_string(),
        ));
    }
    if posting.conversion_factor <= Decimal::ZERO {
        return Err(LedgerError::InvalidQuantity(format!(
            "conversion factor snapshot must be positive, got {}",
            posting.conversion_factor
        )));
    }

    if let Some(period) = period {
        if !period.allows_posting() {
            return Err(LedgerError::PeriodClosed {
                period: period.name().to_string(),
                status: period.status(),
            });
        }
    }

    let before = account.quantity_on_hand();
    account.apply_delta(posting.quantity_change)?;

    Ok(LedgerEntry::new(
        entry_id,
        posting.account_id,
        posting.kind,
        posting.quantity_change,
        before,
        posting.unit_cost,
        posting.transaction_unit,
        posting.conversion_factor,
        posting.document,
        posting.transaction_date,
        posting.period_id.or_else(|| period.map(|p| p.id_typed())),
        posting.recorded_by,
        recorded_at,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::PeriodStatus;
    use rust_decimal_macros::dec;
    use wardstock_core::EntityId;

    fn account() -> StockAccount {
        StockAccount::new(
            StockAccountId::new(EntityId::new()),
            EntityId::new(),
            EntityId::new(),
            UnitId::new(EntityId::new()),
            false,
        )
    }

    fn posting(account: &StockAccount, change: Decimal) -> Posting {
        Posting {
            account_id: account.id_typed(),
            kind: if change >= Decimal::ZERO {
                MovementKind::Receipt
            } else {
                MovementKind::Issue
            },
            quantity_change: change,
            transaction_unit: account.base_unit(),
            conversion_factor: dec!(1),
            unit_cost: None,
            document: DocumentRef::GoodsReceipt(EntityId::new()),
            transaction_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            period_id: None,
            recorded_by: ActorId::new(),
        }
    }

    fn entry_id() -> LedgerEntryId {
        LedgerEntryId::new(EntityId::new())
    }

    #[test]
    fn receipt_then_issue_capture_a_continuous_balance() {
        let mut acc = account();

        let request = posting(&acc, dec!(100));
        let receipt = post(&mut acc, &request, None, entry_id(), Utc::now()).unwrap();
        assert_eq!(receipt.quantity_before(), dec!(0));
        assert_eq!(receipt.quantity_after(), dec!(100));

        let request = posting(&acc, dec!(-30));
        let issue = post(&mut acc, &request, None, entry_id(), Utc::now()).unwrap();
        assert_eq!(issue.quantity_before(), dec!(100));
        assert_eq!(issue.quantity_after(), dec!(70));
        assert_eq!(acc.quantity_on_hand(), dec!(70));
    }

    #[test]
    fn insufficient_stock_writes_nothing() {
        let mut acc = account();
        let receipt = posting(&acc, dec!(40));
        post(&mut acc, &receipt, None, entry_id(), Utc::now()).unwrap();

        let over_issue = posting(&acc, dec!(-50));
        let err = post(&mut acc, &over_issue, None, entry_id(), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                available: dec!(40),
                requested: dec!(50),
            }
        );
        assert_eq!(acc.quantity_on_hand(), dec!(40));
    }

    #[test]
    fn closed_period_rejects_the_posting() {
        let mut acc = account();
        let mut period = AccountingPeriod::new(
            PeriodId::new(EntityId::new()),
            "2026-03",
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
        )
        .unwrap();
        period.open().unwrap();
        period.close(ActorId::new(), Utc::now()).unwrap();

        let request = posting(&acc, dec!(10));
        let err = post(&mut acc, &request, Some(&period), entry_id(), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            LedgerError::PeriodClosed {
                period: "2026-03".to_string(),
                status: PeriodStatus::Closed,
            }
        );
        assert_eq!(acc.quantity_on_hand(), dec!(0));
    }

    #[test]
    fn open_period_stamps_the_entry() {
        let mut acc = account();
        let mut period = AccountingPeriod::new(
            PeriodId::new(EntityId::new()),
            "2026-03",
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
        )
        .unwrap();
        period.open().unwrap();

        let request = posting(&acc, dec!(10));
        let entry = post(&mut acc, &request, Some(&period), entry_id(), Utc::now()).unwrap();
        assert_eq!(entry.period_id(), Some(period.id_typed()));
        assert!(!entry.is_locked());
    }

    #[test]
    fn halted_account_rejects_postings() {
        let mut acc = account();
        acc.halt();
        let request = posting(&acc, dec!(10));
        let err = post(&mut acc, &request, None, entry_id(), Utc::now()).unwrap_err();
        assert_eq!(err, LedgerError::AccountHalted(acc.id_typed()));
    }

    #[test]
    fn zero_change_is_invalid() {
        let mut acc = account();
        let request = posting(&acc, dec!(0));
        let err = post(&mut acc, &request, None, entry_id(), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidQuantity(_)));
    }

    #[test]
    fn posting_against_the_wrong_account_is_a_defect() {
        let mut acc = account();
        let other = account();
        let err = post(&mut acc, &posting(&other, dec!(1)), None, entry_id(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountMismatch { .. }));
    }
}
