//! The reconciliation invariant: a stock balance always equals the sum of
//! its full ledger history.
//!
//! This is the truth the whole design protects. A mismatch means a
//! bypassed lock or an external direct mutation, and the affected account
//! should be halted until a person has looked at it.

use rust_decimal::Decimal;

use crate::account::StockAccount;
use crate::entry::LedgerEntry;
use crate::error::LedgerError;

/// Replay an account's ledger history and compare it with the stored
/// balance.
///
/// `entries` must be the account's full history in creation order. The
/// replay checks every entry's captured `quantity_before` against the
/// running balance, so a gap or reordering in the chain is caught even
/// when the final sum happens to match.
pub fn reconcile(
    account: &StockAccount,
    initial_balance: Decimal,
    entries: &[LedgerEntry],
) -> Result<(), LedgerError> {
    let mut running = initial_balance;

    for entry in entries {
        if entry.account_id() != account.id_typed() {
            return Err(LedgerError::AccountMismatch {
                expected: account.id_typed(),
                actual: entry.account_id(),
            });
        }
        if entry.quantity_before() != running {
            return Err(LedgerError::ReconciliationMismatch {
                account: account.id_typed(),
                expected: running,
                actual: entry.quantity_before(),
            });
        }
        running = entry.quantity_after();
    }

    if running != account.quantity_on_hand() {
        return Err(LedgerError::ReconciliationMismatch {
            account: account.id_typed(),
            expected: running,
            actual: account.quantity_on_hand(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::StockAccountId;
    use crate::entry::{DocumentRef, LedgerEntryId, MovementKind};
    use crate::posting::{post, Posting};
    use chrono::{NaiveDate, Utc};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use wardstock_core::{ActorId, EntityId};
    use wardstock_units::UnitId;

    fn account(allow_negative: bool) -> StockAccount {
        StockAccount::new(
            StockAccountId::new(EntityId::new()),
            EntityId::new(),
            EntityId::new(),
            UnitId::new(EntityId::new()),
            allow_negative,
        )
    }

    fn record(acc: &mut StockAccount, change: Decimal) -> Result<LedgerEntry, LedgerError> {
        let posting = Posting {
            account_id: acc.id_typed(),
            kind: MovementKind::Adjustment,
            quantity_change: change,
            transaction_unit: acc.base_unit(),
            conversion_factor: dec!(1),
            unit_cost: None,
            document: DocumentRef::Adjustment(EntityId::new()),
            transaction_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            period_id: None,
            recorded_by: ActorId::new(),
        };
        post(
            acc,
            &posting,
            None,
            LedgerEntryId::new(EntityId::new()),
            Utc::now(),
        )
    }

    #[test]
    fn clean_history_reconciles() {
        let mut acc = account(false);
        let mut entries = Vec::new();
        for change in [dec!(100), dec!(-30), dec!(5), dec!(-75)] {
            entries.push(record(&mut acc, change).unwrap());
        }
        reconcile(&acc, Decimal::ZERO, &entries).unwrap();
    }

    #[test]
    fn external_balance_tampering_is_detected() {
        let mut acc = account(false);
        let entries = vec![record(&mut acc, dec!(10)).unwrap()];

        // Simulate a write that bypassed the ledger.
        let tampered = StockAccount::from_stored(
            acc.id_typed(),
            acc.item_id(),
            acc.location_id(),
            acc.base_unit(),
            dec!(99),
            Decimal::ZERO,
            false,
            false,
        );

        let err = reconcile(&tampered, Decimal::ZERO, &entries).unwrap_err();
        assert_eq!(
            err,
            LedgerError::ReconciliationMismatch {
                account: acc.id_typed(),
                expected: dec!(10),
                actual: dec!(99),
            }
        );
    }

    #[test]
    fn a_gap_in_the_chain_is_detected_even_if_the_sum_matches() {
        let mut acc = account(true);
        let e1 = record(&mut acc, dec!(10)).unwrap();
        let _skipped = record(&mut acc, dec!(5)).unwrap();
        let e3 = record(&mut acc, dec!(-5)).unwrap();

        // Drop the middle entry and hand-adjust the balance so the naive
        // sum still adds up.
        let sum_matches = StockAccount::from_stored(
            acc.id_typed(),
            acc.item_id(),
            acc.location_id(),
            acc.base_unit(),
            dec!(5),
            Decimal::ZERO,
            true,
            false,
        );

        let err = reconcile(&sum_matches, Decimal::ZERO, &[e1, e3]).unwrap_err();
        assert!(matches!(err, LedgerError::ReconciliationMismatch { .. }));
    }

    #[test]
    fn foreign_entries_are_rejected() {
        let acc = account(false);
        let mut other = account(false);
        let foreign = record(&mut other, dec!(1)).unwrap();
        let err = reconcile(&acc, Decimal::ZERO, &[foreign]).unwrap_err();
        assert!(matches!(err, LedgerError::AccountMismatch { .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: replaying every recorded entry from a zero initial
        /// balance reproduces the on-hand quantity exactly, whatever mix
        /// of receipts and issues was accepted along the way.
        #[test]
        fn replay_reproduces_the_balance(
            changes in prop::collection::vec(-500i64..500i64, 1..40)
        ) {
            let mut acc = account(false);
            let mut entries = Vec::new();

            for raw in changes {
                let change = Decimal::from(raw);
                if change == Decimal::ZERO {
                    continue;
                }
                // Rejected postings must leave no trace.
                if let Ok(entry) = record(&mut acc, change) {
                    entries.push(entry);
                }
            }

            prop_assert!(reconcile(&acc, Decimal::ZERO, &entries).is_ok());

            let sum: Decimal = entries.iter().map(|e| e.quantity_change()).sum();
            prop_assert_eq!(sum, acc.quantity_on_hand());
        }
    }
}
