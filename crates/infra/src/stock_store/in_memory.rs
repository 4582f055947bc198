use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use wardstock_core::{ActorId, EntityId};
use wardstock_ledger::{
    post, reconcile, AccountingPeriod, LedgerEntry, LedgerEntryId, LedgerError, PeriodId, Posting,
    StockAccount, StockAccountId,
};

use super::r#trait::{StockStore, StoreError};

#[derive(Debug, Default)]
struct StoreState {
    accounts: HashMap<StockAccountId, StockAccount>,
    /// Global creation order; per-account histories are filtered views.
    entries: Vec<LedgerEntry>,
    periods: HashMap<PeriodId, AccountingPeriod>,
}

/// In-memory stock store.
///
/// Intended for tests/dev. Not optimized for performance: one store-wide
/// write lock stands in for row-level locking, which still gives the
/// required serialization per account (and then some).
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    state: RwLock<StoreState>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve_period(
        state: &StoreState,
        posting: &Posting,
    ) -> Result<Option<AccountingPeriod>, StoreError> {
        match posting.period_id {
            Some(pid) => {
                let period = state
                    .periods
                    .get(&pid)
                    .ok_or(StoreError::PeriodNotFound(pid))?;
                Ok(Some(period.clone()))
            }
            None => {
                let period = state
                    .periods
                    .values()
                    .find(|p| p.contains(posting.transaction_date))
                    .cloned();
                if period.is_none() {
                    tracing::warn!(
                        account_id = %posting.account_id,
                        transaction_date = %posting.transaction_date,
                        "no accounting period covers the transaction date; posting unrestricted"
                    );
                }
                Ok(period)
            }
        }
    }

    /// Overwrite a balance behind the ledger's back, to exercise
    /// reconciliation failure paths.
    #[cfg(test)]
    pub(crate) fn tamper_balance(&self, id: StockAccountId, quantity: Decimal) {
        let mut state = self.state.write().expect("lock poisoned");
        let account = state.accounts.get(&id).expect("account exists").clone();
        let tampered = StockAccount::from_stored(
            account.id_typed(),
            account.item_id(),
            account.location_id(),
            account.base_unit(),
            quantity,
            account.quantity_reserved(),
            account.allows_negative(),
            account.is_halted(),
        );
        state.accounts.insert(id, tampered);
    }
}

fn lock_poisoned(operation: &str) -> StoreError {
    StoreError::storage(operation, "lock poisoned")
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn create_account(&self, account: StockAccount) -> Result<(), StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_poisoned("create_account"))?;
        state.accounts.insert(account.id_typed(), account);
        Ok(())
    }

    async fn account(&self, id: StockAccountId) -> Result<StockAccount, StoreError> {
        let state = self.state.read().map_err(|_| lock_poisoned("account"))?;
        state
            .accounts
            .get(&id)
            .cloned()
            .ok_or(StoreError::AccountNotFound(id))
    }

    async fn record(&self, posting: Posting) -> Result<LedgerEntry, StoreError> {
        let mut state = self.state.write().map_err(|_| lock_poisoned("record"))?;

        let mut account = state
            .accounts
            .get(&posting.account_id)
            .cloned()
            .ok_or(StoreError::AccountNotFound(posting.account_id))?;

        let period = Self::resolve_period(&state, &posting)?;

        let entry = post(
            &mut account,
            &posting,
            period.as_ref(),
            LedgerEntryId::new(EntityId::new()),
            Utc::now(),
        )?;

        // Both writes land under the same lock: atomic from any reader's
        // point of view.
        state.entries.push(entry.clone());
        state.accounts.insert(account.id_typed(), account);
        Ok(entry)
    }

    async fn reserve(
        &self,
        id: StockAccountId,
        quantity: Decimal,
    ) -> Result<Decimal, StoreError> {
        let mut state = self.state.write().map_err(|_| lock_poisoned("reserve"))?;
        let mut account = state
            .accounts
            .get(&id)
            .cloned()
            .ok_or(StoreError::AccountNotFound(id))?;
        let reserved = account.reserve(quantity)?;
        state.accounts.insert(id, account);
        Ok(reserved)
    }

    async fn release(
        &self,
        id: StockAccountId,
        quantity: Decimal,
    ) -> Result<Decimal, StoreError> {
        let mut state = self.state.write().map_err(|_| lock_poisoned("release"))?;
        let mut account = state
            .accounts
            .get(&id)
            .cloned()
            .ok_or(StoreError::AccountNotFound(id))?;
        let reserved = account.release(quantity)?;
        state.accounts.insert(id, account);
        Ok(reserved)
    }

    async fn entries(&self, id: StockAccountId) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.read().map_err(|_| lock_poisoned("entries"))?;
        if !state.accounts.contains_key(&id) {
            return Err(StoreError::AccountNotFound(id));
        }
        Ok(state
            .entries
            .iter()
            .filter(|e| e.account_id() == id)
            .cloned()
            .collect())
    }

    async fn annotate_entry(
        &self,
        id: LedgerEntryId,
        note: &str,
    ) -> Result<LedgerEntry, StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_poisoned("annotate_entry"))?;
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.id_typed() == id)
            .ok_or(StoreError::EntryNotFound(id))?;
        entry.set_note(note)?;
        Ok(entry.clone())
    }

    async fn delete_entry(&self, id: LedgerEntryId) -> Result<(), StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_poisoned("delete_entry"))?;
        if state.entries.iter().any(|e| e.id_typed() == id) {
            return Err(LedgerError::ImmutableEntry(id).into());
        }
        Err(StoreError::EntryNotFound(id))
    }

    async fn create_period(&self, period: AccountingPeriod) -> Result<(), StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_poisoned("create_period"))?;
        period.ensure_no_overlap(state.periods.values())?;
        state.periods.insert(period.id_typed(), period);
        Ok(())
    }

    async fn period(&self, id: PeriodId) -> Result<AccountingPeriod, StoreError> {
        let state = self.state.read().map_err(|_| lock_poisoned("period"))?;
        state
            .periods
            .get(&id)
            .cloned()
            .ok_or(StoreError::PeriodNotFound(id))
    }

    async fn close_period(
        &self,
        id: PeriodId,
        actor: ActorId,
    ) -> Result<AccountingPeriod, StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_poisoned("close_period"))?;
        let mut period = state
            .periods
            .get(&id)
            .cloned()
            .ok_or(StoreError::PeriodNotFound(id))?;
        period.close(actor, Utc::now())?;

        // The whole set flips under one lock, so no reader ever observes
        // a half-locked period.
        for entry in state
            .entries
            .iter_mut()
            .filter(|e| e.period_id() == Some(id) && !e.is_locked())
        {
            entry.lock();
        }
        state.periods.insert(id, period.clone());
        Ok(period)
    }

    async fn reopen_period(&self, id: PeriodId) -> Result<AccountingPeriod, StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_poisoned("reopen_period"))?;
        let mut period = state
            .periods
            .get(&id)
            .cloned()
            .ok_or(StoreError::PeriodNotFound(id))?;
        period.reopen()?;

        for entry in state
            .entries
            .iter_mut()
            .filter(|e| e.period_id() == Some(id) && e.is_locked())
        {
            entry.unlock_for_reopen();
        }
        state.periods.insert(id, period.clone());
        Ok(period)
    }

    async fn lock_period(&self, id: PeriodId) -> Result<AccountingPeriod, StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_poisoned("lock_period"))?;
        let mut period = state
            .periods
            .get(&id)
            .cloned()
            .ok_or(StoreError::PeriodNotFound(id))?;
        period.lock_permanently()?;
        state.periods.insert(id, period.clone());
        Ok(period)
    }

    async fn verify_account(&self, id: StockAccountId) -> Result<(), StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_poisoned("verify_account"))?;
        let account = state
            .accounts
            .get(&id)
            .cloned()
            .ok_or(StoreError::AccountNotFound(id))?;
        let history: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| e.account_id() == id)
            .cloned()
            .collect();

        match reconcile(&account, Decimal::ZERO, &history) {
            Ok(()) => Ok(()),
            Err(err) => {
                if matches!(err, LedgerError::ReconciliationMismatch { .. }) {
                    tracing::error!(
                        account_id = %id,
                        %err,
                        "reconciliation mismatch; halting account"
                    );
                    let mut halted = account;
                    halted.halt();
                    state.accounts.insert(id, halted);
                }
                Err(err.into())
            }
        }
    }

    async fn release_hold(&self, id: StockAccountId) -> Result<(), StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_poisoned("release_hold"))?;
        let mut account = state
            .accounts
            .get(&id)
            .cloned()
            .ok_or(StoreError::AccountNotFound(id))?;
        account.release_hold();
        state.accounts.insert(id, account);
        Ok(())
    }
}
