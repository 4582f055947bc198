//! Postgres-backed stock store implementation.
//!
//! Persists accounts, ledger entries and accounting periods in PostgreSQL
//! and enforces the ledger's concurrency contract at the database level:
//! `record` serializes per account through `SELECT ... FOR UPDATE`, and
//! every multi-step operation runs inside one transaction.
//!
//! ## Expected schema
//!
//! Created by [`PostgresStockStore::ensure_schema`]:
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `stock_accounts` | one row per (item, location) balance |
//! | `ledger_entries` | append-only movement history (`seq` orders creation) |
//! | `accounting_periods` | period lifecycle + date windows |
//!
//! There is intentionally no `DELETE` statement anywhere in this module.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError::Storage` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | Scenario |
//! |------------|----------------------|----------|
//! | Database (unique violation) | `23505` | duplicate account position or period id |
//! | Database (check constraint violation) | `23514` | balance capture or date-range constraint tripped |
//! | Database (other) | Any other | other database errors |
//! | PoolClosed | N/A | connection pool was closed |
//! | Other | N/A | network errors, connection failures, etc. |
//!
//! Domain rejections never come from SQL: rows are loaded, the pure
//! posting/lifecycle logic decides, and only accepted outcomes are
//! written back.
//!
//! ## Thread Safety
//!
//! `PostgresStockStore` is `Send + Sync` and can be shared across
//! workers. All operations use the SQLx connection pool.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use wardstock_core::{ActorId, EntityId};
use wardstock_ledger::{
    post, reconcile, AccountingPeriod, DocumentRef, LedgerEntry, LedgerEntryId, LedgerError,
    MovementKind, PeriodId, PeriodStatus, Posting, StockAccount, StockAccountId,
};
use wardstock_units::UnitId;

use super::r#trait::{StockStore, StoreError};
use crate::config::StoreConfig;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stock_accounts (
    id UUID PRIMARY KEY,
    item_id UUID NOT NULL,
    location_id UUID NOT NULL,
    base_unit_id UUID NOT NULL,
    quantity_on_hand NUMERIC(19, 4) NOT NULL DEFAULT 0,
    quantity_reserved NUMERIC(19, 4) NOT NULL DEFAULT 0,
    allow_negative BOOLEAN NOT NULL DEFAULT FALSE,
    halted BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (item_id, location_id)
);

CREATE TABLE IF NOT EXISTS accounting_periods (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    start_date DATE NOT NULL,
    end_date DATE NOT NULL,
    status TEXT NOT NULL,
    closed_at TIMESTAMPTZ,
    closed_by UUID,
    CHECK (start_date <= end_date)
);

CREATE TABLE IF NOT EXISTS ledger_entries (
    id UUID PRIMARY KEY,
    seq BIGSERIAL,
    account_id UUID NOT NULL REFERENCES stock_accounts (id),
    kind TEXT NOT NULL,
    quantity_change NUMERIC(19, 4) NOT NULL,
    quantity_before NUMERIC(19, 4) NOT NULL,
    quantity_after NUMERIC(19, 4) NOT NULL,
    unit_cost NUMERIC(19, 4),
    total_cost NUMERIC(19, 4),
    transaction_unit_id UUID NOT NULL,
    conversion_factor NUMERIC(19, 6) NOT NULL,
    document_kind TEXT NOT NULL,
    document_id UUID NOT NULL,
    transaction_date DATE NOT NULL,
    period_id UUID REFERENCES accounting_periods (id),
    is_locked BOOLEAN NOT NULL DEFAULT FALSE,
    note TEXT,
    recorded_by UUID NOT NULL,
    recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CHECK (quantity_after = quantity_before + quantity_change)
);

CREATE INDEX IF NOT EXISTS idx_ledger_entries_account_seq
    ON ledger_entries (account_id, seq);
CREATE INDEX IF NOT EXISTS idx_ledger_entries_open_period
    ON ledger_entries (period_id) WHERE is_locked = FALSE;
"#;

/// Postgres-backed stock store.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    /// Wrap an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect using [`StoreConfig`].
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the tables and indexes this store expects, idempotently.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(account_id = %account.id_typed()), err)]
    pub async fn create_account(&self, account: StockAccount) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stock_accounts (
                id, item_id, location_id, base_unit_id,
                quantity_on_hand, quantity_reserved, allow_negative, halted
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(account.id_typed().0.as_uuid())
        .bind(account.item_id().as_uuid())
        .bind(account.location_id().as_uuid())
        .bind(account.base_unit().0.as_uuid())
        .bind(account.quantity_on_hand())
        .bind(account.quantity_reserved())
        .bind(account.allows_negative())
        .bind(account.is_halted())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_account", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    pub async fn account(&self, id: StockAccountId) -> Result<StockAccount, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, item_id, location_id, base_unit_id,
                   quantity_on_hand, quantity_reserved, allow_negative, halted
            FROM stock_accounts
            WHERE id = $1
            "#,
        )
        .bind(id.0.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("account", e))?
        .ok_or(StoreError::AccountNotFound(id))?;

        let account_row = AccountRow::from_row(&row)
            .map_err(|e| StoreError::storage("account", e.to_string()))?;
        Ok(account_row.into())
    }

    /// Record one movement. The account row is locked with
    /// `SELECT ... FOR UPDATE` for the whole read-modify-write sequence,
    /// so concurrent postings against the same account serialize while
    /// other accounts proceed. Entry insert and balance update commit
    /// together or not at all.
    #[instrument(
        skip(self, posting),
        fields(
            account_id = %posting.account_id,
            kind = posting.kind.as_str(),
            quantity_change = %posting.quantity_change
        ),
        err
    )]
    pub async fn record(&self, posting: Posting) -> Result<LedgerEntry, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut account = fetch_account_for_update(&mut tx, posting.account_id).await?;
        let period = resolve_period(&mut tx, &posting).await?;

        let entry_id = LedgerEntryId::new(EntityId::new());
        let recorded_at = Utc::now();
        let entry = match post(&mut account, &posting, period.as_ref(), entry_id, recorded_at) {
            Ok(entry) => entry,
            Err(err) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(err.into());
            }
        };

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id, account_id, kind,
                quantity_change, quantity_before, quantity_after,
                unit_cost, total_cost,
                transaction_unit_id, conversion_factor,
                document_kind, document_id,
                transaction_date, period_id, is_locked, note,
                recorded_by, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(entry.id_typed().0.as_uuid())
        .bind(entry.account_id().0.as_uuid())
        .bind(entry.kind().as_str())
        .bind(entry.quantity_change())
        .bind(entry.quantity_before())
        .bind(entry.quantity_after())
        .bind(entry.unit_cost())
        .bind(entry.total_cost())
        .bind(entry.transaction_unit().0.as_uuid())
        .bind(entry.conversion_factor())
        .bind(entry.document().kind_str())
        .bind(entry.document().document_id().as_uuid())
        .bind(entry.transaction_date())
        .bind(entry.period_id().map(|p| *p.0.as_uuid()))
        .bind(entry.is_locked())
        .bind(entry.note())
        .bind(entry.recorded_by().as_uuid())
        .bind(entry.recorded_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_entry", e))?;

        sqlx::query(
            "UPDATE stock_accounts SET quantity_on_hand = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(posting.account_id.0.as_uuid())
        .bind(account.quantity_on_hand())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_balance", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(entry)
    }

    #[instrument(skip(self), fields(account_id = %id, quantity = %quantity), err)]
    pub async fn reserve(
        &self,
        id: StockAccountId,
        quantity: Decimal,
    ) -> Result<Decimal, StoreError> {
        self.update_reservation("reserve", id, quantity, StockAccount::reserve)
            .await
    }

    #[instrument(skip(self), fields(account_id = %id, quantity = %quantity), err)]
    pub async fn release(
        &self,
        id: StockAccountId,
        quantity: Decimal,
    ) -> Result<Decimal, StoreError> {
        self.update_reservation("release", id, quantity, StockAccount::release)
            .await
    }

    async fn update_reservation(
        &self,
        operation: &str,
        id: StockAccountId,
        quantity: Decimal,
        apply: fn(&mut StockAccount, Decimal) -> Result<Decimal, LedgerError>,
    ) -> Result<Decimal, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut account = fetch_account_for_update(&mut tx, id).await?;
        let reserved = match apply(&mut account, quantity) {
            Ok(reserved) => reserved,
            Err(err) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(err.into());
            }
        };

        sqlx::query(
            "UPDATE stock_accounts SET quantity_reserved = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.0.as_uuid())
        .bind(reserved)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(reserved)
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    pub async fn entries(&self, id: StockAccountId) -> Result<Vec<LedgerEntry>, StoreError> {
        // Confirm the account exists so an empty history is
        // distinguishable from a bad id.
        self.account(id).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, account_id, kind,
                   quantity_change, quantity_before, quantity_after,
                   unit_cost, total_cost,
                   transaction_unit_id, conversion_factor,
                   document_kind, document_id,
                   transaction_date, period_id, is_locked, note,
                   recorded_by, recorded_at
            FROM ledger_entries
            WHERE account_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(id.0.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("entries", e))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let entry_row = EntryRow::from_row(&row)
                .map_err(|e| StoreError::storage("entries", e.to_string()))?;
            entries.push(entry_row.try_into_entry()?);
        }
        Ok(entries)
    }

    #[instrument(skip(self, note), fields(entry_id = %id), err)]
    pub async fn annotate_entry(
        &self,
        id: LedgerEntryId,
        note: &str,
    ) -> Result<LedgerEntry, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut entry = fetch_entry_for_update(&mut tx, id).await?;
        if let Err(err) = entry.set_note(note) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(err.into());
        }

        sqlx::query("UPDATE ledger_entries SET note = $2 WHERE id = $1")
            .bind(id.0.as_uuid())
            .bind(entry.note())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("annotate_entry", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(entry)
    }

    /// Deletion is refused before any SQL runs. History is append-only.
    #[instrument(skip(self), fields(entry_id = %id), err)]
    pub async fn delete_entry(&self, id: LedgerEntryId) -> Result<(), StoreError> {
        let exists = sqlx::query("SELECT 1 FROM ledger_entries WHERE id = $1")
            .bind(id.0.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_entry", e))?;

        match exists {
            Some(_) => Err(LedgerError::ImmutableEntry(id).into()),
            None => Err(StoreError::EntryNotFound(id)),
        }
    }

    #[instrument(skip(self, period), fields(period_id = %period.id_typed(), name = period.name()), err)]
    pub async fn create_period(&self, period: AccountingPeriod) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let overlapping = sqlx::query(
            r#"
            SELECT name FROM accounting_periods
            WHERE start_date <= $2 AND end_date >= $1
            LIMIT 1
            "#,
        )
        .bind(period.start())
        .bind(period.end())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("check_overlap", e))?;

        if let Some(row) = overlapping {
            let existing: String = row
                .try_get("name")
                .map_err(|e| StoreError::storage("check_overlap", e.to_string()))?;
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(LedgerError::OverlappingPeriod {
                candidate: period.name().to_string(),
                existing,
            }
            .into());
        }

        sqlx::query(
            r#"
            INSERT INTO accounting_periods (id, name, start_date, end_date, status, closed_at, closed_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(period.id_typed().0.as_uuid())
        .bind(period.name())
        .bind(period.start())
        .bind(period.end())
        .bind(period.status().as_str())
        .bind(period.closed_at())
        .bind(period.closed_by().map(|a| *a.as_uuid()))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("create_period", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(period_id = %id), err)]
    pub async fn period(&self, id: PeriodId) -> Result<AccountingPeriod, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, start_date, end_date, status, closed_at, closed_by
            FROM accounting_periods
            WHERE id = $1
            "#,
        )
        .bind(id.0.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("period", e))?
        .ok_or(StoreError::PeriodNotFound(id))?;

        let period_row =
            PeriodRow::from_row(&row).map_err(|e| StoreError::storage("period", e.to_string()))?;
        period_row.try_into_period()
    }

    /// Close a period: one transaction covering the bulk entry lock and
    /// the state transition. The bulk lock is a single conditional
    /// `UPDATE` scoped by period id, which bounds lock duration under
    /// concurrent posting.
    #[instrument(skip(self), fields(period_id = %id), err)]
    pub async fn close_period(
        &self,
        id: PeriodId,
        actor: ActorId,
    ) -> Result<AccountingPeriod, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut period = fetch_period_for_update(&mut tx, id).await?;
        if let Err(err) = period.close(actor, Utc::now()) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(err.into());
        }

        sqlx::query(
            "UPDATE ledger_entries SET is_locked = TRUE WHERE period_id = $1 AND is_locked = FALSE",
        )
        .bind(id.0.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("bulk_lock_entries", e))?;

        sqlx::query(
            "UPDATE accounting_periods SET status = $2, closed_at = $3, closed_by = $4 WHERE id = $1",
        )
        .bind(id.0.as_uuid())
        .bind(period.status().as_str())
        .bind(period.closed_at())
        .bind(period.closed_by().map(|a| *a.as_uuid()))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("close_period", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(period)
    }

    #[instrument(skip(self), fields(period_id = %id), err)]
    pub async fn reopen_period(&self, id: PeriodId) -> Result<AccountingPeriod, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut period = fetch_period_for_update(&mut tx, id).await?;
        if let Err(err) = period.reopen() {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(err.into());
        }

        sqlx::query(
            "UPDATE ledger_entries SET is_locked = FALSE WHERE period_id = $1 AND is_locked = TRUE",
        )
        .bind(id.0.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("bulk_unlock_entries", e))?;

        sqlx::query(
            "UPDATE accounting_periods SET status = $2, closed_at = NULL, closed_by = NULL WHERE id = $1",
        )
        .bind(id.0.as_uuid())
        .bind(period.status().as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("reopen_period", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(period)
    }

    #[instrument(skip(self), fields(period_id = %id), err)]
    pub async fn lock_period(&self, id: PeriodId) -> Result<AccountingPeriod, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut period = fetch_period_for_update(&mut tx, id).await?;
        if let Err(err) = period.lock_permanently() {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(err.into());
        }

        sqlx::query("UPDATE accounting_periods SET status = $2 WHERE id = $1")
            .bind(id.0.as_uuid())
            .bind(period.status().as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_period", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(period)
    }

    /// Replay the ledger history against the stored balance, holding the
    /// account row lock so no posting can interleave with the check. On a
    /// mismatch the halt is committed before the error returns.
    #[instrument(skip(self), fields(account_id = %id), err)]
    pub async fn verify_account(&self, id: StockAccountId) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let account = fetch_account_for_update(&mut tx, id).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, account_id, kind,
                   quantity_change, quantity_before, quantity_after,
                   unit_cost, total_cost,
                   transaction_unit_id, conversion_factor,
                   document_kind, document_id,
                   transaction_date, period_id, is_locked, note,
                   recorded_by, recorded_at
            FROM ledger_entries
            WHERE account_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(id.0.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("verify_account", e))?;

        let mut history = Vec::with_capacity(rows.len());
        for row in rows {
            let entry_row = EntryRow::from_row(&row)
                .map_err(|e| StoreError::storage("verify_account", e.to_string()))?;
            history.push(entry_row.try_into_entry()?);
        }

        match reconcile(&account, Decimal::ZERO, &history) {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit_transaction", e))?;
                Ok(())
            }
            Err(err) => {
                if matches!(err, LedgerError::ReconciliationMismatch { .. }) {
                    tracing::error!(
                        account_id = %id,
                        %err,
                        "reconciliation mismatch; halting account"
                    );
                    sqlx::query(
                        "UPDATE stock_accounts SET halted = TRUE, updated_at = NOW() WHERE id = $1",
                    )
                    .bind(id.0.as_uuid())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("halt_account", e))?;
                    tx.commit()
                        .await
                        .map_err(|e| map_sqlx_error("commit_transaction", e))?;
                } else {
                    tx.rollback()
                        .await
                        .map_err(|e| map_sqlx_error("rollback", e))?;
                }
                Err(err.into())
            }
        }
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    pub async fn release_hold(&self, id: StockAccountId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE stock_accounts SET halted = FALSE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.0.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("release_hold", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AccountNotFound(id));
        }
        Ok(())
    }
}

/// Lock the account row for the remainder of the transaction.
async fn fetch_account_for_update(
    tx: &mut Transaction<'_, Postgres>,
    id: StockAccountId,
) -> Result<StockAccount, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, item_id, location_id, base_unit_id,
               quantity_on_hand, quantity_reserved, allow_negative, halted
        FROM stock_accounts
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id.0.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_account", e))?
    .ok_or(StoreError::AccountNotFound(id))?;

    let account_row =
        AccountRow::from_row(&row).map_err(|e| StoreError::storage("lock_account", e.to_string()))?;
    Ok(account_row.into())
}

async fn fetch_period_for_update(
    tx: &mut Transaction<'_, Postgres>,
    id: PeriodId,
) -> Result<AccountingPeriod, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, name, start_date, end_date, status, closed_at, closed_by
        FROM accounting_periods
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id.0.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_period", e))?
    .ok_or(StoreError::PeriodNotFound(id))?;

    let period_row =
        PeriodRow::from_row(&row).map_err(|e| StoreError::storage("lock_period", e.to_string()))?;
    period_row.try_into_period()
}

async fn fetch_entry_for_update(
    tx: &mut Transaction<'_, Postgres>,
    id: LedgerEntryId,
) -> Result<LedgerEntry, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, account_id, kind,
               quantity_change, quantity_before, quantity_after,
               unit_cost, total_cost,
               transaction_unit_id, conversion_factor,
               document_kind, document_id,
               transaction_date, period_id, is_locked, note,
               recorded_by, recorded_at
        FROM ledger_entries
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id.0.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_entry", e))?
    .ok_or(StoreError::EntryNotFound(id))?;

    let entry_row =
        EntryRow::from_row(&row).map_err(|e| StoreError::storage("lock_entry", e.to_string()))?;
    entry_row.try_into_entry()
}

/// Resolve the governing period: the explicitly targeted one, or the one
/// containing the transaction date. No period is a data-quality warning,
/// not a failure (legacy/bootstrap data posts unrestricted).
async fn resolve_period(
    tx: &mut Transaction<'_, Postgres>,
    posting: &Posting,
) -> Result<Option<AccountingPeriod>, StoreError> {
    if let Some(pid) = posting.period_id {
        let row = sqlx::query(
            r#"
            SELECT id, name, start_date, end_date, status, closed_at, closed_by
            FROM accounting_periods
            WHERE id = $1
            "#,
        )
        .bind(pid.0.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("resolve_period", e))?
        .ok_or(StoreError::PeriodNotFound(pid))?;

        let period_row = PeriodRow::from_row(&row)
            .map_err(|e| StoreError::storage("resolve_period", e.to_string()))?;
        return Ok(Some(period_row.try_into_period()?));
    }

    let row = sqlx::query(
        r#"
        SELECT id, name, start_date, end_date, status, closed_at, closed_by
        FROM accounting_periods
        WHERE start_date <= $1 AND end_date >= $1
        LIMIT 1
        "#,
    )
    .bind(posting.transaction_date)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("resolve_period", e))?;

    match row {
        Some(row) => {
            let period_row = PeriodRow::from_row(&row)
                .map_err(|e| StoreError::storage("resolve_period", e.to_string()))?;
            Ok(Some(period_row.try_into_period()?))
        }
        None => {
            tracing::warn!(
                account_id = %posting.account_id,
                transaction_date = %posting.transaction_date,
                "no accounting period covers the transaction date; posting unrestricted"
            );
            Ok(None)
        }
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = match db_err.code().as_deref() {
                Some("23505") => format!("unique constraint violated: {}", db_err.message()),
                Some("23514") => format!("check constraint violated: {}", db_err.message()),
                _ => db_err.message().to_string(),
            };
            StoreError::storage(operation, message)
        }
        sqlx::Error::PoolClosed => StoreError::storage(operation, "connection pool closed"),
        other => StoreError::storage(operation, other.to_string()),
    }
}

// SQLx row types

#[derive(Debug)]
struct AccountRow {
    id: Uuid,
    item_id: Uuid,
    location_id: Uuid,
    base_unit_id: Uuid,
    quantity_on_hand: Decimal,
    quantity_reserved: Decimal,
    allow_negative: bool,
    halted: bool,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for AccountRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            id: row.try_get("id")?,
            item_id: row.try_get("item_id")?,
            location_id: row.try_get("location_id")?,
            base_unit_id: row.try_get("base_unit_id")?,
            quantity_on_hand: row.try_get("quantity_on_hand")?,
            quantity_reserved: row.try_get("quantity_reserved")?,
            allow_negative: row.try_get("allow_negative")?,
            halted: row.try_get("halted")?,
        })
    }
}

impl From<AccountRow> for StockAccount {
    fn from(row: AccountRow) -> Self {
        StockAccount::from_stored(
            StockAccountId::new(EntityId::from_uuid(row.id)),
            EntityId::from_uuid(row.item_id),
            EntityId::from_uuid(row.location_id),
            UnitId::new(EntityId::from_uuid(row.base_unit_id)),
            row.quantity_on_hand,
            row.quantity_reserved,
            row.allow_negative,
            row.halted,
        )
    }
}

#[derive(Debug)]
struct EntryRow {
    id: Uuid,
    account_id: Uuid,
    kind: String,
    quantity_change: Decimal,
    quantity_before: Decimal,
    quantity_after: Decimal,
    unit_cost: Option<Decimal>,
    total_cost: Option<Decimal>,
    transaction_unit_id: Uuid,
    conversion_factor: Decimal,
    document_kind: String,
    document_id: Uuid,
    transaction_date: NaiveDate,
    period_id: Option<Uuid>,
    is_locked: bool,
    note: Option<String>,
    recorded_by: Uuid,
    recorded_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for EntryRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(EntryRow {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            kind: row.try_get("kind")?,
            quantity_change: row.try_get("quantity_change")?,
            quantity_before: row.try_get("quantity_before")?,
            quantity_after: row.try_get("quantity_after")?,
            unit_cost: row.try_get("unit_cost")?,
            total_cost: row.try_get("total_cost")?,
            transaction_unit_id: row.try_get("transaction_unit_id")?,
            conversion_factor: row.try_get("conversion_factor")?,
            document_kind: row.try_get("document_kind")?,
            document_id: row.try_get("document_id")?,
            transaction_date: row.try_get("transaction_date")?,
            period_id: row.try_get("period_id")?,
            is_locked: row.try_get("is_locked")?,
            note: row.try_get("note")?,
            recorded_by: row.try_get("recorded_by")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }
}

impl EntryRow {
    fn try_into_entry(self) -> Result<LedgerEntry, StoreError> {
        let kind = MovementKind::parse(&self.kind).ok_or_else(|| {
            StoreError::storage("decode_entry", format!("unknown movement kind: {}", self.kind))
        })?;
        let document =
            DocumentRef::from_parts(&self.document_kind, EntityId::from_uuid(self.document_id))
                .ok_or_else(|| {
                    StoreError::storage(
                        "decode_entry",
                        format!("unknown document kind: {}", self.document_kind),
                    )
                })?;

        LedgerEntry::from_stored(
            LedgerEntryId::new(EntityId::from_uuid(self.id)),
            StockAccountId::new(EntityId::from_uuid(self.account_id)),
            kind,
            self.quantity_change,
            self.quantity_before,
            self.quantity_after,
            self.unit_cost,
            self.total_cost,
            UnitId::new(EntityId::from_uuid(self.transaction_unit_id)),
            self.conversion_factor,
            document,
            self.transaction_date,
            self.period_id.map(|p| PeriodId::new(EntityId::from_uuid(p))),
            self.is_locked,
            self.note,
            ActorId::from_uuid(self.recorded_by),
            self.recorded_at,
        )
        .map_err(|e| StoreError::storage("decode_entry", e.to_string()))
    }
}

#[derive(Debug)]
struct PeriodRow {
    id: Uuid,
    name: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    status: String,
    closed_at: Option<DateTime<Utc>>,
    closed_by: Option<Uuid>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for PeriodRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(PeriodRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            status: row.try_get("status")?,
            closed_at: row.try_get("closed_at")?,
            closed_by: row.try_get("closed_by")?,
        })
    }
}

impl PeriodRow {
    fn try_into_period(self) -> Result<AccountingPeriod, StoreError> {
        let status = PeriodStatus::parse(&self.status).ok_or_else(|| {
            StoreError::storage("decode_period", format!("unknown period status: {}", self.status))
        })?;
        Ok(AccountingPeriod::from_stored(
            PeriodId::new(EntityId::from_uuid(self.id)),
            self.name,
            self.start_date,
            self.end_date,
            status,
            self.closed_at,
            self.closed_by.map(ActorId::from_uuid),
        ))
    }
}

// Implement StockStore trait

#[async_trait::async_trait]
impl StockStore for PostgresStockStore {
    async fn create_account(&self, account: StockAccount) -> Result<(), StoreError> {
        PostgresStockStore::create_account(self, account).await
    }

    async fn account(&self, id: StockAccountId) -> Result<StockAccount, StoreError> {
        PostgresStockStore::account(self, id).await
    }

    async fn record(&self, posting: Posting) -> Result<LedgerEntry, StoreError> {
        PostgresStockStore::record(self, posting).await
    }

    async fn reserve(
        &self,
        id: StockAccountId,
        quantity: Decimal,
    ) -> Result<Decimal, StoreError> {
        PostgresStockStore::reserve(self, id, quantity).await
    }

    async fn release(
        &self,
        id: StockAccountId,
        quantity: Decimal,
    ) -> Result<Decimal, StoreError> {
        PostgresStockStore::release(self, id, quantity).await
    }

    async fn entries(&self, id: StockAccountId) -> Result<Vec<LedgerEntry>, StoreError> {
        PostgresStockStore::entries(self, id).await
    }

    async fn annotate_entry(
        &self,
        id: LedgerEntryId,
        note: &str,
    ) -> Result<LedgerEntry, StoreError> {
        PostgresStockStore::annotate_entry(self, id, note).await
    }

    async fn delete_entry(&self, id: LedgerEntryId) -> Result<(), StoreError> {
        PostgresStockStore::delete_entry(self, id).await
    }

    async fn create_period(&self, period: AccountingPeriod) -> Result<(), StoreError> {
        PostgresStockStore::create_period(self, period).await
    }

    async fn period(&self, id: PeriodId) -> Result<AccountingPeriod, StoreError> {
        PostgresStockStore::period(self, id).await
    }

    async fn close_period(
        &self,
        id: PeriodId,
        actor: ActorId,
    ) -> Result<AccountingPeriod, StoreError> {
        PostgresStockStore::close_period(self, id, actor).await
    }

    async fn reopen_period(&self, id: PeriodId) -> Result<AccountingPeriod, StoreError> {
        PostgresStockStore::reopen_period(self, id).await
    }

    async fn lock_period(&self, id: PeriodId) -> Result<AccountingPeriod, StoreError> {
        PostgresStockStore::lock_period(self, id).await
    }

    async fn verify_account(&self, id: StockAccountId) -> Result<(), StoreError> {
        PostgresStockStore::verify_account(self, id).await
    }

    async fn release_hold(&self, id: StockAccountId) -> Result<(), StoreError> {
        PostgresStockStore::release_hold(self, id).await
    }
}
