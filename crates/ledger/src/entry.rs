use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use wardstock_core::{ActorId, Entity, EntityId};
use wardstock_units::UnitId;

use crate::account::StockAccountId;
use crate::error::LedgerError;
use crate::period::PeriodId;

/// Ledger entry identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerEntryId(pub EntityId);

impl LedgerEntryId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LedgerEntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// What kind of stock movement an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Receipt,
    Issue,
    Adjustment,
    TransferIn,
    TransferOut,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Receipt => "receipt",
            MovementKind::Issue => "issue",
            MovementKind::Adjustment => "adjustment",
            MovementKind::TransferIn => "transfer_in",
            MovementKind::TransferOut => "transfer_out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "receipt" => Some(MovementKind::Receipt),
            "issue" => Some(MovementKind::Issue),
            "adjustment" => Some(MovementKind::Adjustment),
            "transfer_in" => Some(MovementKind::TransferIn),
            "transfer_out" => Some(MovementKind::TransferOut),
            _ => None,
        }
    }
}

/// Reference to the external document that caused a movement.
///
/// A closed union over the known document kinds, so the set of valid
/// referents is exhaustively matchable instead of an untyped type+id pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum DocumentRef {
    GoodsReceipt(EntityId),
    StockIssue(EntityId),
    Transfer(EntityId),
    Adjustment(EntityId),
    PhysicalCount(EntityId),
}

impl DocumentRef {
    pub fn kind_str(&self) -> &'static str {
        match self {
            DocumentRef::GoodsReceipt(_) => "goods_receipt",
            DocumentRef::StockIssue(_) => "stock_issue",
            DocumentRef::Transfer(_) => "transfer",
            DocumentRef::Adjustment(_) => "adjustment",
            DocumentRef::PhysicalCount(_) => "physical_count",
        }
    }

    pub fn document_id(&self) -> EntityId {
        match self {
            DocumentRef::GoodsReceipt(id)
            | DocumentRef::StockIssue(id)
            | DocumentRef::Transfer(id)
            | DocumentRef::Adjustment(id)
            | DocumentRef::PhysicalCount(id) => *id,
        }
    }

    /// Rebuild from the stored kind discriminator. `None` for an unknown
    /// kind, which storage surfaces as corruption rather than guessing.
    pub fn from_parts(kind: &str, id: EntityId) -> Option<Self> {
        match kind {
            "goods_receipt" => Some(DocumentRef::GoodsReceipt(id)),
            "stock_issue" => Some(DocumentRef::StockIssue(id)),
            "transfer" => Some(DocumentRef::Transfer(id)),
            "adjustment" => Some(DocumentRef::Adjustment(id)),
            "physical_count" => Some(DocumentRef::PhysicalCount(id)),
            _ => None,
        }
    }
}

/// One immutable fact: a stock quantity change with the balance captured
/// around it.
///
/// `quantity_change` is signed and expressed in the account's base unit.
/// The unit actually used at the transaction boundary and its conversion
/// factor are kept as an audit snapshot even though the stored change is
/// normalized. Invariants: `quantity_after = quantity_before +
/// quantity_change`, always; `total_cost = |quantity_change| * unit_cost`
/// when a cost is supplied. Entries are created once, reject modification
/// once locked, and are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    id: LedgerEntryId,
    account_id: StockAccountId,
    kind: MovementKind,
    quantity_change: Decimal,
    quantity_before: Decimal,
    quantity_after: Decimal,
    unit_cost: Option<Decimal>,
    total_cost: Option<Decimal>,
    transaction_unit: UnitId,
    conversion_factor: Decimal,
    document: DocumentRef,
    transaction_date: NaiveDate,
    period_id: Option<PeriodId>,
    is_locked: bool,
    note: Option<String>,
    recorded_by: ActorId,
    recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Built only by the posting decision in this crate.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: LedgerEntryId,
        account_id: StockAccountId,
        kind: MovementKind,
        quantity_change: Decimal,
        quantity_before: Decimal,
        unit_cost: Option<Decimal>,
        transaction_unit: UnitId,
        conversion_factor: Decimal,
        document: DocumentRef,
        transaction_date: NaiveDate,
        period_id: Option<PeriodId>,
        recorded_by: ActorId,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            account_id,
            kind,
            quantity_change,
            quantity_before,
            quantity_after: quantity_before + quantity_change,
            unit_cost,
            total_cost: unit_cost.map(|cost| quantity_change.abs() * cost),
            transaction_unit,
            conversion_factor,
            document,
            transaction_date,
            period_id,
            is_locked: false,
            note: None,
            recorded_by,
            recorded_at,
        }
    }

    /// Rehydrate from storage, re-checking the balance capture.
    #[allow(clippy::too_many_arguments)]
    pub fn from_stored(
        id: LedgerEntryId,
        account_id: StockAccountId,
        kind: MovementKind,
        quantity_change: Decimal,
        quantity_before: Decimal,
        quantity_after: Decimal,
        unit_cost: Option<Decimal>,
        total_cost: Option<Decimal>,
        transaction_unit: UnitId,
        conversion_factor: Decimal,
        document: DocumentRef,
        transaction_date: NaiveDate,
        period_id: Option<PeriodId>,
        is_locked: bool,
        note: Option<String>,
        recorded_by: ActorId,
        recorded_at: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        if quantity_before + quantity_change != quantity_after {
            return Err(LedgerError::ReconciliationMismatch {
                account: account_id,
                expected: quantity_before + quantity_change,
                actual: quantity_after,
            });
        }
        Ok(Self {
            id,
            account_id,
            kind,
            quantity_change,
            quantity_before,
            quantity_after,
            unit_cost,
            total_cost,
            transaction_unit,
            conversion_factor,
            document,
            transaction_date,
            period_id,
            is_locked,
            note,
            recorded_by,
            recorded_at,
        })
    }

    pub fn id_typed(&self) -> LedgerEntryId {
        self.id
    }

    pub fn account_id(&self) -> StockAccountId {
        self.account_id
    }

    pub fn kind(&self) -> MovementKind {
        self.kind
    }

    pub fn quantity_change(&self) -> Decimal {
        self.quantity_change
    }

    pub fn quantity_before(&self) -> Decimal {
        self.quantity_before
    }

    pub fn quantity_after(&self) -> Decimal {
        self.quantity_after
    }

    pub fn unit_cost(&self) -> Option<Decimal> {
        self.unit_cost
    }

    pub fn total_cost(&self) -> Option<Decimal> {
        self.total_cost
    }

    pub fn transaction_unit(&self) -> UnitId {
        self.transaction_unit
    }

    pub fn conversion_factor(&self) -> Decimal {
        self.conversion_factor
    }

    pub fn document(&self) -> DocumentRef {
        self.document
    }

    pub fn transaction_date(&self) -> NaiveDate {
        self.transaction_date
    }

    pub fn period_id(&self) -> Option<PeriodId> {
        self.period_id
    }

    pub fn is_locked(&self) -> bool {
        self.is_locked
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn recorded_by(&self) -> ActorId {
        self.recorded_by
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    /// Lock the entry against further modification. Idempotent. Invoked
    /// by period closing, never by a caller mid-transaction.
    pub fn lock(&mut self) {
        self.is_locked = true;
    }

    /// Undo the period-close lock. Only period reopening calls this.
    pub fn unlock_for_reopen(&mut self) {
        self.is_locked = false;
    }

    /// Attach or replace the free-text note. The one field that may
    /// change after creation, and only until the entry is locked.
    pub fn set_note(&mut self, note: impl Into<String>) -> Result<(), LedgerError> {
        if self.is_locked {
            return Err(LedgerError::LockedEntry(self.id));
        }
        self.note = Some(note.into());
        Ok(())
    }
}

impl Entity for LedgerEntry {
    type Id = LedgerEntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
