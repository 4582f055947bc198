use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use wardstock_core::{Entity, EntityId};
use wardstock_units::UnitId;

use crate::error::LedgerError;

/// Stock account identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockAccountId(pub EntityId);

impl StockAccountId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for StockAccountId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// One stock-keeping position: an item within a location.
///
/// Both quantities are always expressed in the account's fixed base unit,
/// never in a transaction unit. `available` is derived, not stored. The
/// on-hand balance is mutated only by the posting path in this crate;
/// nothing else holds a writable handle to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAccount {
    id: StockAccountId,
    item_id: EntityId,
    location_id: EntityId,
    base_unit: UnitId,
    quantity_on_hand: Decimal,
    quantity_reserved: Decimal,
    allow_negative: bool,
    halted: bool,
}

impl StockAccount {
    /// Open a new account with zero balances.
    pub fn new(
        id: StockAccountId,
        item_id: EntityId,
        location_id: EntityId,
        base_unit: UnitId,
        allow_negative: bool,
    ) -> Self {
        Self {
            id,
            item_id,
            location_id,
            base_unit,
            quantity_on_hand: Decimal::ZERO,
            quantity_reserved: Decimal::ZERO,
            allow_negative,
            halted: false,
        }
    }

    /// Rehydrate from storage. Not a second write path: balances loaded
    /// here were produced by the posting path in the first place.
    #[allow(clippy::too_many_arguments)]
    pub fn from_stored(
        id: StockAccountId,
        item_id: EntityId,
        location_id: EntityId,
        base_unit: UnitId,
        quantity_on_hand: Decimal,
        quantity_reserved: Decimal,
        allow_negative: bool,
        halted: bool,
    ) -> Self {
        Self {
            id,
            item_id,
            location_id,
            base_unit,
            quantity_on_hand,
            quantity_reserved,
            allow_negative,
            halted,
        }
    }

    pub fn id_typed(&self) -> StockAccountId {
        self.id
    }

    pub fn item_id(&self) -> EntityId {
        self.item_id
    }

    pub fn location_id(&self) -> EntityId {
        self.location_id
    }

    pub fn base_unit(&self) -> UnitId {
        self.base_unit
    }

    pub fn quantity_on_hand(&self) -> Decimal {
        self.quantity_on_hand
    }

    pub fn quantity_reserved(&self) -> Decimal {
        self.quantity_reserved
    }

    /// On hand minus reserved.
    pub fn available(&self) -> Decimal {
        self.quantity_on_hand - self.quantity_reserved
    }

    pub fn allows_negative(&self) -> bool {
        self.allow_negative
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Apply a signed movement to the on-hand balance.
    ///
    /// Crate-private: the posting path is the only writer of
    /// `quantity_on_hand`.
    pub(crate) fn apply_delta(&mut self, delta: Decimal) -> Result<Decimal, LedgerError> {
        let after = self.quantity_on_hand + delta;
        if !self.allow_negative && after < Decimal::ZERO {
            return Err(LedgerError::InsufficientStock {
                available: self.quantity_on_hand,
                requested: delta.abs(),
            });
        }
        self.quantity_on_hand = after;
        Ok(after)
    }

    /// Set stock aside for an allocation. No ledger entry is written:
    /// reservations are an allocation layer, not a movement of physical
    /// stock.
    pub fn reserve(&mut self, quantity: Decimal) -> Result<Decimal, LedgerError> {
        if quantity <= Decimal::ZERO {
            return Err(LedgerError::InvalidQuantity(format!(
                "reservation amount must be positive, got {quantity}"
            )));
        }
        if quantity > self.available() {
            return Err(LedgerError::InsufficientStock {
                available: self.available(),
                requested: quantity,
            });
        }
        self.quantity_reserved += quantity;
        Ok(self.quantity_reserved)
    }

    /// Return previously reserved stock to the available pool.
    pub fn release(&mut self, quantity: Decimal) -> Result<Decimal, LedgerError> {
        if quantity <= Decimal::ZERO {
            return Err(LedgerError::InvalidQuantity(format!(
                "release amount must be positive, got {quantity}"
            )));
        }
        if quantity > self.quantity_reserved {
            return Err(LedgerError::InsufficientStock {
                available: self.quantity_reserved,
                requested: quantity,
            });
        }
        self.quantity_reserved -= quantity;
        Ok(self.quantity_reserved)
    }

    /// Freeze the account after a reconciliation mismatch.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Lift the freeze once the mismatch has been investigated.
    pub fn release_hold(&mut self) {
        self.halted = false;
    }
}

impl Entity for StockAccount {
    type Id = StockAccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
