use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use wardstock_core::{ActorId, Entity, EntityId};

use crate::error::UnitError;

/// Unit identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub EntityId);

impl UnitId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for UnitId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// What a unit measures. Units of different kinds can never share a base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementKind {
    Count,
    Weight,
    Volume,
    Length,
    Area,
}

/// Unit lifecycle.
///
/// Draft units are being set up and may not be transacted with. An
/// administrator approves a unit into `Active`; retirement is a soft
/// removal only. Retired units remain resolvable so historical entries
/// keep converting, but no new definitions or transactions may use them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Draft,
    Active,
    Retired,
}

/// One measurement unit in the hierarchy.
///
/// A unit either IS a base (no base link) or converts to exactly one base
/// unit of the same kind through exactly one factor. `precision` is the
/// number of decimal places quantities expressed in this unit are rounded
/// and displayed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    id: UnitId,
    code: String,
    name: String,
    symbol: Option<String>,
    kind: MeasurementKind,
    base: Option<UnitId>,
    factor_to_base: Option<Decimal>,
    precision: u32,
    status: UnitStatus,
    approved_by: Option<ActorId>,
    approved_at: Option<DateTime<Utc>>,
}

impl Unit {
    /// Define a base unit (the root of a conversion hierarchy).
    pub fn base(
        id: UnitId,
        code: impl Into<String>,
        name: impl Into<String>,
        kind: MeasurementKind,
        precision: u32,
    ) -> Self {
        Self {
            id,
            code: code.into(),
            name: name.into(),
            symbol: None,
            kind,
            base: None,
            factor_to_base: None,
            precision,
            status: UnitStatus::Draft,
            approved_by: None,
            approved_at: None,
        }
    }

    /// Define a unit that converts to `base` through `factor`.
    ///
    /// The factor states how many of the base unit one of this unit holds,
    /// so a pack of six single rolls has factor 6.
    pub fn derived(
        id: UnitId,
        code: impl Into<String>,
        name: impl Into<String>,
        kind: MeasurementKind,
        base: UnitId,
        factor: Decimal,
        precision: u32,
    ) -> Result<Self, UnitError> {
        let code = code.into();
        if base == id {
            return Err(UnitError::CycleDetected(code));
        }
        if factor <= Decimal::ZERO {
            return Err(UnitError::InvalidConversionFactor {
                unit: code,
                reason: format!("factor must be positive, got {factor}"),
            });
        }
        Ok(Self {
            id,
            code,
            name: name.into(),
            symbol: None,
            kind,
            base: Some(base),
            factor_to_base: Some(factor),
            precision,
            status: UnitStatus::Draft,
            approved_by: None,
            approved_at: None,
        })
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn id_typed(&self) -> UnitId {
        self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    pub fn kind(&self) -> MeasurementKind {
        self.kind
    }

    pub fn base_unit(&self) -> Option<UnitId> {
        self.base
    }

    pub fn factor(&self) -> Option<Decimal> {
        self.factor_to_base
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    pub fn status(&self) -> UnitStatus {
        self.status
    }

    pub fn is_base(&self) -> bool {
        self.base.is_none()
    }

    /// Approved and active units may be referenced by new transactions.
    pub fn is_transactable(&self) -> bool {
        self.status == UnitStatus::Active && self.approved_by.is_some()
    }

    /// Approve a draft unit for transactional use.
    pub(crate) fn approve(
        &mut self,
        actor: ActorId,
        at: DateTime<Utc>,
    ) -> Result<(), UnitError> {
        match self.status {
            UnitStatus::Retired => Err(UnitError::UnitRetired(self.code.clone())),
            UnitStatus::Draft => {
                self.status = UnitStatus::Active;
                self.approved_by = Some(actor);
                self.approved_at = Some(at);
                Ok(())
            }
            // Approving twice is a no-op.
            UnitStatus::Active => Ok(()),
        }
    }

    /// Soft removal. The unit stays resolvable for historical entries.
    pub(crate) fn retire(&mut self) {
        self.status = UnitStatus::Retired;
    }

    pub(crate) fn relink(&mut self, base: Option<UnitId>, factor: Option<Decimal>) {
        self.base = base;
        self.factor_to_base = factor;
    }
}

impl Entity for Unit {
    type Id = UnitId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn uid() -> UnitId {
        UnitId::new(EntityId::new())
    }

    #[test]
    fn derived_unit_requires_positive_factor() {
        let base = uid();
        let err = Unit::derived(
            uid(),
            "PACK6",
            "Pack of 6",
            MeasurementKind::Count,
            base,
            dec!(0),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, UnitError::InvalidConversionFactor { .. }));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let id = uid();
        let err = Unit::derived(
            id,
            "SELF",
            "Self",
            MeasurementKind::Count,
            id,
            dec!(2),
            0,
        )
        .unwrap_err();
        assert_eq!(err, UnitError::CycleDetected("SELF".to_string()));
    }

    #[test]
    fn approval_lifecycle() {
        let mut unit = Unit::base(uid(), "ROLL", "Single roll", MeasurementKind::Count, 0);
        assert!(!unit.is_transactable());

        unit.approve(ActorId::new(), Utc::now()).unwrap();
        assert!(unit.is_transactable());

        // Idempotent.
        unit.approve(ActorId::new(), Utc::now()).unwrap();

        unit.retire();
        assert!(!unit.is_transactable());
        let err = unit.approve(ActorId::new(), Utc::now()).unwrap_err();
        assert_eq!(err, UnitError::UnitRetired("ROLL".to_string()));
    }
}
