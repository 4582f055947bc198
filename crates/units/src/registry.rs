//! Arena-style store for unit definitions and base-unit hierarchy queries.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use wardstock_core::ActorId;

use crate::error::UnitError;
use crate::unit::{Unit, UnitId, UnitStatus};

/// Holds unit definitions and answers hierarchy questions.
///
/// Units live in a flat table indexed by id with base links as optional
/// indices, so the hierarchy is an explicit forest rather than a pointer
/// graph. Traversal is iterative with a visited set: cycle detection is an
/// explicit, testable function, not a stack overflow.
#[derive(Debug, Default, Clone)]
pub struct UnitRegistry {
    units: HashMap<UnitId, Unit>,
    by_code: HashMap<String, UnitId>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit definition.
    ///
    /// Validates code uniqueness, that a linked base exists, is not
    /// retired and measures the same kind, and that the chain the new unit
    /// joins is acyclic.
    pub fn insert(&mut self, unit: Unit) -> Result<UnitId, UnitError> {
        let id = unit.id_typed();
        if self.units.contains_key(&id) || self.by_code.contains_key(unit.code()) {
            return Err(UnitError::DuplicateCode(unit.code().to_string()));
        }

        if let Some(base_id) = unit.base_unit() {
            let base = self.get(base_id)?;
            if base.status() == UnitStatus::Retired {
                return Err(UnitError::UnitRetired(base.code().to_string()));
            }
            if base.kind() != unit.kind() {
                return Err(UnitError::IncompatibleUnits {
                    left: unit.code().to_string(),
                    right: base.code().to_string(),
                });
            }
            // The new id is not in the table yet, so it cannot close a
            // cycle itself, but the chain it joins must already be sound.
            self.base_of(base_id)?;
        }

        self.by_code.insert(unit.code().to_string(), id);
        self.units.insert(id, unit);
        Ok(id)
    }

    /// Re-point a unit at a different base (or make it a base).
    ///
    /// Walks the prospective new chain before committing: if the walk
    /// reaches the unit being relinked, the change would create a cycle
    /// and is rejected.
    pub fn relink(
        &mut self,
        id: UnitId,
        new_base: Option<(UnitId, Decimal)>,
    ) -> Result<(), UnitError> {
        let unit = self.get(id)?;
        let code = unit.code().to_string();
        let kind = unit.kind();

        let (base, factor) = match new_base {
            None => (None, None),
            Some((base_id, factor)) => {
                if base_id == id {
                    return Err(UnitError::CycleDetected(code));
                }
                if factor <= Decimal::ZERO {
                    return Err(UnitError::InvalidConversionFactor {
                        unit: code,
                        reason: format!("factor must be positive, got {factor}"),
                    });
                }
                let base = self.get(base_id)?;
                if base.kind() != kind {
                    return Err(UnitError::IncompatibleUnits {
                        left: code,
                        right: base.code().to_string(),
                    });
                }
                // Walk upward from the prospective base; finding `id`
                // means the relink would close a cycle.
                let mut visited = HashSet::new();
                let mut current = base_id;
                loop {
                    if current == id {
                        return Err(UnitError::CycleDetected(code.clone()));
                    }
                    if !visited.insert(current) {
                        return Err(UnitError::CycleDetected(
                            self.get(current)?.code().to_string(),
                        ));
                    }
                    match self.get(current)?.base_unit() {
                        Some(next) => current = next,
                        None => break,
                    }
                }
                (Some(base_id), Some(factor))
            }
        };

        // Checks passed; commit.
        if let Some(unit) = self.units.get_mut(&id) {
            unit.relink(base, factor);
        }
        Ok(())
    }

    pub fn get(&self, id: UnitId) -> Result<&Unit, UnitError> {
        self.units
            .get(&id)
            .ok_or_else(|| UnitError::UnitNotFound(id.to_string()))
    }

    pub fn by_code(&self, code: &str) -> Result<&Unit, UnitError> {
        self.by_code
            .get(code)
            .and_then(|id| self.units.get(id))
            .ok_or_else(|| UnitError::UnitNotFound(code.to_string()))
    }

    /// Walk the base chain to the root.
    ///
    /// Construction-time validation already forbids cycles; the visited
    /// set here is the defensive backstop that turns a corrupted table
    /// into a clean error instead of an endless loop.
    pub fn base_of(&self, id: UnitId) -> Result<UnitId, UnitError> {
        let mut visited = HashSet::new();
        let mut current = id;
        loop {
            if !visited.insert(current) {
                return Err(UnitError::CycleDetected(
                    self.get(current)?.code().to_string(),
                ));
            }
            match self.get(current)?.base_unit() {
                Some(next) => current = next,
                None => return Ok(current),
            }
        }
    }

    /// Cumulative conversion factor from `id` to its base unit.
    ///
    /// The product of every factor on the chain; 1 for a base unit.
    pub fn factor_to_base(&self, id: UnitId) -> Result<Decimal, UnitError> {
        let mut visited = HashSet::new();
        let mut current = id;
        let mut factor = Decimal::ONE;
        loop {
            if !visited.insert(current) {
                return Err(UnitError::CycleDetected(
                    self.get(current)?.code().to_string(),
                ));
            }
            let unit = self.get(current)?;
            match (unit.base_unit(), unit.factor()) {
                (Some(next), Some(step)) => {
                    factor *= step;
                    current = next;
                }
                (Some(_), None) => {
                    return Err(UnitError::InvalidConversionFactor {
                        unit: unit.code().to_string(),
                        reason: "base unit set but factor missing".to_string(),
                    });
                }
                (None, _) => return Ok(factor),
            }
        }
    }

    /// True iff both units resolve to the same base unit.
    pub fn are_compatible(&self, a: UnitId, b: UnitId) -> Result<bool, UnitError> {
        Ok(self.base_of(a)? == self.base_of(b)?)
    }

    pub fn approve(
        &mut self,
        id: UnitId,
        actor: ActorId,
        at: DateTime<Utc>,
    ) -> Result<(), UnitError> {
        let unit = self
            .units
            .get_mut(&id)
            .ok_or_else(|| UnitError::UnitNotFound(id.to_string()))?;
        unit.approve(actor, at)
    }

    /// Soft-retire a unit. It stays in the table so historical ledger
    /// entries keep resolving; it may no longer back new definitions.
    pub fn retire(&mut self, id: UnitId) -> Result<(), UnitError> {
        let unit = self
            .units
            .get_mut(&id)
            .ok_or_else(|| UnitError::UnitNotFound(id.to_string()))?;
        unit.retire();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::MeasurementKind;
    use rust_decimal_macros::dec;
    use wardstock_core::EntityId;

    fn uid() -> UnitId {
        UnitId::new(EntityId::new())
    }

    fn count_base(code: &str) -> Unit {
        Unit::base(uid(), code, code, MeasurementKind::Count, 0)
    }

    #[test]
    fn duplicate_code_is_rejected() {
        let mut reg = UnitRegistry::new();
        reg.insert(count_base("ROLL")).unwrap();
        let err = reg.insert(count_base("ROLL")).unwrap_err();
        assert_eq!(err, UnitError::DuplicateCode("ROLL".to_string()));
    }

    #[test]
    fn derived_unit_must_reference_an_existing_base() {
        let mut reg = UnitRegistry::new();
        let orphan = Unit::derived(
            uid(),
            "PACK6",
            "Pack of 6",
            MeasurementKind::Count,
            uid(),
            dec!(6),
            0,
        )
        .unwrap();
        assert!(matches!(
            reg.insert(orphan),
            Err(UnitError::UnitNotFound(_))
        ));
    }

    #[test]
    fn kinds_must_match_along_a_chain() {
        let mut reg = UnitRegistry::new();
        let gram = Unit::base(uid(), "G", "Gram", MeasurementKind::Weight, 3);
        let gram_id = reg.insert(gram).unwrap();
        let bogus = Unit::derived(
            uid(),
            "BOX",
            "Box",
            MeasurementKind::Count,
            gram_id,
            dec!(12),
            0,
        )
        .unwrap();
        assert!(matches!(
            reg.insert(bogus),
            Err(UnitError::IncompatibleUnits { .. })
        ));
    }

    #[test]
    fn base_of_walks_nested_chains() {
        let mut reg = UnitRegistry::new();
        let roll = reg.insert(count_base("ROLL")).unwrap();
        let pack = reg
            .insert(
                Unit::derived(uid(), "PACK6", "Pack of 6", MeasurementKind::Count, roll, dec!(6), 0)
                    .unwrap(),
            )
            .unwrap();
        let case = reg
            .insert(
                Unit::derived(uid(), "CASE", "Case", MeasurementKind::Count, pack, dec!(12), 0)
                    .unwrap(),
            )
            .unwrap();

        assert_eq!(reg.base_of(case).unwrap(), roll);
        assert_eq!(reg.factor_to_base(case).unwrap(), dec!(72));
        assert!(reg.are_compatible(case, pack).unwrap());
    }

    #[test]
    fn relink_rejects_cycles() {
        let mut reg = UnitRegistry::new();
        let roll = reg.insert(count_base("ROLL")).unwrap();
        let pack = reg
            .insert(
                Unit::derived(uid(), "PACK6", "Pack of 6", MeasurementKind::Count, roll, dec!(6), 0)
                    .unwrap(),
            )
            .unwrap();

        // ROLL -> PACK6 would close ROLL -> PACK6 -> ROLL.
        let err = reg.relink(roll, Some((pack, dec!(2)))).unwrap_err();
        assert!(matches!(err, UnitError::CycleDetected(_)));

        // Self link is caught before any walk.
        let err = reg.relink(pack, Some((pack, dec!(2)))).unwrap_err();
        assert!(matches!(err, UnitError::CycleDetected(_)));
    }

    #[test]
    fn retired_base_cannot_back_new_units() {
        let mut reg = UnitRegistry::new();
        let roll = reg.insert(count_base("ROLL")).unwrap();
        reg.retire(roll).unwrap();

        let pack = Unit::derived(
            uid(),
            "PACK6",
            "Pack of 6",
            MeasurementKind::Count,
            roll,
            dec!(6),
            0,
        )
        .unwrap();
        assert_eq!(
            reg.insert(pack).unwrap_err(),
            UnitError::UnitRetired("ROLL".to_string())
        );

        // Historical lookups still resolve.
        assert_eq!(reg.base_of(roll).unwrap(), roll);
    }
}
