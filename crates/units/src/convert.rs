//! Stateless conversion algorithms over a [`UnitRegistry`].
//!
//! Everything here is a pure function: quantities go in, quantities come
//! out, and the registry is only read. All arithmetic is `Decimal`-exact;
//! rounding happens once per conversion, to the precision configured on
//! the unit the result is expressed in.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use wardstock_core::ValueObject;

use crate::error::UnitError;
use crate::registry::UnitRegistry;
use crate::unit::UnitId;

/// A quantity expressed in its hierarchy's base unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalized {
    pub quantity: Decimal,
    pub unit: UnitId,
}

impl ValueObject for Normalized {}

/// Convert a quantity from an arbitrary unit into its base unit.
///
/// Multiplies through every factor on the chain and rounds to the base
/// unit's precision. A quantity already in a base unit is returned
/// unchanged.
pub fn normalize(
    registry: &UnitRegistry,
    quantity: Decimal,
    unit: UnitId,
) -> Result<Normalized, UnitError> {
    if registry.get(unit)?.is_base() {
        return Ok(Normalized { quantity, unit });
    }

    let base = registry.base_of(unit)?;
    let factor = registry.factor_to_base(unit)?;
    let precision = registry.get(base)?.precision();

    Ok(Normalized {
        quantity: (quantity * factor).round_dp(precision),
        unit: base,
    })
}

/// Convert a base-unit quantity into a target unit of the same hierarchy.
pub fn denormalize(
    registry: &UnitRegistry,
    base_quantity: Decimal,
    base_unit: UnitId,
    target: UnitId,
) -> Result<Decimal, UnitError> {
    if registry.base_of(target)? != base_unit {
        return Err(UnitError::IncompatibleUnits {
            left: registry.get(target)?.code().to_string(),
            right: registry.get(base_unit)?.code().to_string(),
        });
    }

    let factor = registry.factor_to_base(target)?;
    let precision = registry.get(target)?.precision();
    Ok((base_quantity / factor).round_dp(precision))
}

/// Convert between two units of the same hierarchy.
///
/// Identity when `from == to`; otherwise normalize then denormalize.
pub fn convert(
    registry: &UnitRegistry,
    quantity: Decimal,
    from: UnitId,
    to: UnitId,
) -> Result<Decimal, UnitError> {
    if from == to {
        registry.get(from)?;
        return Ok(quantity);
    }

    let normalized = normalize(registry, quantity, from)?;
    denormalize(registry, normalized.quantity, normalized.unit, to)
}

/// One contribution to a mixed-container count.
#[derive(Debug, Clone, PartialEq)]
pub struct MixedCountLine {
    pub unit: UnitId,
    pub code: String,
    /// Quantity as counted, in the counted unit.
    pub quantity: Decimal,
    /// The same quantity normalized into the base unit.
    pub base_quantity: Decimal,
}

/// The result of aggregating a physical count recorded as mixed containers.
#[derive(Debug, Clone, PartialEq)]
pub struct MixedCount {
    pub total: Decimal,
    pub base_unit: UnitId,
    pub lines: Vec<MixedCountLine>,
}

impl ValueObject for MixedCount {}

/// Normalize and sum a physical count recorded per container unit, e.g.
/// "1 case + 11 packs-of-6 + 10 single units".
///
/// Entries with zero or negative quantity are skipped. Every remaining
/// entry must resolve to the same base unit.
pub fn normalize_multiple(
    registry: &UnitRegistry,
    counts: &BTreeMap<String, Decimal>,
) -> Result<MixedCount, UnitError> {
    let mut base_unit: Option<UnitId> = None;
    let mut total = Decimal::ZERO;
    let mut lines = Vec::new();

    for (code, &quantity) in counts {
        if quantity <= Decimal::ZERO {
            continue;
        }

        let unit = registry.by_code(code)?;
        let unit_id = unit.id_typed();
        let normalized = normalize(registry, quantity, unit_id)?;

        match base_unit {
            None => base_unit = Some(normalized.unit),
            Some(expected) if expected != normalized.unit => {
                return Err(UnitError::IncompatibleUnits {
                    left: code.clone(),
                    right: registry.get(expected)?.code().to_string(),
                });
            }
            Some(_) => {}
        }

        total += normalized.quantity;
        lines.push(MixedCountLine {
            unit: unit_id,
            code: code.clone(),
            quantity,
            base_quantity: normalized.quantity,
        });
    }

    let base_unit = base_unit.ok_or(UnitError::EmptyMixedCount)?;
    Ok(MixedCount {
        total,
        base_unit,
        lines,
    })
}

/// One allocation step of a [`breakdown`].
#[derive(Debug, Clone, PartialEq)]
pub struct BreakdownLine {
    pub unit: UnitId,
    pub code: String,
    /// Whole containers of this unit taken from the remaining quantity.
    pub count: Decimal,
    /// Cumulative factor of this unit to the base.
    pub factor: Decimal,
}

/// A base quantity decomposed into whole containers plus a remainder.
#[derive(Debug, Clone, PartialEq)]
pub struct Breakdown {
    pub lines: Vec<BreakdownLine>,
    /// Leftover in base units after all candidates were applied.
    pub remainder: Decimal,
}

impl ValueObject for Breakdown {}

/// Decompose a base-unit quantity into a mixed-unit breakdown.
///
/// Candidates are ordered by descending conversion factor, then each takes
/// `floor(remaining / factor)` whole containers. Greedy, not globally
/// optimal: when factors are not exact divisors of one another the
/// remainder can be larger than an exhaustive search would leave. That
/// behavior is intentional and kept for compatibility.
pub fn breakdown(
    registry: &UnitRegistry,
    base_quantity: Decimal,
    base_unit: UnitId,
    candidates: &[UnitId],
) -> Result<Breakdown, UnitError> {
    let mut ordered = Vec::with_capacity(candidates.len());
    for &candidate in candidates {
        if registry.base_of(candidate)? != base_unit {
            return Err(UnitError::IncompatibleUnits {
                left: registry.get(candidate)?.code().to_string(),
                right: registry.get(base_unit)?.code().to_string(),
            });
        }
        let factor = registry.factor_to_base(candidate)?;
        ordered.push((candidate, factor));
    }
    // Stable sort keeps the caller's order for equal factors.
    ordered.sort_by(|a, b| b.1.cmp(&a.1));

    let mut remaining = base_quantity;
    let mut lines = Vec::with_capacity(ordered.len());
    for (unit, factor) in ordered {
        let count = if remaining >= factor {
            (remaining / factor).floor()
        } else {
            Decimal::ZERO
        };
        remaining -= count * factor;
        lines.push(BreakdownLine {
            unit,
            code: registry.get(unit)?.code().to_string(),
            count,
            factor,
        });
    }

    Ok(Breakdown {
        lines,
        remainder: remaining,
    })
}

/// Render a quantity with its unit's precision and symbol (code fallback).
pub fn format_quantity(
    registry: &UnitRegistry,
    quantity: Decimal,
    unit: UnitId,
) -> Result<String, UnitError> {
    let unit = registry.get(unit)?;
    let label = unit.symbol().unwrap_or(unit.code());
    let precision = unit.precision() as usize;
    Ok(format!("{quantity:.precision$} {label}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{MeasurementKind, Unit};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use wardstock_core::EntityId;

    fn uid() -> UnitId {
        UnitId::new(EntityId::new())
    }

    /// ROLL (base), PACK6 (6 rolls), BOX (72 rolls), DRUM (144 rolls).
    ///
    /// BOX and DRUM are nested: a box is 12 packs, a drum is 2 boxes, so
    /// conversion walks more than one factor.
    fn roll_hierarchy() -> (UnitRegistry, UnitId, UnitId, UnitId, UnitId) {
        let mut reg = UnitRegistry::new();
        let roll = reg
            .insert(Unit::base(uid(), "ROLL", "Single roll", MeasurementKind::Count, 0))
            .unwrap();
        let pack = reg
            .insert(
                Unit::derived(uid(), "PACK6", "Pack of 6", MeasurementKind::Count, roll, dec!(6), 0)
                    .unwrap(),
            )
            .unwrap();
        let case = reg
            .insert(
                Unit::derived(uid(), "BOX", "Box of 12 packs", MeasurementKind::Count, pack, dec!(12), 0)
                    .unwrap(),
            )
            .unwrap();
        let drum = reg
            .insert(
                Unit::derived(uid(), "DRUM", "Drum of 2 boxes", MeasurementKind::Count, case, dec!(2), 0)
                    .unwrap(),
            )
            .unwrap();
        (reg, roll, pack, case, drum)
    }

    #[test]
    fn normalize_walks_nested_factors() {
        let (reg, roll, _, _, drum) = roll_hierarchy();
        let n = normalize(&reg, dec!(1), drum).unwrap();
        assert_eq!(n.unit, roll);
        assert_eq!(n.quantity, dec!(144));
    }

    #[test]
    fn normalize_of_a_base_unit_is_identity() {
        let (reg, roll, _, _, _) = roll_hierarchy();
        let n = normalize(&reg, dec!(3.5), roll).unwrap();
        assert_eq!(n.quantity, dec!(3.5));
        assert_eq!(n.unit, roll);
    }

    #[test]
    fn convert_between_siblings() {
        let (reg, roll, pack, case, drum) = roll_hierarchy();
        assert_eq!(convert(&reg, dec!(1), drum, case).unwrap(), dec!(2));
        assert_eq!(convert(&reg, dec!(216), roll, pack).unwrap(), dec!(36));
    }

    #[test]
    fn convert_is_identity_for_the_same_unit() {
        let (reg, _, pack, _, _) = roll_hierarchy();
        assert_eq!(convert(&reg, dec!(7), pack, pack).unwrap(), dec!(7));
    }

    #[test]
    fn convert_rejects_foreign_hierarchies() {
        let (mut reg, _, pack, _, _) = roll_hierarchy();
        let gram = reg
            .insert(Unit::base(uid(), "G", "Gram", MeasurementKind::Weight, 3))
            .unwrap();
        let err = convert(&reg, dec!(1), pack, gram).unwrap_err();
        assert!(matches!(err, UnitError::IncompatibleUnits { .. }));
    }

    #[test]
    fn mixed_count_sums_into_the_base_unit() {
        let (reg, roll, _, _, _) = roll_hierarchy();
        let mut counts = BTreeMap::new();
        counts.insert("BOX".to_string(), dec!(1));
        counts.insert("PACK6".to_string(), dec!(11));
        counts.insert("ROLL".to_string(), dec!(10));

        let result = normalize_multiple(&reg, &counts).unwrap();
        assert_eq!(result.base_unit, roll);
        assert_eq!(result.total, dec!(148));
        assert_eq!(result.lines.len(), 3);
    }

    #[test]
    fn mixed_count_skips_zero_and_negative_entries() {
        let (reg, _, _, _, _) = roll_hierarchy();
        let mut counts = BTreeMap::new();
        counts.insert("BOX".to_string(), dec!(0));
        counts.insert("PACK6".to_string(), dec!(-2));
        counts.insert("ROLL".to_string(), dec!(5));

        let result = normalize_multiple(&reg, &counts).unwrap();
        assert_eq!(result.total, dec!(5));
        assert_eq!(result.lines.len(), 1);
    }

    #[test]
    fn mixed_count_with_nothing_positive_is_rejected() {
        let (reg, _, _, _, _) = roll_hierarchy();
        let mut counts = BTreeMap::new();
        counts.insert("ROLL".to_string(), dec!(0));
        assert_eq!(
            normalize_multiple(&reg, &counts).unwrap_err(),
            UnitError::EmptyMixedCount
        );
    }

    #[test]
    fn mixed_count_rejects_mixed_hierarchies() {
        let (mut reg, _, _, _, _) = roll_hierarchy();
        reg.insert(Unit::base(uid(), "G", "Gram", MeasurementKind::Weight, 3))
            .unwrap();
        let mut counts = BTreeMap::new();
        counts.insert("ROLL".to_string(), dec!(1));
        counts.insert("G".to_string(), dec!(1));
        assert!(matches!(
            normalize_multiple(&reg, &counts).unwrap_err(),
            UnitError::IncompatibleUnits { .. }
        ));
    }

    #[test]
    fn breakdown_allocates_greedily() {
        let (reg, roll, pack, case, _) = roll_hierarchy();
        let result = breakdown(&reg, dec!(148), roll, &[case, pack, roll]).unwrap();

        assert_eq!(result.lines[0].code, "BOX");
        assert_eq!(result.lines[0].count, dec!(2));
        assert_eq!(result.lines[1].code, "PACK6");
        assert_eq!(result.lines[1].count, dec!(0));
        assert_eq!(result.lines[2].code, "ROLL");
        assert_eq!(result.lines[2].count, dec!(4));
        assert_eq!(result.remainder, dec!(0));
    }

    #[test]
    fn breakdown_orders_candidates_by_factor() {
        let (reg, roll, pack, case, _) = roll_hierarchy();
        // Same expectation regardless of the caller's ordering.
        let result = breakdown(&reg, dec!(148), roll, &[roll, pack, case]).unwrap();
        assert_eq!(result.lines[0].code, "BOX");
        assert_eq!(result.lines[0].count, dec!(2));
    }

    #[test]
    fn breakdown_is_greedy_not_optimal() {
        // Factors 6 and 4 over a quantity of 8: greedy takes one 6-pack
        // and strands 2, where two 4-packs would have covered it. Pinned
        // here so the known simplification stays visible.
        let mut reg = UnitRegistry::new();
        let each = reg
            .insert(Unit::base(uid(), "EA", "Each", MeasurementKind::Count, 0))
            .unwrap();
        let six = reg
            .insert(
                Unit::derived(uid(), "SIX", "Six-pack", MeasurementKind::Count, each, dec!(6), 0)
                    .unwrap(),
            )
            .unwrap();
        let four = reg
            .insert(
                Unit::derived(uid(), "FOUR", "Four-pack", MeasurementKind::Count, each, dec!(4), 0)
                    .unwrap(),
            )
            .unwrap();

        let result = breakdown(&reg, dec!(8), each, &[six, four]).unwrap();
        assert_eq!(result.lines[0].count, dec!(1));
        assert_eq!(result.lines[1].count, dec!(0));
        assert_eq!(result.remainder, dec!(2));
    }

    #[test]
    fn format_uses_precision_and_symbol() {
        let mut reg = UnitRegistry::new();
        let gram = reg
            .insert(Unit::base(uid(), "G", "Gram", MeasurementKind::Weight, 2).with_symbol("g"))
            .unwrap();
        assert_eq!(format_quantity(&reg, dec!(12.5), gram).unwrap(), "12.50 g");

        let roll = reg
            .insert(Unit::base(uid(), "ROLL", "Single roll", MeasurementKind::Count, 0))
            .unwrap();
        assert_eq!(format_quantity(&reg, dec!(4), roll).unwrap(), "4 ROLL");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: normalizing into the base and denormalizing back into
        /// the original unit reproduces the quantity within the unit's
        /// rounding precision (exactly, for factor-aligned quantities).
        #[test]
        fn round_trip_preserves_quantity(
            units in 1i64..1_000_000i64,
            factor in 1u32..1_000u32,
        ) {
            let mut reg = UnitRegistry::new();
            let base = reg
                .insert(Unit::base(uid(), "BASE", "Base", MeasurementKind::Count, 3))
                .unwrap();
            let packed = reg
                .insert(
                    Unit::derived(
                        uid(),
                        "PACKED",
                        "Packed",
                        MeasurementKind::Count,
                        base,
                        Decimal::from(factor),
                        3,
                    )
                    .unwrap(),
                )
                .unwrap();

            let quantity = Decimal::new(units, 3);
            let normalized = normalize(&reg, quantity, packed).unwrap();
            let back = denormalize(&reg, normalized.quantity, normalized.unit, packed).unwrap();

            let tolerance = Decimal::new(1, 3);
            prop_assert!((back - quantity).abs() <= tolerance,
                "round trip drifted: {} -> {} -> {}", quantity, normalized.quantity, back);
        }

        /// Property: convert never succeeds across hierarchies with
        /// different bases.
        #[test]
        fn convert_refuses_unrelated_bases(qty in 0i64..1_000_000i64) {
            let mut reg = UnitRegistry::new();
            let rolls = reg
                .insert(Unit::base(uid(), "ROLL", "Roll", MeasurementKind::Count, 0))
                .unwrap();
            let grams = reg
                .insert(Unit::base(uid(), "G", "Gram", MeasurementKind::Weight, 3))
                .unwrap();

            let result = convert(&reg, Decimal::from(qty), rolls, grams);
            let is_incompatible = matches!(result, Err(UnitError::IncompatibleUnits { .. }));
            prop_assert!(is_incompatible);
        }
    }
}
