//! Unit-layer error model.

use thiserror::Error;

/// Deterministic validation failures of the unit registry and converter.
///
/// All of these are recoverable and returned to the caller; none should
/// abort the process. Units are identified by code in messages because the
/// code is what appears on documents and screens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnitError {
    /// No unit with the given code or id is registered.
    #[error("unit not found: {0}")]
    UnitNotFound(String),

    /// Two units do not resolve to the same base unit.
    #[error("incompatible units: {left} and {right} do not share a base unit")]
    IncompatibleUnits { left: String, right: String },

    /// A unit reappeared while walking a base-unit chain.
    #[error("cycle detected in unit hierarchy at {0}")]
    CycleDetected(String),

    /// A conversion factor was missing, zero or negative.
    #[error("invalid conversion factor for {unit}: {reason}")]
    InvalidConversionFactor { unit: String, reason: String },

    /// A unit with this code is already registered.
    #[error("unit code already registered: {0}")]
    DuplicateCode(String),

    /// The unit has been retired and may not be used for new definitions
    /// or transactions.
    #[error("unit is retired: {0}")]
    UnitRetired(String),

    /// A mixed-container count contained no positive quantities.
    #[error("mixed count contains no positive quantities")]
    EmptyMixedCount,
}
