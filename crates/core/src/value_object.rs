//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value** - a conversion
/// factor, a quantity, a date range. Two value objects with the same values
/// are the same thing; there is no identity to preserve. To "modify" one,
/// build a new one.
///
/// The supertraits keep implementations cheap to copy, comparable by their
/// attribute values, and debuggable.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
