//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two `Email`s holding
/// the same normalised address are the same email, regardless of where they were
/// parsed. To "change" one, parse a new one.
///
/// Constructors are the only place validation happens, so holding a value object
/// means holding a valid value:
///
/// ```ignore
/// let a = Email::parse(" Alice@Example.com ")?;
/// let b = Email::parse("alice@example.com")?;
/// assert_eq!(a, b);
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
