//! Value object trait: equality by value, not identity.
//!
//! `Money`, `CurrencyCode` and a transfer request are value objects: they carry no
//! identity and two instances with the same attributes are interchangeable.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// build a new one. For `Money` this means every arithmetic result is a fresh,
/// re-normalized value rather than an in-place update.
///
/// ```ignore
/// let a = Money::normalize(dec!(1.5));
/// let b = Money::normalize(dec!(1.50000));
/// assert_eq!(a, b);
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
