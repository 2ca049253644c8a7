//! Value object marker.

/// Marker trait for value objects: immutable, compared by value, no identity.
///
/// `Money` and `CurrencyCode` are value objects; a `Sale` is not (two sales with
/// identical lines are still different sales).
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
