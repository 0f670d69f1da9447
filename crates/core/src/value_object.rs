//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attributes. A stock
/// reference `(fulfillment, 17)` is the same reference wherever it appears;
/// a stock layer with the same quantity as another is still a different layer.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
