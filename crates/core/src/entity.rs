//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Master-data records (items, warehouses, bins, bills of materials) are
/// entities; audit records of their changes are keyed on `Entity::id`.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + Ord + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
