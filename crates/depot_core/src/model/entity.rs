//! Identifier contract for persisted entities.
//!
//! # Responsibility
//! - Expose a read accessor for the entity identifier.
//! - Bound the identifier types the storage engine can address.
//!
//! # Invariants
//! - `id()` returns `None` exactly while the entity was never persisted.
//! - Once assigned, an identifier never changes for the lifetime of the row.

use rusqlite::types::FromSql;
use rusqlite::ToSql;
use std::fmt::Display;

/// Bound for identifier values addressable by the store.
///
/// Covers the usual identifier shapes (`i64`, `String`, ...) without naming
/// them: the value must bind into SQL, read back from SQL, render into lock
/// keys and error messages, and clone into tracked state.
pub trait IdValue: Clone + PartialEq + Display + ToSql + FromSql {}

impl<T> IdValue for T where T: Clone + PartialEq + Display + ToSql + FromSql {}

/// Contract for entities addressable by a stable identifier.
///
/// The persistence core consults this for one thing only: identifier
/// presence. An entity with `None` is transient and has never been stored;
/// an entity with `Some` is assumed to exist in the backing table. Identity
/// equality is defined by the identifier once assigned; structural equality
/// applies only while the identifier is absent.
pub trait Identifiable {
    /// The identifier type.
    type Id: IdValue;

    /// Gets the entity identifier, or `None` when the entity was never
    /// persisted.
    fn id(&self) -> Option<&Self::Id>;
}
