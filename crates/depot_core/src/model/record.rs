//! Schema mapping contract for persisted entities.
//!
//! # Responsibility
//! - Bind an entity type to its table, columns and provisioning DDL.
//! - Convert entities to SQL bind values and materialize them from rows.
//!
//! # Invariants
//! - `columns()` lists the data columns only; the identifier column is
//!   always handled separately.
//! - Rows handed to `from_row` carry the identifier column and every data
//!   column, selected by name.

use crate::model::entity::Identifiable;
use crate::store::StoreResult;
use rusqlite::types::Value;
use rusqlite::Row;

/// Schema mapping for one entity type.
///
/// Implementations describe where an entity lives and how its fields cross
/// the SQL boundary; the engine derives every statement it needs from this
/// contract. The `Clone + 'static` bounds let the unit of work keep tracked
/// copies in its identity map.
///
/// Persisting transient entities requires the store to assign the identifier
/// on insert, so the identifier column must be declared as an
/// `INTEGER PRIMARY KEY` rowid alias in the provisioning DDL. Entities with
/// caller-assigned identifiers can only be merged into existing rows.
pub trait Record: Identifiable + Clone + 'static {
    /// Table backing this entity type. Doubles as the entity type
    /// descriptor in errors, lock keys and diagnostics.
    fn table() -> &'static str;

    /// Name of the identifier column.
    fn id_column() -> &'static str;

    /// Data column names, excluding the identifier column.
    fn columns() -> &'static [&'static str];

    /// Idempotent DDL executed by provisioning, typically a single
    /// `CREATE TABLE IF NOT EXISTS` statement.
    fn provision_sql() -> &'static str;

    /// Bind values for the data columns, in `columns()` order.
    fn bind_values(&self) -> Vec<Value>;

    /// Materializes an entity from a stored row.
    fn from_row(row: &Row<'_>) -> StoreResult<Self>;
}
