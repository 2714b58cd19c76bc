//! Generic repository contract and its store-backed implementation.
//!
//! # Responsibility
//! - Define the operation set callers get for any entity type: find-all,
//!   identifier lookup with optional pessimistic locking, lock/refresh, lazy
//!   references, upsert save and detach-tolerant delete.
//! - Validate schema readiness when a repository is constructed.
//!
//! # Invariants
//! - `save` never produces two identifiers for one logical entity: absent
//!   identifier inserts, present identifier merges.
//! - Entity lifecycle: transient (no identifier), managed after a save or
//!   load, removed after a delete. A managed entity becomes detached when
//!   its unit of work ends; saving or deleting it later re-attaches it by
//!   merging.

use crate::model::record::Record;
use crate::store::lock::LockMode;
use crate::store::reference::Ref;
use crate::store::session::Session;
use crate::store::{StoreError, StoreResult};
use rusqlite::Connection;
use std::marker::PhantomData;

/// Typed data-access operations for one entity type.
///
/// Every operation runs against the unit of work returned by
/// [`session`](Repository::session); implementors supply that accessor and
/// inherit the rest. Concrete repositories add their own finders on top,
/// typically through [`Session::select_where`].
pub trait Repository<E: Record> {
    /// The unit of work this repository operates against.
    fn session(&self) -> &Session<'_>;

    /// Loads all stored entities, ordered by identifier.
    fn find_all(&self) -> StoreResult<Vec<E>> {
        self.session().find_all::<E>()
    }

    /// Loads the entity with the given identifier without locking it.
    ///
    /// An absent identifier short-circuits to `None` without touching the
    /// store. A missing row is `None`, never an error.
    fn find_by_id(&self, id: Option<&E::Id>) -> StoreResult<Option<E>> {
        self.find_by_id_with(id, LockMode::None)
    }

    /// Loads the entity with the given identifier under the given lock mode.
    ///
    /// With [`LockMode::PessimisticWrite`] the row lock is held until the
    /// unit of work ends; a lock taken for a missing row is released
    /// immediately.
    fn find_by_id_with(&self, id: Option<&E::Id>, mode: LockMode) -> StoreResult<Option<E>> {
        match id {
            Some(id) => self.session().find(id, mode),
            None => Ok(None),
        }
    }

    /// Loads the entity with the given identifier, failing when it is
    /// absent.
    ///
    /// # Errors
    /// - `NotFound` when no row exists for `id`.
    fn get_by_id(&self, id: &E::Id) -> StoreResult<E> {
        self.find_by_id(Some(id))?.ok_or_else(|| StoreError::NotFound {
            entity: E::table(),
            id: id.to_string(),
        })
    }

    /// Pessimistically locks a managed entity, refreshing its field state in
    /// place.
    fn lock(&self, entity: &mut E) -> StoreResult<()> {
        self.lock_with(entity, LockMode::PessimisticWrite)
    }

    /// Locks a managed entity under the given mode, refreshing its field
    /// state in place from the stored row.
    ///
    /// # Errors
    /// - `Misuse` when the entity is not managed by this unit of work.
    /// - `LockConflict` when another unit of work holds the row.
    /// - `NotFound` when the row vanished from the store.
    fn lock_with(&self, entity: &mut E, mode: LockMode) -> StoreResult<()> {
        self.session().refresh(entity, mode)
    }

    /// Creates a lazy reference to the entity with the given identifier, or
    /// `None` when the identifier is absent.
    ///
    /// No fetch happens until [`Ref::get`] is first called. References to
    /// other entity types go through [`Session::reference`] directly.
    fn reference(&self, id: Option<&E::Id>) -> Option<Ref<'_, E>> {
        id.map(|id| self.session().reference(id.clone()))
    }

    /// Saves the entity: inserts it when it carries no identifier, merges
    /// its state over the stored row otherwise.
    ///
    /// The returned entity is the managed copy and may differ from the
    /// argument; callers must use the return value for any further
    /// operations, not the value they passed in.
    ///
    /// # Errors
    /// - `NotFound` when merging and no row exists for the identifier.
    /// - `LockConflict` when another unit of work holds the row.
    fn save(&self, entity: E) -> StoreResult<E> {
        if entity.id().is_none() {
            self.session().persist(entity)
        } else {
            self.session().merge(entity)
        }
    }

    /// Deletes the entity's row.
    ///
    /// A managed entity is removed directly; a detached one is first merged
    /// into this unit of work and the merged copy is removed.
    ///
    /// # Errors
    /// - `Misuse` when the entity carries no identifier.
    /// - `NotFound` when no row exists for the identifier.
    /// - `LockConflict` when another unit of work holds the row.
    fn delete(&self, entity: &E) -> StoreResult<()> {
        if self.session().contains(entity) {
            self.session().remove(entity)
        } else {
            let managed = self.session().merge(entity.clone())?;
            self.session().remove(&managed)
        }
    }

    /// Deletes the row with the given identifier; silently does nothing when
    /// no such row exists.
    fn delete_by_id(&self, id: &E::Id) -> StoreResult<()> {
        match self.find_by_id(Some(id))? {
            Some(entity) => self.delete(&entity),
            None => Ok(()),
        }
    }
}

/// Store-backed repository bound to one entity type and one unit of work.
pub struct StoreRepository<'s, E: Record> {
    session: &'s Session<'s>,
    entity: PhantomData<E>,
}

impl<'s, E: Record> StoreRepository<'s, E> {
    /// Constructs a repository over the given unit of work, validating that
    /// the entity's table and every mapped column exist.
    ///
    /// # Errors
    /// - `MissingRequiredTable` when the table was never provisioned.
    /// - `MissingRequiredColumn` when the table lacks a mapped column.
    pub fn try_new(session: &'s Session<'s>) -> StoreResult<Self> {
        ensure_record_ready::<E>(session.connection())?;
        Ok(Self {
            session,
            entity: PhantomData,
        })
    }

    /// The entity type descriptor (table name) this repository is bound to.
    pub fn entity_type(&self) -> &'static str {
        E::table()
    }
}

impl<E: Record> Repository<E> for StoreRepository<'_, E> {
    fn session(&self) -> &Session<'_> {
        self.session
    }
}

fn ensure_record_ready<E: Record>(conn: &Connection) -> StoreResult<()> {
    if !table_exists(conn, E::table())? {
        return Err(StoreError::MissingRequiredTable(E::table()));
    }
    if !table_has_column(conn, E::table(), E::id_column())? {
        return Err(StoreError::MissingRequiredColumn {
            table: E::table(),
            column: E::id_column(),
        });
    }
    for &column in E::columns() {
        if !table_has_column(conn, E::table(), column)? {
            return Err(StoreError::MissingRequiredColumn {
                table: E::table(),
                column,
            });
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1);",
    )?;
    let exists = stmt.query_row([table], |row| row.get::<_, i64>(0))?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let sql = format!("PRAGMA table_info({table});");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get("name")?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
