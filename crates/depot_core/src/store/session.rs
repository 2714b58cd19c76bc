//! Unit of work: per-transaction persistence context and engine primitives.
//!
//! # Responsibility
//! - Track the entities loaded or written within one transaction.
//! - Provide the primitives the repository layer builds on: find, find_all,
//!   select_where, persist, merge, remove, refresh, contains, reference.
//!
//! # Invariants
//! - No tracked state survives the enclosing transaction.
//! - Writes go through to SQL immediately, so every later read inside the
//!   same unit of work observes them.
//! - Reads resolve against the tracked copies first; a row removed in this
//!   unit of work stays invisible to it.
//! - Write primitives and locking reads acquire the row lock before touching
//!   SQL, so a pessimistic lock excludes competing writers as well as
//!   competing locks.
//! - A locked read reflects the latest committed state of the row, not the
//!   snapshot this unit of work started reading from.

use crate::model::record::Record;
use crate::store::lock::{LockMode, LockRegistry, RowKey};
use crate::store::open::open_file_connection;
use crate::store::reference::Ref;
use crate::store::{StoreError, StoreResult};
use rusqlite::{params_from_iter, types::Value, Connection, ErrorCode, Params, ToSql};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// The unit of work bound to one open transaction.
///
/// Sessions are created by [`Store::transaction`](crate::store::Store::transaction)
/// and handed to its closure by reference; they cannot be constructed
/// anywhere else. Repositories borrow the session and never own it.
pub struct Session<'t> {
    conn: &'t Connection,
    /// Database file behind a file-backed store; `None` for in-memory ones.
    path: Option<PathBuf>,
    locks: Arc<LockRegistry>,
    owner: Uuid,
    /// Set once this unit of work has executed a write statement.
    wrote: Cell<bool>,
    tracked: RefCell<HashMap<RowKey, Box<dyn Any>>>,
    removed: RefCell<HashSet<RowKey>>,
}

impl<'t> Session<'t> {
    pub(crate) fn new(
        conn: &'t Connection,
        path: Option<PathBuf>,
        locks: Arc<LockRegistry>,
        owner: Uuid,
    ) -> Self {
        Self {
            conn,
            path,
            locks,
            owner,
            wrote: Cell::new(false),
            tracked: RefCell::new(HashMap::new()),
            removed: RefCell::new(HashSet::new()),
        }
    }

    pub(crate) fn connection(&self) -> &Connection {
        self.conn
    }

    /// Loads one entity by identifier.
    ///
    /// Without a lock the tracked copy wins over the stored row. With
    /// [`LockMode::PessimisticWrite`] the row lock is acquired first and the
    /// latest committed row state is re-read, refreshing the tracked copy; a
    /// lock taken for a row that turns out to be missing is released
    /// immediately.
    pub fn find<E: Record>(&self, id: &E::Id, mode: LockMode) -> StoreResult<Option<E>> {
        let key = RowKey::new(E::table(), id);
        if self.removed.borrow().contains(&key) {
            return Ok(None);
        }

        match mode {
            LockMode::None => {
                if let Some(tracked) = self.tracked_copy::<E>(&key)? {
                    return Ok(Some(tracked));
                }
                match self.read_row::<E>(id)? {
                    Some(entity) => {
                        self.track(key, entity.clone());
                        Ok(Some(entity))
                    }
                    None => Ok(None),
                }
            }
            LockMode::PessimisticWrite => {
                let newly = self.locks.acquire(self.owner, &key)?;
                match self.locked_row::<E>(id)? {
                    Some(fresh) => {
                        self.track(key, fresh.clone());
                        Ok(Some(fresh))
                    }
                    None => {
                        if newly {
                            self.locks.release(self.owner, &key);
                        }
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Loads every stored entity of one type, ordered by identifier.
    ///
    /// Rows removed in this unit of work are excluded; rows with a tracked
    /// copy come back as that copy.
    pub fn find_all<E: Record>(&self) -> StoreResult<Vec<E>> {
        let sql = format!("{} ORDER BY {} ASC;", select_sql::<E>(), E::id_column());
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            if let Some(entity) = self.resolve_loaded(E::from_row(row)?)? {
                items.push(entity);
            }
        }
        Ok(items)
    }

    /// Loads the entities matching a `WHERE` condition, ordered by
    /// identifier.
    ///
    /// `condition` references data columns and numbered placeholders bound
    /// from `params`. Resolution against the tracked state works as in
    /// [`find_all`](Session::find_all).
    pub fn select_where<E: Record>(
        &self,
        condition: &str,
        params: Vec<Value>,
    ) -> StoreResult<Vec<E>> {
        let sql = format!(
            "{} WHERE {} ORDER BY {} ASC;",
            select_sql::<E>(),
            condition,
            E::id_column()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;

        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            if let Some(entity) = self.resolve_loaded(E::from_row(row)?)? {
                items.push(entity);
            }
        }
        Ok(items)
    }

    /// Inserts a transient entity and returns the managed copy carrying the
    /// store-assigned identifier.
    ///
    /// The new row's lock is held for the remainder of the unit of work.
    ///
    /// # Errors
    /// - `Misuse` when the entity already carries an identifier.
    pub fn persist<E: Record>(&self, entity: E) -> StoreResult<E> {
        if let Some(id) = entity.id() {
            return Err(StoreError::Misuse(format!(
                "persist requires a transient entity; `{}` already carries identifier `{id}`",
                E::table()
            )));
        }

        let columns = E::columns();
        let placeholders = (1..=columns.len())
            .map(|position| format!("?{position}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({});",
            E::table(),
            columns.join(", "),
            placeholders
        );
        self.conn
            .execute(&sql, params_from_iter(entity.bind_values()))?;
        self.wrote.set(true);

        // The canonical row, identifier included, comes from reading back
        // what SQLite assigned.
        let rowid = self.conn.last_insert_rowid();
        let sql = format!("{} WHERE rowid = ?1;", select_sql::<E>());
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([rowid])?;
        let managed = match rows.next()? {
            Some(row) => E::from_row(row)?,
            None => {
                return Err(StoreError::Misuse(format!(
                    "persisted `{}` row `{rowid}` could not be read back",
                    E::table()
                )))
            }
        };

        let key = match managed.id() {
            Some(id) => RowKey::new(E::table(), id),
            None => {
                return Err(StoreError::Misuse(format!(
                    "`{}` rows must carry an identifier after insert",
                    E::table()
                )))
            }
        };
        self.locks.acquire(self.owner, &key)?;
        self.track(key, managed.clone());
        Ok(managed)
    }

    /// Writes the entity's field state over the stored row and returns the
    /// managed copy.
    ///
    /// # Errors
    /// - `Misuse` when the entity carries no identifier or was removed in
    ///   this unit of work.
    /// - `NotFound` when no row exists for the identifier.
    /// - `LockConflict` when another unit of work holds the row or committed
    ///   a change after this one's read snapshot.
    pub fn merge<E: Record>(&self, entity: E) -> StoreResult<E> {
        let id = match entity.id() {
            Some(id) => id.clone(),
            None => {
                return Err(StoreError::Misuse(format!(
                    "merge requires an identifier; `{}` entity was never persisted",
                    E::table()
                )))
            }
        };
        let key = RowKey::new(E::table(), &id);
        if self.removed.borrow().contains(&key) {
            return Err(StoreError::Misuse(format!(
                "cannot merge `{}` entity `{id}`: already marked for removal",
                E::table()
            )));
        }

        let newly = self.locks.acquire(self.owner, &key)?;

        let columns = E::columns();
        let assignments = columns
            .iter()
            .enumerate()
            .map(|(index, column)| format!("{column} = ?{}", index + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{};",
            E::table(),
            assignments,
            E::id_column(),
            columns.len() + 1
        );
        let values = entity.bind_values();
        let mut params: Vec<&dyn ToSql> = values.iter().map(|value| value as &dyn ToSql).collect();
        params.push(&id);
        let changed = match self.execute_write(&sql, params.as_slice(), &key) {
            Ok(changed) => changed,
            Err(err) => {
                if newly {
                    self.locks.release(self.owner, &key);
                }
                return Err(err);
            }
        };
        if changed == 0 {
            if newly {
                self.locks.release(self.owner, &key);
            }
            return Err(StoreError::NotFound {
                entity: E::table(),
                id: id.to_string(),
            });
        }

        match self.read_row::<E>(&id)? {
            Some(managed) => {
                self.track(key, managed.clone());
                Ok(managed)
            }
            None => Err(StoreError::NotFound {
                entity: E::table(),
                id: id.to_string(),
            }),
        }
    }

    /// Deletes the row behind a managed entity and marks it removed for the
    /// rest of this unit of work.
    ///
    /// # Errors
    /// - `Misuse` when the entity is transient or not managed here; detached
    ///   entities must be merged first.
    /// - `LockConflict` when another unit of work holds the row or committed
    ///   a change after this one's read snapshot.
    pub fn remove<E: Record>(&self, entity: &E) -> StoreResult<()> {
        let id = match entity.id() {
            Some(id) => id,
            None => {
                return Err(StoreError::Misuse(format!(
                    "cannot remove transient `{}` entity: it was never persisted",
                    E::table()
                )))
            }
        };
        if !self.contains(entity) {
            return Err(StoreError::Misuse(format!(
                "cannot remove detached `{}` entity `{id}`: merge it into this unit of work first",
                E::table()
            )));
        }

        let key = RowKey::new(E::table(), id);
        let newly = self.locks.acquire(self.owner, &key)?;

        let sql = format!("DELETE FROM {} WHERE {} = ?1;", E::table(), E::id_column());
        let changed = match self.execute_write(&sql, [id], &key) {
            Ok(changed) => changed,
            Err(err) => {
                if newly {
                    self.locks.release(self.owner, &key);
                }
                return Err(err);
            }
        };
        if changed == 0 {
            if newly {
                self.locks.release(self.owner, &key);
            }
            return Err(StoreError::NotFound {
                entity: E::table(),
                id: id.to_string(),
            });
        }

        self.tracked.borrow_mut().remove(&key);
        self.removed.borrow_mut().insert(key);
        Ok(())
    }

    /// Overwrites the entity's field state in place from the stored row,
    /// optionally taking its lock first. Under
    /// [`LockMode::PessimisticWrite`] the re-read reflects the latest
    /// committed state.
    ///
    /// # Errors
    /// - `Misuse` when the entity is transient or not managed by this unit
    ///   of work.
    /// - `NotFound` when the row vanished from the store.
    /// - `LockConflict` when another unit of work holds the row.
    pub fn refresh<E: Record>(&self, entity: &mut E, mode: LockMode) -> StoreResult<()> {
        let id = match entity.id() {
            Some(id) => id.clone(),
            None => {
                return Err(StoreError::Misuse(format!(
                    "cannot refresh transient `{}` entity: it was never persisted",
                    E::table()
                )))
            }
        };
        let key = RowKey::new(E::table(), &id);
        if self.removed.borrow().contains(&key) || !self.tracked.borrow().contains_key(&key) {
            return Err(StoreError::Misuse(format!(
                "cannot refresh `{}` entity `{id}`: not managed by this unit of work",
                E::table()
            )));
        }

        let (newly, fresh) = match mode {
            LockMode::PessimisticWrite => {
                let newly = self.locks.acquire(self.owner, &key)?;
                (newly, self.locked_row::<E>(&id)?)
            }
            LockMode::None => (false, self.read_row::<E>(&id)?),
        };

        match fresh {
            Some(fresh) => {
                self.track(key, fresh.clone());
                *entity = fresh;
                Ok(())
            }
            None => {
                if newly {
                    self.locks.release(self.owner, &key);
                }
                // The row is gone; keeping a tracked copy would resurrect it
                // on the next read.
                self.tracked.borrow_mut().remove(&key);
                Err(StoreError::NotFound {
                    entity: E::table(),
                    id: id.to_string(),
                })
            }
        }
    }

    /// Returns whether this unit of work manages the entity: it carries an
    /// identifier, was loaded or written here, and was not removed since.
    pub fn contains<E: Record>(&self, entity: &E) -> bool {
        match entity.id() {
            None => false,
            Some(id) => {
                let key = RowKey::new(E::table(), id);
                !self.removed.borrow().contains(&key) && self.tracked.borrow().contains_key(&key)
            }
        }
    }

    /// Creates a lazy reference to the entity with the given identifier.
    ///
    /// No store round trip happens here; the row is fetched on first access
    /// through [`Ref::get`].
    pub fn reference<E: Record>(&self, id: E::Id) -> Ref<'_, E> {
        Ref::new(self, id)
    }

    /// Reads the row for a locked operation, bypassing this unit of work's
    /// read snapshot when it could be stale.
    ///
    /// A unit of work that has written holds the database write lock, so its
    /// own connection is current and sees its own writes. Before the first
    /// write the snapshot may predate foreign commits; file-backed stores
    /// then read the latest committed state through a fresh connection.
    fn locked_row<E: Record>(&self, id: &E::Id) -> StoreResult<Option<E>> {
        if self.wrote.get() {
            return self.read_row::<E>(id);
        }
        match &self.path {
            Some(path) => read_row_on::<E>(&open_file_connection(path)?, id),
            // A shared in-memory connection has no foreign writers while
            // this unit of work is open.
            None => self.read_row::<E>(id),
        }
    }

    fn read_row<E: Record>(&self, id: &E::Id) -> StoreResult<Option<E>> {
        read_row_on::<E>(self.conn, id)
    }

    /// Executes one row-addressed write statement.
    ///
    /// `SQLITE_BUSY` and `SQLITE_BUSY_SNAPSHOT` surface as `LockConflict`:
    /// another unit of work either holds the database write lock or
    /// committed after this one's read snapshot.
    fn execute_write<P: Params>(&self, sql: &str, params: P, key: &RowKey) -> StoreResult<usize> {
        match self.conn.execute(sql, params) {
            Ok(changed) => {
                self.wrote.set(true);
                Ok(changed)
            }
            Err(err) if is_busy(&err) => Err(StoreError::LockConflict {
                entity: key.table(),
                id: key.id().to_string(),
            }),
            Err(err) => Err(StoreError::Sqlite(err)),
        }
    }

    /// Resolves a freshly materialized row against the tracked state.
    fn resolve_loaded<E: Record>(&self, entity: E) -> StoreResult<Option<E>> {
        let key = match entity.id() {
            Some(id) => RowKey::new(E::table(), id),
            None => {
                return Err(StoreError::Misuse(format!(
                    "`{}` row materialized without an identifier",
                    E::table()
                )))
            }
        };
        if self.removed.borrow().contains(&key) {
            return Ok(None);
        }
        if let Some(tracked) = self.tracked_copy::<E>(&key)? {
            return Ok(Some(tracked));
        }
        self.track(key, entity.clone());
        Ok(Some(entity))
    }

    fn tracked_copy<E: Record>(&self, key: &RowKey) -> StoreResult<Option<E>> {
        match self.tracked.borrow().get(key) {
            None => Ok(None),
            Some(boxed) => match boxed.downcast_ref::<E>() {
                Some(entity) => Ok(Some(entity.clone())),
                None => Err(StoreError::Misuse(format!(
                    "table `{}` is mapped by more than one entity type",
                    E::table()
                ))),
            },
        }
    }

    fn track<E: Record>(&self, key: RowKey, entity: E) {
        self.tracked.borrow_mut().insert(key, Box::new(entity));
    }
}

fn select_sql<E: Record>() -> String {
    format!(
        "SELECT {}, {} FROM {}",
        E::id_column(),
        E::columns().join(", "),
        E::table()
    )
}

fn read_row_on<E: Record>(conn: &Connection, id: &E::Id) -> StoreResult<Option<E>> {
    let sql = format!("{} WHERE {} = ?1;", select_sql::<E>(), E::id_column());
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(E::from_row(row)?)),
        None => Ok(None),
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::DatabaseBusy
    )
}
