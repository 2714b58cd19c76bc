//! Store facade: database bootstrap, provisioning and scoped units of work.
//!
//! # Responsibility
//! - Open and configure the SQLite database backing a store.
//! - Execute entity provisioning DDL.
//! - Scope every unit of work in a transaction: commit on success, roll back
//!   on error or panic, release row locks afterwards.
//!
//! # Invariants
//! - [`Session`] values exist only inside [`Store::transaction`]; an
//!   operation outside a transaction is unrepresentable.
//! - File-backed stores run WAL with foreign keys on and a 5s busy timeout.
//! - Row locks outlive the closure and release only after commit or rollback.

use crate::model::record::Record;
use crate::store::lock::LockRegistry;
use crate::store::session::Session;
use crate::store::{StoreError, StoreResult};
use log::{debug, error, info};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Storage engine facade owning the database handle, the row-lock registry
/// and transaction scoping.
///
/// All units of work against one database must go through the same `Store`
/// value: row locks live in the store and do not span processes.
pub struct Store {
    backend: Backend,
    locks: Arc<LockRegistry>,
}

enum Backend {
    /// One dedicated connection per unit of work. Overlapping transactions
    /// in one process are supported.
    File(PathBuf),
    /// Single shared connection. Overlapping units of work are rejected.
    Memory(Mutex<Connection>),
}

impl Store {
    /// Opens (creating if needed) a file-backed store at `path`.
    ///
    /// # Side effects
    /// - Emits `store_open` logging events with duration and status.
    ///
    /// # Errors
    /// - `StoreError::Sqlite` when the database cannot be opened or
    ///   configured.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let started_at = Instant::now();
        info!("event=store_open module=store status=start mode=file");

        let path = path.as_ref().to_path_buf();
        match open_file_connection(&path) {
            Ok(_) => {
                info!(
                    "event=store_open module=store status=ok mode=file duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(Self {
                    backend: Backend::File(path),
                    locks: Arc::new(LockRegistry::new()),
                })
            }
            Err(err) => {
                error!(
                    "event=store_open module=store status=error mode=file duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Opens a private in-memory store, mainly for tests and tooling.
    pub fn open_in_memory() -> StoreResult<Self> {
        let started_at = Instant::now();
        info!("event=store_open module=store status=start mode=memory");

        match open_memory_connection() {
            Ok(conn) => {
                info!(
                    "event=store_open module=store status=ok mode=memory duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(Self {
                    backend: Backend::Memory(Mutex::new(conn)),
                    locks: Arc::new(LockRegistry::new()),
                })
            }
            Err(err) => {
                error!(
                    "event=store_open module=store status=error mode=memory duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Executes the provisioning DDL of one entity type.
    ///
    /// Provisioning is idempotent and must run outside units of work.
    pub fn provision<E: Record>(&self) -> StoreResult<()> {
        match &self.backend {
            Backend::File(path) => {
                let conn = open_file_connection(path)?;
                conn.execute_batch(E::provision_sql())?;
            }
            Backend::Memory(cell) => {
                let conn = lock_memory_connection(cell)?;
                conn.execute_batch(E::provision_sql())?;
            }
        }
        info!(
            "event=provision module=store status=ok table={}",
            E::table()
        );
        Ok(())
    }

    /// Runs `work` as one unit of work.
    ///
    /// The closure receives the only handle to the transaction-scoped
    /// [`Session`]. An `Ok` return commits; an `Err` return or a panic rolls
    /// back. Row locks taken inside release after the transaction ends, on
    /// every exit path.
    ///
    /// # Errors
    /// - The closure's error, unchanged, after rollback.
    /// - `StoreError::Misuse` when an in-memory store already has an active
    ///   unit of work.
    /// - `StoreError::Sqlite` for transaction begin/commit failures.
    pub fn transaction<T, F>(&self, work: F) -> StoreResult<T>
    where
        F: for<'s> FnOnce(&'s Session<'s>) -> StoreResult<T>,
    {
        match &self.backend {
            Backend::File(path) => {
                let mut conn = open_file_connection(path)?;
                self.run_unit_of_work(&mut conn, Some(path), work)
            }
            Backend::Memory(cell) => {
                let mut guard = lock_memory_connection(cell)?;
                self.run_unit_of_work(&mut guard, None, work)
            }
        }
    }

    fn run_unit_of_work<T, F>(
        &self,
        conn: &mut Connection,
        path: Option<&Path>,
        work: F,
    ) -> StoreResult<T>
    where
        F: for<'s> FnOnce(&'s Session<'s>) -> StoreResult<T>,
    {
        let owner = Uuid::new_v4();
        // Declared before the transaction so locks release only after commit
        // or rollback, on every exit path including panic.
        let _locks = OwnedLocks {
            registry: Arc::clone(&self.locks),
            owner,
        };

        let tx = conn.transaction()?;
        debug!("event=unit_of_work module=store status=begin owner={owner}");

        let outcome = {
            let session = Session::new(
                &tx,
                path.map(Path::to_path_buf),
                Arc::clone(&self.locks),
                owner,
            );
            work(&session)
        };

        match outcome {
            Ok(value) => {
                tx.commit()?;
                debug!("event=unit_of_work module=store status=commit owner={owner}");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    error!(
                        "event=unit_of_work module=store status=rollback_failed owner={owner} error={rollback_err}"
                    );
                } else {
                    debug!("event=unit_of_work module=store status=rollback owner={owner}");
                }
                Err(err)
            }
        }
    }
}

/// Releases every row lock of one unit of work when dropped.
struct OwnedLocks {
    registry: Arc<LockRegistry>,
    owner: Uuid,
}

impl Drop for OwnedLocks {
    fn drop(&mut self) {
        self.registry.release_owner(self.owner);
    }
}

pub(crate) fn open_file_connection(path: &Path) -> StoreResult<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

fn open_memory_connection() -> StoreResult<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

fn lock_memory_connection(cell: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
    match cell.try_lock() {
        Ok(guard) => Ok(guard),
        // A unit of work that panicked has already rolled back on drop; the
        // connection itself stays usable.
        Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => Err(StoreError::Misuse(
            "in-memory store already has an active unit of work".to_string(),
        )),
    }
}
