//! SQLite-backed storage engine: bootstrap, units of work and row locks.
//!
//! # Responsibility
//! - Own the error taxonomy shared by the engine and the repository layer.
//! - Re-export the engine surface: store facade, session, locks, references.
//!
//! # Invariants
//! - Engine failures pass through as [`StoreError::Sqlite`] without being
//!   reinterpreted.
//! - Every other variant describes a condition this crate detected itself.

pub mod lock;
pub mod open;
pub mod reference;
pub mod session;

pub use lock::LockMode;
pub use open::Store;
pub use reference::Ref;
pub use session::Session;

/// Errors raised by the storage engine and the repositories built on it.
#[derive(Debug)]
pub enum StoreError {
    /// No row exists for an identifier that was required to resolve.
    NotFound {
        entity: &'static str,
        id: String,
    },
    /// The row lock is held by another unit of work.
    LockConflict {
        entity: &'static str,
        id: String,
    },
    /// The caller broke the persistence contract, for example by persisting
    /// an entity that already carries an identifier.
    Misuse(String),
    /// Repository construction found the entity table missing.
    MissingRequiredTable(&'static str),
    /// Repository construction found a mapped column missing.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Underlying SQLite failure, passed through unchanged.
    Sqlite(rusqlite::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound { entity, id } => {
                write!(f, "no `{entity}` row with identifier `{id}`")
            }
            StoreError::LockConflict { entity, id } => {
                write!(f, "`{entity}` row `{id}` is locked by another unit of work")
            }
            StoreError::Misuse(message) => {
                write!(f, "persistence contract violation: {message}")
            }
            StoreError::MissingRequiredTable(table) => {
                write!(f, "repository requires table `{table}`")
            }
            StoreError::MissingRequiredColumn { table, column } => {
                write!(f, "repository requires column `{column}` in table `{table}`")
            }
            StoreError::Sqlite(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Sqlite(err)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
