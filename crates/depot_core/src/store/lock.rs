//! Lock modes and the in-process row-lock registry.
//!
//! # Responsibility
//! - Define the per-operation lock modes honored by session primitives.
//! - Track exclusive (table, identifier) row locks across units of work.
//!
//! # Invariants
//! - A row lock is held by at most one unit of work at a time.
//! - Acquisition is reentrant for the owning unit of work.
//! - Contention fails fast with `LockConflict`; there is no queueing.

use crate::store::{StoreError, StoreResult};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Lock strength attached to a single load or refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Plain read; no row lock is taken.
    None,
    /// Exclusive row lock, held until the owning unit of work ends.
    PessimisticWrite,
}

/// Addresses one row: entity table plus rendered identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RowKey {
    table: &'static str,
    id: String,
}

impl RowKey {
    pub(crate) fn new(table: &'static str, id: &impl Display) -> Self {
        Self {
            table,
            id: id.to_string(),
        }
    }

    pub(crate) fn table(&self) -> &'static str {
        self.table
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }
}

/// Per-store registry of row locks, shared by every unit of work.
///
/// Locks are scoped to the process; coordination across processes is left to
/// the storage engine itself.
pub(crate) struct LockRegistry {
    held: Mutex<HashMap<RowKey, Uuid>>,
}

impl LockRegistry {
    pub(crate) fn new() -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the row lock for `owner`.
    ///
    /// Returns `true` when the lock was newly taken and `false` when `owner`
    /// already held it. Fails fast with `LockConflict` when another unit of
    /// work holds the row.
    pub(crate) fn acquire(&self, owner: Uuid, key: &RowKey) -> StoreResult<bool> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        match held.get(key) {
            Some(current) if *current == owner => Ok(false),
            Some(_) => Err(StoreError::LockConflict {
                entity: key.table(),
                id: key.id().to_string(),
            }),
            None => {
                held.insert(key.clone(), owner);
                Ok(true)
            }
        }
    }

    /// Releases one row lock if `owner` holds it.
    pub(crate) fn release(&self, owner: Uuid, key: &RowKey) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if held.get(key) == Some(&owner) {
            held.remove(key);
        }
    }

    /// Releases every lock held by `owner`.
    pub(crate) fn release_owner(&self, owner: Uuid) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.retain(|_, current| *current != owner);
    }
}
