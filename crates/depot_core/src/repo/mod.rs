//! Repository layer: the typed data-access contract over units of work.
//!
//! # Responsibility
//! - Define the caller-facing operation set shared by every entity type.
//! - Isolate SQL and tracking details from domain code.
//!
//! # Invariants
//! - A repository is bound to exactly one entity type and one unit of work.
//! - Repository APIs return semantic errors (`NotFound`, `LockConflict`,
//!   `Misuse`) in addition to engine transport errors.

pub mod repository;
