//! Entity contracts shared by every repository.
//!
//! # Responsibility
//! - Define the identifier contract entities expose to the persistence core.
//! - Define the schema mapping contract binding an entity to its table.
//!
//! # Invariants
//! - An entity carries `None` as identifier exactly until it is first persisted.
//! - A record type maps to exactly one table for the lifetime of the program.

pub mod entity;
pub mod record;
