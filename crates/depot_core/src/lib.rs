//! Generic typed repository core over a SQLite unit-of-work engine.
//! This crate is the single source of truth for entity lifecycle invariants.

pub mod logging;
pub mod model;
pub mod repo;
pub mod store;

pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entity::{IdValue, Identifiable};
pub use model::record::Record;
pub use repo::repository::{Repository, StoreRepository};
pub use store::{LockMode, Ref, Session, Store, StoreError, StoreResult};
