//! Shared fixtures: the entity types and repositories the suite persists.
#![allow(dead_code)]

use depot_core::{
    Identifiable, Record, Repository, Session, Store, StoreRepository, StoreResult,
};
use rusqlite::types::Value;
use rusqlite::Row;

/// The suite's primary entity.
#[derive(Debug, Clone)]
pub struct Application {
    pub id: Option<i64>,
    pub name: String,
    pub reference: String,
}

impl Application {
    pub fn new(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            reference: reference.into(),
        }
    }
}

/// Identity equality once persisted, structural equality while transient.
impl PartialEq for Application {
    fn eq(&self, other: &Self) -> bool {
        match (self.id, other.id) {
            (Some(left), Some(right)) => left == right,
            (None, None) => self.name == other.name && self.reference == other.reference,
            _ => false,
        }
    }
}

impl Identifiable for Application {
    type Id = i64;

    fn id(&self) -> Option<&i64> {
        self.id.as_ref()
    }
}

impl Record for Application {
    fn table() -> &'static str {
        "applications"
    }

    fn id_column() -> &'static str {
        "id"
    }

    fn columns() -> &'static [&'static str] {
        &["name", "reference"]
    }

    fn provision_sql() -> &'static str {
        "CREATE TABLE IF NOT EXISTS applications (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            reference TEXT NOT NULL
        );"
    }

    fn bind_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.name.clone()),
            Value::Text(self.reference.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> StoreResult<Self> {
        Ok(Self {
            id: Some(row.get("id")?),
            name: row.get("name")?,
            reference: row.get("reference")?,
        })
    }
}

/// Secondary entity for cross-type coverage.
#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    pub id: Option<i64>,
    pub name: String,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

impl Identifiable for Environment {
    type Id = i64;

    fn id(&self) -> Option<&i64> {
        self.id.as_ref()
    }
}

impl Record for Environment {
    fn table() -> &'static str {
        "environments"
    }

    fn id_column() -> &'static str {
        "id"
    }

    fn columns() -> &'static [&'static str] {
        &["name"]
    }

    fn provision_sql() -> &'static str {
        "CREATE TABLE IF NOT EXISTS environments (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        );"
    }

    fn bind_values(&self) -> Vec<Value> {
        vec![Value::Text(self.name.clone())]
    }

    fn from_row(row: &Row<'_>) -> StoreResult<Self> {
        Ok(Self {
            id: Some(row.get("id")?),
            name: row.get("name")?,
        })
    }
}

/// Concrete repository adding the suite's domain finder.
pub struct ApplicationRepository<'s> {
    inner: StoreRepository<'s, Application>,
}

impl<'s> ApplicationRepository<'s> {
    pub fn try_new(session: &'s Session<'s>) -> StoreResult<Self> {
        Ok(Self {
            inner: StoreRepository::try_new(session)?,
        })
    }

    pub fn entity_type(&self) -> &'static str {
        self.inner.entity_type()
    }

    /// Gets the application carrying the given reference.
    pub fn find_by_reference(&self, reference: &str) -> StoreResult<Option<Application>> {
        let matches = self.inner.session().select_where::<Application>(
            "reference = ?1",
            vec![Value::Text(reference.to_string())],
        )?;
        Ok(matches.into_iter().next())
    }
}

impl Repository<Application> for ApplicationRepository<'_> {
    fn session(&self) -> &Session<'_> {
        self.inner.session()
    }
}

pub fn memory_store() -> Store {
    let store = Store::open_in_memory().expect("in-memory store should open");
    store
        .provision::<Application>()
        .expect("provisioning should succeed");
    store
}
