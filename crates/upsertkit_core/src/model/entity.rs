//! Entity contract shared by every upsertable row type.
//!
//! # Responsibility
//! - Describe a row type's table, columns and declared unique groups.
//! - Convert rows to and from SQLite values without runtime type inspection.
//! - Build upsert candidates from typed values or loosely typed field maps.
//!
//! # Invariants
//! - `id` is generated client-side and never reassigned once persisted.
//! - `EntityDescriptor::columns` never contains `id` or `updated_at`.
//! - Every declared unique group is backed by a unique constraint or index.

use rusqlite::types::{Type, Value};
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// Surrogate identity of every entity row.
pub type RecordId = Uuid;

/// Loosely typed field map accepted by [`Candidate::from_fields`].
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

/// Column holding the surrogate identity.
pub const ID_COLUMN: &str = "id";
/// Column holding the engine-assigned update timestamp.
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Generates a fresh surrogate identity.
pub fn new_record_id() -> RecordId {
    Uuid::new_v4()
}

/// Static table metadata for one entity type.
#[derive(Debug)]
pub struct EntityDescriptor {
    /// Table storing rows of this entity type.
    pub table: &'static str,
    /// Business-key and payload columns in bind order.
    pub columns: &'static [&'static str],
    /// Column groups covered by a unique constraint or unique index.
    pub unique_groups: &'static [&'static [&'static str]],
}

impl EntityDescriptor {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(&column)
    }

    /// Returns whether `columns` contains every column of some unique group.
    pub fn covers_unique_group(&self, columns: &[&str]) -> bool {
        self.unique_groups
            .iter()
            .any(|group| group.iter().all(|column| columns.contains(column)))
    }
}

/// A row type the upsert engines can persist.
///
/// Implemented once per table; the engines are parameterized by it.
pub trait Entity: Clone + Serialize + DeserializeOwned {
    fn descriptor() -> &'static EntityDescriptor;

    fn id(&self) -> RecordId;

    fn set_id(&mut self, id: RecordId);

    /// Epoch milliseconds of the last create or merge.
    fn updated_at(&self) -> i64;

    fn set_updated_at(&mut self, epoch_ms: i64);

    /// Returns the bind value for one descriptor column.
    ///
    /// Returns `None` for columns the entity does not own.
    fn column_value(&self, column: &str) -> Option<Value>;

    /// Decodes one row selected with `id`, descriptor columns and `updated_at`.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Parses a stored identity, reporting the column on failure.
pub fn record_id_from_row(row: &Row<'_>, column: &str) -> rusqlite::Result<RecordId> {
    let text: String = row.get(column)?;
    Uuid::parse_str(&text).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            row.as_ref().column_index(column).unwrap_or(0),
            Type::Text,
            Box::new(err),
        )
    })
}

/// Upsert input built through one of the two explicit constructors.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<E> {
    entity: E,
}

impl<E: Entity> Candidate<E> {
    /// Wraps an already-typed entity value.
    pub fn from_entity(entity: E) -> Self {
        Self { entity }
    }

    /// Builds a candidate from a field map such as a decoded JSON body.
    ///
    /// Missing `id` generates a new identity; missing `updated_at` defaults to
    /// zero and is overwritten by the engine.
    pub fn from_fields(fields: FieldMap) -> Result<Self, serde_json::Error> {
        let entity = serde_json::from_value(serde_json::Value::Object(fields))?;
        Ok(Self { entity })
    }

    pub fn entity(&self) -> &E {
        &self.entity
    }

    pub fn into_entity(self) -> E {
        self.entity
    }
}
