//! Keyed record: one string business key and one string payload.

use crate::model::entity::{
    new_record_id, record_id_from_row, Entity, EntityDescriptor, RecordId,
};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

static KEYED_RECORD_DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    table: "keyed_records",
    columns: &["key", "data"],
    unique_groups: &[&["key"]],
};

/// Row of `keyed_records`, unique by `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyedRecord {
    #[serde(default = "new_record_id")]
    pub id: RecordId,
    /// Business key.
    pub key: String,
    pub data: String,
    /// Epoch milliseconds; assigned by the engine.
    #[serde(default)]
    pub updated_at: i64,
}

impl KeyedRecord {
    /// Key column set used by the record upsert entry points.
    pub const KEY_COLUMNS: &'static [&'static str] = &["key"];

    /// Creates a record with a freshly generated identity.
    pub fn new(key: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: new_record_id(),
            key: key.into(),
            data: data.into(),
            updated_at: 0,
        }
    }
}

impl Entity for KeyedRecord {
    fn descriptor() -> &'static EntityDescriptor {
        &KEYED_RECORD_DESCRIPTOR
    }

    fn id(&self) -> RecordId {
        self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn set_updated_at(&mut self, epoch_ms: i64) {
        self.updated_at = epoch_ms;
    }

    fn column_value(&self, column: &str) -> Option<Value> {
        match column {
            "key" => Some(Value::Text(self.key.clone())),
            "data" => Some(Value::Text(self.data.clone())),
            _ => None,
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: record_id_from_row(row, "id")?,
            key: row.get("key")?,
            data: row.get("data")?,
            updated_at: row.get("updated_at")?,
        })
    }
}
