//! External mapping: links a provider-side identifier to a local reference.
//!
//! Unique twice over: by `(provider, external_id)` through a table constraint
//! and by `(provider, local_ref)` through a unique index. Only the first group
//! is the business key; a collision on the second is a genuine conflict.

use crate::model::entity::{
    new_record_id, record_id_from_row, Entity, EntityDescriptor, RecordId,
};
use rusqlite::types::{Type, Value};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

static EXTERNAL_MAPPING_DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    table: "external_mappings",
    columns: &["provider", "external_id", "local_ref", "record_id"],
    unique_groups: &[&["provider", "external_id"], &["provider", "local_ref"]],
};

/// Row of `external_mappings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalMapping {
    #[serde(default = "new_record_id")]
    pub id: RecordId,
    pub provider: String,
    pub external_id: String,
    pub local_ref: String,
    /// Optional link to a `keyed_records` row; enforced by a foreign key.
    #[serde(default)]
    pub record_id: Option<RecordId>,
    #[serde(default)]
    pub updated_at: i64,
}

impl ExternalMapping {
    pub const KEY_COLUMNS: &'static [&'static str] = &["provider", "external_id"];

    pub fn new(
        provider: impl Into<String>,
        external_id: impl Into<String>,
        local_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: new_record_id(),
            provider: provider.into(),
            external_id: external_id.into(),
            local_ref: local_ref.into(),
            record_id: None,
            updated_at: 0,
        }
    }
}

impl Entity for ExternalMapping {
    fn descriptor() -> &'static EntityDescriptor {
        &EXTERNAL_MAPPING_DESCRIPTOR
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
            "provider" => Some(Value::Text(self.provider.clone())),
            "external_id" => Some(Value::Text(self.external_id.clone())),
            "local_ref" => Some(Value::Text(self.local_ref.clone())),
            "record_id" => Some(
                self.record_id
                    .map_or(Value::Null, |id| Value::Text(id.to_string())),
            ),
            _ => None,
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let record_id = match row.get::<_, Option<String>>("record_id")? {
            Some(text) => Some(Uuid::parse_str(&text).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(err))
            })?),
            None => None,
        };

        Ok(Self {
            id: record_id_from_row(row, "id")?,
            provider: row.get("provider")?,
            external_id: row.get("external_id")?,
            local_ref: row.get("local_ref")?,
            record_id,
            updated_at: row.get("updated_at")?,
        })
    }
}
