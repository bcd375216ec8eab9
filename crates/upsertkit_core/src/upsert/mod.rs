//! Update-or-create engines keyed by business columns.
//!
//! # Responsibility
//! - Validate upsert requests before any database round trip.
//! - Provide the racy reference engine and the collision-safe engine.
//! - Classify failed writes and merge candidates onto existing rows.
//!
//! # Invariants
//! - At most one row per key tuple; identity survives every merge.
//! - Only a classified key collision is recovered locally, and only once.
//! - Every other failure surfaces unchanged.

use crate::model::entity::{Entity, EntityDescriptor};
use crate::repo::entity_repo::RepoError;
use log::debug;
use rusqlite::types::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod classifier;
pub mod merge;
pub mod naive;
pub mod safe;

use classifier::{ConflictClassifier, SqliteConflictClassifier, WriteFailure};

pub type UpsertResult<T> = Result<T, UpsertError>;

/// Upsert failure taxonomy.
///
/// Misuse variants are raised before touching the database. Integrity and
/// connectivity failures arrive wrapped in `Repo` with the driver error intact.
#[derive(Debug)]
pub enum UpsertError {
    EmptyKeyColumns,
    UnknownKeyColumn {
        table: &'static str,
        column: String,
    },
    DuplicateKeyColumn {
        table: &'static str,
        column: String,
    },
    /// Key columns do not cover any declared unique group.
    KeyNotUnique {
        table: &'static str,
        columns: Vec<String>,
    },
    MissingKeyValue {
        table: &'static str,
        column: String,
    },
    InvalidFields(serde_json::Error),
    Repo(RepoError),
    /// A classified collision was followed by a re-query that found nothing.
    CollisionWithoutRow {
        table: &'static str,
        columns: Vec<String>,
    },
}

impl UpsertError {
    /// Returns whether the request was rejected before any database work.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::EmptyKeyColumns
                | Self::UnknownKeyColumn { .. }
                | Self::DuplicateKeyColumn { .. }
                | Self::KeyNotUnique { .. }
                | Self::MissingKeyValue { .. }
                | Self::InvalidFields(_)
        )
    }

    /// Classifies the driver error behind this failure for outer layers.
    ///
    /// Returns `None` for failures that did not come from the database.
    pub fn failure<E: Entity>(&self, key_columns: &[&str]) -> Option<WriteFailure> {
        let err = match self {
            Self::Repo(repo) => repo.sqlite()?,
            _ => return None,
        };
        Some(SqliteConflictClassifier.classify(err, E::descriptor(), key_columns))
    }
}

impl Display for UpsertError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyKeyColumns => write!(f, "upsert requires at least one key column"),
            Self::UnknownKeyColumn { table, column } => {
                write!(f, "key column `{column}` is not a column of `{table}`")
            }
            Self::DuplicateKeyColumn { table, column } => {
                write!(f, "key column `{column}` listed twice for `{table}`")
            }
            Self::KeyNotUnique { table, columns } => write!(
                f,
                "key columns ({}) do not cover a unique constraint of `{table}`",
                columns.join(", ")
            ),
            Self::MissingKeyValue { table, column } => {
                write!(f, "key column `{table}.{column}` has no value")
            }
            Self::InvalidFields(err) => write!(f, "invalid upsert fields: {err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::CollisionWithoutRow { table, columns } => write!(
                f,
                "key collision on `{table}` ({}) but no conflicting row is visible",
                columns.join(", ")
            ),
        }
    }
}

impl Error for UpsertError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidFields(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for UpsertError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::MissingKeyValue { table, column } => Self::MissingKeyValue { table, column },
            other => Self::Repo(other),
        }
    }
}

impl From<rusqlite::Error> for UpsertError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(RepoError::from(value))
    }
}

impl From<serde_json::Error> for UpsertError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidFields(value)
    }
}

/// Rejects key column lists the engines cannot honor.
///
/// Runs before any database round trip.
pub fn validate_key_columns<E: Entity>(key_columns: &[&str], candidate: &E) -> UpsertResult<()> {
    let descriptor: &EntityDescriptor = E::descriptor();
    if key_columns.is_empty() {
        return Err(UpsertError::EmptyKeyColumns);
    }

    for (index, column) in key_columns.iter().enumerate() {
        if !descriptor.has_column(column) {
            return Err(UpsertError::UnknownKeyColumn {
                table: descriptor.table,
                column: (*column).to_string(),
            });
        }
        if key_columns[..index].contains(column) {
            return Err(UpsertError::DuplicateKeyColumn {
                table: descriptor.table,
                column: (*column).to_string(),
            });
        }
        if matches!(candidate.column_value(column), None | Some(Value::Null)) {
            return Err(UpsertError::MissingKeyValue {
                table: descriptor.table,
                column: (*column).to_string(),
            });
        }
    }

    if !descriptor.covers_unique_group(key_columns) {
        return Err(UpsertError::KeyNotUnique {
            table: descriptor.table,
            columns: owned_columns(key_columns),
        });
    }

    debug!(
        "event=upsert_validate module=upsert status=ok table={} key_columns={}",
        descriptor.table,
        key_columns.join(",")
    );
    Ok(())
}

fn owned_columns(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|column| (*column).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::{validate_key_columns, UpsertError};
    use crate::model::mapping::ExternalMapping;
    use crate::model::record::KeyedRecord;

    #[test]
    fn rejects_empty_key_columns() {
        let record = KeyedRecord::new("k", "d");
        let err = validate_key_columns(&[], &record).unwrap_err();
        assert!(matches!(err, UpsertError::EmptyKeyColumns));
        assert!(err.is_misuse());
    }

    #[test]
    fn rejects_unknown_and_duplicate_columns() {
        let record = KeyedRecord::new("k", "d");
        let unknown = validate_key_columns(&["slug"], &record).unwrap_err();
        assert!(matches!(unknown, UpsertError::UnknownKeyColumn { ref column, .. } if column == "slug"));

        let id = validate_key_columns(&["id"], &record).unwrap_err();
        assert!(matches!(id, UpsertError::UnknownKeyColumn { .. }));

        let duplicate = validate_key_columns(&["key", "key"], &record).unwrap_err();
        assert!(matches!(duplicate, UpsertError::DuplicateKeyColumn { .. }));
    }

    #[test]
    fn rejects_key_columns_without_unique_group() {
        let record = KeyedRecord::new("k", "d");
        let err = validate_key_columns(&["data"], &record).unwrap_err();
        assert!(matches!(err, UpsertError::KeyNotUnique { .. }));

        let mapping = ExternalMapping::new("github", "42", "repo/1");
        let partial = validate_key_columns(&["external_id"], &mapping).unwrap_err();
        assert!(matches!(partial, UpsertError::KeyNotUnique { .. }));
    }

    #[test]
    fn rejects_null_key_values() {
        let mapping = ExternalMapping::new("github", "42", "repo/1");
        let err =
            validate_key_columns(&["provider", "external_id", "record_id"], &mapping).unwrap_err();
        assert!(matches!(err, UpsertError::MissingKeyValue { ref column, .. } if column == "record_id"));
    }

    #[test]
    fn accepts_superset_of_unique_group() {
        let record = KeyedRecord::new("k", "d");
        validate_key_columns(KeyedRecord::KEY_COLUMNS, &record).unwrap();
        validate_key_columns(&["key", "data"], &record).unwrap();

        let mapping = ExternalMapping::new("github", "42", "repo/1");
        validate_key_columns(ExternalMapping::KEY_COLUMNS, &mapping).unwrap();
    }
}
