//! Generic entity repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Build and run the lookup/insert/update statements for any [`Entity`].
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Key lookups are a conjunction of equality predicates over key columns.
//! - Writes read the persisted row back with `RETURNING`.
//! - Identifiers in generated SQL come only from static descriptors.

use crate::db::DbError;
use crate::model::entity::{Entity, EntityDescriptor, RecordId, ID_COLUMN, UPDATED_AT_COLUMN};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for entity persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound {
        table: &'static str,
        id: RecordId,
    },
    /// A key column holds no value on the probe entity.
    MissingKeyValue {
        table: &'static str,
        column: String,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// A declared unique group has no unique constraint or index behind it.
    MissingUniqueIndex {
        table: &'static str,
        columns: &'static [&'static str],
    },
    InvalidData(String),
}

impl RepoError {
    /// Returns the underlying driver error, if this failure came from SQLite.
    pub fn sqlite(&self) -> Option<&rusqlite::Error> {
        match self {
            Self::Db(err) => err.sqlite(),
            _ => None,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { table, id } => write!(f, "{table} row not found: {id}"),
            Self::MissingKeyValue { table, column } => {
                write!(f, "key column `{table}.{column}` has no value")
            }
            Self::MissingRequiredTable(table) => write!(f, "required table `{table}` is missing"),
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "required column `{column}` is missing in table `{table}`")
            }
            Self::MissingUniqueIndex { table, columns } => write!(
                f,
                "no unique constraint or index on `{table}` ({})",
                columns.join(", ")
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Pagination options for listing entities.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Repository interface for keyed entity persistence.
pub trait EntityRepository<E: Entity> {
    /// Loads the row whose key columns equal the probe's values.
    fn find_by_key(&self, key_columns: &[&str], probe: &E) -> RepoResult<Option<E>>;
    fn get(&self, id: RecordId) -> RepoResult<Option<E>>;
    /// Inserts a new row and returns it as persisted.
    fn insert(&self, entity: &E) -> RepoResult<E>;
    /// Rewrites every column of the row with `entity.id()`.
    fn update(&self, entity: &E) -> RepoResult<E>;
    fn list(&self, query: &ListQuery) -> RepoResult<Vec<E>>;
    fn count(&self) -> RepoResult<u64>;
}

/// SQLite-backed repository for one entity type.
///
/// Borrows any connection-like handle, so it also runs inside transactions
/// and savepoints.
pub struct SqliteEntityRepository<'conn, E> {
    conn: &'conn Connection,
    _entity: PhantomData<fn() -> E>,
}

impl<'conn, E: Entity> SqliteEntityRepository<'conn, E> {
    /// Creates a repository without checking the schema.
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            _entity: PhantomData,
        }
    }

    /// Creates a repository after verifying table, columns and unique groups.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_entity_table_ready(conn, E::descriptor())?;
        Ok(Self::new(conn))
    }
}

impl<E: Entity> EntityRepository<E> for SqliteEntityRepository<'_, E> {
    fn find_by_key(&self, key_columns: &[&str], probe: &E) -> RepoResult<Option<E>> {
        let descriptor = E::descriptor();
        let mut predicates = Vec::with_capacity(key_columns.len());
        let mut bind_values = Vec::with_capacity(key_columns.len());

        for (index, column) in key_columns.iter().enumerate() {
            let value = match probe.column_value(column) {
                Some(Value::Null) | None => {
                    return Err(RepoError::MissingKeyValue {
                        table: descriptor.table,
                        column: (*column).to_string(),
                    });
                }
                Some(value) => value,
            };
            predicates.push(format!("{} = ?{}", quote_ident(column), index + 1));
            bind_values.push(value);
        }

        let sql = format!(
            "{} WHERE {} LIMIT 2;",
            select_sql(descriptor),
            predicates.join(" AND ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;

        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let found = E::from_row(row)?;
        if rows.next()?.is_some() {
            return Err(RepoError::InvalidData(format!(
                "more than one `{}` row for key ({})",
                descriptor.table,
                key_columns.join(", ")
            )));
        }

        Ok(Some(found))
    }

    fn get(&self, id: RecordId) -> RepoResult<Option<E>> {
        let sql = format!(
            "{} WHERE {} = ?1;",
            select_sql(E::descriptor()),
            quote_ident(ID_COLUMN)
        );
        let found = self
            .conn
            .query_row(&sql, [id.to_string()], E::from_row)
            .optional()?;
        Ok(found)
    }

    fn insert(&self, entity: &E) -> RepoResult<E> {
        let descriptor = E::descriptor();
        let columns = all_columns(descriptor);
        let placeholders = (1..=columns.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {};",
            quote_ident(descriptor.table),
            column_list(descriptor),
            placeholders.join(", "),
            column_list(descriptor)
        );

        let mut bind_values = Vec::with_capacity(columns.len());
        bind_values.push(Value::Text(entity.id().to_string()));
        for column in descriptor.columns {
            bind_values.push(bind_value(entity, descriptor, column)?);
        }
        bind_values.push(Value::Integer(entity.updated_at()));

        let persisted = self
            .conn
            .query_row(&sql, params_from_iter(bind_values), E::from_row)?;
        Ok(persisted)
    }

    fn update(&self, entity: &E) -> RepoResult<E> {
        let descriptor = E::descriptor();
        let mut assignments = Vec::with_capacity(descriptor.columns.len() + 1);
        let mut bind_values = Vec::with_capacity(descriptor.columns.len() + 2);

        for (index, column) in descriptor.columns.iter().enumerate() {
            assignments.push(format!("{} = ?{}", quote_ident(column), index + 1));
            bind_values.push(bind_value(entity, descriptor, column)?);
        }
        let updated_at_index = descriptor.columns.len() + 1;
        assignments.push(format!(
            "{} = ?{updated_at_index}",
            quote_ident(UPDATED_AT_COLUMN)
        ));
        bind_values.push(Value::Integer(entity.updated_at()));
        bind_values.push(Value::Text(entity.id().to_string()));

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{} RETURNING {};",
            quote_ident(descriptor.table),
            assignments.join(", "),
            quote_ident(ID_COLUMN),
            updated_at_index + 1,
            column_list(descriptor)
        );

        self.conn
            .query_row(&sql, params_from_iter(bind_values), E::from_row)
            .optional()?
            .ok_or(RepoError::NotFound {
                table: descriptor.table,
                id: entity.id(),
            })
    }

    fn list(&self, query: &ListQuery) -> RepoResult<Vec<E>> {
        let descriptor = E::descriptor();
        let mut sql = format!(
            "{} ORDER BY {} DESC, {} ASC",
            select_sql(descriptor),
            quote_ident(UPDATED_AT_COLUMN),
            quote_ident(ID_COLUMN)
        );
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(E::from_row(row)?);
        }

        Ok(entities)
    }

    fn count(&self) -> RepoResult<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {};",
            quote_ident(E::descriptor().table)
        );
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        u64::try_from(count).map_err(|_| RepoError::InvalidData(format!("negative count {count}")))
    }
}

/// Verifies that the table behind `descriptor` matches what the engines need.
pub fn ensure_entity_table_ready(
    conn: &Connection,
    descriptor: &'static EntityDescriptor,
) -> RepoResult<()> {
    let table = descriptor.table;
    let present = table_columns(conn, table)?;
    if present.is_empty() {
        return Err(RepoError::MissingRequiredTable(table));
    }

    for column in all_columns(descriptor) {
        if !present.contains(column) {
            return Err(RepoError::MissingRequiredColumn { table, column });
        }
    }

    let unique_indexes = unique_index_groups(conn, table)?;
    for group in descriptor.unique_groups {
        let wanted = group.iter().map(|c| (*c).to_string()).collect::<BTreeSet<_>>();
        if !unique_indexes.contains(&wanted) {
            return Err(RepoError::MissingUniqueIndex {
                table,
                columns: *group,
            });
        }
    }

    Ok(())
}

/// Reads the column sets of every unique index (constraints included).
pub fn unique_index_groups(conn: &Connection, table: &str) -> RepoResult<Vec<BTreeSet<String>>> {
    let mut stmt = conn.prepare(&format!("PRAGMA index_list({});", quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    let mut index_names = Vec::new();
    while let Some(row) = rows.next()? {
        let is_unique: i64 = row.get("unique")?;
        let partial: i64 = row.get("partial")?;
        if is_unique == 1 && partial == 0 {
            index_names.push(row.get::<_, String>("name")?);
        }
    }

    let mut groups = Vec::with_capacity(index_names.len());
    for name in index_names {
        let mut stmt = conn.prepare(&format!("PRAGMA index_info({});", quote_ident(&name)))?;
        let mut rows = stmt.query([])?;
        let mut columns = BTreeSet::new();
        while let Some(row) = rows.next()? {
            // Expression columns have no name and cannot back a declared group.
            if let Some(column) = row.get::<_, Option<String>>("name")? {
                columns.insert(column);
            }
        }
        groups.push(columns);
    }

    Ok(groups)
}

fn table_columns(conn: &Connection, table: &str) -> RepoResult<BTreeSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    let mut columns = BTreeSet::new();
    while let Some(row) = rows.next()? {
        columns.insert(row.get::<_, String>(1)?);
    }
    Ok(columns)
}

fn bind_value<E: Entity>(
    entity: &E,
    descriptor: &EntityDescriptor,
    column: &str,
) -> RepoResult<Value> {
    entity.column_value(column).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "entity for `{}` does not map column `{column}`",
            descriptor.table
        ))
    })
}

fn all_columns(descriptor: &'static EntityDescriptor) -> Vec<&'static str> {
    let mut columns = Vec::with_capacity(descriptor.columns.len() + 2);
    columns.push(ID_COLUMN);
    columns.extend_from_slice(descriptor.columns);
    columns.push(UPDATED_AT_COLUMN);
    columns
}

fn column_list(descriptor: &'static EntityDescriptor) -> String {
    all_columns(descriptor)
        .into_iter()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ")
}

fn select_sql(descriptor: &'static EntityDescriptor) -> String {
    format!(
        "SELECT {} FROM {}",
        column_list(descriptor),
        quote_ident(descriptor.table)
    )
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::quote_ident;

    #[test]
    fn quote_ident_escapes_embedded_quotes() {
        assert_eq!(quote_ident("key"), "\"key\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
