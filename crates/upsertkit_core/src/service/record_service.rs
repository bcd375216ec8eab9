//! Keyed record use-case service.
//!
//! # Responsibility
//! - Accept already-decoded request bodies and upsert them by `key`.
//! - Offer both engines behind the same input shape.
//!
//! # Invariants
//! - Every write goes through an upsert engine; no direct row mutation.

use crate::model::entity::{Candidate, FieldMap};
use crate::model::record::KeyedRecord;
use crate::repo::entity_repo::{
    EntityRepository, ListQuery, RepoResult, SqliteEntityRepository,
};
use crate::upsert::naive::NaiveUpsertEngine;
use crate::upsert::safe::{SafeUpsertEngine, Upserted};
use crate::upsert::UpsertResult;
use rusqlite::Connection;

/// Upsert and read entry points for `keyed_records`.
pub struct RecordService {
    conn: Connection,
    safe: SafeUpsertEngine<KeyedRecord>,
    naive: NaiveUpsertEngine<KeyedRecord>,
}

impl RecordService {
    /// Creates a service over a migrated connection.
    pub fn try_new(conn: Connection) -> RepoResult<Self> {
        SqliteEntityRepository::<KeyedRecord>::try_new(&conn)?;
        Ok(Self {
            conn,
            safe: SafeUpsertEngine::new(),
            naive: NaiveUpsertEngine::new(),
        })
    }

    /// Race-safe upsert of a request body such as `{"key": "5", "data": "5"}`.
    pub fn upsert(&mut self, fields: FieldMap) -> UpsertResult<Upserted<KeyedRecord>> {
        let candidate = Candidate::from_fields(fields)?;
        self.safe
            .upsert_with_outcome(&mut self.conn, candidate, KeyedRecord::KEY_COLUMNS)
    }

    /// Racy upsert; concurrent first writes of one key can fail.
    pub fn upsert_naive(&mut self, fields: FieldMap) -> UpsertResult<()> {
        let candidate = Candidate::from_fields(fields)?;
        self.naive
            .upsert(&mut self.conn, candidate, KeyedRecord::KEY_COLUMNS)
    }

    /// Upserts a typed record through the safe engine.
    pub fn upsert_record(&mut self, record: KeyedRecord) -> UpsertResult<KeyedRecord> {
        self.safe.upsert(
            &mut self.conn,
            Candidate::from_entity(record),
            KeyedRecord::KEY_COLUMNS,
        )
    }

    pub fn get_by_key(&self, key: &str) -> RepoResult<Option<KeyedRecord>> {
        let probe = KeyedRecord::new(key, "");
        self.repo().find_by_key(KeyedRecord::KEY_COLUMNS, &probe)
    }

    pub fn list(&self, query: &ListQuery) -> RepoResult<Vec<KeyedRecord>> {
        self.repo().list(query)
    }

    pub fn count(&self) -> RepoResult<u64> {
        self.repo().count()
    }

    fn repo(&self) -> SqliteEntityRepository<'_, KeyedRecord> {
        SqliteEntityRepository::new(&self.conn)
    }
}
