//! Race-safe update-or-create over SQLite.
//! This crate owns the upsert engines, their entity contract and storage.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod upsert;

pub use db::{open_db, open_db_in_memory, open_db_with, DbError, DbOptions, DbResult};
pub use logging::{init_logging, logging_status, LogLevel, LogTarget, LoggingConfig, LoggingError};
pub use model::entity::{Candidate, Entity, EntityDescriptor, FieldMap, RecordId};
pub use model::mapping::ExternalMapping;
pub use model::record::KeyedRecord;
pub use repo::entity_repo::{
    EntityRepository, ListQuery, RepoError, RepoResult, SqliteEntityRepository,
};
pub use service::record_service::RecordService;
pub use upsert::classifier::{
    ConflictClassifier, ConstraintViolation, SqliteConflictClassifier, ViolationKind, WriteFailure,
};
pub use upsert::merge::{CandidateWins, MergeStrategy};
pub use upsert::naive::NaiveUpsertEngine;
pub use upsert::safe::{SafeUpsertEngine, UpsertOutcome, Upserted};
pub use upsert::{UpsertError, UpsertResult};

/// Minimal health-check API.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
