//! Collision-safe upsert engine.
//!
//! # Responsibility
//! - Insert or merge a candidate by business key under concurrent writers.
//! - Recover from exactly one classified key collision by merging onto the
//!   row the winning writer created.
//!
//! # Invariants
//! - The write runs inside a savepoint of the ambient `BEGIN IMMEDIATE`
//!   transaction; the savepoint is released or rolled back before returning.
//! - The uniqueness constraint is the only synchronization primitive; no row
//!   or application lock is taken.
//! - Any failure other than a classified key collision is propagated and the
//!   ambient transaction is rolled back.

use crate::model::entity::{Candidate, Entity};
use crate::repo::entity_repo::{EntityRepository, RepoError, SqliteEntityRepository};
use crate::upsert::classifier::{ConflictClassifier, SqliteConflictClassifier};
use crate::upsert::merge::{now_epoch_ms, CandidateWins, MergeStrategy};
use crate::upsert::{validate_key_columns, UpsertError, UpsertResult};
use log::{error, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::marker::PhantomData;
use std::time::Instant;

/// How the persisted row came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row existed; the candidate was inserted.
    Created,
    /// The lookup found a row and the candidate was merged onto it.
    Merged,
    /// The insert lost a race and the candidate was merged onto the winner.
    MergedAfterCollision,
}

impl UpsertOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Merged => "merged",
            Self::MergedAfterCollision => "merged_after_collision",
        }
    }
}

/// Persisted row plus the path that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted<E> {
    pub entity: E,
    pub outcome: UpsertOutcome,
}

/// Race-safe update-or-create engine for one entity type.
///
/// Stateless; share one instance across threads, each with its own
/// connection.
pub struct SafeUpsertEngine<E, C = SqliteConflictClassifier, M = CandidateWins> {
    classifier: C,
    merge: M,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> SafeUpsertEngine<E> {
    pub fn new() -> Self {
        Self::with_parts(SqliteConflictClassifier, CandidateWins)
    }
}

impl<E: Entity> Default for SafeUpsertEngine<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, C, M> SafeUpsertEngine<E, C, M>
where
    E: Entity,
    C: ConflictClassifier,
    M: MergeStrategy<E>,
{
    /// Builds an engine with a custom classifier and merge strategy.
    pub fn with_parts(classifier: C, merge: M) -> Self {
        Self {
            classifier,
            merge,
            _entity: PhantomData,
        }
    }

    /// Inserts or merges `candidate` by `key_columns` and returns the row.
    ///
    /// # Errors
    /// - Misuse errors before any database round trip.
    /// - Integrity and connectivity failures, unchanged.
    /// - `CollisionWithoutRow` when a classified collision has no visible
    ///   winner.
    pub fn upsert(
        &self,
        conn: &mut Connection,
        candidate: Candidate<E>,
        key_columns: &[&str],
    ) -> UpsertResult<E> {
        self.upsert_with_outcome(conn, candidate, key_columns)
            .map(|upserted| upserted.entity)
    }

    /// Same as [`upsert`](Self::upsert), also reporting the outcome.
    pub fn upsert_with_outcome(
        &self,
        conn: &mut Connection,
        candidate: Candidate<E>,
        key_columns: &[&str],
    ) -> UpsertResult<Upserted<E>> {
        validate_key_columns(key_columns, candidate.entity())?;
        // Autocommit read: the window between here and the write lock is
        // where a concurrent writer can create the same key.
        let observed = SqliteEntityRepository::<E>::new(conn)
            .find_by_key(key_columns, candidate.entity())?;
        self.upsert_after_lookup(conn, observed, candidate, key_columns)
    }

    /// Runs the write phase against a previously observed lookup result.
    ///
    /// `observed` may be stale: a row created since the lookup is detected
    /// through the unique constraint and merged onto.
    pub fn upsert_after_lookup(
        &self,
        conn: &mut Connection,
        observed: Option<E>,
        candidate: Candidate<E>,
        key_columns: &[&str],
    ) -> UpsertResult<Upserted<E>> {
        let started_at = Instant::now();
        let table = E::descriptor().table;
        validate_key_columns(key_columns, candidate.entity())?;
        let candidate = candidate.into_entity();

        let result = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(UpsertError::from)
            .and_then(|mut tx| {
                let upserted = self.write(&mut tx, observed.as_ref(), &candidate, key_columns)?;
                tx.commit()?;
                Ok(upserted)
            });

        match &result {
            Ok(upserted) => info!(
                "event=upsert module=upsert status=ok engine=safe table={} outcome={} duration_ms={}",
                table,
                upserted.outcome.as_str(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=upsert module=upsert status=error engine=safe table={} duration_ms={} error={}",
                table,
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }

    fn write(
        &self,
        tx: &mut Transaction<'_>,
        observed: Option<&E>,
        candidate: &E,
        key_columns: &[&str],
    ) -> UpsertResult<Upserted<E>> {
        let mut savepoint = tx.savepoint()?;
        let attempt = self.submit(&savepoint, observed, candidate);

        let failure = match attempt {
            Ok(upserted) => {
                savepoint.commit()?;
                return Ok(upserted);
            }
            Err(err) => err,
        };

        let released = savepoint.rollback().and_then(|()| savepoint.finish());
        if let Err(err) = released {
            error!(
                "event=upsert_savepoint module=upsert status=error table={} write_error={} error={}",
                E::descriptor().table,
                failure,
                err
            );
            return Err(err.into());
        }

        let collided = failure.sqlite().is_some_and(|err| {
            self.classifier
                .is_key_collision(err, E::descriptor(), key_columns)
        });
        if !collided {
            return Err(failure.into());
        }

        warn!(
            "event=upsert_collision module=upsert status=retry table={} key_columns={} error={}",
            E::descriptor().table,
            key_columns.join(","),
            failure
        );

        // Single retry, straight in the ambient transaction: the write lock
        // is held, so no third writer can interleave.
        let repo = SqliteEntityRepository::<E>::new(tx);
        let winner = repo.find_by_key(key_columns, candidate)?.ok_or_else(|| {
            UpsertError::CollisionWithoutRow {
                table: E::descriptor().table,
                columns: key_columns.iter().map(|c| (*c).to_string()).collect(),
            }
        })?;
        let merged = self.merge.merge(&winner, candidate);
        Ok(Upserted {
            entity: repo.update(&merged)?,
            outcome: UpsertOutcome::MergedAfterCollision,
        })
    }

    fn submit(
        &self,
        conn: &Connection,
        observed: Option<&E>,
        candidate: &E,
    ) -> Result<Upserted<E>, RepoError> {
        let repo = SqliteEntityRepository::<E>::new(conn);
        match observed {
            Some(existing) => {
                let merged = self.merge.merge(existing, candidate);
                Ok(Upserted {
                    entity: repo.update(&merged)?,
                    outcome: UpsertOutcome::Merged,
                })
            }
            None => {
                let mut created = candidate.clone();
                created.set_updated_at(now_epoch_ms());
                Ok(Upserted {
                    entity: repo.insert(&created)?,
                    outcome: UpsertOutcome::Created,
                })
            }
        }
    }
}
