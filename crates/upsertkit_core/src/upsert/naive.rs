//! Query-then-write upsert without collision handling.
//!
//! Kept as the reference for the race the safe engine closes: when another
//! writer creates the same key between the lookup and the insert, the insert
//! fails with a uniqueness violation that is returned to the caller as-is.

use crate::model::entity::{Candidate, Entity};
use crate::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use crate::upsert::merge::now_epoch_ms;
use crate::upsert::{validate_key_columns, UpsertResult};
use log::{error, info};
use rusqlite::{Connection, TransactionBehavior};
use std::marker::PhantomData;
use std::time::Instant;

/// Racy update-or-create engine for one entity type.
pub struct NaiveUpsertEngine<E> {
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> NaiveUpsertEngine<E> {
    pub fn new() -> Self {
        Self {
            _entity: PhantomData,
        }
    }

    /// Looks the key up, then updates in place or inserts.
    pub fn upsert(
        &self,
        conn: &mut Connection,
        candidate: Candidate<E>,
        key_columns: &[&str],
    ) -> UpsertResult<()> {
        validate_key_columns(key_columns, candidate.entity())?;
        let observed = SqliteEntityRepository::<E>::new(conn)
            .find_by_key(key_columns, candidate.entity())?;
        self.upsert_after_lookup(conn, observed, candidate, key_columns)
    }

    /// Writes against a previously observed lookup result.
    ///
    /// A stale `None` ends in a uniqueness violation when the key now exists.
    pub fn upsert_after_lookup(
        &self,
        conn: &mut Connection,
        observed: Option<E>,
        candidate: Candidate<E>,
        key_columns: &[&str],
    ) -> UpsertResult<()> {
        let started_at = Instant::now();
        let table = E::descriptor().table;
        validate_key_columns(key_columns, candidate.entity())?;
        let mut row = candidate.into_entity();
        row.set_updated_at(now_epoch_ms());

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let written = {
            let repo = SqliteEntityRepository::<E>::new(&tx);
            match observed {
                Some(existing) => {
                    row.set_id(existing.id());
                    repo.update(&row)
                }
                None => repo.insert(&row),
            }
        };

        match written {
            Ok(_) => {
                tx.commit()?;
                info!(
                    "event=upsert module=upsert status=ok engine=naive table={} duration_ms={}",
                    table,
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=upsert module=upsert status=error engine=naive table={} duration_ms={} error={}",
                    table,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err.into())
            }
        }
    }
}

impl<E: Entity> Default for NaiveUpsertEngine<E> {
    fn default() -> Self {
        Self::new()
    }
}
