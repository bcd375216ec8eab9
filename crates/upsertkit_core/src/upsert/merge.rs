//! Merge rule applied when a candidate meets an existing row.
//!
//! # Invariants
//! - The merged row always carries the existing row's identity.
//! - The merged `updated_at` is strictly greater than the existing one, even
//!   when the clock has not advanced or moved backwards.

use crate::model::entity::Entity;
use std::time::{SystemTime, UNIX_EPOCH};

/// Produces the row to persist for a key that already has a row.
pub trait MergeStrategy<E: Entity> {
    fn merge(&self, existing: &E, candidate: &E) -> E;
}

/// Candidate data wins; identity is kept and the timestamp refreshed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateWins;

impl<E: Entity> MergeStrategy<E> for CandidateWins {
    fn merge(&self, existing: &E, candidate: &E) -> E {
        let mut merged = candidate.clone();
        merged.set_id(existing.id());
        merged.set_updated_at(refreshed_at(existing.updated_at()));
        merged
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
        })
}

/// Timestamp for a row last touched at `previous`.
pub fn refreshed_at(previous: i64) -> i64 {
    now_epoch_ms().max(previous.saturating_add(1))
}
