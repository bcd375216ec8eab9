//! Entity model for upsertable rows.
//!
//! # Responsibility
//! - Define the generic `Entity` contract the engines operate on.
//! - Provide the concrete row types stored by the bundled migrations.
//!
//! # Invariants
//! - Every row is identified by a client-generated `RecordId`.
//! - Business keys are separate from identity and enforced by the database.

pub mod entity;
pub mod mapping;
pub mod record;
