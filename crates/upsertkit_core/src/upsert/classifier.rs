//! Classification of failed writes.
//!
//! # Responsibility
//! - Decide whether a failed write is the expected key collision on the
//!   upsert's key columns or any other failure.
//! - Keep driver message parsing in one place.
//!
//! # Invariants
//! - The violation kind comes from the extended result code when the driver
//!   reports one; message prefixes are only a fallback.
//! - Column names are only available in message text for SQLite. Parsing is
//!   confined to [`parse_violation_detail`].
//! - A violation that does not line up with a declared unique group inside
//!   the key columns is never a key collision.

use crate::model::entity::EntityDescriptor;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{ffi, ErrorCode};

// SQLite form: "UNIQUE constraint failed: table.a, table.b".
static SQLITE_DETAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<kind>UNIQUE|NOT NULL|PRIMARY KEY) constraint failed: (?P<targets>.+)$")
        .expect("valid sqlite constraint regex")
});
static SQLITE_TARGET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<table>[^.\s']+)\.(?P<column>[^.\s']+)$").expect("valid sqlite target regex")
});
// Detail form used by server databases: "Key (a, b)=(1, 2) already exists."
static KEY_DETAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Key\s+\((?P<key>.*)\)=\((?P<value>.*)\)\s+already\s+exists")
        .expect("valid key detail regex")
});

/// Category of an integrity constraint violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    Unique,
    PrimaryKey,
    NotNull,
    ForeignKey,
    Check,
    Other,
}

/// Machine-readable view of one constraint violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    pub kind: ViolationKind,
    /// Table reported by the driver, when it names one.
    pub table: Option<String>,
    /// Conflicting columns in reported order; empty when not reported.
    pub columns: Vec<String>,
}

/// Outcome of classifying a failed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteFailure {
    /// Expected race artifact: another writer created the same key first.
    KeyCollision(ConstraintViolation),
    /// Any other integrity failure, including unique groups outside the key.
    Integrity(ConstraintViolation),
    /// Lock contention or an unusable database handle.
    Connectivity,
    Other,
}

/// Decides how a failed write should be handled.
pub trait ConflictClassifier {
    /// Extracts the constraint violation carried by `error`, if any.
    fn violation(&self, error: &rusqlite::Error) -> Option<ConstraintViolation>;

    fn classify(
        &self,
        error: &rusqlite::Error,
        descriptor: &EntityDescriptor,
        key_columns: &[&str],
    ) -> WriteFailure {
        match self.violation(error) {
            Some(violation) if matches_key_group(&violation, descriptor, key_columns) => {
                WriteFailure::KeyCollision(violation)
            }
            Some(violation) => WriteFailure::Integrity(violation),
            None if is_connectivity_failure(error) => WriteFailure::Connectivity,
            None => WriteFailure::Other,
        }
    }

    fn is_key_collision(
        &self,
        error: &rusqlite::Error,
        descriptor: &EntityDescriptor,
        key_columns: &[&str],
    ) -> bool {
        matches!(
            self.classify(error, descriptor, key_columns),
            WriteFailure::KeyCollision(_)
        )
    }
}

/// Classifier for errors raised by the bundled SQLite driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConflictClassifier;

impl ConflictClassifier for SqliteConflictClassifier {
    fn violation(&self, error: &rusqlite::Error) -> Option<ConstraintViolation> {
        let rusqlite::Error::SqliteFailure(failure, message) = error else {
            return None;
        };
        if failure.code != ErrorCode::ConstraintViolation {
            return None;
        }

        let text = message.as_deref().unwrap_or_default();
        let mut violation = parse_violation_detail(text).unwrap_or(ConstraintViolation {
            kind: ViolationKind::Other,
            table: None,
            columns: Vec::new(),
        });
        if let Some(kind) = kind_from_extended_code(failure.extended_code) {
            violation.kind = kind;
        }
        Some(violation)
    }
}

/// Returns whether `violation` is a unique conflict over a declared group
/// that lies entirely inside `key_columns`.
///
/// The group must be a subset of the reported columns and of the key
/// columns; a re-query by key is then guaranteed to see the conflicting row.
pub fn matches_key_group(
    violation: &ConstraintViolation,
    descriptor: &EntityDescriptor,
    key_columns: &[&str],
) -> bool {
    if violation.kind != ViolationKind::Unique || violation.columns.is_empty() {
        return false;
    }
    if let Some(table) = violation.table.as_deref() {
        if !table.eq_ignore_ascii_case(descriptor.table) {
            return false;
        }
    }

    descriptor.unique_groups.iter().any(|group| {
        group.iter().all(|column| {
            key_columns.contains(column) && violation.columns.iter().any(|c| c == column)
        })
    })
}

/// Parses table and column names out of a driver constraint message.
///
/// Recognizes the SQLite message form first and the `Key (..)=(..) already
/// exists` detail form as a fallback.
pub fn parse_violation_detail(message: &str) -> Option<ConstraintViolation> {
    let message = message.trim();
    if let Some(captures) = SQLITE_DETAIL_RE.captures(message) {
        let kind = match &captures["kind"] {
            "UNIQUE" => ViolationKind::Unique,
            "NOT NULL" => ViolationKind::NotNull,
            _ => ViolationKind::PrimaryKey,
        };
        let mut table = None;
        let mut columns = Vec::new();
        for target in captures["targets"].split(", ") {
            // `index 'name'` targets (expression indexes) name no columns.
            let Some(parts) = SQLITE_TARGET_RE.captures(target.trim()) else {
                return Some(ConstraintViolation {
                    kind,
                    table: None,
                    columns: Vec::new(),
                });
            };
            table.get_or_insert_with(|| parts["table"].to_string());
            columns.push(parts["column"].to_string());
        }
        return Some(ConstraintViolation {
            kind,
            table,
            columns,
        });
    }

    if let Some(captures) = KEY_DETAIL_RE.captures(message) {
        let columns = captures["key"]
            .split(',')
            .map(|column| column.trim().trim_matches('"').to_string())
            .filter(|column| !column.is_empty())
            .collect();
        return Some(ConstraintViolation {
            kind: ViolationKind::Unique,
            table: None,
            columns,
        });
    }

    if message.starts_with("FOREIGN KEY constraint failed") {
        return Some(violation_without_columns(ViolationKind::ForeignKey));
    }
    if message.starts_with("CHECK constraint failed") {
        return Some(violation_without_columns(ViolationKind::Check));
    }

    None
}

fn violation_without_columns(kind: ViolationKind) -> ConstraintViolation {
    ConstraintViolation {
        kind,
        table: None,
        columns: Vec::new(),
    }
}

fn kind_from_extended_code(extended_code: i32) -> Option<ViolationKind> {
    match extended_code {
        ffi::SQLITE_CONSTRAINT_UNIQUE => Some(ViolationKind::Unique),
        ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_ROWID => {
            Some(ViolationKind::PrimaryKey)
        }
        ffi::SQLITE_CONSTRAINT_NOTNULL => Some(ViolationKind::NotNull),
        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => Some(ViolationKind::ForeignKey),
        ffi::SQLITE_CONSTRAINT_CHECK => Some(ViolationKind::Check),
        // Bare SQLITE_CONSTRAINT: keep whatever the message said.
        _ => None,
    }
}

fn is_connectivity_failure(error: &rusqlite::Error) -> bool {
    match error {
        rusqlite::Error::SqliteFailure(failure, _) => matches!(
            failure.code,
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
        ),
        _ => false,
    }
}
