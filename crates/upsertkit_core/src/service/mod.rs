//! Use-case services.
//!
//! # Responsibility
//! - Wrap the engines into entry points for request handlers and the CLI.
//! - Keep callers decoupled from key column lists and transaction handling.

pub mod record_service;
