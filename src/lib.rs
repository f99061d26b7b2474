//! # rowdb - Schema-Driven Records on SQLite
//!
//! rowdb maps plain Rust structs onto SQLite tables. It provides:
//!
//! - **Declarative schemas**: a [`Record`] impl names the table, key and fields
//! - **Generated SQL**: inserts, updates, deletes, fetches, counts
//! - **Sequence arguments**: `id IN (?)` with a list argument just works
//! - **Change observers**: per-row callbacks driven by SQLite triggers
//! - **Column encryption**: AES-256-GCM with per-column derived keys
//! - **Serial writes**: one worker thread applies every mutation in order
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Database facade                          │
//! │        (record API, table-name API, observers, lifecycle)       │
//! └───────────────┬──────────────────────────────┬──────────────────┘
//!                 │ mutations                    │ reads
//!                 ▼                              │
//! ┌───────────────────────────────┐              │
//! │        Serial worker          │              │
//! │  (FIFO, batches in one txn)   │              │
//! └───────────────┬───────────────┘              │
//!                 ▼                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Engine: statement builder → parameter refactorer → executor    │
//! │                 value codec (temporal, json, crypto)            │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │          SQLite (+ rowdb_observer() and observer triggers)      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`error`]: The error enum
//! - [`types`]: Semantic types, values, arguments, queries
//! - [`schema`]: The `Record` trait and schema registry
//! - [`codec`]: Value ↔ SQLite storage conversion
//! - [`crypto`]: Key providers and column encryption
//! - [`statement`]: SQL text generation
//! - [`refactor`]: Sequence argument expansion
//! - [`executor`]: Prepared statement execution
//! - [`observer`]: Trigger-based change notification
//! - [`config`]: Open-time configuration
//! - [`logging`]: Optional `tracing-subscriber` setup
//! - [`api`]: The [`Database`] facade

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for rowdb operations.
pub mod error;

/// Semantic types, values and query descriptions.
///
/// Everything a caller passes in or gets back is expressed with these types:
/// [`Value`] for a single column value, [`RowValues`] for a row, [`Query`]
/// for conditions with their arguments and paging.
pub mod types;

/// Record declarations and the schema registry.
pub mod schema;

/// Conversion between [`Value`]s and SQLite storage values.
pub mod codec;

/// Key providers and AES-256-GCM column encryption.
pub mod crypto;

/// SQL text generation for tables, rows and triggers.
pub mod statement;

/// Expansion of sequence arguments into placeholder lists.
pub mod refactor;

/// Prepared statement execution and the shared connection.
///
/// Engine failures are logged and reported as "no rows" rather than returned.
pub mod executor;

/// Change observers built on SQLite triggers.
pub mod observer;

/// Configuration applied when opening a database.
pub mod config;

/// Logging initialization helpers.
pub mod logging;

/// The serial mutation worker.
mod worker;

/// The `Database` facade (main entry point).
pub mod api;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::Database;
pub use codec::TemporalFormat;
pub use config::DatabaseConfig;
pub use crypto::{EnvKeyProvider, KeyProvider, PasswordKeyProvider};
pub use error::{Error, Result};
pub use observer::ObserverCallback;
pub use schema::{Field, Record, Schema};
pub use types::{
    row, Arguments, ObserverEvent, Query, RowValues, SemanticType, Value,
};
pub use worker::Completion;
