//! # Error Handling for rowdb
//!
//! A single error enum ([`Error`]) covers every failure mode the crate can
//! report. Most of the crate never returns engine failures to callers at all:
//! the executor logs them and carries on (see the table below), so the enum is
//! mostly about *configuration* problems that must be fixed in code.
//!
//! ## Error Categories
//!
//! | Category | Examples | Surfaced as |
//! |----------|----------|-------------|
//! | Configuration | primary key not among the columns, observer condition without `ROW.` | `Err` at the call site |
//! | Engine | prepare/step failures | logged via `tracing`, swallowed |
//! | Soft no-op | `INSERT OR IGNORE` conflict | zero rows changed, not an error |
//! | Stale observer | trigger fires for an unknown observer id | triggers dropped, not an error |
//! | Crypto | bad key material, tampered ciphertext | `Err` from [`crate::crypto`], logged by the codec |

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in rowdb operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors (fix the record definition or call site)
    // =========================================================================

    /// The declared primary key does not resolve to a supported column.
    ///
    /// # When This Happens
    ///
    /// - The record's `primary_key()` names a field that is not declared
    /// - The field exists but its type is unsupported, so it was skipped
    ///
    /// This is detected the first time the record type is resolved and is
    /// never recoverable at runtime.
    #[error("{table} primary key ({key}) does not resolve to a column")]
    PrimaryKey {
        /// Table of the offending record type
        table: String,
        /// The declared primary key name
        key: String,
    },

    /// A table name was used before any record type registered it.
    #[error("no schema registered for table '{0}'")]
    UnknownTable(String),

    /// An observer condition does not reference the changed row.
    #[error("observer condition must reference the changed row via ROW.: {0}")]
    ObserverCondition(String),

    // =========================================================================
    // Crypto / Codec Errors
    // =========================================================================

    /// Encrypting or decrypting a column value failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Master key material could not be obtained.
    #[error("key provider error: {0}")]
    KeyProvider(String),

    /// A temporal value could not be parsed with the configured format.
    #[error("temporal format error: {0}")]
    Temporal(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================

    /// SQLite operation failed outside the executor (open, pragmas,
    /// function registration).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The serial worker thread could not be started.
    #[error("worker error: {0}")]
    Worker(String),

    /// The serial worker has shut down and no longer accepts work.
    #[error("worker has shut down")]
    WorkerClosed,
}

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
