//! # Statement Execution
//!
//! Two layers live here:
//!
//! - [`Executor`]: one freshly prepared statement. It binds parameters
//!   through the [`Codec`], steps, and decodes rows. Executors are consumed
//!   by `run`/`rows`, so a statement is never reused across calls.
//! - [`Engine`]: the shared connection plus codec, exposing one method per
//!   schema-aware operation (build SQL, refactor parameters, execute).
//!
//! ## Engine Errors
//!
//! Prepare, bind and step failures are logged at `error` with the SQL text
//! and SQLite's extended result code, then swallowed:
//!
//! | Operation | Result on engine error |
//! |-----------|------------------------|
//! | writes | `0` rows changed |
//! | `fetch_one` / `fetch_first` | `None` |
//! | `fetch_all` | empty |
//! | `check` / `exists` | `false` |
//! | `count` | `0` |
//!
//! Callers cannot tell "no rows matched" from "statement failed" through
//! the return value alone.
//!
//! ## Connection Sharing
//!
//! The connection sits behind a `parking_lot::ReentrantMutex`. The worker
//! and reading threads take turns, and an observer callback running inside a
//! trigger (on the thread that already holds the lock) can read without
//! deadlocking.

use parking_lot::ReentrantMutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Statement};
use tracing::{debug, error, trace, warn};

use crate::codec::Codec;
use crate::refactor;
use crate::schema::{Column, Schema};
use crate::statement;
use crate::types::{strip_sigil, Arguments, Query, RowValues, Value};

// =============================================================================
// Executor
// =============================================================================

/// One prepared statement and its bind cursor.
pub struct Executor<'a> {
    stmt: Statement<'a>,
    codec: &'a Codec,
    sql: String,
    next: usize,
}

impl<'a> Executor<'a> {
    /// Prepares `sql`, logging and returning `None` on failure.
    pub fn prepare(conn: &'a Connection, codec: &'a Codec, sql: &str) -> Option<Self> {
        debug!(sql, "prepare");
        match conn.prepare(sql) {
            Ok(stmt) => Some(Self {
                stmt,
                codec,
                sql: sql.to_string(),
                next: 1,
            }),
            Err(e) => {
                log_engine_error("prepare", sql, &e);
                None
            }
        }
    }

    /// Binds `value` at the next positional index.
    fn bind(&mut self, value: SqlValue) -> bool {
        let index = self.next;
        self.next += 1;
        match self.stmt.raw_bind_parameter(index, value) {
            Ok(()) => true,
            Err(e) => {
                log_engine_error("bind", &self.sql, &e);
                false
            }
        }
    }

    /// Binds `columns` from `values`, in the given order.
    pub fn bind_columns(&mut self, table: &str, columns: &[&Column], values: &RowValues) -> bool {
        for column in columns {
            let value = values.get(&column.name).unwrap_or(&Value::Null);
            let encoded = self.codec.encode_column(table, column, value);
            if !self.bind(encoded) {
                return false;
            }
        }
        true
    }

    /// Binds a single value through `column`'s type.
    pub fn bind_column(&mut self, table: &str, column: &Column, value: &Value) -> bool {
        let encoded = self.codec.encode_column(table, column, value);
        self.bind(encoded)
    }

    /// Binds condition arguments after anything already bound.
    ///
    /// Named arguments are matched against the statement's parameter names
    /// with the sigil stripped; unnamed (`?`) parameters are skipped, so
    /// positional column bindings and named condition arguments can share a
    /// statement.
    pub fn bind_arguments(&mut self, arguments: &Arguments) -> bool {
        trace!(sql = %self.sql, arguments = ?arguments, "bind arguments");
        match arguments {
            Arguments::None => true,
            Arguments::Positional(args) => {
                for arg in args {
                    let encoded = self.codec.encode_argument(arg);
                    if !self.bind(encoded) {
                        return false;
                    }
                }
                true
            }
            Arguments::Named(args) => {
                let names: Vec<(usize, String)> = (1..=self.stmt.parameter_count())
                    .filter_map(|i| self.stmt.parameter_name(i).map(|n| (i, n.to_string())))
                    .collect();

                for (index, name) in names {
                    let Some(value) = args.get(strip_sigil(&name)) else {
                        warn!(sql = %self.sql, parameter = %name, "no argument for named parameter, leaving NULL");
                        continue;
                    };
                    let encoded = self.codec.encode_argument(value);
                    if let Err(e) = self.stmt.raw_bind_parameter(index, encoded) {
                        log_engine_error("bind", &self.sql, &e);
                        return false;
                    }
                }
                true
            }
        }
    }

    /// Steps to completion and returns the number of rows changed.
    pub fn run(mut self) -> usize {
        match self.stmt.raw_execute() {
            Ok(changes) => changes,
            Err(e) => {
                log_engine_error("execute", &self.sql, &e);
                0
            }
        }
    }

    /// Steps through up to `limit` rows (all rows when `None`), decoding each
    /// through `schema`. Result columns that are not schema columns are
    /// ignored.
    ///
    /// A step failure discards any rows already read.
    pub fn rows(mut self, schema: &Schema, limit: Option<usize>) -> Vec<RowValues> {
        let codec = self.codec;
        let columns: Vec<Option<Column>> = self
            .stmt
            .column_names()
            .into_iter()
            .map(|name| schema.column(name).cloned())
            .collect();

        let mut out = Vec::new();
        let mut rows = self.stmt.raw_query();
        loop {
            if limit.is_some_and(|limit| out.len() >= limit) {
                break;
            }
            match rows.next() {
                Ok(Some(row)) => {
                    let mut values = RowValues::new();
                    for (i, column) in columns.iter().enumerate() {
                        let Some(column) = column else { continue };
                        let value = match row.get_ref(i) {
                            Ok(raw) => codec.decode_column(schema.table(), column, raw),
                            Err(e) => {
                                log_engine_error("read column", &self.sql, &e);
                                Value::Null
                            }
                        };
                        values.insert(column.name.clone(), value);
                    }
                    out.push(values);
                }
                Ok(None) => break,
                Err(e) => {
                    log_engine_error("step", &self.sql, &e);
                    return Vec::new();
                }
            }
        }
        out
    }

    /// Whether the statement yields at least one row.
    pub fn has_row(mut self) -> bool {
        let mut rows = self.stmt.raw_query();
        match rows.next() {
            Ok(row) => row.is_some(),
            Err(e) => {
                log_engine_error("step", &self.sql, &e);
                false
            }
        }
    }

    /// The first column of the first row as an integer.
    pub fn scalar(mut self) -> Option<i64> {
        let mut rows = self.stmt.raw_query();
        match rows.next() {
            Ok(Some(row)) => match row.get::<_, i64>(0) {
                Ok(v) => Some(v),
                Err(e) => {
                    log_engine_error("read column", &self.sql, &e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                log_engine_error("step", &self.sql, &e);
                None
            }
        }
    }
}

fn log_engine_error(stage: &str, sql: &str, e: &rusqlite::Error) {
    match e.sqlite_error() {
        Some(failure) => error!(
            stage,
            sql,
            code = failure.extended_code,
            "{} - {}",
            e,
            failure.extended_code
        ),
        None => error!(stage, sql, "{}", e),
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The connection plus codec, with one method per schema-aware operation.
///
/// Every method locks the connection for its duration. Because the lock is
/// reentrant, methods may be composed (e.g. inside [`Engine::transaction`]).
pub struct Engine {
    conn: ReentrantMutex<Connection>,
    codec: Codec,
}

impl Engine {
    pub fn new(conn: Connection, codec: Codec) -> Self {
        Self {
            conn: ReentrantMutex::new(conn),
            codec,
        }
    }

    /// Runs `f` with the connection locked.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        let conn = self.conn.lock();
        f(&conn)
    }

    fn write<F>(&self, sql: &str, bind: F) -> usize
    where
        F: FnOnce(&mut Executor<'_>) -> bool,
    {
        let conn = self.conn.lock();
        let Some(mut executor) = Executor::prepare(&conn, &self.codec, sql) else {
            return 0;
        };
        if !bind(&mut executor) {
            return 0;
        }
        executor.run()
    }

    fn read<T, B, R>(&self, sql: &str, bind: B, read: R) -> Option<T>
    where
        B: FnOnce(&mut Executor<'_>) -> bool,
        R: FnOnce(Executor<'_>) -> T,
    {
        let conn = self.conn.lock();
        let mut executor = Executor::prepare(&conn, &self.codec, sql)?;
        if !bind(&mut executor) {
            return None;
        }
        Some(read(executor))
    }

    // -------------------------------------------------------------------------
    // Statements and DDL
    // -------------------------------------------------------------------------

    /// Executes raw SQL, expanding sequence arguments first.
    pub fn execute(&self, sql: &str, arguments: &Arguments) -> usize {
        let (sql, arguments) = refactor::refactor(sql, arguments);
        self.write(&sql, |e| e.bind_arguments(&arguments))
    }

    pub fn create_table(&self, schema: &Schema) {
        self.write(&statement::create_table(schema), |_| true);
    }

    pub fn drop_table(&self, table: &str) {
        self.write(&statement::drop_table(table), |_| true);
    }

    /// Runs `f` inside `BEGIN`/`COMMIT`.
    ///
    /// Statements inside are all attempted; a failing statement does not
    /// roll back the others. If `COMMIT` itself fails the transaction is
    /// rolled back.
    pub fn transaction<T>(&self, f: impl FnOnce(&Self) -> T) -> T {
        let conn = self.conn.lock();
        if let Err(e) = conn.execute_batch("BEGIN") {
            log_engine_error("begin", "BEGIN", &e);
        }
        let result = f(self);
        if let Err(e) = conn.execute_batch("COMMIT") {
            log_engine_error("commit", "COMMIT", &e);
            if !conn.is_autocommit() {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    log_engine_error("rollback", "ROLLBACK", &e);
                }
            }
        }
        result
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// `INSERT OR IGNORE`; returns 0 when the key already exists.
    pub fn insert(&self, schema: &Schema, values: &RowValues) -> usize {
        let Some(sql) = statement::insert(schema, values) else {
            warn!(table = schema.table(), "insert with no schema columns, skipping");
            return 0;
        };
        let columns = statement::insert_columns(schema, values);
        self.write(&sql, |e| e.bind_columns(schema.table(), &columns, values))
    }

    /// Updates the row whose key is `values[primary_key]`.
    pub fn update(&self, schema: &Schema, values: &RowValues) -> usize {
        let Some(key) = values.get(schema.primary_key()) else {
            warn!(table = schema.table(), "update without primary key value, skipping");
            return 0;
        };
        self.update_one(schema, values, key)
    }

    pub fn update_one(&self, schema: &Schema, values: &RowValues, key: &Value) -> usize {
        let Some(sql) = statement::update_one(schema, values) else {
            warn!(table = schema.table(), "update with nothing to set, skipping");
            return 0;
        };
        let columns = statement::update_columns(schema, values);
        self.write(&sql, |e| {
            e.bind_columns(schema.table(), &columns, values)
                && e.bind_column(schema.table(), schema.key_column(), key)
        })
    }

    pub fn update_all(&self, schema: &Schema, values: &RowValues, query: &Query) -> usize {
        let query = refactored(query);
        let Some(sql) = statement::update_all(schema, values, &query) else {
            warn!(table = schema.table(), "update with nothing to set, skipping");
            return 0;
        };
        let columns = statement::update_columns(schema, values);
        self.write(&sql, |e| {
            e.bind_columns(schema.table(), &columns, values) && e.bind_arguments(&query.arguments)
        })
    }

    pub fn delete_one(&self, schema: &Schema, key: &Value) -> usize {
        self.write(&statement::delete_one(schema), |e| {
            e.bind_column(schema.table(), schema.key_column(), key)
        })
    }

    pub fn delete_all(&self, schema: &Schema, query: &Query) -> usize {
        let query = refactored(query);
        self.write(&statement::delete_all(schema, &query), |e| {
            e.bind_arguments(&query.arguments)
        })
    }

    /// Insert, falling back to an update when the key already exists.
    pub fn insert_or_update(&self, schema: &Schema, values: &RowValues) -> usize {
        match self.insert(schema, values) {
            0 => self.update(schema, values),
            n => n,
        }
    }

    /// Update, falling back to an insert when no row changed.
    pub fn update_or_insert(&self, schema: &Schema, values: &RowValues) -> usize {
        match self.update(schema, values) {
            0 => self.insert(schema, values),
            n => n,
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn fetch_one(&self, schema: &Schema, key: &Value) -> Option<RowValues> {
        self.read(
            &statement::fetch_one(schema),
            |e| e.bind_column(schema.table(), schema.key_column(), key),
            |e| e.rows(schema, Some(1)),
        )
        .and_then(|rows| rows.into_iter().next())
    }

    pub fn fetch_first(&self, schema: &Schema, query: &Query) -> Option<RowValues> {
        let query = refactored(query);
        self.read(
            &statement::fetch_first(schema, &query),
            |e| e.bind_arguments(&query.arguments),
            |e| e.rows(schema, Some(1)),
        )
        .and_then(|rows| rows.into_iter().next())
    }

    pub fn fetch_all(&self, schema: &Schema, query: &Query) -> Vec<RowValues> {
        let query = refactored(query);
        self.read(
            &statement::fetch_all(schema, &query),
            |e| e.bind_arguments(&query.arguments),
            |e| e.rows(schema, None),
        )
        .unwrap_or_default()
    }

    pub fn check(&self, schema: &Schema, key: &Value) -> bool {
        self.read(
            &statement::check(schema),
            |e| e.bind_column(schema.table(), schema.key_column(), key),
            |e| e.has_row(),
        )
        .unwrap_or(false)
    }

    pub fn exists(&self, schema: &Schema, query: &Query) -> bool {
        let query = refactored(query);
        self.read(
            &statement::exists(schema, &query),
            |e| e.bind_arguments(&query.arguments),
            |e| e.has_row(),
        )
        .unwrap_or(false)
    }

    pub fn count(&self, schema: &Schema, query: &Query) -> usize {
        let query = refactored(query);
        self.read(
            &statement::count(schema, &query),
            |e| e.bind_arguments(&query.arguments),
            |e| e.scalar(),
        )
        .flatten()
        .map_or(0, |n| usize::try_from(n).unwrap_or(0))
    }
}

/// `query` with its condition and arguments passed through the refactorer.
fn refactored(query: &Query) -> Query {
    let (condition, arguments) = refactor::refactor(&query.condition, &query.arguments);
    Query {
        condition,
        arguments,
        order: query.order.clone(),
        limit: query.limit,
        offset: query.offset,
    }
}
