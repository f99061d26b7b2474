//! # Database Facade
//!
//! [`Database`] is the schema-aware API surface. It owns the connection, the
//! schema and observer registries, and the serial worker.
//!
//! ## Reads vs Writes
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          caller thread                           │
//! │                                                                  │
//! │  db.insert(&r) ─────┐                  db.fetch_all::<R>(q) ──┐  │
//! │  (returns at once)  │                  (runs right here)      │  │
//! └─────────────────────┼─────────────────────────────────────────┼──┘
//!                       ▼                                         │
//!            ┌─────────────────────┐                              │
//!            │  worker (1 thread)  │                              │
//!            │  mutations in order │                              │
//!            └──────────┬──────────┘                              │
//!                       ▼                                         ▼
//!            ┌────────────────────────────────────────────────────────┐
//!            │        Engine: ReentrantMutex<Connection> + Codec       │
//!            └────────────────────────────────────────────────────────┘
//! ```
//!
//! Mutations return as soon as they are queued. Reads run synchronously on the
//! caller's thread and may not yet see queued writes; call
//! [`Database::flush`] (or [`Database::flush_blocking`]) first when that
//! matters.
//!
//! ## Error Surface
//!
//! `Err` is reserved for problems the caller must fix: a record whose primary
//! key is not a column, an observer condition without `ROW.`, an unknown
//! table name, or a worker that has shut down. SQLite failures are logged
//! and look like "nothing happened" (see [`crate::executor`]).
//!
//! ## Example
//!
//! ```rust
//! use rowdb::{Database, Field, Query, Record, RowValues, Value};
//! use rowdb::types::row;
//!
//! struct Task { id: i64, title: String, done: bool }
//!
//! impl Record for Task {
//!     fn table() -> &'static str { "tasks" }
//!     fn primary_key() -> &'static str { "id" }
//!     fn fields() -> Vec<Field> {
//!         vec![Field::of::<i64>("id"), Field::of::<String>("title"), Field::of::<bool>("done")]
//!     }
//!     fn values(&self) -> RowValues {
//!         row([
//!             ("id", Value::from(self.id)),
//!             ("title", Value::from(self.title.as_str())),
//!             ("done", Value::from(self.done)),
//!         ])
//!     }
//!     fn create(v: &RowValues) -> Self {
//!         Task {
//!             id: v.get("id").and_then(Value::as_i64).unwrap_or_default(),
//!             title: v.get("title").and_then(Value::as_str).unwrap_or_default().to_string(),
//!             done: v.get("done").and_then(Value::as_bool).unwrap_or_default(),
//!         }
//!     }
//! }
//!
//! let db = Database::open_in_memory()?;
//! db.insert(&Task { id: 1, title: "write docs".into(), done: false })?;
//! db.flush_blocking()?;
//!
//! let open = db.fetch_all::<Task>(Query::filter("done = ?").args(vec![Value::from(false)]))?;
//! assert_eq!(open.len(), 1);
//! # Ok::<(), rowdb::Error>(())
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::executor::Engine;
use crate::observer::{self, ObserverRegistry};
use crate::schema::{Record, Schema, SchemaRegistry};
use crate::types::{Arguments, ObserverEvent, Query, RowValues, Value};
use crate::worker::{self, Completion, Mutation, WorkRequest, WorkerHandle};

/// Builds the mutation applied to each record of a batch.
type BatchMutation = fn(Arc<Schema>, RowValues) -> Mutation;

// =============================================================================
// Database
// =============================================================================

/// A schema-aware handle to one SQLite database.
///
/// # Thread Safety
///
/// `Database` is `Send + Sync`; share it behind an `Arc`. Dropping it drains
/// the worker queue and joins the worker thread.
pub struct Database {
    engine: Arc<Engine>,
    schemas: SchemaRegistry,
    observers: Arc<ObserverRegistry>,
    worker: WorkerHandle,
    path: Option<PathBuf>,
}

impl Database {
    // =========================================================================
    // Opening
    // =========================================================================

    /// Opens a database as described by `config`.
    ///
    /// # Errors
    ///
    /// - `Error::Sqlite` if the file cannot be opened or configured
    /// - `Error::Worker` if the worker thread cannot be spawned
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        let conn = match &config.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        configure(&conn, &config)?;

        let codec = config.codec();
        let observers = Arc::new(ObserverRegistry::new());
        let (tx, rx) = worker::channel();

        let stale_tx = tx.clone();
        observer::register_function(&conn, Arc::clone(&observers), codec.clone(), move |id| {
            let _ = stale_tx.send(WorkRequest::Apply(Mutation::DropObserver(id.to_string())));
        })?;

        let engine = Arc::new(Engine::new(conn, codec));
        let worker = WorkerHandle::spawn(Arc::clone(&engine), tx, rx)?;

        info!(path = ?config.path, "database opened");
        Ok(Self {
            engine,
            schemas: SchemaRegistry::new(),
            observers,
            worker,
            path: config.path,
        })
    }

    /// Opens (or creates) the database file at `path` with default settings.
    ///
    /// ```rust,no_run
    /// use rowdb::Database;
    ///
    /// let db = Database::open_at("app.db")?;
    /// # Ok::<(), rowdb::Error>(())
    /// ```
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(DatabaseConfig::at(path.as_ref()))
    }

    /// Opens a private in-memory database with default settings.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(DatabaseConfig::in_memory())
    }

    /// The database file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // =========================================================================
    // Schemas and DDL
    // =========================================================================

    /// Returns the schema of `R`, queueing `CREATE TABLE IF NOT EXISTS` the
    /// first time `R` is seen.
    ///
    /// # Errors
    ///
    /// `Error::PrimaryKey` if `R`'s primary key does not resolve to a column.
    pub fn schema<R: Record>(&self) -> Result<Arc<Schema>> {
        let fresh = !self.schemas.contains(R::table());
        let schema = self.schemas.resolve::<R>()?;
        if fresh {
            self.worker.submit(Mutation::CreateTable(Arc::clone(&schema)))?;
        }
        Ok(schema)
    }

    /// Registers a schema for the table-name API, queueing its table creation.
    ///
    /// If the table already has a schema, that one is kept and returned.
    pub fn register_schema(&self, schema: Schema) -> Result<Arc<Schema>> {
        let fresh = !self.schemas.contains(schema.table());
        let schema = self.schemas.register(schema);
        if fresh {
            self.worker.submit(Mutation::CreateTable(Arc::clone(&schema)))?;
        }
        Ok(schema)
    }

    pub fn create_table<R: Record>(&self) -> Result<()> {
        let schema = self.schema::<R>()?;
        self.worker.submit(Mutation::CreateTable(schema))
    }

    /// Drops `R`'s table. The schema stays registered; call
    /// [`Database::create_table`] to bring the table back.
    ///
    /// Observers of the table are forgotten, since their triggers go with it.
    pub fn drop_table<R: Record>(&self) -> Result<()> {
        let schema = self.schema::<R>()?;
        let forgotten = self.observers.remove_table(schema.table());
        if !forgotten.is_empty() {
            debug!(table = schema.table(), observers = forgotten.len(), "observers forgotten with table");
        }
        self.worker
            .submit(Mutation::DropTable(schema.table().to_string()))
    }

    /// Drops and recreates every table with a registered schema.
    ///
    /// Observer triggers are reinstalled on the recreated tables.
    pub fn cleanup(&self) -> Result<()> {
        let schemas = self.schemas.all();
        debug!(tables = schemas.len(), "cleanup queued");
        self.worker.submit(Mutation::Recreate(schemas.clone()))?;

        for schema in &schemas {
            for registration in self.observers.registrations_for(schema.table()) {
                let statements = observer::install_statements(
                    schema,
                    &registration.id,
                    &registration.events,
                    &registration.condition,
                )?;
                for sql in statements {
                    self.worker.submit(Mutation::Execute {
                        sql,
                        arguments: Arguments::None,
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Queues raw SQL. Sequence arguments are expanded like in conditions.
    pub fn execute(&self, sql: impl Into<String>, arguments: impl Into<Arguments>) -> Result<()> {
        self.worker.submit(Mutation::Execute {
            sql: sql.into(),
            arguments: arguments.into(),
        })
    }

    // =========================================================================
    // Record Writes
    // =========================================================================

    /// Queues an `INSERT OR IGNORE` of `record`. An existing key leaves the
    /// stored row untouched.
    pub fn insert<R: Record>(&self, record: &R) -> Result<()> {
        let schema = self.schema::<R>()?;
        self.worker.submit(Mutation::Insert {
            schema,
            values: record.values(),
        })
    }

    /// Queues an update of the row with `record`'s key.
    pub fn update<R: Record>(&self, record: &R) -> Result<()> {
        let schema = self.schema::<R>()?;
        self.worker.submit(Mutation::Update {
            schema,
            values: record.values(),
        })
    }

    /// Insert, or update when the key already exists.
    pub fn insert_or_update<R: Record>(&self, record: &R) -> Result<()> {
        let schema = self.schema::<R>()?;
        self.worker.submit(Mutation::InsertOrUpdate {
            schema,
            values: record.values(),
        })
    }

    /// Update, or insert when no row has the key.
    pub fn update_or_insert<R: Record>(&self, record: &R) -> Result<()> {
        let schema = self.schema::<R>()?;
        self.worker.submit(Mutation::UpdateOrInsert {
            schema,
            values: record.values(),
        })
    }

    /// Deletes the row with `record`'s key.
    pub fn delete<R: Record>(&self, record: &R) -> Result<()> {
        let schema = self.schema::<R>()?;
        let key = record
            .values()
            .remove(schema.primary_key())
            .unwrap_or(Value::Null);
        self.worker.submit(Mutation::DeleteOne { schema, key })
    }

    // =========================================================================
    // Batch Writes
    // =========================================================================
    //
    // Each batch runs inside one BEGIN/COMMIT on the worker. Every statement
    // is attempted; a failing one does not undo the others.

    pub fn insert_batch<R: Record>(&self, records: &[R]) -> Result<()> {
        self.batch(records, insert_mutation, None)
    }

    /// Like [`Database::insert_batch`], running `on_commit` on the worker
    /// after the batch commits.
    pub fn insert_batch_then<R, F>(&self, records: &[R], on_commit: F) -> Result<()>
    where
        R: Record,
        F: FnOnce() + Send + 'static,
    {
        self.batch(records, insert_mutation, Some(Box::new(on_commit)))
    }

    pub fn update_batch<R: Record>(&self, records: &[R]) -> Result<()> {
        self.batch(records, update_mutation, None)
    }

    pub fn update_batch_then<R, F>(&self, records: &[R], on_commit: F) -> Result<()>
    where
        R: Record,
        F: FnOnce() + Send + 'static,
    {
        self.batch(records, update_mutation, Some(Box::new(on_commit)))
    }

    pub fn insert_or_update_batch<R: Record>(&self, records: &[R]) -> Result<()> {
        self.batch(records, insert_or_update_mutation, None)
    }

    pub fn insert_or_update_batch_then<R, F>(&self, records: &[R], on_commit: F) -> Result<()>
    where
        R: Record,
        F: FnOnce() + Send + 'static,
    {
        self.batch(records, insert_or_update_mutation, Some(Box::new(on_commit)))
    }

    pub fn update_or_insert_batch<R: Record>(&self, records: &[R]) -> Result<()> {
        self.batch(records, update_or_insert_mutation, None)
    }

    pub fn update_or_insert_batch_then<R, F>(&self, records: &[R], on_commit: F) -> Result<()>
    where
        R: Record,
        F: FnOnce() + Send + 'static,
    {
        self.batch(records, update_or_insert_mutation, Some(Box::new(on_commit)))
    }

    fn batch<R: Record>(
        &self,
        records: &[R],
        mutation: BatchMutation,
        completion: Option<Completion>,
    ) -> Result<()> {
        let schema = self.schema::<R>()?;
        let rows = records.iter().map(R::values).collect();
        self.submit_rows(schema, rows, mutation, completion)
    }

    fn submit_rows(
        &self,
        schema: Arc<Schema>,
        rows: Vec<RowValues>,
        mutation: BatchMutation,
        completion: Option<Completion>,
    ) -> Result<()> {
        let mutations = rows
            .into_iter()
            .map(|values| mutation(Arc::clone(&schema), values))
            .collect();
        self.worker.submit_batch(mutations, completion)
    }

    // =========================================================================
    // Conditional Writes
    // =========================================================================

    /// Sets `values` on the row with `key`. The key column in `values`, if
    /// present, is ignored.
    pub fn update_one<R: Record>(&self, values: RowValues, key: impl Into<Value>) -> Result<()> {
        let schema = self.schema::<R>()?;
        self.worker.submit(Mutation::UpdateOne {
            schema,
            values,
            key: key.into(),
        })
    }

    /// Sets `values` on every row matching `query`.
    pub fn update_all<R: Record>(&self, values: RowValues, query: Query) -> Result<()> {
        let schema = self.schema::<R>()?;
        self.worker.submit(Mutation::UpdateAll {
            schema,
            values,
            query,
        })
    }

    pub fn delete_one<R: Record>(&self, key: impl Into<Value>) -> Result<()> {
        let schema = self.schema::<R>()?;
        self.worker.submit(Mutation::DeleteOne {
            schema,
            key: key.into(),
        })
    }

    pub fn delete_all<R: Record>(&self, query: Query) -> Result<()> {
        let schema = self.schema::<R>()?;
        self.worker.submit(Mutation::DeleteAll { schema, query })
    }

    // =========================================================================
    // Record Reads
    // =========================================================================

    /// The record with `key`, if any.
    pub fn fetch_one<R: Record>(&self, key: impl Into<Value>) -> Result<Option<R>> {
        let schema = self.schema::<R>()?;
        Ok(self
            .engine
            .fetch_one(&schema, &key.into())
            .map(|values| R::create(&values)))
    }

    /// The first record matching `query` (its limit is replaced by 1).
    pub fn fetch_first<R: Record>(&self, query: Query) -> Result<Option<R>> {
        let schema = self.schema::<R>()?;
        Ok(self
            .engine
            .fetch_first(&schema, &query)
            .map(|values| R::create(&values)))
    }

    pub fn fetch_all<R: Record>(&self, query: Query) -> Result<Vec<R>> {
        let schema = self.schema::<R>()?;
        Ok(self
            .engine
            .fetch_all(&schema, &query)
            .iter()
            .map(R::create)
            .collect())
    }

    /// Whether a row with `key` exists.
    pub fn check<R: Record>(&self, key: impl Into<Value>) -> Result<bool> {
        let schema = self.schema::<R>()?;
        Ok(self.engine.check(&schema, &key.into()))
    }

    /// Whether any row matches `query`.
    pub fn exists<R: Record>(&self, query: Query) -> Result<bool> {
        let schema = self.schema::<R>()?;
        Ok(self.engine.exists(&schema, &query))
    }

    pub fn count<R: Record>(&self, query: Query) -> Result<usize> {
        let schema = self.schema::<R>()?;
        Ok(self.engine.count(&schema, &query))
    }

    // =========================================================================
    // Table-Name API
    // =========================================================================
    //
    // For tables registered through `register_schema` or an earlier record
    // operation. Unknown tables yield `Error::UnknownTable`. Values are
    // written as given; pass them through `Record::populate` first to
    // normalise them through a record type.

    pub fn insert_values(&self, table: &str, values: RowValues) -> Result<()> {
        let schema = self.schemas.get(table)?;
        self.worker.submit(Mutation::Insert { schema, values })
    }

    /// Updates the row whose key is carried in `values`.
    pub fn update_values(&self, table: &str, values: RowValues) -> Result<()> {
        let schema = self.schemas.get(table)?;
        self.worker.submit(Mutation::Update { schema, values })
    }

    pub fn insert_or_update_values(&self, table: &str, values: RowValues) -> Result<()> {
        let schema = self.schemas.get(table)?;
        self.worker.submit(Mutation::InsertOrUpdate { schema, values })
    }

    pub fn update_or_insert_values(&self, table: &str, values: RowValues) -> Result<()> {
        let schema = self.schemas.get(table)?;
        self.worker.submit(Mutation::UpdateOrInsert { schema, values })
    }

    /// Sets `values` on the row with `key`.
    pub fn update_one_values(&self, table: &str, values: RowValues, key: impl Into<Value>) -> Result<()> {
        let schema = self.schemas.get(table)?;
        self.worker.submit(Mutation::UpdateOne {
            schema,
            values,
            key: key.into(),
        })
    }

    pub fn update_all_values(&self, table: &str, values: RowValues, query: Query) -> Result<()> {
        let schema = self.schemas.get(table)?;
        self.worker.submit(Mutation::UpdateAll {
            schema,
            values,
            query,
        })
    }

    pub fn delete_values(&self, table: &str, key: impl Into<Value>) -> Result<()> {
        let schema = self.schemas.get(table)?;
        self.worker.submit(Mutation::DeleteOne {
            schema,
            key: key.into(),
        })
    }

    pub fn delete_all_values(&self, table: &str, query: Query) -> Result<()> {
        let schema = self.schemas.get(table)?;
        self.worker.submit(Mutation::DeleteAll { schema, query })
    }

    pub fn fetch_one_values(&self, table: &str, key: impl Into<Value>) -> Result<Option<RowValues>> {
        let schema = self.schemas.get(table)?;
        Ok(self.engine.fetch_one(&schema, &key.into()))
    }

    pub fn fetch_first_values(&self, table: &str, query: Query) -> Result<Option<RowValues>> {
        let schema = self.schemas.get(table)?;
        Ok(self.engine.fetch_first(&schema, &query))
    }

    pub fn fetch_all_values(&self, table: &str, query: Query) -> Result<Vec<RowValues>> {
        let schema = self.schemas.get(table)?;
        Ok(self.engine.fetch_all(&schema, &query))
    }

    pub fn check_values(&self, table: &str, key: impl Into<Value>) -> Result<bool> {
        let schema = self.schemas.get(table)?;
        Ok(self.engine.check(&schema, &key.into()))
    }

    pub fn exists_values(&self, table: &str, query: Query) -> Result<bool> {
        let schema = self.schemas.get(table)?;
        Ok(self.engine.exists(&schema, &query))
    }

    pub fn count_values(&self, table: &str, query: Query) -> Result<usize> {
        let schema = self.schemas.get(table)?;
        Ok(self.engine.count(&schema, &query))
    }

    // Table-name batches run in one transaction, like record batches.

    pub fn insert_values_batch(&self, table: &str, rows: Vec<RowValues>) -> Result<()> {
        self.values_batch(table, rows, insert_mutation, None)
    }

    pub fn insert_values_batch_then<F>(&self, table: &str, rows: Vec<RowValues>, on_commit: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.values_batch(table, rows, insert_mutation, Some(Box::new(on_commit)))
    }

    pub fn update_values_batch(&self, table: &str, rows: Vec<RowValues>) -> Result<()> {
        self.values_batch(table, rows, update_mutation, None)
    }

    pub fn update_values_batch_then<F>(&self, table: &str, rows: Vec<RowValues>, on_commit: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.values_batch(table, rows, update_mutation, Some(Box::new(on_commit)))
    }

    pub fn insert_or_update_values_batch(&self, table: &str, rows: Vec<RowValues>) -> Result<()> {
        self.values_batch(table, rows, insert_or_update_mutation, None)
    }

    pub fn insert_or_update_values_batch_then<F>(
        &self,
        table: &str,
        rows: Vec<RowValues>,
        on_commit: F,
    ) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.values_batch(table, rows, insert_or_update_mutation, Some(Box::new(on_commit)))
    }

    pub fn update_or_insert_values_batch(&self, table: &str, rows: Vec<RowValues>) -> Result<()> {
        self.values_batch(table, rows, update_or_insert_mutation, None)
    }

    pub fn update_or_insert_values_batch_then<F>(
        &self,
        table: &str,
        rows: Vec<RowValues>,
        on_commit: F,
    ) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.values_batch(table, rows, update_or_insert_mutation, Some(Box::new(on_commit)))
    }

    fn values_batch(
        &self,
        table: &str,
        rows: Vec<RowValues>,
        mutation: BatchMutation,
        completion: Option<Completion>,
    ) -> Result<()> {
        let schema = self.schemas.get(table)?;
        self.submit_rows(schema, rows, mutation, completion)
    }

    // =========================================================================
    // Observers
    // =========================================================================

    /// Registers `callback` for `events` on `R`'s table and returns the
    /// observer id.
    ///
    /// `condition` is an optional SQL boolean expression over the changed
    /// row, written with the `ROW.` prefix (`"ROW.qty > 10"`); pass `""` to
    /// observe every row. The callback receives the event and the row's
    /// primary key, and runs synchronously on the thread applying the change
    /// (usually the worker). It may read and may queue mutations, but must
    /// not call [`Database::flush_blocking`].
    ///
    /// # Errors
    ///
    /// `Error::ObserverCondition` if `condition` is non-empty and never
    /// mentions `ROW.`.
    pub fn create_observer<R, F>(
        &self,
        events: &[ObserverEvent],
        condition: &str,
        callback: F,
    ) -> Result<String>
    where
        R: Record,
        F: Fn(ObserverEvent, Value) + Send + Sync + 'static,
    {
        let schema = self.schema::<R>()?;
        let id = observer::new_observer_id();
        let statements = observer::install_statements(&schema, &id, events, condition)?;

        self.observers
            .insert(id.clone(), schema.table(), events, condition, Arc::new(callback));
        for sql in statements {
            self.worker.submit(Mutation::Execute {
                sql,
                arguments: Arguments::None,
            })?;
        }

        debug!(observer = %id, table = schema.table(), ?events, "observer created");
        Ok(id)
    }

    /// Removes an observer and queues the drop of its triggers. Returns
    /// whether the observer was registered.
    pub fn remove_observer(&self, id: &str) -> Result<bool> {
        let removed = self.observers.remove(id);
        self.worker.submit(Mutation::DropObserver(id.to_string()))?;
        Ok(removed)
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Resolves once every mutation submitted before the call has been applied.
    pub async fn flush(&self) -> Result<()> {
        self.worker.flush().await
    }

    /// Blocking form of [`Database::flush`]. Do not call from async code or
    /// from an observer callback.
    pub fn flush_blocking(&self) -> Result<()> {
        self.worker.flush_blocking()
    }

    /// Drains the queue and stops the worker. Later mutations fail with
    /// `Error::WorkerClosed`; reads keep working.
    pub fn shutdown(&self) {
        self.worker.shutdown();
        debug!("database shut down");
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.worker.shutdown();
    }
}

fn insert_mutation(schema: Arc<Schema>, values: RowValues) -> Mutation {
    Mutation::Insert { schema, values }
}

fn update_mutation(schema: Arc<Schema>, values: RowValues) -> Mutation {
    Mutation::Update { schema, values }
}

fn insert_or_update_mutation(schema: Arc<Schema>, values: RowValues) -> Mutation {
    Mutation::InsertOrUpdate { schema, values }
}

fn update_or_insert_mutation(schema: Arc<Schema>, values: RowValues) -> Mutation {
    Mutation::UpdateOrInsert { schema, values }
}

/// Connection-level settings applied right after opening.
fn configure(conn: &Connection, config: &DatabaseConfig) -> Result<()> {
    conn.busy_timeout(config.busy_timeout)?;

    // Observer triggers call an application-defined function.
    conn.execute_batch("PRAGMA trusted_schema = ON")?;

    if config.path.is_some() {
        conn.execute_batch("PRAGMA journal_mode = WAL")?;
        conn.execute_batch("PRAGMA synchronous = NORMAL")?;
    }
    Ok(())
}
