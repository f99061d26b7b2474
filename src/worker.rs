//! # Serial Worker
//!
//! Every mutation (DDL, writes, trigger install/drop) runs on one dedicated
//! thread, in submission order. Callers never wait for submission:
//!
//! ```text
//!  caller threads               worker thread ("rowdb-worker")
//!  ──────────────               ──────────────────────────────
//!  insert(a) ──┐
//!  update(b) ──┼── mpsc (unbounded, FIFO) ──► apply(a) → apply(b) → BEGIN..COMMIT
//!  batch([..])─┘                                               └► completion()
//!  flush() ◄───────────── oneshot ───────────── Flush reached
//! ```
//!
//! There is no cancellation: once queued, work runs to completion.
//! [`WorkerHandle::flush`] is the only way to wait for it.
//!
//! ## Rust Pattern: Current-Thread Runtime on a Dedicated Thread
//!
//! The worker owns a single-threaded tokio runtime and `block_on`s its receive
//! loop. Statements are blocking calls, which is fine here: nothing else is
//! scheduled on this runtime.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::executor::Engine;
use crate::observer;
use crate::schema::Schema;
use crate::types::{Arguments, Query, RowValues, Value};

/// Runs on the worker after a batch commits.
pub type Completion = Box<dyn FnOnce() + Send + 'static>;

// =============================================================================
// Work Items
// =============================================================================

/// One queued mutation.
pub(crate) enum Mutation {
    Execute { sql: String, arguments: Arguments },
    CreateTable(Arc<Schema>),
    DropTable(String),
    /// Drop then recreate each table.
    Recreate(Vec<Arc<Schema>>),
    Insert { schema: Arc<Schema>, values: RowValues },
    /// Update by the key carried in `values`.
    Update { schema: Arc<Schema>, values: RowValues },
    UpdateOne { schema: Arc<Schema>, values: RowValues, key: Value },
    UpdateAll { schema: Arc<Schema>, values: RowValues, query: Query },
    InsertOrUpdate { schema: Arc<Schema>, values: RowValues },
    UpdateOrInsert { schema: Arc<Schema>, values: RowValues },
    DeleteOne { schema: Arc<Schema>, key: Value },
    DeleteAll { schema: Arc<Schema>, query: Query },
    /// Drop all triggers of an observer.
    DropObserver(String),
}

impl Mutation {
    /// Applies the mutation, returning the number of rows changed.
    pub(crate) fn apply(self, engine: &Engine) -> usize {
        match self {
            Mutation::Execute { sql, arguments } => engine.execute(&sql, &arguments),
            Mutation::CreateTable(schema) => {
                engine.create_table(&schema);
                0
            }
            Mutation::DropTable(table) => {
                engine.drop_table(&table);
                0
            }
            Mutation::Recreate(schemas) => {
                for schema in schemas {
                    engine.drop_table(schema.table());
                    engine.create_table(&schema);
                }
                0
            }
            Mutation::Insert { schema, values } => engine.insert(&schema, &values),
            Mutation::Update { schema, values } => engine.update(&schema, &values),
            Mutation::UpdateOne { schema, values, key } => {
                engine.update_one(&schema, &values, &key)
            }
            Mutation::UpdateAll {
                schema,
                values,
                query,
            } => engine.update_all(&schema, &values, &query),
            Mutation::InsertOrUpdate { schema, values } => engine.insert_or_update(&schema, &values),
            Mutation::UpdateOrInsert { schema, values } => engine.update_or_insert(&schema, &values),
            Mutation::DeleteOne { schema, key } => engine.delete_one(&schema, &key),
            Mutation::DeleteAll { schema, query } => engine.delete_all(&schema, &query),
            Mutation::DropObserver(id) => {
                for sql in observer::removal_statements(&id) {
                    engine.execute(&sql, &Arguments::None);
                }
                debug!(observer = %id, "dropped observer triggers");
                0
            }
        }
    }
}

/// Requests accepted by the worker loop.
pub(crate) enum WorkRequest {
    Apply(Mutation),
    /// Applied inside one transaction, then `completion` runs.
    Batch {
        mutations: Vec<Mutation>,
        completion: Option<Completion>,
    },
    /// Answered once everything queued before it has been applied.
    Flush(oneshot::Sender<()>),
    Shutdown,
}

pub(crate) type WorkSender = mpsc::UnboundedSender<WorkRequest>;
pub(crate) type WorkReceiver = mpsc::UnboundedReceiver<WorkRequest>;

pub(crate) fn channel() -> (WorkSender, WorkReceiver) {
    mpsc::unbounded_channel()
}

// =============================================================================
// Worker Loop
// =============================================================================

async fn run_worker(engine: Arc<Engine>, mut rx: WorkReceiver) {
    debug!("worker started");
    while let Some(request) = rx.recv().await {
        match request {
            WorkRequest::Apply(mutation) => {
                mutation.apply(&engine);
            }
            WorkRequest::Batch {
                mutations,
                completion,
            } => {
                let count = mutations.len();
                let changed: usize = engine.transaction(|engine| {
                    mutations.into_iter().map(|m| m.apply(engine)).sum()
                });
                debug!(statements = count, changed, "batch committed");

                if let Some(completion) = completion {
                    if panic::catch_unwind(AssertUnwindSafe(completion)).is_err() {
                        error!("batch completion callback panicked");
                    }
                }
            }
            WorkRequest::Flush(done) => {
                let _ = done.send(());
            }
            WorkRequest::Shutdown => break,
        }
    }
    debug!("worker stopped");
}

// =============================================================================
// Worker Handle
// =============================================================================

/// Submission side of the worker.
pub(crate) struct WorkerHandle {
    tx: WorkSender,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl WorkerHandle {
    /// Spawns the worker thread, consuming `rx`.
    pub(crate) fn spawn(engine: Arc<Engine>, tx: WorkSender, rx: WorkReceiver) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("rowdb-worker".to_string())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to create worker runtime");

                rt.block_on(run_worker(engine, rx));
            })
            .map_err(|e| Error::Worker(format!("failed to spawn worker thread: {}", e)))?;

        Ok(Self {
            tx,
            thread_id: handle.thread().id(),
            thread: Mutex::new(Some(handle)),
        })
    }

    pub(crate) fn submit(&self, mutation: Mutation) -> Result<()> {
        self.tx
            .send(WorkRequest::Apply(mutation))
            .map_err(|_| Error::WorkerClosed)
    }

    pub(crate) fn submit_batch(
        &self,
        mutations: Vec<Mutation>,
        completion: Option<Completion>,
    ) -> Result<()> {
        self.tx
            .send(WorkRequest::Batch {
                mutations,
                completion,
            })
            .map_err(|_| Error::WorkerClosed)
    }

    /// True when called from the worker thread itself (e.g. inside an
    /// observer callback or a batch completion).
    pub(crate) fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Resolves once every previously submitted request has been applied.
    pub(crate) async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(WorkRequest::Flush(done_tx))
            .map_err(|_| Error::WorkerClosed)?;
        done_rx.await.map_err(|_| Error::WorkerClosed)
    }

    /// Blocking form of [`WorkerHandle::flush`].
    ///
    /// Must not be called from inside an async runtime. On the worker thread
    /// it returns immediately, since waiting there could never finish.
    pub(crate) fn flush_blocking(&self) -> Result<()> {
        if self.is_worker_thread() {
            warn!("flush_blocking called on the worker thread, not waiting");
            return Ok(());
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(WorkRequest::Flush(done_tx))
            .map_err(|_| Error::WorkerClosed)?;
        done_rx.blocking_recv().map_err(|_| Error::WorkerClosed)
    }

    /// Stops the worker after it drains the queue, joining the thread unless
    /// called from the worker itself. Idempotent.
    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(WorkRequest::Shutdown);
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        if self.is_worker_thread() {
            return;
        }
        if handle.join().is_err() {
            error!("worker thread panicked");
        }
    }
}
