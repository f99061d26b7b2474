//! # Change Notification
//!
//! Row changes are pushed out of SQLite through triggers that call back into
//! Rust via one registered scalar function:
//!
//! ```text
//!  INSERT INTO t ...                         Rust
//!        │                                    ▲
//!        ▼                                    │ callback(Insert, key)
//!  trigger observer_insert_new_<id>           │
//!    AFTER INSERT ON t WHEN (...)       ObserverRegistry
//!    SELECT rowdb_observer('<id>', 'INSERT', CAST(NEW.key AS TEXT), 'Int64')
//!        │                                    ▲
//!        └──────────── scalar function ───────┘
//! ```
//!
//! ## Observer Lifecycle
//!
//! `Created → Active → Removed`. Creating an observer stores its callback and
//! queues one trigger per event. Removing it deletes the callback and queues a
//! drop of all three possible triggers. If a trigger fires for an id with no
//! callback (for instance a trigger left in a database file by an earlier
//! process), the dispatcher asks for that id's triggers to be dropped.
//!
//! ## Reentrancy
//!
//! Callbacks run synchronously on whichever thread is stepping the statement
//! that fired the trigger, which is usually the worker. A callback may read
//! through the database and may submit mutations (they are queued, never run
//! inline), but it must not wait for the worker, e.g. via `flush_blocking`.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::RwLock;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::codec::Codec;
use crate::error::Result;
use crate::schema::Schema;
use crate::statement;
use crate::types::{ObserverEvent, SemanticType, Value};

/// Name of the scalar function the observer triggers call.
pub const OBSERVER_FUNCTION: &str = "rowdb_observer";

/// Callback invoked with the event kind and the changed row's primary key.
pub type ObserverCallback = Arc<dyn Fn(ObserverEvent, Value) + Send + Sync>;

/// Generates a fresh observer id: a v4 UUID without dashes, safe to embed in
/// trigger names.
pub fn new_observer_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

// =============================================================================
// Observer Registry
// =============================================================================

struct ObserverEntry {
    table: String,
    events: Vec<ObserverEvent>,
    condition: String,
    callback: ObserverCallback,
}

/// What an observer watches, enough to reinstall its triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: String,
    pub events: Vec<ObserverEvent>,
    pub condition: String,
}

/// The `id -> callback` table consulted by the scalar function.
#[derive(Default)]
pub struct ObserverRegistry {
    entries: RwLock<HashMap<String, ObserverEntry>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        id: impl Into<String>,
        table: impl Into<String>,
        events: &[ObserverEvent],
        condition: impl Into<String>,
        callback: ObserverCallback,
    ) {
        self.entries.write().insert(
            id.into(),
            ObserverEntry {
                table: table.into(),
                events: events.to_vec(),
                condition: condition.into(),
                callback,
            },
        );
    }

    /// Removes an observer, returning whether it was registered.
    pub fn remove(&self, id: &str) -> bool {
        self.entries.write().remove(id).is_some()
    }

    pub fn callback(&self, id: &str) -> Option<ObserverCallback> {
        self.entries.read().get(id).map(|e| Arc::clone(&e.callback))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    /// The observers watching `table`, ordered by id.
    pub fn registrations_for(&self, table: &str) -> Vec<Registration> {
        let mut registrations: Vec<_> = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| e.table == table)
            .map(|(id, e)| Registration {
                id: id.clone(),
                events: e.events.clone(),
                condition: e.condition.clone(),
            })
            .collect();
        registrations.sort_by(|a, b| a.id.cmp(&b.id));
        registrations
    }

    /// Forgets every observer of `table`, returning their ids.
    pub fn remove_table(&self, table: &str) -> Vec<String> {
        let mut entries = self.entries.write();
        let ids: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.table == table)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            entries.remove(id);
        }
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}

// =============================================================================
// Trigger Statements
// =============================================================================

/// Statements installing one trigger per requested event.
///
/// Duplicate events are installed once.
///
/// # Errors
///
/// [`crate::Error::ObserverCondition`] if `condition` is non-empty and does
/// not reference `ROW.`.
pub fn install_statements(
    schema: &Schema,
    observer_id: &str,
    events: &[ObserverEvent],
    condition: &str,
) -> Result<Vec<String>> {
    let mut statements = Vec::with_capacity(events.len());
    for event in ObserverEvent::ALL {
        if events.contains(&event) {
            statements.push(statement::create_trigger(
                schema,
                observer_id,
                event,
                condition,
            )?);
        }
    }
    Ok(statements)
}

/// Statements dropping every trigger an observer could own.
pub fn removal_statements(observer_id: &str) -> Vec<String> {
    ObserverEvent::ALL
        .iter()
        .map(|&event| statement::drop_trigger(event, observer_id))
        .collect()
}

// =============================================================================
// Scalar Function
// =============================================================================

struct Dispatcher {
    observers: Arc<ObserverRegistry>,
    codec: Codec,
    on_stale: Box<dyn Fn(&str) + Send + Sync>,
}

/// Registers the observer scalar function on `conn`.
///
/// `on_stale` is called with the id of any observer that fires without a
/// registered callback. It must not touch the connection inline; the trigger
/// that called it is still running.
///
/// # Rust Pattern: AssertUnwindSafe
///
/// rusqlite requires the function closure to be `UnwindSafe`, which the shared
/// registry lock is not. rusqlite catches panics at the FFI boundary and
/// reports them as SQL errors, and a panicking callback never holds the
/// registry lock (the callback is cloned out before it is called), so no
/// broken invariant can be observed afterwards.
pub fn register_function<S>(
    conn: &Connection,
    observers: Arc<ObserverRegistry>,
    codec: Codec,
    on_stale: S,
) -> Result<()>
where
    S: Fn(&str) + Send + Sync + 'static,
{
    let dispatcher = AssertUnwindSafe(Dispatcher {
        observers,
        codec,
        on_stale: Box::new(on_stale),
    });

    conn.create_scalar_function(
        OBSERVER_FUNCTION,
        4,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let dispatcher: &AssertUnwindSafe<Dispatcher> = &dispatcher;
            Ok(dispatch(dispatcher, ctx))
        },
    )?;

    debug!(function = OBSERVER_FUNCTION, "registered observer function");
    Ok(())
}

/// Handles one trigger invocation. Returns 1 when a callback ran.
fn dispatch(dispatcher: &Dispatcher, ctx: &Context<'_>) -> i64 {
    let (Some(id), Some(event)) = (arg_text(ctx, 0), arg_text(ctx, 1)) else {
        warn!("observer function called without id or event");
        return 0;
    };
    let Some(event) = ObserverEvent::from_sql(&event) else {
        warn!(observer = %id, event = %event, "observer function called with unknown event");
        return 0;
    };

    let Some(callback) = dispatcher.observers.callback(&id) else {
        warn!(observer = %id, "trigger fired for unknown observer, dropping its triggers");
        (dispatcher.on_stale)(&id);
        return 0;
    };

    let key = match (arg_text(ctx, 2), arg_text(ctx, 3)) {
        (None, _) => Value::Null,
        (Some(text), Some(tag)) => match SemanticType::from_tag(&tag) {
            Some(ty) => dispatcher.codec.decode_key(ty, &text),
            None => Value::String(text),
        },
        (Some(text), None) => Value::String(text),
    };

    callback(event, key);
    1
}

fn arg_text(ctx: &Context<'_>, index: usize) -> Option<String> {
    match ctx.get_raw(index) {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}
