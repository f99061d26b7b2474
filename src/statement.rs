//! # Statement Builder
//!
//! Pure functions from a [`Schema`] plus a [`Query`] or a set of row values to
//! SQL text. Nothing here touches a connection.
//!
//! ## Clause Composition
//!
//! Every optional clause is omitted entirely when its input is empty or zero:
//!
//! ```text
//! SELECT * FROM t [WHERE cond] [ORDER BY order] [LIMIT n [OFFSET m]];
//! ```
//!
//! `OFFSET` is only emitted when *both* `limit` and `offset` are non-zero.
//! A zero limit suppresses the offset even if one was requested.
//!
//! ## Bounded Mutations
//!
//! SQLite only accepts `ORDER BY`/`LIMIT` on `UPDATE` and `DELETE` when built
//! with `SQLITE_ENABLE_UPDATE_DELETE_LIMIT`, which the bundled library is not.
//! A bounded update or delete therefore selects its target keys in a subquery:
//!
//! ```text
//! DELETE FROM t WHERE id IN (SELECT id FROM t WHERE cond ORDER BY o LIMIT n OFFSET m);
//! ```
//!
//! The clause rules inside the subquery are the same as for `SELECT`.
//!
//! ## Bind Order
//!
//! Builders that write values use [`insert_columns`] / [`update_columns`] to
//! decide which columns appear; the executor binds through the same functions,
//! so placeholders and values always line up.

use crate::error::{Error, Result};
use crate::observer::OBSERVER_FUNCTION;
use crate::schema::{Column, Schema};
use crate::types::{ObserverEvent, Query, RowValues};

/// Token an observer condition uses to reference the changed row.
pub const ROW_TOKEN: &str = "ROW.";

// =============================================================================
// Column Selection
// =============================================================================

/// Columns written by an insert: every schema column present in `values`,
/// in schema order.
pub fn insert_columns<'a>(schema: &'a Schema, values: &RowValues) -> Vec<&'a Column> {
    schema
        .columns()
        .iter()
        .filter(|c| values.contains_key(&c.name))
        .collect()
}

/// Columns written by an update: present in `values`, excluding the key.
pub fn update_columns<'a>(schema: &'a Schema, values: &RowValues) -> Vec<&'a Column> {
    schema
        .columns()
        .iter()
        .filter(|c| c.name != schema.primary_key() && values.contains_key(&c.name))
        .collect()
}

// =============================================================================
// DDL
// =============================================================================

pub fn create_table(schema: &Schema) -> String {
    let columns: Vec<String> = schema
        .columns()
        .iter()
        .map(|c| {
            if c.name == schema.primary_key() {
                format!("{} {} PRIMARY KEY NOT NULL", c.name, c.affinity.as_sql())
            } else {
                format!("{} {}", c.name, c.affinity.as_sql())
            }
        })
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({});",
        schema.table(),
        columns.join(", ")
    )
}

pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {};", table)
}

// =============================================================================
// Writes
// =============================================================================

/// `INSERT OR IGNORE` of the columns present in `values`.
///
/// Returns `None` when `values` names no schema column.
pub fn insert(schema: &Schema, values: &RowValues) -> Option<String> {
    let columns = insert_columns(schema, values);
    if columns.is_empty() {
        return None;
    }

    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    Some(format!(
        "INSERT OR IGNORE INTO {} ({}) VALUES ({});",
        schema.table(),
        names.join(", "),
        placeholders(columns.len())
    ))
}

/// Single-row update by key; the key placeholder is always last.
///
/// Returns `None` when there is nothing to set.
pub fn update_one(schema: &Schema, values: &RowValues) -> Option<String> {
    let assignments = assignments(schema, values)?;
    Some(format!(
        "UPDATE {} SET {} WHERE {} = ?;",
        schema.table(),
        assignments,
        schema.primary_key()
    ))
}

/// Update of every row matching `query`.
///
/// Returns `None` when there is nothing to set.
pub fn update_all(schema: &Schema, values: &RowValues, query: &Query) -> Option<String> {
    let assignments = assignments(schema, values)?;
    let mut sql = format!("UPDATE {} SET {}", schema.table(), assignments);
    push_bounded_target(&mut sql, schema, query);
    sql.push(';');
    Some(sql)
}

pub fn delete_one(schema: &Schema) -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?;",
        schema.table(),
        schema.primary_key()
    )
}

/// Delete of every row matching `query`.
pub fn delete_all(schema: &Schema, query: &Query) -> String {
    let mut sql = format!("DELETE FROM {}", schema.table());
    push_bounded_target(&mut sql, schema, query);
    sql.push(';');
    sql
}

// =============================================================================
// Reads
// =============================================================================

/// Row lookup by key.
pub fn fetch_one(schema: &Schema) -> String {
    format!(
        "SELECT * FROM {} WHERE {} = ?;",
        schema.table(),
        schema.primary_key()
    )
}

/// First row matching `query`; the query's own limit is replaced by `LIMIT 1`.
pub fn fetch_first(schema: &Schema, query: &Query) -> String {
    let mut sql = format!("SELECT * FROM {}", schema.table());
    push_where(&mut sql, &query.condition);
    push_order(&mut sql, &query.order);
    push_limit(&mut sql, 1, query.offset);
    sql.push(';');
    sql
}

pub fn fetch_all(schema: &Schema, query: &Query) -> String {
    let mut sql = format!("SELECT * FROM {}", schema.table());
    push_where(&mut sql, &query.condition);
    push_order(&mut sql, &query.order);
    push_limit(&mut sql, query.limit, query.offset);
    sql.push(';');
    sql
}

/// Key existence probe.
pub fn check(schema: &Schema) -> String {
    format!(
        "SELECT {key} FROM {} WHERE {key} = ?;",
        schema.table(),
        key = schema.primary_key()
    )
}

/// Existence probe for any row matching `query`'s condition.
pub fn exists(schema: &Schema, query: &Query) -> String {
    let mut sql = format!("SELECT {} FROM {}", schema.primary_key(), schema.table());
    push_where(&mut sql, &query.condition);
    sql.push_str(" LIMIT 1;");
    sql
}

/// Row count for `query`'s condition. Ordering and paging do not apply to an
/// aggregate and are ignored.
pub fn count(schema: &Schema, query: &Query) -> String {
    let mut sql = format!("SELECT COUNT(*) FROM {}", schema.table());
    push_where(&mut sql, &query.condition);
    sql.push(';');
    sql
}

// =============================================================================
// Triggers
// =============================================================================

/// Deterministic trigger name for one observer event.
pub fn trigger_name(event: ObserverEvent, observer_id: &str) -> String {
    format!(
        "observer_{}_{}_{}",
        event.as_sql().to_ascii_lowercase(),
        event.row_alias().to_ascii_lowercase(),
        observer_id
    )
}

/// `CREATE TRIGGER` invoking the observer function after `event` on the table.
///
/// A non-empty `condition` becomes the `WHEN` clause with every `ROW.`
/// rewritten to the trigger's row alias.
///
/// # Errors
///
/// [`Error::ObserverCondition`] if `condition` is non-empty but never
/// mentions `ROW.`.
pub fn create_trigger(
    schema: &Schema,
    observer_id: &str,
    event: ObserverEvent,
    condition: &str,
) -> Result<String> {
    let alias = event.row_alias();
    let condition = condition.trim();

    let when = if condition.is_empty() {
        String::new()
    } else if condition.contains(ROW_TOKEN) {
        format!(
            " WHEN ({})",
            condition.replace(ROW_TOKEN, &format!("{}.", alias))
        )
    } else {
        return Err(Error::ObserverCondition(condition.to_string()));
    };

    let key = schema.key_column();
    Ok(format!(
        "CREATE TRIGGER IF NOT EXISTS {name} AFTER {event} ON {table}{when} BEGIN \
         SELECT {function}('{id}', '{event}', CAST({alias}.{key} AS TEXT), '{tag}'); END;",
        name = trigger_name(event, observer_id),
        event = event.as_sql(),
        table = schema.table(),
        when = when,
        function = OBSERVER_FUNCTION,
        id = observer_id,
        alias = alias,
        key = key.name,
        tag = key.semantic_type.tag(),
    ))
}

pub fn drop_trigger(event: ObserverEvent, observer_id: &str) -> String {
    format!("DROP TRIGGER IF EXISTS {};", trigger_name(event, observer_id))
}

// =============================================================================
// Helper Functions
// =============================================================================

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn assignments(schema: &Schema, values: &RowValues) -> Option<String> {
    let columns = update_columns(schema, values);
    if columns.is_empty() {
        return None;
    }
    Some(
        columns
            .iter()
            .map(|c| format!("{} = ?", c.name))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

fn push_where(sql: &mut String, condition: &str) {
    let condition = condition.trim();
    if !condition.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(condition);
    }
}

fn push_order(sql: &mut String, order: &str) {
    let order = order.trim();
    if !order.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(order);
    }
}

fn push_limit(sql: &mut String, limit: usize, offset: usize) {
    if limit != 0 {
        sql.push_str(&format!(" LIMIT {}", limit));
        if offset != 0 {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
    }
}

/// Appends the target rows of an update or delete.
///
/// Without a limit the condition applies directly and ordering has no effect.
fn push_bounded_target(sql: &mut String, schema: &Schema, query: &Query) {
    if query.limit == 0 {
        push_where(sql, &query.condition);
        return;
    }

    let key = schema.primary_key();
    sql.push_str(&format!(
        " WHERE {key} IN (SELECT {key} FROM {}",
        schema.table(),
        key = key
    ));
    push_where(sql, &query.condition);
    push_order(sql, &query.order);
    push_limit(sql, query.limit, query.offset);
    sql.push(')');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use crate::types::{row, SemanticType, Value};

    fn schema() -> Schema {
        Schema::new(
            "people",
            "id",
            vec![
                Field::new("id", SemanticType::Int64),
                Field::new("name", SemanticType::String),
                Field::new("score", SemanticType::Double),
                Field::new("photo", SemanticType::Binary),
            ],
            &[],
        )
        .unwrap()
    }

    #[test]
    fn test_create_and_drop_table() {
        assert_eq!(
            create_table(&schema()),
            "CREATE TABLE IF NOT EXISTS people (id INTEGER PRIMARY KEY NOT NULL, \
             name TEXT, score REAL, photo BLOB);"
        );
        assert_eq!(drop_table("people"), "DROP TABLE IF EXISTS people;");
    }

    #[test]
    fn test_insert_only_present_columns() {
        let values = row([("name", Value::from("ada")), ("id", Value::from(1_i64))]);
        assert_eq!(
            insert(&schema(), &values).unwrap(),
            "INSERT OR IGNORE INTO people (id, name) VALUES (?, ?);"
        );
        assert!(insert(&schema(), &row([("nope", Value::Null)])).is_none());
    }

    #[test]
    fn test_update_one_key_last() {
        let values = row([
            ("score", Value::from(1.0)),
            ("id", Value::from(1_i64)),
            ("name", Value::from("x")),
        ]);
        assert_eq!(
            update_one(&schema(), &values).unwrap(),
            "UPDATE people SET name = ?, score = ? WHERE id = ?;"
        );
        assert!(update_one(&schema(), &row([("id", Value::from(1_i64))])).is_none());
    }

    #[test]
    fn test_update_all_clauses() {
        let values = row([("name", Value::from("x"))]);
        assert_eq!(
            update_all(&schema(), &values, &Query::all()).unwrap(),
            "UPDATE people SET name = ?;"
        );
        assert_eq!(
            update_all(&schema(), &values, &Query::filter("score > ?")).unwrap(),
            "UPDATE people SET name = ? WHERE score > ?;"
        );
        assert_eq!(
            update_all(
                &schema(),
                &values,
                &Query::filter("score > ?").order("score DESC").limit(3).offset(2)
            )
            .unwrap(),
            "UPDATE people SET name = ? WHERE id IN (SELECT id FROM people \
             WHERE score > ? ORDER BY score DESC LIMIT 3 OFFSET 2);"
        );
    }

    #[test]
    fn test_offset_requires_limit_and_offset() {
        let s = schema();
        let values = row([("name", Value::from("x"))]);

        let no_limit = Query::filter("score > 1").limit(0).offset(5);
        assert!(!delete_all(&s, &no_limit).contains("OFFSET"));
        assert!(!update_all(&s, &values, &no_limit).unwrap().contains("OFFSET"));
        assert!(!fetch_all(&s, &no_limit).contains("OFFSET"));

        let no_offset = Query::filter("score > 1").limit(10).offset(0);
        assert!(!delete_all(&s, &no_offset).contains("OFFSET"));
        assert!(!update_all(&s, &values, &no_offset).unwrap().contains("OFFSET"));
        assert!(delete_all(&s, &no_offset).contains("LIMIT 10"));

        let both = Query::filter("score > 1").limit(10).offset(5);
        assert!(delete_all(&s, &both).contains("LIMIT 10 OFFSET 5"));
        assert!(update_all(&s, &values, &both).unwrap().contains("LIMIT 10 OFFSET 5"));
        assert!(fetch_all(&s, &both).ends_with("LIMIT 10 OFFSET 5;"));
    }

    #[test]
    fn test_delete_statements() {
        assert_eq!(delete_one(&schema()), "DELETE FROM people WHERE id = ?;");
        assert_eq!(delete_all(&schema(), &Query::all()), "DELETE FROM people;");
        assert_eq!(
            delete_all(&schema(), &Query::filter("name = ?")),
            "DELETE FROM people WHERE name = ?;"
        );
    }

    #[test]
    fn test_select_statements() {
        let s = schema();
        assert_eq!(fetch_one(&s), "SELECT * FROM people WHERE id = ?;");
        assert_eq!(fetch_all(&s, &Query::all()), "SELECT * FROM people;");
        assert_eq!(
            fetch_all(&s, &Query::filter("score > ?").order("name")),
            "SELECT * FROM people WHERE score > ? ORDER BY name;"
        );
        assert_eq!(
            fetch_first(&s, &Query::filter("score > ?").order("name").limit(50)),
            "SELECT * FROM people WHERE score > ? ORDER BY name LIMIT 1;"
        );
        assert_eq!(check(&s), "SELECT id FROM people WHERE id = ?;");
        assert_eq!(
            exists(&s, &Query::filter("name = ?")),
            "SELECT id FROM people WHERE name = ? LIMIT 1;"
        );
        assert_eq!(
            count(&s, &Query::filter("name = ?").order("name").limit(3)),
            "SELECT COUNT(*) FROM people WHERE name = ?;"
        );
        assert_eq!(count(&s, &Query::all()), "SELECT COUNT(*) FROM people;");
    }

    #[test]
    fn test_trigger_without_condition() {
        let sql = create_trigger(&schema(), "abc123", ObserverEvent::Insert, "").unwrap();
        assert_eq!(
            sql,
            "CREATE TRIGGER IF NOT EXISTS observer_insert_new_abc123 AFTER INSERT ON people \
             BEGIN SELECT rowdb_observer('abc123', 'INSERT', CAST(NEW.id AS TEXT), 'Int64'); END;"
        );
    }

    #[test]
    fn test_trigger_condition_rewritten_to_alias() {
        let sql = create_trigger(
            &schema(),
            "abc",
            ObserverEvent::Delete,
            "ROW.score > 10 AND ROW.name = 'x'",
        )
        .unwrap();
        assert!(sql.starts_with("CREATE TRIGGER IF NOT EXISTS observer_delete_old_abc AFTER DELETE"));
        assert!(sql.contains(" WHEN (OLD.score > 10 AND OLD.name = 'x') BEGIN"));
        assert!(sql.contains("CAST(OLD.id AS TEXT)"));
    }

    #[test]
    fn test_trigger_condition_must_reference_row() {
        let err = create_trigger(&schema(), "abc", ObserverEvent::Update, "score > 10").unwrap_err();
        assert!(matches!(err, Error::ObserverCondition(_)));
    }

    #[test]
    fn test_drop_trigger() {
        assert_eq!(
            drop_trigger(ObserverEvent::Update, "abc"),
            "DROP TRIGGER IF EXISTS observer_update_new_abc;"
        );
    }
}
