//! Query Tests
//!
//! Tests for:
//! - Positional and named arguments, including sequence expansion
//! - Ordering, limits and offsets
//! - Bounded conditional updates and deletes
//! - Engine errors reading as "no rows"
//! - Raw SQL execution and the table-name API

mod common;

use common::Item;
use rowdb::types::row;
use rowdb::{Arguments, Database, Error, Query, Record, Value};

fn seeded() -> Database {
    let db = Database::open_in_memory().unwrap();
    let items: Vec<Item> = (1..=10)
        .map(|id| Item::new(id, &format!("item-{id}"), (id * 10) as i32))
        .collect();
    db.insert_batch(&items).unwrap();
    db.flush_blocking().unwrap();
    db
}

fn ids(items: Vec<Item>) -> Vec<i64> {
    items.into_iter().map(|i| i.id).collect()
}

/// A sequence argument expands to an `IN` list.
#[test]
fn positional_sequence_argument() {
    let db = seeded();

    let query = Query::filter("qty > ? AND id IN ?")
        .args(vec![Value::from(20_i64), Value::list([1_i64, 2, 3, 4])])
        .order("id");
    assert_eq!(ids(db.fetch_all::<Item>(query).unwrap()), vec![3, 4]);
}

#[test]
fn named_sequence_argument() {
    let db = seeded();

    let query = Query::filter("name = :name OR id IN :ids")
        .named([
            (":name", Value::from("item-9")),
            ("ids", Value::list([2_i64, 5])),
        ])
        .order("id DESC");
    assert_eq!(ids(db.fetch_all::<Item>(query).unwrap()), vec![9, 5, 2]);
}

/// Placeholders inside string literals are not treated as parameters.
#[test]
fn quoted_placeholder_is_literal() {
    let db = Database::open_in_memory().unwrap();
    db.insert(&Item::new(1, "why?", 1)).unwrap();
    db.insert(&Item::new(2, "because", 1)).unwrap();
    db.flush_blocking().unwrap();

    let query = Query::filter("name = 'why?' AND id IN ?").args(vec![Value::list([1_i64, 2])]);
    assert_eq!(ids(db.fetch_all::<Item>(query).unwrap()), vec![1]);
}

#[test]
fn limit_and_offset_page_through_rows() {
    let db = seeded();

    let page = |offset| {
        ids(db
            .fetch_all::<Item>(Query::all().order("id").limit(3).offset(offset))
            .unwrap())
    };
    assert_eq!(page(0), vec![1, 2, 3]);
    assert_eq!(page(3), vec![4, 5, 6]);
    assert_eq!(page(9), vec![10]);
}

/// An offset without a limit is ignored.
#[test]
fn offset_without_limit_is_ignored() {
    let db = seeded();
    let all = db
        .fetch_all::<Item>(Query::all().order("id").offset(5))
        .unwrap();
    assert_eq!(all.len(), 10);
}

#[test]
fn fetch_first_respects_order_and_offset() {
    let db = seeded();

    let first = db
        .fetch_first::<Item>(Query::filter("qty >= ?").args(vec![Value::from(50_i64)]).order("qty DESC").limit(7))
        .unwrap()
        .unwrap();
    assert_eq!(first.id, 10);

    let second = db
        .fetch_first::<Item>(Query::all().order("id").offset(1))
        .unwrap()
        .unwrap();
    assert_eq!(second.id, 2);
}

#[test]
fn count_and_exists() {
    let db = seeded();

    assert_eq!(db.count::<Item>(Query::all()).unwrap(), 10);
    assert_eq!(
        db.count::<Item>(Query::filter("qty <= ?").args(vec![Value::from(30_i64)]).limit(1))
            .unwrap(),
        3
    );
    assert!(db
        .exists::<Item>(Query::filter("name = ?").args(vec![Value::from("item-4")]))
        .unwrap());
    assert!(!db
        .exists::<Item>(Query::filter("name = ?").args(vec![Value::from("item-44")]))
        .unwrap());
}

/// `update_all` with a limit touches only the first rows in order.
#[test]
fn bounded_update_all() {
    let db = seeded();

    db.update_all::<Item>(
        row([("name", Value::from("top"))]),
        Query::all().order("qty DESC").limit(2),
    )
    .unwrap();
    db.flush_blocking().unwrap();

    let top = db
        .fetch_all::<Item>(Query::filter("name = ?").args(vec![Value::from("top")]).order("id"))
        .unwrap();
    assert_eq!(ids(top), vec![9, 10]);
}

#[test]
fn unbounded_update_all_with_sequence() {
    let db = seeded();

    db.update_all::<Item>(
        row([("qty", Value::from(0_i64))]),
        Query::filter("id IN ?").args(vec![Value::list([1_i64, 3, 5])]),
    )
    .unwrap();
    db.flush_blocking().unwrap();

    assert_eq!(
        db.count::<Item>(Query::filter("qty = 0")).unwrap(),
        3
    );
}

#[test]
fn bounded_delete_all_with_offset() {
    let db = seeded();

    db.delete_all::<Item>(Query::all().order("id").limit(2).offset(1))
        .unwrap();
    db.flush_blocking().unwrap();

    let remaining = ids(db.fetch_all::<Item>(Query::all().order("id")).unwrap());
    assert_eq!(remaining, vec![1, 4, 5, 6, 7, 8, 9, 10]);
}

/// A failing statement is logged and reads as empty.
#[test]
fn engine_errors_read_as_empty() {
    let db = seeded();

    let bad = Query::filter("no_such_column = ?").args(vec![Value::from(1_i64)]);
    assert!(db.fetch_all::<Item>(bad.clone()).unwrap().is_empty());
    assert!(db.fetch_first::<Item>(bad.clone()).unwrap().is_none());
    assert_eq!(db.count::<Item>(bad.clone()).unwrap(), 0);
    assert!(!db.exists::<Item>(bad.clone()).unwrap());

    db.delete_all::<Item>(bad).unwrap();
    db.flush_blocking().unwrap();
    assert_eq!(db.count::<Item>(Query::all()).unwrap(), 10);
}

#[test]
fn execute_raw_sql_with_arguments() {
    let db = seeded();

    db.execute(
        "UPDATE items SET name = :name WHERE id IN :ids",
        Arguments::named([(":name", Value::from("raw")), (":ids", Value::list([2_i64, 4]))]),
    )
    .unwrap();
    db.execute("DELETE FROM items WHERE id = 10", Arguments::None)
        .unwrap();
    db.flush_blocking().unwrap();

    let raw = db
        .fetch_all::<Item>(Query::filter("name = 'raw'").order("id"))
        .unwrap();
    assert_eq!(ids(raw), vec![2, 4]);
    assert!(!db.check::<Item>(10_i64).unwrap());
}

#[test]
fn table_name_api() {
    let db = seeded();

    assert_eq!(db.count_values("items", Query::all()).unwrap(), 10);

    db.update_values(
        "items",
        row([("id", Value::from(1_i64)), ("name", Value::from("renamed"))]),
    )
    .unwrap();
    db.insert_or_update_values(
        "items",
        row([("id", Value::from(11_i64)), ("name", Value::from("new")), ("qty", Value::from(1_i64))]),
    )
    .unwrap();
    db.update_all_values(
        "items",
        row([("qty", Value::from(-1_i64))]),
        Query::filter("id > ?").args(vec![Value::from(9_i64)]),
    )
    .unwrap();
    db.delete_values("items", 2_i64).unwrap();
    db.delete_all_values("items", Query::filter("id BETWEEN 3 AND 5"))
        .unwrap();
    db.flush_blocking().unwrap();

    let renamed = db.fetch_one_values("items", 1_i64).unwrap().unwrap();
    assert_eq!(renamed.get("name"), Some(&Value::from("renamed")));

    let negative = db
        .fetch_all_values("items", Query::filter("qty < 0").order("id"))
        .unwrap();
    let negative_ids: Vec<_> = negative.iter().filter_map(|r| r.get("id").cloned()).collect();
    assert_eq!(negative_ids, vec![Value::Int64(10), Value::Int64(11)]);

    assert_eq!(db.count_values("items", Query::all()).unwrap(), 7);
    assert!(matches!(
        db.count_values("nope", Query::all()),
        Err(Error::UnknownTable(_))
    ));
}

#[test]
fn table_name_reads_and_single_row_writes() {
    let db = seeded();

    assert!(db.check_values("items", 3_i64).unwrap());
    assert!(!db.check_values("items", 99_i64).unwrap());
    assert!(db
        .exists_values("items", Query::filter("qty > ?").args(vec![Value::from(90_i64)]))
        .unwrap());

    let first = db
        .fetch_first_values("items", Query::all().order("qty DESC"))
        .unwrap()
        .unwrap();
    assert_eq!(first.get("id"), Some(&Value::Int64(10)));

    db.update_one_values("items", row([("name", Value::from("one"))]), 1_i64)
        .unwrap();
    db.update_or_insert_values(
        "items",
        row([("id", Value::from(2_i64)), ("name", Value::from("two")), ("qty", Value::from(2_i64))]),
    )
    .unwrap();
    db.update_or_insert_values(
        "items",
        row([("id", Value::from(12_i64)), ("name", Value::from("twelve")), ("qty", Value::from(12_i64))]),
    )
    .unwrap();
    db.flush_blocking().unwrap();

    let name = |id: i64| {
        db.fetch_one_values("items", id)
            .unwrap()
            .and_then(|r| r.get("name").cloned())
    };
    assert_eq!(name(1), Some(Value::from("one")));
    assert_eq!(name(2), Some(Value::from("two")));
    assert_eq!(name(12), Some(Value::from("twelve")));
    assert!(matches!(
        db.fetch_first_values("nope", Query::all()),
        Err(Error::UnknownTable(_))
    ));
}

#[test]
fn table_name_batches_with_completion() {
    let db = seeded();
    let (tx, rx) = std::sync::mpsc::channel();

    let rows = (11..=13_i64)
        .map(|id| row([("id", Value::from(id)), ("name", Value::from("batch")), ("qty", Value::from(1_i64))]))
        .collect();
    let done = tx.clone();
    db.insert_values_batch_then("items", rows, move || {
        let _ = done.send("insert");
    })
    .unwrap();

    db.update_values_batch(
        "items",
        vec![row([("id", Value::from(11_i64)), ("name", Value::from("updated"))])],
    )
    .unwrap();
    db.insert_or_update_values_batch(
        "items",
        vec![row([("id", Value::from(14_i64)), ("name", Value::from("upsert")), ("qty", Value::from(1_i64))])],
    )
    .unwrap();
    db.update_or_insert_values_batch_then(
        "items",
        vec![row([("id", Value::from(15_i64)), ("name", Value::from("upsert")), ("qty", Value::from(1_i64))])],
        move || {
            let _ = tx.send("update_or_insert");
        },
    )
    .unwrap();
    db.flush_blocking().unwrap();

    let fired: Vec<_> = rx.try_iter().collect();
    assert_eq!(fired, vec!["insert", "update_or_insert"]);
    assert_eq!(db.count_values("items", Query::all()).unwrap(), 15);
    assert_eq!(
        db.count_values("items", Query::filter("name = 'upsert'")).unwrap(),
        2
    );
    assert!(db
        .exists_values("items", Query::filter("name = 'updated'"))
        .unwrap());
    assert!(matches!(
        db.insert_values_batch("nope", Vec::new()),
        Err(Error::UnknownTable(_))
    ));
}

/// `populate` normalises loose values through the record type before a
/// table-name write.
#[test]
fn populated_values_fill_defaults() {
    let db = seeded();

    let loose = row([("id", Value::from(20_i64)), ("name", Value::from("loose")), ("color", Value::from("red"))]);
    let populated = Item::populate(&loose);
    assert!(!populated.contains_key("color"));
    assert_eq!(populated.get("qty"), Some(&Value::Int32(0)));

    db.insert_values("items", populated).unwrap();
    db.flush_blocking().unwrap();

    let stored = db.fetch_one_values("items", 20_i64).unwrap().unwrap();
    assert_eq!(stored.get("qty"), Some(&Value::Int32(0)));
    assert_eq!(stored.get("tags"), Some(&Value::Sequence(Vec::new())));
}
