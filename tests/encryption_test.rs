//! Column Encryption Tests
//!
//! Tests for:
//! - Encrypted columns never stored in clear text
//! - Decryption across reopen with the same key
//! - Wrong key and missing key behavior

mod common;

use common::Profile;
use rowdb::{Database, DatabaseConfig, PasswordKeyProvider, Query, Value};

fn open_with_password(path: &std::path::Path, password: &str) -> Database {
    Database::open(DatabaseConfig::at(path).with_key_provider(PasswordKeyProvider::new(password)))
        .unwrap()
}

#[test]
fn encrypted_columns_are_not_stored_in_clear() {
    let (_dir, path) = common::temp_db_path("sealed.db");
    let db = open_with_password(&path, "correct horse");
    db.insert(&Profile::sample("ada")).unwrap();
    db.flush_blocking().unwrap();

    let raw = common::open_read_only(&path);
    let (ssn, avatar, labels, joined, settings): (String, Vec<u8>, String, String, String) = raw
        .query_row(
            "SELECT ssn, avatar, labels, joined, settings FROM profiles WHERE handle = 'ada'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .unwrap();

    assert!(!ssn.is_empty());
    assert!(!ssn.contains("123-45-6789"));
    // nonce (12) + ciphertext + tag (16)
    assert_eq!(avatar.len(), 12 + 6 + 16);
    assert!(!labels.contains("admin"));
    assert!(!joined.contains("2023-11-14"));
    assert_eq!(settings, r#"{"font":12,"theme":"dark"}"#);
}

#[test]
fn same_key_decrypts_after_reopen() {
    let (_dir, path) = common::temp_db_path("reopen.db");
    let profile = Profile::sample("ada");
    {
        let db = open_with_password(&path, "correct horse");
        db.insert(&profile).unwrap();
    }

    let db = open_with_password(&path, "correct horse");
    assert_eq!(db.fetch_one::<Profile>("ada").unwrap().unwrap(), profile);
}

/// With the wrong key the row still loads; only encrypted columns come back
/// empty.
#[test]
fn wrong_key_yields_empty_encrypted_columns() {
    let (_dir, path) = common::temp_db_path("wrong.db");
    {
        let db = open_with_password(&path, "correct horse");
        db.insert(&Profile::sample("ada")).unwrap();
    }

    let db = open_with_password(&path, "battery staple");
    let fetched = db.fetch_one::<Profile>("ada").unwrap().unwrap();
    assert_eq!(fetched.ssn, "");
    assert!(fetched.avatar.is_empty());
    assert!(fetched.labels.is_empty());
    assert_eq!(fetched.karma, 9_000_000_000);
    assert_eq!(fetched.settings.get("theme"), Some(&Value::from("dark")));
}

/// Without a key provider encrypted columns are written as NULL rather than
/// clear text.
#[test]
fn missing_key_writes_null() {
    let db = Database::open_in_memory().unwrap();
    db.insert(&Profile::sample("ada")).unwrap();
    db.flush_blocking().unwrap();

    let values = db.fetch_one_values("profiles", "ada").unwrap().unwrap();
    assert_eq!(values.get("ssn"), Some(&Value::Null));
    assert_eq!(values.get("avatar"), Some(&Value::Null));
    assert_eq!(values.get("labels"), Some(&Value::Null));
    assert_eq!(values.get("joined"), Some(&Value::Null));
    assert_eq!(values.get("verified"), Some(&Value::Bool(true)));
}

/// Encrypted columns are compared on ciphertext, so equality conditions on
/// them match nothing.
#[test]
fn conditions_on_encrypted_columns_do_not_match_plaintext() {
    let db = common::open_encrypted();
    db.insert(&Profile::sample("ada")).unwrap();
    db.flush_blocking().unwrap();

    let query = Query::filter("ssn = ?").args(vec![Value::from("123-45-6789")]);
    assert_eq!(db.count::<Profile>(query).unwrap(), 0);
    assert_eq!(db.count::<Profile>(Query::all()).unwrap(), 1);
}
