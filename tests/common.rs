#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OpenFlags};
use rowdb::crypto::EnvKeyProvider;
use rowdb::types::row;
use rowdb::{Database, DatabaseConfig, Field, Record, RowValues, Value};

pub fn test_key() -> [u8; 32] {
    [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07,
        0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
        0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17,
        0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e, 0x1f,
    ]
}

pub fn temp_db_path(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    (dir, path)
}

/// In-memory database with the test key configured.
pub fn open_encrypted() -> Database {
    Database::open(DatabaseConfig::in_memory().with_key_provider(EnvKeyProvider::from_key(test_key())))
        .expect("open database")
}

pub fn open_read_only(path: &Path) -> Connection {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .expect("open read-only connection")
}

pub fn trigger_names(path: &Path) -> Vec<String> {
    let conn = open_read_only(path);
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'trigger' ORDER BY name")
        .expect("prepare");
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("collect");
    names
}

pub async fn eventually<T>(
    timeout: Duration,
    interval: Duration,
    mut f: impl FnMut() -> Option<T>,
) -> T {
    let start = std::time::Instant::now();
    loop {
        if let Some(v) = f() {
            return v;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(interval).await;
    }
}

pub fn at(secs: i64, millis: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, millis * 1_000_000)
        .single()
        .expect("valid timestamp")
}

// =============================================================================
// Sample Records
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub qty: i32,
    pub tags: Vec<String>,
}

impl Item {
    pub fn new(id: i64, name: &str, qty: i32) -> Self {
        Self {
            id,
            name: name.to_string(),
            qty,
            tags: Vec::new(),
        }
    }

    pub fn tagged(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

impl Record for Item {
    fn table() -> &'static str {
        "items"
    }

    fn primary_key() -> &'static str {
        "id"
    }

    fn fields() -> Vec<Field> {
        vec![
            Field::of::<i64>("id"),
            Field::of::<String>("name"),
            Field::of::<i32>("qty"),
            Field::of::<Vec<String>>("tags"),
        ]
    }

    fn values(&self) -> RowValues {
        row([
            ("id", Value::from(self.id)),
            ("name", Value::from(self.name.as_str())),
            ("qty", Value::from(self.qty)),
            ("tags", Value::list(self.tags.iter().map(String::as_str))),
        ])
    }

    fn create(values: &RowValues) -> Self {
        Self {
            id: values.get("id").and_then(Value::as_i64).unwrap_or_default(),
            name: values
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            qty: values
                .get("qty")
                .and_then(Value::as_i64)
                .unwrap_or_default() as i32,
            tags: values
                .get("tags")
                .and_then(Value::as_sequence)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// A record touching every semantic type, keyed by a string, with encrypted
/// text, sequence, temporal and binary columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub handle: String,
    pub verified: bool,
    pub level: i8,
    pub rank: i16,
    pub score: i32,
    pub karma: i64,
    pub visits: usize,
    pub ratio: f32,
    pub balance: f64,
    pub labels: Vec<String>,
    pub settings: BTreeMap<String, Value>,
    pub joined: DateTime<Utc>,
    pub avatar: Vec<u8>,
    pub ssn: String,
    pub nickname: Option<String>,
}

impl Profile {
    pub fn sample(handle: &str) -> Self {
        let mut settings = BTreeMap::new();
        settings.insert("theme".to_string(), Value::from("dark"));
        settings.insert("font".to_string(), Value::from(12_i64));

        Self {
            handle: handle.to_string(),
            verified: true,
            level: -3,
            rank: 1200,
            score: 70_000,
            karma: 9_000_000_000,
            visits: 42,
            ratio: 0.5,
            balance: 1234.25,
            labels: vec!["admin".to_string(), "beta".to_string()],
            settings,
            joined: at(1_700_000_000, 123),
            avatar: vec![0x89, 0x50, 0x4e, 0x47, 0x00, 0xff],
            ssn: "123-45-6789".to_string(),
            nickname: None,
        }
    }
}

impl Record for Profile {
    fn table() -> &'static str {
        "profiles"
    }

    fn primary_key() -> &'static str {
        "handle"
    }

    fn fields() -> Vec<Field> {
        vec![
            Field::of::<bool>("verified"),
            Field::of::<i8>("level"),
            Field::of::<i16>("rank"),
            Field::of::<i32>("score"),
            Field::of::<i64>("karma"),
            Field::of::<usize>("visits"),
            Field::of::<f32>("ratio"),
            Field::of::<f64>("balance"),
            Field::of::<Vec<String>>("labels"),
            Field::of::<BTreeMap<String, Value>>("settings"),
            Field::of::<DateTime<Utc>>("joined"),
            Field::of::<Vec<u8>>("avatar"),
            Field::of::<String>("ssn"),
            Field::of::<Option<String>>("nickname"),
            Field::of::<String>("handle"),
        ]
    }

    fn encrypted_columns() -> &'static [&'static str] {
        &["ssn", "avatar", "labels", "joined"]
    }

    fn values(&self) -> RowValues {
        row([
            ("handle", Value::from(self.handle.as_str())),
            ("verified", Value::from(self.verified)),
            ("level", Value::from(self.level)),
            ("rank", Value::from(self.rank)),
            ("score", Value::from(self.score)),
            ("karma", Value::from(self.karma)),
            ("visits", Value::Int(self.visits as i64)),
            ("ratio", Value::from(self.ratio)),
            ("balance", Value::from(self.balance)),
            ("labels", Value::list(self.labels.iter().map(String::as_str))),
            ("settings", Value::from(self.settings.clone())),
            ("joined", Value::from(self.joined)),
            ("avatar", Value::from(self.avatar.clone())),
            ("ssn", Value::from(self.ssn.as_str())),
            ("nickname", Value::from(self.nickname.clone())),
        ])
    }

    fn create(values: &RowValues) -> Self {
        let text = |name: &str| {
            values
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let int = |name: &str| values.get(name).and_then(Value::as_i64).unwrap_or_default();

        Self {
            handle: text("handle").unwrap_or_default(),
            verified: values.get("verified").and_then(Value::as_bool).unwrap_or_default(),
            level: int("level") as i8,
            rank: int("rank") as i16,
            score: int("score") as i32,
            karma: int("karma"),
            visits: int("visits") as usize,
            ratio: values.get("ratio").and_then(Value::as_f64).unwrap_or_default() as f32,
            balance: values.get("balance").and_then(Value::as_f64).unwrap_or_default(),
            labels: values
                .get("labels")
                .and_then(Value::as_sequence)
                .map(|l| l.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default(),
            settings: values
                .get("settings")
                .and_then(Value::as_mapping)
                .cloned()
                .unwrap_or_default(),
            joined: values
                .get("joined")
                .and_then(Value::as_datetime)
                .unwrap_or_default(),
            avatar: values
                .get("avatar")
                .and_then(Value::as_bytes)
                .map(<[u8]>::to_vec)
                .unwrap_or_default(),
            ssn: text("ssn").unwrap_or_default(),
            nickname: text("nickname"),
        }
    }
}
