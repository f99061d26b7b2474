//! # Value Codec
//!
//! Converts between SQLite's native column values and [`Value`].
//!
//! Binding and decoding are both driven by the *column's* semantic type, not
//! by the value's own variant:
//!
//! | Semantic type | Bound as | Notes |
//! |---------------|----------|-------|
//! | `Bool`, `Int8`..`Int` | `INTEGER` | any integer-family value is accepted |
//! | `Float`, `Double` | `REAL` | integers widen |
//! | `String` | `TEXT` | base64 of the sealed bytes when encrypted |
//! | `Sequence`, `Mapping` | `TEXT` | JSON, then sealed when encrypted |
//! | `Temporal` | `TEXT` | [`TemporalFormat`], then sealed when encrypted |
//! | `Binary` | `BLOB` | sealed bytes when encrypted |
//!
//! A value whose shape does not fit the column is bound as `NULL` and logged.
//! Decoding never fails: unreadable stored values decode to `Value::Null`
//! (or an empty string / blob for encrypted columns that fail to open) and are
//! logged at `warn`.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use tracing::{error, warn};

use crate::crypto::ColumnCryptor;
use crate::error::{Error, Result};
use crate::schema::Column;
use crate::types::{SemanticType, Value};

// =============================================================================
// Temporal Format
// =============================================================================

/// How temporal values are rendered to and parsed from text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TemporalFormat {
    /// RFC 3339 with millisecond fractional seconds and a `Z` suffix,
    /// e.g. `2024-03-01T12:30:45.123Z`.
    #[default]
    Iso8601,
    /// A chrono `strftime`-style pattern, interpreted as UTC.
    Pattern(String),
}

impl TemporalFormat {
    pub fn format(&self, value: &DateTime<Utc>) -> String {
        match self {
            TemporalFormat::Iso8601 => value.to_rfc3339_opts(SecondsFormat::Millis, true),
            TemporalFormat::Pattern(pattern) => value.format(pattern).to_string(),
        }
    }

    /// Parses text produced by [`TemporalFormat::format`].
    ///
    /// A pattern without a time component parses as midnight UTC.
    pub fn parse(&self, text: &str) -> Result<DateTime<Utc>> {
        match self {
            TemporalFormat::Iso8601 => DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| Error::Temporal(format!("'{}': {}", text, e))),
            TemporalFormat::Pattern(pattern) => {
                let naive = NaiveDateTime::parse_from_str(text, pattern).or_else(|e| {
                    NaiveDate::parse_from_str(text, pattern)
                        .ok()
                        .and_then(|date| date.and_hms_opt(0, 0, 0))
                        .ok_or_else(|| Error::Temporal(format!("'{}' ({}): {}", text, pattern, e)))
                })?;
                Ok(Utc.from_utc_datetime(&naive))
            }
        }
    }
}

// =============================================================================
// Structured Text (JSON)
// =============================================================================

/// Renders a value as JSON for storage in a sequence or mapping column.
///
/// Temporal values nested inside collections become formatted strings and
/// binary values become base64 strings; non-finite floats become `null`.
pub fn to_json(value: &Value, temporal: &TemporalFormat) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int8(v) => Json::from(*v),
        Value::Int16(v) => Json::from(*v),
        Value::Int32(v) => Json::from(*v),
        Value::Int64(v) | Value::Int(v) => Json::from(*v),
        Value::Float(v) => serde_json::Number::from_f64(f64::from(*v))
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Double(v) => serde_json::Number::from_f64(*v)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::String(s) => Json::String(s.clone()),
        Value::Sequence(items) => {
            Json::Array(items.iter().map(|item| to_json(item, temporal)).collect())
        }
        Value::Mapping(map) => Json::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), to_json(v, temporal)))
                .collect(),
        ),
        Value::Temporal(t) => Json::String(temporal.format(t)),
        Value::Binary(b) => Json::String(BASE64.encode(b)),
    }
}

/// Converts parsed JSON back into a [`Value`].
///
/// Integers become `Int64`, other numbers `Double`.
pub fn from_json(json: serde_json::Value) -> Value {
    use serde_json::Value as Json;

    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int64(i),
            None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::Sequence(items.into_iter().map(from_json).collect()),
        Json::Object(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (k, from_json(v)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Per-connection codec: the temporal format plus the optional column cryptor.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    temporal: TemporalFormat,
    cryptor: Option<ColumnCryptor>,
}

impl Codec {
    pub fn new(temporal: TemporalFormat, cryptor: Option<ColumnCryptor>) -> Self {
        Self { temporal, cryptor }
    }

    // -------------------------------------------------------------------------
    // Binding
    // -------------------------------------------------------------------------

    /// Encodes `value` for binding into `column` of `table`.
    pub fn encode_column(&self, table: &str, column: &Column, value: &Value) -> SqlValue {
        if value.is_null() {
            return SqlValue::Null;
        }

        let encoded = match column.semantic_type {
            SemanticType::Bool => value.as_bool().map(|b| SqlValue::Integer(i64::from(b))),
            SemanticType::Int8
            | SemanticType::Int16
            | SemanticType::Int32
            | SemanticType::Int64
            | SemanticType::Int => value.as_i64().map(SqlValue::Integer),
            SemanticType::Float | SemanticType::Double => value.as_f64().map(SqlValue::Real),
            SemanticType::String => match value {
                Value::String(s) => return self.bind_text(table, column, s.clone()),
                _ => None,
            },
            SemanticType::Sequence => match value {
                Value::Sequence(_) => return self.bind_text(table, column, self.json_text(value)),
                _ => None,
            },
            SemanticType::Mapping => match value {
                Value::Mapping(_) => return self.bind_text(table, column, self.json_text(value)),
                _ => None,
            },
            SemanticType::Temporal => match value {
                Value::Temporal(t) => return self.bind_text(table, column, self.temporal.format(t)),
                _ => None,
            },
            SemanticType::Binary => match value {
                Value::Binary(b) if column.encrypted => {
                    return self.seal_blob(table, &column.name, b);
                }
                Value::Binary(b) => Some(SqlValue::Blob(b.clone())),
                _ => None,
            },
        };

        encoded.unwrap_or_else(|| {
            warn!(
                table,
                column = %column.name,
                expected = %column.semantic_type,
                value = %value,
                "value does not fit column type, binding NULL"
            );
            SqlValue::Null
        })
    }

    /// Encodes a condition argument, which has no column to steer it.
    ///
    /// Sequences reaching this point were not expanded by the refactorer and
    /// are bound as JSON text.
    pub fn encode_argument(&self, value: &Value) -> SqlValue {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Int8(_) | Value::Int16(_) | Value::Int32(_) | Value::Int64(_) | Value::Int(_) => {
                SqlValue::Integer(value.as_i64().unwrap_or_default())
            }
            Value::Float(v) => SqlValue::Real(f64::from(*v)),
            Value::Double(v) => SqlValue::Real(*v),
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Sequence(_) | Value::Mapping(_) => SqlValue::Text(self.json_text(value)),
            Value::Temporal(t) => SqlValue::Text(self.temporal.format(t)),
            Value::Binary(b) => SqlValue::Blob(b.clone()),
        }
    }

    fn json_text(&self, value: &Value) -> String {
        to_json(value, &self.temporal).to_string()
    }

    /// Binds text, sealing it first when the column is encrypted.
    fn bind_text(&self, table: &str, column: &Column, text: String) -> SqlValue {
        if column.encrypted {
            self.seal_text(table, &column.name, &text)
        } else {
            SqlValue::Text(text)
        }
    }

    fn seal_text(&self, table: &str, column: &str, plaintext: &str) -> SqlValue {
        let Some(cryptor) = &self.cryptor else {
            error!(table, column, "encrypted column but no key provider configured, binding NULL");
            return SqlValue::Null;
        };
        match cryptor.seal_text(table, column, plaintext) {
            Ok(encoded) => SqlValue::Text(encoded),
            Err(e) => {
                error!(table, column, error = %e, "failed to encrypt column, binding NULL");
                SqlValue::Null
            }
        }
    }

    fn seal_blob(&self, table: &str, column: &str, plaintext: &[u8]) -> SqlValue {
        let Some(cryptor) = &self.cryptor else {
            error!(table, column, "encrypted column but no key provider configured, binding NULL");
            return SqlValue::Null;
        };
        match cryptor.seal(table, column, plaintext) {
            Ok(sealed) => SqlValue::Blob(sealed),
            Err(e) => {
                error!(table, column, error = %e, "failed to encrypt column, binding NULL");
                SqlValue::Null
            }
        }
    }

    // -------------------------------------------------------------------------
    // Decoding
    // -------------------------------------------------------------------------

    /// Decodes a stored value read from `column` of `table`.
    pub fn decode_column(&self, table: &str, column: &Column, raw: ValueRef<'_>) -> Value {
        if let ValueRef::Null = raw {
            return Value::Null;
        }

        let decoded = match column.semantic_type {
            SemanticType::Bool => match raw {
                ValueRef::Integer(i) => Some(Value::Bool(i != 0)),
                ValueRef::Real(f) => Some(Value::Bool(f != 0.0)),
                ValueRef::Text(t) => Some(Value::Bool(parse_bool(&String::from_utf8_lossy(t)))),
                _ => None,
            },
            ty @ (SemanticType::Int8
            | SemanticType::Int16
            | SemanticType::Int32
            | SemanticType::Int64
            | SemanticType::Int) => raw_i64(raw).map(|i| integer_value(ty, i)),
            SemanticType::Float => raw_f64(raw).map(|f| Value::Float(f as f32)),
            SemanticType::Double => raw_f64(raw).map(Value::Double),
            SemanticType::String => match raw {
                ValueRef::Text(t) => Some(Value::String(self.read_text(table, column, t))),
                ValueRef::Integer(i) => Some(Value::String(i.to_string())),
                ValueRef::Real(f) => Some(Value::String(f.to_string())),
                _ => None,
            },
            SemanticType::Sequence => match raw {
                ValueRef::Text(t) => self
                    .decode_json(&self.read_text(table, column, t))
                    .filter(Value::is_sequence)
                    .map(|v| self.narrow(v, column.element)),
                _ => None,
            },
            SemanticType::Mapping => match raw {
                ValueRef::Text(t) => self
                    .decode_json(&self.read_text(table, column, t))
                    .filter(|v| matches!(v, Value::Mapping(_)))
                    .map(|v| self.narrow(v, column.element)),
                _ => None,
            },
            SemanticType::Temporal => match raw {
                ValueRef::Text(t) => self
                    .temporal
                    .parse(&self.read_text(table, column, t))
                    .ok()
                    .map(Value::Temporal),
                _ => None,
            },
            SemanticType::Binary => match raw {
                ValueRef::Blob(b) if column.encrypted => {
                    Some(Value::Binary(self.open_blob(table, &column.name, b)))
                }
                ValueRef::Blob(b) | ValueRef::Text(b) => Some(Value::Binary(b.to_vec())),
                _ => None,
            },
        };

        decoded.unwrap_or_else(|| {
            warn!(
                table,
                column = %column.name,
                expected = %column.semantic_type,
                stored = ?raw.data_type(),
                "stored value does not decode as column type, returning NULL"
            );
            Value::Null
        })
    }

    /// Decodes a primary key delivered as text by an observer trigger.
    pub fn decode_key(&self, ty: SemanticType, text: &str) -> Value {
        let decoded = match ty {
            SemanticType::Bool => Some(Value::Bool(parse_bool(text))),
            SemanticType::Int8 => text.parse().ok().map(Value::Int8),
            SemanticType::Int16 => text.parse().ok().map(Value::Int16),
            SemanticType::Int32 => text.parse().ok().map(Value::Int32),
            SemanticType::Int64 => text.parse().ok().map(Value::Int64),
            SemanticType::Int => text.parse().ok().map(Value::Int),
            SemanticType::Float => text.parse().ok().map(Value::Float),
            SemanticType::Double => text.parse().ok().map(Value::Double),
            SemanticType::String => Some(Value::String(text.to_string())),
            SemanticType::Sequence | SemanticType::Mapping => self.decode_json(text),
            SemanticType::Temporal => self.temporal.parse(text).ok().map(Value::Temporal),
            SemanticType::Binary => Some(Value::Binary(text.as_bytes().to_vec())),
        };

        decoded.unwrap_or_else(|| {
            warn!(key = text, ty = %ty, "observer key does not parse as its type, delivering text");
            Value::String(text.to_string())
        })
    }

    fn decode_json(&self, text: &str) -> Option<Value> {
        serde_json::from_str::<serde_json::Value>(text)
            .ok()
            .map(from_json)
    }

    /// Reads stored text, opening it first when the column is encrypted.
    ///
    /// A sealed value that fails to open reads as empty text, which then
    /// decodes as `NULL` for every column type except `String`.
    fn read_text(&self, table: &str, column: &Column, stored: &[u8]) -> String {
        let text = String::from_utf8_lossy(stored);
        if column.encrypted {
            self.open_text(table, &column.name, &text)
        } else {
            text.into_owned()
        }
    }

    /// Restores the element variants of a decoded collection.
    ///
    /// JSON keeps only integers, doubles and strings, so a `Vec<i32>` reads
    /// back as `Int64`s and a `Vec<DateTime<Utc>>` as strings until narrowed
    /// to the column's element type. Nested collections are left as parsed.
    fn narrow(&self, value: Value, element: Option<SemanticType>) -> Value {
        let Some(element) = element else {
            return value;
        };
        match value {
            Value::Sequence(items) => Value::Sequence(
                items
                    .into_iter()
                    .map(|item| self.narrow_element(item, element))
                    .collect(),
            ),
            Value::Mapping(map) => Value::Mapping(
                map.into_iter()
                    .map(|(k, v)| (k, self.narrow_element(v, element)))
                    .collect(),
            ),
            other => other,
        }
    }

    fn narrow_element(&self, value: Value, ty: SemanticType) -> Value {
        if value.semantic_type() == Some(ty) {
            return value;
        }
        let narrowed = match (ty, &value) {
            (SemanticType::Bool, _) => value.as_bool().map(Value::Bool),
            (ty, _) if ty.is_integer() => value.as_i64().map(|i| integer_value(ty, i)),
            (SemanticType::Float, _) => value.as_f64().map(|f| Value::Float(f as f32)),
            (SemanticType::Double, _) => value.as_f64().map(Value::Double),
            (SemanticType::Temporal, Value::String(s)) => {
                self.temporal.parse(s).ok().map(Value::Temporal)
            }
            (SemanticType::Binary, Value::String(s)) => BASE64.decode(s).ok().map(Value::Binary),
            _ => None,
        };
        narrowed.unwrap_or(value)
    }

    fn open_text(&self, table: &str, column: &str, encoded: &str) -> String {
        let Some(cryptor) = &self.cryptor else {
            error!(table, column, "encrypted column but no key provider configured");
            return String::new();
        };
        cryptor
            .open_text(table, column, encoded)
            .unwrap_or_else(|e| {
                warn!(table, column, error = %e, "failed to decrypt column, returning empty text");
                String::new()
            })
    }

    fn open_blob(&self, table: &str, column: &str, sealed: &[u8]) -> Vec<u8> {
        let Some(cryptor) = &self.cryptor else {
            error!(table, column, "encrypted column but no key provider configured");
            return Vec::new();
        };
        cryptor.open(table, column, sealed).unwrap_or_else(|e| {
            warn!(table, column, error = %e, "failed to decrypt column, returning empty blob");
            Vec::new()
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_bool(text: &str) -> bool {
    matches!(text.trim(), "1" | "true" | "TRUE" | "True")
}

fn raw_i64(raw: ValueRef<'_>) -> Option<i64> {
    match raw {
        ValueRef::Integer(i) => Some(i),
        ValueRef::Real(f) => Some(f as i64),
        ValueRef::Text(t) => std::str::from_utf8(t).ok()?.trim().parse().ok(),
        _ => None,
    }
}

fn raw_f64(raw: ValueRef<'_>) -> Option<f64> {
    match raw {
        ValueRef::Integer(i) => Some(i as f64),
        ValueRef::Real(f) => Some(f),
        ValueRef::Text(t) => std::str::from_utf8(t).ok()?.trim().parse().ok(),
        _ => None,
    }
}

/// Narrows a stored integer to the column's width.
fn integer_value(ty: SemanticType, i: i64) -> Value {
    match ty {
        SemanticType::Int8 => Value::Int8(i as i8),
        SemanticType::Int16 => Value::Int16(i as i16),
        SemanticType::Int32 => Value::Int32(i as i32),
        SemanticType::Int => Value::Int(i),
        _ => Value::Int64(i),
    }
}
