//! # Domain Types for rowdb
//!
//! This module defines the value model shared by every other component:
//!
//! - [`SemanticType`]: the closed set of column types a record field can map to
//! - [`Affinity`]: the SQLite storage class a semantic type is persisted as
//! - [`Value`]: a dynamically-typed column or argument value (one variant per
//!   semantic type, plus `Null`)
//! - [`RowValues`]: a row as a `column name -> Value` mapping
//! - [`Arguments`] and [`Query`]: the description of a conditional statement
//! - [`ObserverEvent`]: the row change kinds observers can subscribe to
//!
//! ## Design Philosophy: A Closed Sum Type
//!
//! Binding and decoding dispatch on the column's semantic type. Modelling the
//! values as one enum means every encode/decode site is an exhaustive `match`,
//! so adding a type is a compile error everywhere it is not yet handled.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

// =============================================================================
// Semantic Types
// =============================================================================

/// The semantic type of a column, derived once per record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    /// Pointer-width integer, persisted as 64 bits.
    Int,
    Float,
    Double,
    String,
    /// Ordered collection, persisted as a JSON array.
    Sequence,
    /// String-keyed collection, persisted as a JSON object.
    Mapping,
    /// Point in time, persisted as formatted text.
    Temporal,
    /// Opaque bytes, persisted as a blob.
    Binary,
}

impl SemanticType {
    /// All semantic types, in classification precedence order.
    pub const ALL: [SemanticType; 13] = [
        SemanticType::Bool,
        SemanticType::Int8,
        SemanticType::Int16,
        SemanticType::Int32,
        SemanticType::Int64,
        SemanticType::Int,
        SemanticType::Float,
        SemanticType::Double,
        SemanticType::String,
        SemanticType::Sequence,
        SemanticType::Mapping,
        SemanticType::Temporal,
        SemanticType::Binary,
    ];

    /// Returns the storage affinity used in `CREATE TABLE`.
    pub fn affinity(self) -> Affinity {
        match self {
            SemanticType::Bool
            | SemanticType::Int8
            | SemanticType::Int16
            | SemanticType::Int32
            | SemanticType::Int64
            | SemanticType::Int => Affinity::Integer,
            SemanticType::Float | SemanticType::Double => Affinity::Real,
            SemanticType::String
            | SemanticType::Sequence
            | SemanticType::Mapping
            | SemanticType::Temporal => Affinity::Text,
            SemanticType::Binary => Affinity::Blob,
        }
    }

    /// The type tag passed to the observer function alongside a key value.
    pub fn tag(self) -> &'static str {
        match self {
            SemanticType::Bool => "Bool",
            SemanticType::Int8 => "Int8",
            SemanticType::Int16 => "Int16",
            SemanticType::Int32 => "Int32",
            SemanticType::Int64 => "Int64",
            SemanticType::Int => "Int",
            SemanticType::Float => "Float",
            SemanticType::Double => "Double",
            SemanticType::String => "String",
            SemanticType::Sequence => "Sequence",
            SemanticType::Mapping => "Mapping",
            SemanticType::Temporal => "Temporal",
            SemanticType::Binary => "Binary",
        }
    }

    /// Parses a tag produced by [`SemanticType::tag`].
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.tag() == tag)
    }

    /// True for the integer family (including `Bool`).
    pub fn is_integer(self) -> bool {
        self.affinity() == Affinity::Integer
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// SQLite storage affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Affinity {
    Integer,
    Real,
    Text,
    Blob,
}

impl Affinity {
    /// The type name used in DDL.
    pub fn as_sql(self) -> &'static str {
        match self {
            Affinity::Integer => "INTEGER",
            Affinity::Real => "REAL",
            Affinity::Text => "TEXT",
            Affinity::Blob => "BLOB",
        }
    }
}

// =============================================================================
// Values
// =============================================================================

/// A dynamically-typed value: a decoded column, a field extracted from a
/// record, or a bind argument.
///
/// `Sequence` doubles as the "list argument" that the parameter refactorer
/// expands into an `IN (...)` placeholder group.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Int(i64),
    Float(f32),
    Double(f64),
    String(String),
    Sequence(Vec<Value>),
    Mapping(BTreeMap<String, Value>),
    Temporal(DateTime<Utc>),
    Binary(Vec<u8>),
}

impl Value {
    /// Builds a `Sequence` from anything convertible to values.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::Sequence(items.into_iter().map(Into::into).collect())
    }

    /// The semantic type this value naturally encodes as, if any.
    pub fn semantic_type(&self) -> Option<SemanticType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(SemanticType::Bool),
            Value::Int8(_) => Some(SemanticType::Int8),
            Value::Int16(_) => Some(SemanticType::Int16),
            Value::Int32(_) => Some(SemanticType::Int32),
            Value::Int64(_) => Some(SemanticType::Int64),
            Value::Int(_) => Some(SemanticType::Int),
            Value::Float(_) => Some(SemanticType::Float),
            Value::Double(_) => Some(SemanticType::Double),
            Value::String(_) => Some(SemanticType::String),
            Value::Sequence(_) => Some(SemanticType::Sequence),
            Value::Mapping(_) => Some(SemanticType::Mapping),
            Value::Temporal(_) => Some(SemanticType::Temporal),
            Value::Binary(_) => Some(SemanticType::Binary),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, Value::Sequence(_))
    }

    /// Returns the value as a 64-bit integer if it belongs to the integer family.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int8(v) => Some(i64::from(*v)),
            Value::Int16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) | Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as a float if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            other => other.as_i64().map(|v| v != 0),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Temporal(t) => Some(*t),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<isize> for Value {
    fn from(v: isize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Sequence(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Mapping(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Temporal(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int8(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) | Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => f.write_str(v),
            Value::Sequence(items) => write!(f, "[{} items]", items.len()),
            Value::Mapping(map) => write!(f, "{{{} entries}}", map.len()),
            Value::Temporal(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Binary(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

// =============================================================================
// Rows
// =============================================================================

/// A row as a mapping from column name to value.
///
/// `BTreeMap` keeps iteration deterministic, which matters for logging and
/// for named-argument expansion order.
pub type RowValues = BTreeMap<String, Value>;

/// Builds a [`RowValues`] from `(name, value)` pairs.
///
/// ```rust
/// use rowdb::types::{row, Value};
///
/// let values = row([("id", Value::from(1_i64)), ("name", Value::from("ada"))]);
/// assert_eq!(values.len(), 2);
/// ```
pub fn row<'a, I>(pairs: I) -> RowValues
where
    I: IntoIterator<Item = (&'a str, Value)>,
{
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

// =============================================================================
// Query Description
// =============================================================================

/// Bind arguments for a condition: none, positional (`?`) or named (`:name`).
///
/// Named argument keys are stored without their sigil; `:id`, `@id` and `$id`
/// placeholders all bind from the key `id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Arguments {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(BTreeMap<String, Value>),
}

impl Arguments {
    /// Builds named arguments, stripping any leading sigil from the keys.
    pub fn named<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        Arguments::Named(
            pairs
                .into_iter()
                .map(|(name, value)| (strip_sigil(name).to_string(), value))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Arguments::None => true,
            Arguments::Positional(args) => args.is_empty(),
            Arguments::Named(args) => args.is_empty(),
        }
    }
}

impl From<Vec<Value>> for Arguments {
    fn from(args: Vec<Value>) -> Self {
        Arguments::Positional(args)
    }
}

impl From<BTreeMap<String, Value>> for Arguments {
    fn from(args: BTreeMap<String, Value>) -> Self {
        Arguments::Named(
            args.into_iter()
                .map(|(name, value)| (strip_sigil(&name).to_string(), value))
                .collect(),
        )
    }
}

/// Removes a leading `:`, `@` or `$` from a parameter name.
pub fn strip_sigil(name: &str) -> &str {
    name.strip_prefix([':', '@', '$']).unwrap_or(name)
}

/// A conditional statement description: `WHERE`, `ORDER BY`, `LIMIT`, `OFFSET`
/// plus the bind arguments for the condition.
///
/// A `limit` of zero means "no limit"; `offset` is only emitted when `limit`
/// is also non-zero.
///
/// # Example
///
/// ```rust
/// use rowdb::types::{Query, Value};
///
/// let query = Query::filter("age > ? AND city IN ?")
///     .args(vec![Value::from(18_i64), Value::list(["Oslo", "Lima"])])
///     .order("age DESC")
///     .limit(10)
///     .offset(20);
/// assert_eq!(query.limit, 10);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub condition: String,
    pub arguments: Arguments,
    pub order: String,
    pub limit: usize,
    pub offset: usize,
}

impl Query {
    /// A query matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// A query with the given condition and no arguments yet.
    pub fn filter(condition: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            ..Self::default()
        }
    }

    /// Sets positional arguments.
    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.arguments = Arguments::Positional(args);
        self
    }

    /// Sets named arguments.
    pub fn named<'a, I>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        self.arguments = Arguments::named(pairs);
        self
    }

    pub fn arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = order.into();
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

// =============================================================================
// Observer Events
// =============================================================================

/// The row change kinds an observer can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverEvent {
    Insert,
    Update,
    Delete,
}

impl ObserverEvent {
    pub const ALL: [ObserverEvent; 3] = [
        ObserverEvent::Insert,
        ObserverEvent::Update,
        ObserverEvent::Delete,
    ];

    /// The SQL keyword used in `AFTER <event>`.
    pub fn as_sql(self) -> &'static str {
        match self {
            ObserverEvent::Insert => "INSERT",
            ObserverEvent::Update => "UPDATE",
            ObserverEvent::Delete => "DELETE",
        }
    }

    /// The trigger row alias carrying the changed row: the new row for
    /// inserts and updates, the old row for deletes.
    pub fn row_alias(self) -> &'static str {
        match self {
            ObserverEvent::Insert | ObserverEvent::Update => "NEW",
            ObserverEvent::Delete => "OLD",
        }
    }

    pub fn from_sql(keyword: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.as_sql() == keyword)
    }
}

impl fmt::Display for ObserverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affinity_mapping() {
        assert_eq!(SemanticType::Bool.affinity(), Affinity::Integer);
        assert_eq!(SemanticType::Int.affinity(), Affinity::Integer);
        assert_eq!(SemanticType::Float.affinity(), Affinity::Real);
        assert_eq!(SemanticType::Sequence.affinity(), Affinity::Text);
        assert_eq!(SemanticType::Temporal.affinity(), Affinity::Text);
        assert_eq!(SemanticType::Binary.affinity(), Affinity::Blob);
        assert_eq!(Affinity::Blob.as_sql(), "BLOB");
    }

    #[test]
    fn test_tag_roundtrip() {
        for ty in SemanticType::ALL {
            assert_eq!(SemanticType::from_tag(ty.tag()), Some(ty));
        }
        assert_eq!(SemanticType::from_tag("Uuid"), None);
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(5_i32), Value::Int32(5));
        assert_eq!(Value::from(5_isize), Value::Int(5));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(vec![1_u8, 2]), Value::Binary(vec![1, 2]));
        assert_eq!(
            Value::list([1_i64, 2]),
            Value::Sequence(vec![Value::Int64(1), Value::Int64(2)])
        );
        assert_eq!(Value::Int16(-3).as_i64(), Some(-3));
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::Int64(0).as_bool(), Some(false));
        assert_eq!(Value::from("x").as_i64(), None);
    }

    #[test]
    fn test_named_arguments_strip_sigils() {
        let args = Arguments::named([(":a", Value::from(1_i64)), ("@b", Value::from(2_i64))]);
        match args {
            Arguments::Named(map) => {
                assert!(map.contains_key("a"));
                assert!(map.contains_key("b"));
            }
            other => panic!("unexpected arguments: {:?}", other),
        }
        assert_eq!(strip_sigil("$c"), "c");
        assert_eq!(strip_sigil("plain"), "plain");
    }

    #[test]
    fn test_observer_event_aliases() {
        assert_eq!(ObserverEvent::Insert.row_alias(), "NEW");
        assert_eq!(ObserverEvent::Update.row_alias(), "NEW");
        assert_eq!(ObserverEvent::Delete.row_alias(), "OLD");
        assert_eq!(ObserverEvent::from_sql("DELETE"), Some(ObserverEvent::Delete));
        assert_eq!(ObserverEvent::from_sql("delete"), None);
    }
}
