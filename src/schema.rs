//! # Record Schemas
//!
//! This module maps Rust record types to tables. A record type describes
//! itself through the [`Record`] trait: its table, primary key, field
//! descriptors and which columns are encrypted. From that description a
//! [`Schema`] is derived once and cached in the [`SchemaRegistry`] for the
//! lifetime of the connection.
//!
//! ## Column Derivation
//!
//! ```text
//!   Record::fields()           Schema::columns
//!   ┌──────────────────┐       ┌──────────────────────────────┐
//!   │ name    String   │       │ id      Int64    INTEGER  PK │  <- pinned first
//!   │ id      i64      │  ──►  │ name    String   TEXT        │
//!   │ cache   Foo      │       │ tags    Sequence TEXT        │
//!   │ tags    Vec<str> │       └──────────────────────────────┘
//!   └──────────────────┘         (`cache` skipped: unsupported)
//! ```
//!
//! - The primary-key field is pinned first; the others keep declaration order.
//! - Fields whose type has no semantic type are skipped without error. They
//!   never reach the table and never round-trip.
//! - If the primary key does not survive derivation, resolution fails with
//!   [`Error::PrimaryKey`]. This is a bug in the record definition.

use std::any::type_name;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{Affinity, RowValues, SemanticType};

// =============================================================================
// Record Trait
// =============================================================================

/// A typed record that maps to one table row.
///
/// # Example
///
/// ```rust
/// use rowdb::schema::{Field, Record};
/// use rowdb::types::{row, RowValues, Value};
///
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// impl Record for User {
///     fn table() -> &'static str { "users" }
///     fn primary_key() -> &'static str { "id" }
///     fn fields() -> Vec<Field> {
///         vec![Field::of::<i64>("id"), Field::of::<String>("name")]
///     }
///     fn values(&self) -> RowValues {
///         row([("id", Value::from(self.id)), ("name", Value::from(self.name.as_str()))])
///     }
///     fn create(values: &RowValues) -> Self {
///         User {
///             id: values.get("id").and_then(Value::as_i64).unwrap_or_default(),
///             name: values.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
///         }
///     }
/// }
/// ```
///
/// # Rust Pattern: Associated Functions Instead of Reflection
///
/// `table()`, `primary_key()` and `fields()` take no `self`: the schema is a
/// property of the type, so it can be derived before any instance exists.
pub trait Record: Sized {
    /// Table name.
    fn table() -> &'static str;

    /// Name of the primary-key field.
    fn primary_key() -> &'static str;

    /// Field descriptors in declaration order.
    fn fields() -> Vec<Field>;

    /// Names of the columns stored encrypted.
    fn encrypted_columns() -> &'static [&'static str] {
        &[]
    }

    /// Extracts the record's current field values.
    fn values(&self) -> RowValues;

    /// Builds a record from decoded row values.
    ///
    /// Missing columns should fall back to defaults; rows always carry every
    /// schema column, but projections and `NULL`s do not.
    fn create(values: &RowValues) -> Self;

    /// The record's values restricted to `names`.
    fn values_for(&self, names: &[&str]) -> RowValues {
        let mut values = self.values();
        values.retain(|name, _| names.contains(&name.as_str()));
        values
    }

    /// The record's values without `names`.
    fn values_except(&self, names: &[&str]) -> RowValues {
        let mut values = self.values();
        values.retain(|name, _| !names.contains(&name.as_str()));
        values
    }

    /// Normalises loose row values through the record type: the values a
    /// record built from `values` would write, with defaults filled in and
    /// unknown columns dropped.
    fn populate(values: &RowValues) -> RowValues {
        Self::create(values).values()
    }
}

// =============================================================================
// Field Descriptors
// =============================================================================

/// Whether a field maps to a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Known(SemanticType),
    /// No semantic type fits; the field is skipped.
    Unsupported,
}

/// A record field: its name and the semantic type it was classified as.
///
/// Sequence and mapping fields may also carry the semantic type of their
/// elements, which decoding uses to restore element variants that JSON does
/// not preserve (narrow integers, `f32`, temporal and binary values).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub element: Option<SemanticType>,
}

impl Field {
    /// A field with an explicit semantic type.
    pub fn new(name: impl Into<String>, ty: SemanticType) -> Self {
        Self {
            name: name.into(),
            ty: FieldType::Known(ty),
            element: None,
        }
    }

    /// A field classified from its Rust type.
    ///
    /// `Option<T>` classifies as `T`. See [`classify_type_name`] for the
    /// recognised shapes.
    pub fn of<T: ?Sized>(name: impl Into<String>) -> Self {
        let type_name = type_name::<T>();
        Self {
            name: name.into(),
            ty: classify_type_name(type_name)
                .map(FieldType::Known)
                .unwrap_or(FieldType::Unsupported),
            element: classify_element_type_name(type_name),
        }
    }

    /// A field that will never be stored.
    pub fn unsupported(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: FieldType::Unsupported,
            element: None,
        }
    }

    /// Sets the element type of a sequence or mapping field.
    pub fn with_element(mut self, element: SemanticType) -> Self {
        self.element = Some(element);
        self
    }
}

/// Splits `Base<Generics>` into its last path segment and generic list,
/// unwrapping `Option`.
fn split_type_name(name: &str) -> (&str, Option<&str>) {
    let name = name.trim().trim_start_matches('&');

    let (base, generics) = match name.find('<') {
        Some(open) if name.ends_with('>') => (&name[..open], Some(&name[open + 1..name.len() - 1])),
        _ => (name, None),
    };
    match (last_segment(base), generics) {
        ("Option", Some(inner)) => split_type_name(inner),
        split => split,
    }
}

/// Classifies a Rust type name into a semantic type.
///
/// Checks run in a fixed order: `bool`, the fixed-width integers, the
/// pointer-width integers, floats, strings, `Vec<u8>` (binary), other
/// sequence containers, string-keyed maps, then `DateTime`. Anything else
/// returns `None`.
///
/// `Vec<u8>` is tested ahead of the generic sequence shapes so that byte
/// vectors persist as blobs rather than JSON arrays of numbers.
pub fn classify_type_name(name: &str) -> Option<SemanticType> {
    let (base, generics) = split_type_name(name);

    let ty = match (base, generics) {
        ("bool", None) => SemanticType::Bool,
        ("i8", None) => SemanticType::Int8,
        ("i16", None) => SemanticType::Int16,
        ("i32", None) => SemanticType::Int32,
        ("i64", None) => SemanticType::Int64,
        ("isize" | "usize", None) => SemanticType::Int,
        ("f32", None) => SemanticType::Float,
        ("f64", None) => SemanticType::Double,
        ("str" | "String", None) => SemanticType::String,
        ("Vec", Some(inner)) if last_segment(inner.trim()) == "u8" => SemanticType::Binary,
        ("Vec" | "VecDeque", Some(_)) => SemanticType::Sequence,
        ("HashMap" | "BTreeMap", Some(inner)) => {
            let key = first_generic(inner);
            if matches!(last_segment(key.trim_start_matches('&')), "String" | "str") {
                SemanticType::Mapping
            } else {
                return None;
            }
        }
        ("DateTime", Some(_)) => SemanticType::Temporal,
        _ => return None,
    };
    Some(ty)
}

/// Classifies the element type of a sequence, or the value type of a
/// string-keyed map. `None` for every other shape.
pub fn classify_element_type_name(name: &str) -> Option<SemanticType> {
    let inner = split_type_name(name).1?;

    match classify_type_name(name)? {
        SemanticType::Sequence => classify_type_name(inner),
        SemanticType::Mapping => {
            let key = first_generic(inner);
            let value = inner[key.len()..].trim_start().trim_start_matches(',');
            classify_type_name(value)
        }
        _ => None,
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

/// The first argument of a generic list, respecting nested `<...>`.
fn first_generic(generics: &str) -> &str {
    let mut depth = 0usize;
    for (i, c) in generics.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return generics[..i].trim(),
            _ => {}
        }
    }
    generics.trim()
}

// =============================================================================
// Columns and Schemas
// =============================================================================

/// One table column. Immutable once derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub semantic_type: SemanticType,
    pub affinity: Affinity,
    pub encrypted: bool,
    /// Element type of a sequence or mapping column, when known.
    pub element: Option<SemanticType>,
}

impl Column {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType, encrypted: bool) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            affinity: semantic_type.affinity(),
            encrypted,
            element: None,
        }
    }

    pub fn with_element(mut self, element: Option<SemanticType>) -> Self {
        self.element = element;
        self
    }
}

/// The derived column layout of one table.
#[derive(Debug, Clone)]
pub struct Schema {
    table: String,
    primary_key: String,
    columns: Vec<Column>,
    by_name: HashMap<String, usize>,
}

impl Schema {
    /// Derives a schema from field descriptors.
    ///
    /// # Errors
    ///
    /// [`Error::PrimaryKey`] if `primary_key` is not a supported field.
    pub fn new(
        table: impl Into<String>,
        primary_key: impl Into<String>,
        fields: Vec<Field>,
        encrypted: &[&str],
    ) -> Result<Self> {
        let table = table.into();
        let primary_key = primary_key.into();

        let mut columns: Vec<Column> = Vec::with_capacity(fields.len());
        let mut key_column = None;

        for field in fields {
            let FieldType::Known(ty) = field.ty else {
                debug!(table = %table, field = %field.name, "skipping unsupported field");
                continue;
            };
            let is_key = field.name == primary_key;
            if (is_key && key_column.is_some()) || columns.iter().any(|c| c.name == field.name) {
                continue;
            }
            let is_encrypted = encrypted.contains(&field.name.as_str());
            let column = Column::new(field.name, ty, is_encrypted).with_element(field.element);
            if is_key {
                key_column = Some(column);
            } else {
                columns.push(column);
            }
        }

        let Some(key_column) = key_column else {
            return Err(Error::PrimaryKey { table, key: primary_key });
        };
        columns.insert(0, key_column);

        let by_name = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();

        Ok(Self {
            table,
            primary_key,
            columns,
            by_name,
        })
    }

    /// Derives the schema of a [`Record`] type.
    pub fn for_record<R: Record>() -> Result<Self> {
        Self::new(R::table(), R::primary_key(), R::fields(), R::encrypted_columns())
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Columns in table order; the primary key is always first.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.by_name.get(name).map(|&i| &self.columns[i])
    }

    pub fn key_column(&self) -> &Column {
        &self.columns[0]
    }
}

// =============================================================================
// Schema Registry
// =============================================================================

/// Memoizes schemas by table name.
///
/// # Rust Pattern: Read-Mostly Cache
///
/// Every operation resolves its schema, but each table is only derived once.
/// A `parking_lot::RwLock` lets lookups proceed in parallel; the write lock is
/// taken only on first resolution.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, Arc<Schema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached schema for `R`, deriving it on first use.
    ///
    /// Idempotent: repeated calls return the same `Arc`.
    pub fn resolve<R: Record>(&self) -> Result<Arc<Schema>> {
        if let Some(schema) = self.schemas.read().get(R::table()) {
            return Ok(Arc::clone(schema));
        }

        let schema = Schema::for_record::<R>()?;
        Ok(self.register(schema))
    }

    /// Caches `schema` unless one is already registered for its table, and
    /// returns the cached entry.
    pub fn register(&self, schema: Schema) -> Arc<Schema> {
        let mut schemas = self.schemas.write();
        let entry = schemas
            .entry(schema.table.clone())
            .or_insert_with(|| {
                debug!(table = %schema.table, columns = schema.columns.len(), "registered schema");
                Arc::new(schema)
            });
        Arc::clone(entry)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.schemas.read().contains_key(table)
    }

    /// Looks up a schema by table name.
    pub fn get(&self, table: &str) -> Result<Arc<Schema>> {
        self.schemas
            .read()
            .get(table)
            .cloned()
            .ok_or_else(|| Error::UnknownTable(table.to_string()))
    }

    /// All registered schemas, ordered by table name.
    pub fn all(&self) -> Vec<Arc<Schema>> {
        let mut schemas: Vec<_> = self.schemas.read().values().cloned().collect();
        schemas.sort_by(|a, b| a.table.cmp(&b.table));
        schemas
    }
}
