//! Model registration
//!
//! A model is any record type that can describe its own table: a kind
//! (table name), an ordered field list, a primary key and a label mapping.
//! Types are registered explicitly in a [`Registry`] before the store is
//! opened; nothing is discovered by inspecting values at call time.

use std::any::TypeId;
use std::collections::{BTreeMap, HashSet};

use rusqlite::types::Value;
use rusqlite::Row;

use crate::error::{Error, Result};

/// Label name → label value
pub type Labels = BTreeMap<String, String>;

/// SQLite storage class of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Blob,
}

impl ColumnType {
    fn sql(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Blob => "BLOB",
        }
    }
}

/// One column of a model's table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub column: ColumnType,
    pub pk: bool,
    pub nullable: bool,
    pub unique: bool,
    pub indexed: bool,
}

impl Field {
    const fn new(name: &'static str, column: ColumnType) -> Self {
        Self {
            name,
            column,
            pk: false,
            nullable: false,
            unique: false,
            indexed: false,
        }
    }

    /// Text primary key column
    pub const fn pk(name: &'static str) -> Self {
        let mut field = Self::new(name, ColumnType::Text);
        field.pk = true;
        field
    }

    /// Integer primary key assigned by SQLite when inserted as NULL
    pub const fn rowid(name: &'static str) -> Self {
        let mut field = Self::new(name, ColumnType::Integer);
        field.pk = true;
        field
    }

    pub const fn text(name: &'static str) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub const fn integer(name: &'static str) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub const fn real(name: &'static str) -> Self {
        Self::new(name, ColumnType::Real)
    }

    pub const fn blob(name: &'static str) -> Self {
        Self::new(name, ColumnType::Blob)
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub const fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Column definition used in `CREATE TABLE`
    pub(crate) fn definition(&self) -> String {
        let mut def = format!("{} {}", self.name, self.column.sql());
        if self.pk {
            def.push_str(" PRIMARY KEY");
        } else {
            if !self.nullable {
                def.push_str(" NOT NULL");
            }
            if self.unique {
                def.push_str(" UNIQUE");
            }
        }
        def
    }
}

/// A record type persisted by the store
///
/// `to_row` must yield one value per entry of `fields()`, in the same
/// order, and `from_row` reads the columns back in that order.
///
/// ```ignore
/// #[derive(Clone)]
/// struct Host { id: String, name: String, labels: Labels }
///
/// impl Model for Host {
///     const KIND: &'static str = "Host";
///
///     fn fields() -> &'static [Field] {
///         const FIELDS: &[Field] = &[Field::pk("id"), Field::text("name")];
///         FIELDS
///     }
///
///     fn pk(&self) -> String { self.id.clone() }
///     fn labels(&self) -> Labels { self.labels.clone() }
///     fn to_row(&self) -> Vec<Value> { vec![self.id.clone().into(), self.name.clone().into()] }
///     fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> { /* ... */ }
/// }
/// ```
pub trait Model: Clone + Send + Sync + 'static {
    /// Type-scoped name; also the table name
    const KIND: &'static str;

    /// Columns, in row order
    fn fields() -> &'static [Field];

    /// Composite indexes beyond the per-field ones
    fn indexes() -> &'static [&'static [&'static str]] {
        &[]
    }

    /// Composite unique indexes
    fn unique_indexes() -> &'static [&'static [&'static str]] {
        &[]
    }

    /// Primary key value
    fn pk(&self) -> String;

    /// Current label mapping
    fn labels(&self) -> Labels {
        Labels::new()
    }

    fn to_row(&self) -> Vec<Value>;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Table layout for one registered model type
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub kind: &'static str,
    pub type_name: &'static str,
    pub fields: &'static [Field],
    pub indexes: &'static [&'static [&'static str]],
    pub unique_indexes: &'static [&'static [&'static str]],
}

impl Descriptor {
    pub fn of<T: Model>() -> Self {
        Self {
            kind: T::KIND,
            type_name: std::any::type_name::<T>(),
            fields: T::fields(),
            indexes: T::indexes(),
            unique_indexes: T::unique_indexes(),
        }
    }

    /// The single primary key column
    pub fn pk_field(&self) -> Result<&Field> {
        let mut pks = self.fields.iter().filter(|f| f.pk);
        match (pks.next(), pks.next()) {
            (Some(field), None) => Ok(field),
            (None, _) => Err(Error::Configuration(format!(
                "{} ({}) has no primary key field",
                self.kind, self.type_name
            ))),
            (Some(_), Some(_)) => Err(Error::Configuration(format!(
                "{} ({}) has more than one primary key field",
                self.kind, self.type_name
            ))),
        }
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Comma separated column list in row order
    pub(crate) fn columns(&self) -> String {
        self.fields
            .iter()
            .map(|f| f.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Check the descriptor can be turned into a table
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(self.kind) {
            return Err(Error::Configuration(format!(
                "kind '{}' of {} is not a valid table name",
                self.kind, self.type_name
            )));
        }
        if self.fields.is_empty() {
            return Err(Error::Configuration(format!("{} has no fields", self.kind)));
        }
        self.pk_field()?;

        let mut seen = HashSet::new();
        for field in self.fields {
            if !is_identifier(field.name) {
                return Err(Error::Configuration(format!(
                    "{}.{} is not a valid column name",
                    self.kind, field.name
                )));
            }
            if !seen.insert(field.name) {
                return Err(Error::Configuration(format!(
                    "{}.{} is declared twice",
                    self.kind, field.name
                )));
            }
        }
        for index in self.indexes.iter().chain(self.unique_indexes) {
            if index.is_empty() {
                return Err(Error::Configuration(format!(
                    "{} declares an empty index",
                    self.kind
                )));
            }
            if let Some(missing) = index.iter().find(|c| !self.has_field(c)) {
                return Err(Error::Configuration(format!(
                    "{} index references unknown field '{}'",
                    self.kind, missing
                )));
            }
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The set of model types a store manages
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<(TypeId, Descriptor)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a model type. Validation happens when the store opens.
    pub fn register<T: Model>(mut self) -> Self {
        self.entries.push((TypeId::of::<T>(), Descriptor::of::<T>()));
        self
    }

    pub fn get<T: Model>(&self) -> Result<&Descriptor> {
        let id = TypeId::of::<T>();
        self.entries
            .iter()
            .find(|(t, _)| *t == id)
            .map(|(_, d)| d)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "{} is not a registered model",
                    std::any::type_name::<T>()
                ))
            })
    }

    /// Registered descriptors, built-in Label table last
    pub fn descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.entries.iter().map(|(_, d)| d)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate user registrations and append the Label table
    pub(crate) fn prepare(&self) -> Result<Registry> {
        let mut kinds = HashSet::new();
        let mut types = HashSet::new();
        for (type_id, descriptor) in &self.entries {
            descriptor.validate()?;
            if descriptor.kind.eq_ignore_ascii_case(Label::KIND) {
                return Err(Error::Configuration(format!(
                    "kind '{}' of {} is reserved",
                    descriptor.kind, descriptor.type_name
                )));
            }
            if !types.insert(*type_id) {
                return Err(Error::Configuration(format!(
                    "{} is registered twice",
                    descriptor.type_name
                )));
            }
            if !kinds.insert(descriptor.kind.to_ascii_lowercase()) {
                return Err(Error::Configuration(format!(
                    "kind '{}' is registered by more than one type",
                    descriptor.kind
                )));
            }
        }
        Ok(self.clone().register::<Label>())
    }
}

/// A label row: one entry of a model's label mapping
///
/// Rows are unique per `(kind, parent, name)`. `id` is the SQLite rowid and
/// stays `None` until the row has been read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub id: Option<i64>,
    pub parent: String,
    pub kind: String,
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(
        kind: impl Into<String>,
        parent: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            parent: parent.into(),
            kind: kind.into(),
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Model for Label {
    const KIND: &'static str = "Label";

    fn fields() -> &'static [Field] {
        const FIELDS: &[Field] = &[
            Field::rowid("id"),
            Field::text("parent"),
            Field::text("kind"),
            Field::text("name").indexed(),
            Field::text("value"),
        ];
        FIELDS
    }

    fn unique_indexes() -> &'static [&'static [&'static str]] {
        &[&["kind", "parent", "name"]]
    }

    fn pk(&self) -> String {
        self.id.map(|id| id.to_string()).unwrap_or_default()
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            self.id.map_or(Value::Null, Value::Integer),
            Value::Text(self.parent.clone()),
            Value::Text(self.kind.clone()),
            Value::Text(self.name.clone()),
            Value::Text(self.value.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            parent: row.get(1)?,
            kind: row.get(2)?,
            name: row.get(3)?,
            value: row.get(4)?,
        })
    }
}
