//! The Resource model
//!
//! The one model type the CLI registers: a named, classed record with a
//! free-form label set. Labels are stored as a JSON column on the row and
//! mirrored into the store's label index.

use chrono::{DateTime, Utc};
use inventory_core::{Field, Labels, Model};
use rusqlite::types::{Type, Value};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tracked resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    /// Unique identifier
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Resource class, e.g. "host" or "volume"
    pub class: String,
    /// Label set
    pub labels: Labels,
    /// When this resource was created
    pub created_at: DateTime<Utc>,
    /// When this resource was last updated
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    /// Create a new resource with a fresh ID
    pub fn new(name: impl Into<String>, class: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            class: class.into(),
            labels: Labels::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A key-only value for lookups
    pub fn key(id: Uuid) -> Self {
        let mut resource = Self::new("", "");
        resource.id = id;
        resource
    }

    /// Set a label, replacing any previous value
    pub fn set_label(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.labels.insert(name.into(), value.into());
        self.updated_at = Utc::now();
    }

    /// Remove a label; returns whether it was present
    pub fn remove_label(&mut self, name: &str) -> bool {
        let removed = self.labels.remove(name).is_some();
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }
}

impl Model for Resource {
    const KIND: &'static str = "Resource";

    fn fields() -> &'static [Field] {
        const FIELDS: &[Field] = &[
            Field::pk("id"),
            Field::text("name").indexed(),
            Field::text("class").indexed(),
            Field::text("labels"),
            Field::text("created_at"),
            Field::text("updated_at"),
        ];
        FIELDS
    }

    fn pk(&self) -> String {
        self.id.to_string()
    }

    fn labels(&self) -> Labels {
        self.labels.clone()
    }

    fn to_row(&self) -> Vec<Value> {
        // A BTreeMap<String, String> always serializes
        let labels = serde_json::to_string(&self.labels).unwrap_or_else(|_| "{}".to_string());
        vec![
            Value::Text(self.id.to_string()),
            Value::Text(self.name.clone()),
            Value::Text(self.class.clone()),
            Value::Text(labels),
            Value::Text(self.created_at.to_rfc3339()),
            Value::Text(self.updated_at.to_rfc3339()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let id: String = row.get(0)?;
        let labels: String = row.get(3)?;
        let created_at: String = row.get(4)?;
        let updated_at: String = row.get(5)?;

        Ok(Self {
            id: Uuid::parse_str(&id).map_err(|e| conversion(0, e))?,
            name: row.get(1)?,
            class: row.get(2)?,
            labels: serde_json::from_str(&labels).map_err(|e| conversion(3, e))?,
            created_at: parse_time(4, &created_at)?,
            updated_at: parse_time(5, &updated_at)?,
        })
    }
}

fn parse_time(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion(column, e))
}

fn conversion<E>(column: usize, error: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(error))
}
