//! List filtering, ordering and paging
//!
//! Predicates are small boolean expressions over a model's columns. They
//! render to a parameterized `WHERE` clause; values are always bound, never
//! interpolated.

use rusqlite::types::Value;

use crate::error::{Error, Result};
use crate::model::{Descriptor, Label, Model};

/// Boolean expression over model fields
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, Value),
    Neq(String, Value),
    Lt(String, Value),
    Gt(String, Value),
    Like(String, String),
    /// Models carrying label `name` with `value`
    Labeled { name: String, value: String },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Predicate {
    Predicate::Eq(field.into(), value.into())
}

pub fn neq(field: impl Into<String>, value: impl Into<Value>) -> Predicate {
    Predicate::Neq(field.into(), value.into())
}

pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Predicate {
    Predicate::Lt(field.into(), value.into())
}

pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Predicate {
    Predicate::Gt(field.into(), value.into())
}

pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Predicate {
    Predicate::Like(field.into(), pattern.into())
}

pub fn labeled(name: impl Into<String>, value: impl Into<String>) -> Predicate {
    Predicate::Labeled {
        name: name.into(),
        value: value.into(),
    }
}

pub fn and(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    Predicate::And(predicates.into_iter().collect())
}

pub fn or(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    Predicate::Or(predicates.into_iter().collect())
}

impl Predicate {
    /// Render into `sql`, pushing bound values onto `params`
    pub(crate) fn render(
        &self,
        descriptor: &Descriptor,
        sql: &mut String,
        params: &mut Vec<Value>,
    ) -> Result<()> {
        match self {
            Predicate::Eq(field, value) => compare(descriptor, field, "=", value, sql, params),
            Predicate::Neq(field, value) => compare(descriptor, field, "!=", value, sql, params),
            Predicate::Lt(field, value) => compare(descriptor, field, "<", value, sql, params),
            Predicate::Gt(field, value) => compare(descriptor, field, ">", value, sql, params),
            Predicate::Like(field, pattern) => compare(
                descriptor,
                field,
                "LIKE",
                &Value::Text(pattern.clone()),
                sql,
                params,
            ),
            Predicate::Labeled { name, value } => {
                let pk = descriptor.pk_field()?;
                sql.push_str(&format!(
                    "{} IN (SELECT parent FROM {} WHERE kind = ? AND name = ? AND value = ?)",
                    pk.name,
                    Label::KIND
                ));
                params.push(Value::Text(descriptor.kind.to_string()));
                params.push(Value::Text(name.clone()));
                params.push(Value::Text(value.clone()));
                Ok(())
            }
            Predicate::And(list) => join(descriptor, list, " AND ", "1", sql, params),
            Predicate::Or(list) => join(descriptor, list, " OR ", "0", sql, params),
        }
    }
}

fn compare(
    descriptor: &Descriptor,
    field: &str,
    op: &str,
    value: &Value,
    sql: &mut String,
    params: &mut Vec<Value>,
) -> Result<()> {
    check_field(descriptor, field)?;
    if *value == Value::Null {
        match op {
            "=" => sql.push_str(&format!("{} IS NULL", field)),
            "!=" => sql.push_str(&format!("{} IS NOT NULL", field)),
            _ => {
                return Err(Error::Predicate(format!(
                    "{} {} NULL is always false",
                    field, op
                )))
            }
        }
        return Ok(());
    }
    sql.push_str(&format!("{} {} ?", field, op));
    params.push(value.clone());
    Ok(())
}

fn join(
    descriptor: &Descriptor,
    list: &[Predicate],
    sep: &str,
    empty: &str,
    sql: &mut String,
    params: &mut Vec<Value>,
) -> Result<()> {
    if list.is_empty() {
        sql.push_str(empty);
        return Ok(());
    }
    sql.push('(');
    for (i, predicate) in list.iter().enumerate() {
        if i > 0 {
            sql.push_str(sep);
        }
        predicate.render(descriptor, sql, params)?;
    }
    sql.push(')');
    Ok(())
}

fn check_field(descriptor: &Descriptor, field: &str) -> Result<()> {
    if descriptor.has_field(field) {
        Ok(())
    } else {
        Err(Error::Predicate(format!(
            "{} has no field '{}'",
            descriptor.kind, field
        )))
    }
}

/// Ordering on one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// Offset/limit window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

/// Options accepted by `list`
///
/// With no sort the rows come back in storage (insertion) order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListOptions {
    pub predicate: Option<Predicate>,
    pub sort: Vec<Sort>,
    pub page: Option<Page>,
}

impl ListOptions {
    pub fn filter(predicate: Predicate) -> Self {
        Self {
            predicate: Some(predicate),
            ..Self::default()
        }
    }

    pub fn sorted(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn paged(mut self, offset: u64, limit: u64) -> Self {
        self.page = Some(Page { offset, limit });
        self
    }

    /// `SELECT` statement and its bound parameters for model `T`
    pub(crate) fn select<T: Model>(&self, descriptor: &Descriptor) -> Result<(String, Vec<Value>)> {
        let mut sql = format!("SELECT {} FROM {}", descriptor.columns(), T::KIND);
        let mut params = Vec::new();
        if let Some(predicate) = &self.predicate {
            sql.push_str(" WHERE ");
            predicate.render(descriptor, &mut sql, &mut params)?;
        }
        if self.sort.is_empty() {
            sql.push_str(" ORDER BY rowid");
        } else {
            let mut terms = Vec::with_capacity(self.sort.len());
            for sort in &self.sort {
                check_field(descriptor, &sort.field)?;
                let dir = if sort.descending { "DESC" } else { "ASC" };
                terms.push(format!("{} {}", sort.field, dir));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        if let Some(page) = self.page {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(Value::Integer(clamp(page.limit)));
            params.push(Value::Integer(clamp(page.offset)));
        }
        Ok((sql, params))
    }
}

fn clamp(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
