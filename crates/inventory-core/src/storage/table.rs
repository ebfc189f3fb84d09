//! Relational mapper
//!
//! `Table` turns registered models into rows and back. It runs against
//! whatever connection it is handed, so the store decides whether a call
//! lands inside an open transaction or on a read connection.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::model::{Descriptor, Model, Registry};
use crate::storage::predicate::{ListOptions, Predicate};

/// Typed Get/List/Count/Insert/Update/Delete over one connection
pub struct Table<'c> {
    conn: &'c Connection,
    registry: &'c Registry,
}

impl<'c> Table<'c> {
    pub fn new(conn: &'c Connection, registry: &'c Registry) -> Self {
        Self { conn, registry }
    }

    /// Table name of the model
    pub fn name<T: Model>(&self) -> &'static str {
        T::KIND
    }

    /// DDL statements for the model
    pub fn ddl<T: Model>(&self) -> Result<Vec<String>> {
        crate::storage::schema::ddl(self.registry.get::<T>()?)
    }

    /// Populate `model` from the row with the same primary key
    pub fn get<T: Model>(&self, model: &mut T) -> Result<()> {
        let descriptor = self.registry.get::<T>()?;
        let pk = descriptor.pk_field()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            descriptor.columns(),
            T::KIND,
            pk.name
        );
        let key = model.pk();
        let found = self
            .conn
            .query_row(&sql, [&key], |row| T::from_row(row))
            .optional()
            .map_err(Error::mapping("get", T::KIND))?;

        match found {
            Some(row) => {
                *model = row;
                Ok(())
            }
            None => Err(Error::NotFound {
                kind: T::KIND,
                pk: key,
            }),
        }
    }

    pub fn list<T: Model>(&self, options: &ListOptions) -> Result<Vec<T>> {
        let descriptor = self.registry.get::<T>()?;
        let (sql, params) = options.select::<T>(descriptor)?;

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(Error::mapping("list", T::KIND))?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| T::from_row(row))
            .map_err(Error::mapping("list", T::KIND))?;

        rows.collect::<rusqlite::Result<Vec<T>>>()
            .map_err(Error::mapping("list", T::KIND))
    }

    pub fn count<T: Model>(&self, predicate: Option<&Predicate>) -> Result<i64> {
        let descriptor = self.registry.get::<T>()?;
        let mut sql = format!("SELECT COUNT(*) FROM {}", T::KIND);
        let mut params = Vec::new();
        if let Some(predicate) = predicate {
            sql.push_str(" WHERE ");
            predicate.render(descriptor, &mut sql, &mut params)?;
        }

        self.conn
            .query_row(&sql, params_from_iter(params), |row| row.get(0))
            .map_err(Error::mapping("count", T::KIND))
    }

    pub fn insert<T: Model>(&self, model: &T) -> Result<()> {
        let descriptor = self.registry.get::<T>()?;
        let row = row_of(descriptor, model)?;
        let placeholders = vec!["?"; row.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            T::KIND,
            descriptor.columns(),
            placeholders
        );

        self.conn
            .execute(&sql, params_from_iter(row))
            .map_err(Error::mapping("insert", T::KIND))?;
        Ok(())
    }

    /// Update every non-key column; `NotFound` when no row has the key
    pub fn update<T: Model>(&self, model: &T) -> Result<()> {
        let descriptor = self.registry.get::<T>()?;
        let pk = descriptor.pk_field()?;
        let row = row_of(descriptor, model)?;

        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for (field, value) in descriptor.fields.iter().zip(row) {
            if !field.pk {
                assignments.push(format!("{} = ?", field.name));
                params.push(value);
            }
        }
        if assignments.is_empty() {
            let mut current = model.clone();
            return self.get(&mut current);
        }
        params.push(Value::Text(model.pk()));

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            T::KIND,
            assignments.join(", "),
            pk.name
        );
        let changed = self
            .conn
            .execute(&sql, params_from_iter(params))
            .map_err(Error::mapping("update", T::KIND))?;

        if changed == 0 {
            return Err(Error::NotFound {
                kind: T::KIND,
                pk: model.pk(),
            });
        }
        Ok(())
    }

    /// Delete by primary key; `NotFound` when no row has the key
    pub fn delete<T: Model>(&self, model: &T) -> Result<()> {
        let descriptor = self.registry.get::<T>()?;
        let pk = descriptor.pk_field()?;
        let sql = format!("DELETE FROM {} WHERE {} = ?", T::KIND, pk.name);

        let changed = self
            .conn
            .execute(&sql, [model.pk()])
            .map_err(Error::mapping("delete", T::KIND))?;

        if changed == 0 {
            return Err(Error::NotFound {
                kind: T::KIND,
                pk: model.pk(),
            });
        }
        Ok(())
    }

    /// Delete every row matching `predicate`, returning how many went
    pub fn delete_where<T: Model>(&self, predicate: &Predicate) -> Result<usize> {
        let descriptor = self.registry.get::<T>()?;
        let mut sql = format!("DELETE FROM {} WHERE ", T::KIND);
        let mut params = Vec::new();
        predicate.render(descriptor, &mut sql, &mut params)?;

        self.conn
            .execute(&sql, params_from_iter(params))
            .map_err(Error::mapping("delete", T::KIND))
    }
}

fn row_of<T: Model>(descriptor: &Descriptor, model: &T) -> Result<Vec<Value>> {
    let row = model.to_row();
    if row.len() != descriptor.fields.len() {
        return Err(Error::Configuration(format!(
            "{} produced {} values for {} fields",
            T::KIND,
            row.len(),
            descriptor.fields.len()
        )));
    }
    Ok(row)
}
