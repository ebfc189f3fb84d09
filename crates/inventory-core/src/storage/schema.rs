//! Schema generation
//!
//! Every registered model gets one table plus its indexes. The statements
//! are idempotent so reopening an existing file is harmless.

use std::time::Duration;

use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::model::{Descriptor, Registry};

/// DDL statements for one model
pub fn ddl(descriptor: &Descriptor) -> Result<Vec<String>> {
    descriptor.validate()?;

    let columns = descriptor
        .fields
        .iter()
        .map(|f| f.definition())
        .collect::<Vec<_>>()
        .join(",\n    ");
    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        descriptor.kind, columns
    )];

    for field in descriptor.fields.iter().filter(|f| f.indexed && !f.pk) {
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{kind}_{col} ON {kind}({col})",
            kind = descriptor.kind,
            col = field.name
        ));
    }
    for index in descriptor.indexes {
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {}({})",
            descriptor.kind,
            index.join("_"),
            descriptor.kind,
            index.join(", ")
        ));
    }
    for index in descriptor.unique_indexes {
        statements.push(format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_{}_{} ON {}({})",
            descriptor.kind,
            index.join("_"),
            descriptor.kind,
            index.join(", ")
        ));
    }

    Ok(statements)
}

/// Apply connection settings shared by writer and readers
pub fn configure(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.busy_timeout(busy_timeout)
        .map_err(Error::mapping("configure", "connection"))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(Error::mapping("configure", "connection"))?;
    Ok(())
}

/// Switch the file to WAL so readers see committed state beside a writer
pub fn enable_wal(conn: &Connection) -> Result<()> {
    let mode: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .map_err(Error::mapping("configure", "journal"))?;
    tracing::debug!(%mode, "journal mode");
    Ok(())
}

/// Build every table of the registry in a single transaction
pub fn init_schema(conn: &mut Connection, registry: &Registry) -> Result<()> {
    let mut statements = Vec::new();
    for descriptor in registry.descriptors() {
        statements.extend(ddl(descriptor)?);
    }

    let tx = conn
        .transaction()
        .map_err(Error::mapping("begin", "schema"))?;
    for statement in &statements {
        tx.execute_batch(statement)
            .map_err(Error::mapping("ddl", "schema"))?;
    }
    tx.commit().map_err(Error::mapping("commit", "schema"))?;

    tracing::debug!(tables = registry.len(), "schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::{Host, Vm};
    use crate::model::Label;

    fn names(conn: &Connection, kind: &str) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type = ? ORDER BY name")
            .unwrap()
            .query_map([kind], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_ddl_for_model() {
        let statements = ddl(&Descriptor::of::<Host>()).unwrap();

        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS Host"));
        assert!(statements[0].contains("id TEXT PRIMARY KEY"));
        assert!(statements[0].contains("cpus INTEGER NOT NULL"));
        assert_eq!(
            statements[1],
            "CREATE INDEX IF NOT EXISTS idx_Host_name ON Host(name)"
        );
    }

    #[test]
    fn test_label_table_keyed_by_kind_parent_name() {
        let statements = ddl(&Descriptor::of::<Label>()).unwrap();
        assert!(statements[0].contains("id INTEGER PRIMARY KEY"));
        assert!(statements.iter().any(|s| s
            == "CREATE UNIQUE INDEX IF NOT EXISTS uq_Label_kind_parent_name ON Label(kind, parent, name)"));
    }

    #[test]
    fn test_init_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        let registry = Registry::new()
            .register::<Host>()
            .register::<Vm>()
            .prepare()
            .unwrap();

        init_schema(&mut conn, &registry).unwrap();

        let tables = names(&conn, "table");
        assert!(tables.contains(&"Host".to_string()));
        assert!(tables.contains(&"Vm".to_string()));
        assert!(tables.contains(&"Label".to_string()));

        let indexes = names(&conn, "index");
        assert!(indexes.contains(&"uq_Label_kind_parent_name".to_string()));
        assert!(indexes.contains(&"idx_Vm_host".to_string()));
    }

    #[test]
    fn test_init_schema_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        let registry = Registry::new().register::<Host>().prepare().unwrap();

        init_schema(&mut conn, &registry).unwrap();
        init_schema(&mut conn, &registry).unwrap();
    }
}
