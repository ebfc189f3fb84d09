//! Label synchronization
//!
//! Labels mirror each model's `labels()` mapping as rows of the built-in
//! Label table, unique per `(kind, parent, name)`. They are written through
//! the same `Table` (and so the same backend transaction) as the model.

use crate::error::Result;
use crate::model::{Label, Model};
use crate::storage::predicate::{and, eq};
use crate::storage::{ListOptions, Predicate, Sort, Table};

/// Insert one label row per entry of the model's label mapping
pub(crate) fn insert_labels<T: Model>(table: &Table<'_>, model: &T) -> Result<()> {
    let parent = model.pk();
    for (name, value) in model.labels() {
        table.insert(&Label::new(table.name::<T>(), parent.clone(), name, value))?;
    }
    Ok(())
}

/// Delete every label row of the model
pub(crate) fn delete_labels<T: Model>(table: &Table<'_>, model: &T) -> Result<()> {
    table.delete_where::<Label>(&owned_by::<T>(&model.pk()))?;
    Ok(())
}

/// Delete then reinsert, so the rows equal the current mapping exactly
pub(crate) fn replace_labels<T: Model>(table: &Table<'_>, model: &T) -> Result<()> {
    delete_labels(table, model)?;
    insert_labels(table, model)
}

/// Label rows of the model with primary key `pk`, ordered by name
pub(crate) fn labels_of<T: Model>(table: &Table<'_>, pk: &str) -> Result<Vec<Label>> {
    let options = ListOptions::filter(owned_by::<T>(pk)).sorted(Sort::asc("name"));
    table.list(&options)
}

fn owned_by<T: Model>(pk: &str) -> Predicate {
    and([
        eq("kind", T::KIND.to_string()),
        eq("parent", pk.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::Host;
    use crate::model::{Labels, Registry};
    use crate::storage::schema::init_schema;
    use rusqlite::Connection;

    fn setup() -> (Connection, Registry) {
        let mut conn = Connection::open_in_memory().unwrap();
        let registry = Registry::new().register::<Host>().prepare().unwrap();
        init_schema(&mut conn, &registry).unwrap();
        (conn, registry)
    }

    fn as_map(labels: Vec<Label>) -> Labels {
        labels.into_iter().map(|l| (l.name, l.value)).collect()
    }

    #[test]
    fn test_insert_labels() {
        let (conn, registry) = setup();
        let table = Table::new(&conn, &registry);
        let host = Host::new("h1", "a")
            .with_label("env", "prod")
            .with_label("zone", "east");

        insert_labels(&table, &host).unwrap();

        let labels = labels_of::<Host>(&table, "h1").unwrap();
        assert_eq!(labels.len(), 2);
        assert!(labels.iter().all(|l| l.kind == "Host" && l.parent == "h1"));
        assert_eq!(as_map(labels), host.labels);
    }

    #[test]
    fn test_replace_drops_stale_labels() {
        let (conn, registry) = setup();
        let table = Table::new(&conn, &registry);
        let host = Host::new("h1", "a")
            .with_label("env", "prod")
            .with_label("zone", "east");
        insert_labels(&table, &host).unwrap();

        let changed = Host::new("h1", "a")
            .with_label("env", "stage")
            .with_label("tier", "web");
        replace_labels(&table, &changed).unwrap();

        assert_eq!(as_map(labels_of::<Host>(&table, "h1").unwrap()), changed.labels);
    }

    #[test]
    fn test_keys_and_names_containing_slashes() {
        let (conn, registry) = setup();
        let table = Table::new(&conn, &registry);
        let a = Host::new("a/b", "a").with_label("c", "1");
        let b = Host::new("a", "b").with_label("b/c", "2");

        insert_labels(&table, &a).unwrap();
        insert_labels(&table, &b).unwrap();

        assert_eq!(as_map(labels_of::<Host>(&table, "a/b").unwrap()), a.labels);
        assert_eq!(as_map(labels_of::<Host>(&table, "a").unwrap()), b.labels);

        delete_labels(&table, &b).unwrap();
        assert_eq!(as_map(labels_of::<Host>(&table, "a/b").unwrap()), a.labels);
    }

    #[test]
    fn test_delete_only_touches_own_labels() {
        let (conn, registry) = setup();
        let table = Table::new(&conn, &registry);
        let a = Host::new("h1", "a").with_label("env", "prod");
        let b = Host::new("h2", "b").with_label("env", "prod");
        insert_labels(&table, &a).unwrap();
        insert_labels(&table, &b).unwrap();

        delete_labels(&table, &a).unwrap();

        assert!(labels_of::<Host>(&table, "h1").unwrap().is_empty());
        assert_eq!(labels_of::<Host>(&table, "h2").unwrap().len(), 1);
    }
}
