//! Resource command handlers

use anyhow::{bail, Context, Result};
use inventory_core::storage::predicate::{and, eq, labeled, like};
use inventory_core::{ListOptions, Predicate, Sort, Store};
use uuid::Uuid;

use crate::output::{short_id, Output};
use crate::resource::Resource;

/// Filters shared by `list` and `count`
#[derive(Debug, Default, Clone)]
pub struct Filter {
    pub labels: Vec<(String, String)>,
    pub class: Option<String>,
    /// SQL LIKE pattern on the name
    pub name: Option<String>,
}

impl Filter {
    fn predicate(&self) -> Option<Predicate> {
        let mut terms: Vec<Predicate> = self
            .labels
            .iter()
            .map(|(name, value)| labeled(name.as_str(), value.as_str()))
            .collect();
        if let Some(ref class) = self.class {
            terms.push(eq("class", class.clone()));
        }
        if let Some(ref name) = self.name {
            terms.push(like("name", name.as_str()));
        }

        match terms.len() {
            0 => None,
            1 => terms.pop(),
            _ => Some(and(terms)),
        }
    }
}

/// Create a new resource
pub fn add(
    store: &Store,
    name: String,
    class: String,
    labels: Vec<(String, String)>,
    output: &Output,
) -> Result<()> {
    let mut resource = Resource::new(name, class);
    for (name, value) in labels {
        resource.set_label(name, value);
    }

    store
        .insert(&resource)
        .context("Failed to create resource")?;

    output.success(&format!("Created resource: {}", resource.id));
    output.print_resource(&resource)
}

/// List resources, optionally filtered
pub fn list(
    store: &Store,
    filter: &Filter,
    sort: Option<String>,
    descending: bool,
    offset: Option<u64>,
    limit: Option<u64>,
    output: &Output,
) -> Result<()> {
    let mut options = ListOptions {
        predicate: filter.predicate(),
        ..ListOptions::default()
    };
    if let Some(field) = sort {
        options = options.sorted(if descending {
            Sort::desc(field)
        } else {
            Sort::asc(field)
        });
    }
    if offset.is_some() || limit.is_some() {
        options = options.paged(offset.unwrap_or(0), limit.unwrap_or(u64::MAX >> 1));
    }

    let resources: Vec<Resource> = store.list(&options).context("Failed to list resources")?;
    output.print_resources(&resources)
}

/// Show a single resource
pub fn show(store: &Store, id: &str, output: &Output) -> Result<()> {
    let mut resource = Resource::key(resolve_id(store, id)?);
    store
        .get(&mut resource)
        .with_context(|| format!("Resource not found: {}", id))?;
    output.print_resource(&resource)
}

/// Set and remove labels inside one transaction
pub fn relabel(
    store: &Store,
    id: &str,
    set: Vec<(String, String)>,
    remove: Vec<String>,
    output: &Output,
) -> Result<()> {
    if set.is_empty() && remove.is_empty() {
        bail!("Nothing to change. Pass --label name=value or --remove name.");
    }

    let mut resource = Resource::key(resolve_id(store, id)?);
    let mut tx = store
        .get_for_update(&mut resource)
        .with_context(|| format!("Resource not found: {}", id))?;

    for name in &remove {
        if !resource.remove_label(name) {
            tracing::debug!(label = %name, "label not present");
        }
    }
    for (name, value) in set {
        resource.set_label(name, value);
    }

    store.update(&resource).context("Failed to update resource")?;
    tx.commit().context("Failed to commit label change")?;

    output.success("Labels updated");
    output.print_resource(&resource)
}

/// Delete a resource
pub fn delete(store: &Store, id: &str, output: &Output) -> Result<()> {
    let uuid = resolve_id(store, id)?;

    store
        .delete(&Resource::key(uuid))
        .context("Failed to delete resource")?;

    output.success(&format!("Deleted resource: {}", uuid));
    Ok(())
}

/// Count resources matching the filter
pub fn count(store: &Store, filter: &Filter, output: &Output) -> Result<()> {
    let count = store
        .count::<Resource>(filter.predicate().as_ref())
        .context("Failed to count resources")?;
    output.print_count(count);
    Ok(())
}

/// Parse a resource ID (supports full UUID or prefix)
fn resolve_id(store: &Store, id: &str) -> Result<Uuid> {
    // Try full UUID first
    if let Ok(uuid) = Uuid::parse_str(id) {
        return Ok(uuid);
    }

    if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        bail!("Invalid resource ID: {}", id);
    }

    let matches: Vec<Resource> = store.list(&ListOptions::filter(like(
        "id",
        format!("{}%", id.to_ascii_lowercase()),
    )))?;

    match matches.len() {
        0 => bail!("No resource found matching: {}", id),
        1 => Ok(matches[0].id),
        _ => {
            eprintln!("Multiple resources match '{}':", id);
            for resource in &matches {
                eprintln!("  {} - {}", short_id(resource), resource.name);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}
