//! Status command handler

use anyhow::Result;

use inventory_core::{Label, Store};

use crate::output::{Output, OutputFormat};
use crate::resource::Resource;

/// Show store location and row counts
pub fn show(store: &Store, output: &Output) -> Result<()> {
    let resources = store.count::<Resource>(None)?;
    let labels = store.count::<Label>(None)?;
    let size = std::fs::metadata(store.path()).map(|m| m.len()).unwrap_or(0);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "db_path": store.path(),
                    "db_size": size,
                    "counts": {
                        "resources": resources,
                        "labels": labels
                    },
                    "last_event_id": store.journal().last_event_id()
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", store.path().display());
        }
        OutputFormat::Human => {
            println!("Store:     {}", store.path().display());
            println!("Size:      {} bytes", size);
            println!("Resources: {}", resources);
            println!("Labels:    {}", labels);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use inventory_core::{Config, Registry};
    use tempfile::TempDir;

    #[test]
    fn test_status_counts_label_rows() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(
            Config::with_path(dir.path().join("inventory.db")),
            Registry::new().register::<Resource>(),
        );
        store.open(true).unwrap();

        let mut resource = Resource::new("web-1", "host");
        resource.set_label("env", "prod");
        resource.set_label("zone", "east");
        store.insert(&resource).unwrap();

        assert_eq!(store.count::<Label>(None).unwrap(), 2);
        show(&store, &Output::new(OutputFormat::Json)).unwrap();
    }
}
