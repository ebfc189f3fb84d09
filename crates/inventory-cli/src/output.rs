//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use anyhow::Result;
use inventory_core::Labels;

use crate::resource::Resource;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print a single resource
    pub fn print_resource(&self, resource: &Resource) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", resource.id);
                println!("Name:     {}", resource.name);
                println!("Class:    {}", resource.class);
                if !resource.labels.is_empty() {
                    println!("Labels:   {}", format_labels(&resource.labels));
                }
                println!("Created:  {}", resource.created_at.format("%Y-%m-%d %H:%M"));
                println!("Updated:  {}", resource.updated_at.format("%Y-%m-%d %H:%M"));
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(resource)?);
            }
            OutputFormat::Quiet => {
                println!("{}", resource.id);
            }
        }
        Ok(())
    }

    /// Print a list of resources
    pub fn print_resources(&self, resources: &[Resource]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if resources.is_empty() {
                    println!("No resources found.");
                    return Ok(());
                }
                for resource in resources {
                    println!(
                        "{} | {} | {} | {}",
                        short_id(resource),
                        truncate(&resource.name, 30),
                        truncate(&resource.class, 12),
                        truncate(&format_labels(&resource.labels), 40)
                    );
                }
                println!("\n{} resource(s)", resources.len());
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(resources)?);
            }
            OutputFormat::Quiet => {
                for resource in resources {
                    println!("{}", resource.id);
                }
            }
        }
        Ok(())
    }

    /// Print a count
    pub fn print_count(&self, count: i64) {
        match self.format {
            OutputFormat::Human => println!("{} resource(s)", count),
            OutputFormat::Json => println!("{}", serde_json::json!({ "count": count })),
            OutputFormat::Quiet => println!("{}", count),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// First eight characters of the resource ID
pub fn short_id(resource: &Resource) -> String {
    resource.id.to_string()[..8].to_string()
}

/// Render labels as `k=v, k=v`
pub fn format_labels(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ééééééééééé", 5), "éé...");
    }

    #[test]
    fn test_format_labels() {
        let mut labels = Labels::new();
        assert_eq!(format_labels(&labels), "");

        labels.insert("zone".to_string(), "east".to_string());
        labels.insert("env".to_string(), "prod".to_string());
        assert_eq!(format_labels(&labels), "env=prod, zone=east");
    }

    #[test]
    fn test_short_id() {
        let resource = Resource::new("web-1", "host");
        assert_eq!(short_id(&resource).len(), 8);
        assert!(resource.id.to_string().starts_with(&short_id(&resource)));
    }
}
