//! List command - list cached cluster resources

use console::style;
use converge_core::ResourceDocument;

use super::{GlobalOptions, connect};
use crate::error::{CliError, Result};
use crate::util::parse_labels;

/// Run the list command
pub async fn run(global: &GlobalOptions, labels: &[String], output_json: bool) -> Result<()> {
    let selector = parse_labels(labels)?;
    let installer = connect(global).await?;

    let resources = installer.list_all_resources().await.with_labels(&selector);

    if output_json {
        let values: Vec<_> = resources.iter().map(ResourceDocument::to_value).collect();
        let json = serde_json::to_string_pretty(&values)
            .map_err(|e| CliError::internal(e.to_string()))?;
        println!("{}", json);
        return Ok(());
    }

    if resources.is_empty() {
        println!("No resources found");
        return Ok(());
    }

    // Print header
    println!(
        "{:<20} {:<30} {:<40} {:<10}",
        style("NAMESPACE").bold(),
        style("KIND").bold(),
        style("NAME").bold(),
        style("TRACKED").bold()
    );

    for resource in resources.iter() {
        let tracked = if resource
            .annotation(converge_kube::LAST_APPLIED_ANNOTATION)
            .is_some()
        {
            style("yes").green()
        } else {
            style("no").dim()
        };

        println!(
            "{:<20} {:<30} {:<40} {:<10}",
            resource.namespace().unwrap_or("-"),
            resource.kind,
            resource.name(),
            tracked
        );
    }

    Ok(())
}
