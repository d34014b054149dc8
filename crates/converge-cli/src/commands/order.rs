//! Order command - print manifests in install order

use console::style;
use converge_core::{ResourceList, install_rank};
use std::path::PathBuf;

use crate::error::{CliError, Result};
use crate::util::read_manifests;

/// Run the order command
pub fn run(files: &[PathBuf]) -> Result<()> {
    let resources = ResourceList::new(read_manifests(files)?);

    let duplicates = resources.duplicate_keys();
    if let Some(first) = duplicates.first() {
        return Err(CliError::input_with_help(
            format!("{} is declared more than once", first),
            "every resource may appear only once per run",
        ));
    }

    for group in resources.grouped_by_gvk() {
        println!(
            "{} {} {}",
            style(format!("[{:>2}]", install_rank(&group.gvk.kind))).dim(),
            style(&group.gvk.kind).cyan().bold(),
            style(group.gvk.api_version()).dim()
        );
        for resource in &group.resources {
            println!("     {}", resource.display_name());
        }
    }

    Ok(())
}
