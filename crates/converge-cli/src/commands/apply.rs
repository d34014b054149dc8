//! Apply command - converge owned resources to the given manifests

use console::style;
use converge_kube::ReconcileSummary;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use super::{GlobalOptions, connect};
use crate::error::{CliError, Result};
use crate::util::{parse_labels, read_manifests};

/// Run the apply command
pub async fn run(
    global: &GlobalOptions,
    cancel: &CancellationToken,
    files: &[PathBuf],
    namespace: &str,
    labels: &[String],
) -> Result<()> {
    let selector = parse_labels(labels)?;
    let desired = read_manifests(files)?;

    println!(
        "{} Applying {} resource(s) owned by {} to namespace {}",
        style("→").blue().bold(),
        desired.len(),
        style(&selector).cyan(),
        style(namespace).cyan()
    );

    let installer = connect(global).await?;
    let summary = installer
        .reconcile_resources(cancel, namespace, desired, &selector)
        .await
        .map_err(|e| {
            if cancel.is_cancelled() {
                CliError::Interrupted
            } else {
                CliError::from(e)
            }
        })?;

    print_summary(&summary);
    Ok(())
}

/// Print one line per written resource, then the totals
pub fn print_summary(summary: &ReconcileSummary) {
    for key in &summary.deleted {
        println!("  {} {}", style("-").red().bold(), key);
    }
    for key in &summary.created {
        println!("  {} {}", style("+").green().bold(), key);
    }
    for update in &summary.updated {
        println!(
            "  {} {} {}",
            style("~").yellow().bold(),
            update.key,
            style(&update.patch).dim()
        );
    }

    if summary.is_noop() {
        println!("{} Already up to date", style("✓").green().bold());
    } else {
        println!("{} {}", style("✓").green().bold(), summary);
    }
}
