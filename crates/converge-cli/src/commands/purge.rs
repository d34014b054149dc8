//! Purge command - delete every owned resource

use console::style;
use converge_kube::render_plan;
use tokio_util::sync::CancellationToken;

use super::apply::print_summary;
use super::plan::print_diff;
use super::{GlobalOptions, connect};
use crate::error::{CliError, Result};
use crate::util::parse_labels;

/// Run the purge command
pub async fn run(
    global: &GlobalOptions,
    cancel: &CancellationToken,
    labels: &[String],
    dry_run: bool,
) -> Result<()> {
    let selector = parse_labels(labels)?;
    let installer = connect(global).await?;

    if dry_run {
        let plan = installer.plan("", &[], &selector).await?;
        print_diff(&render_plan(&plan)?);
        println!(
            "{} Would delete {} resource(s)",
            style("→").blue().bold(),
            plan.deletes.len()
        );
        return Ok(());
    }

    println!(
        "{} Purging resources owned by {}",
        style("→").blue().bold(),
        style(&selector).cyan()
    );

    let summary = installer
        .purge_resources(cancel, &selector)
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
