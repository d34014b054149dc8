//! Plan command - show what apply would change

use console::style;
use converge_kube::render_plan;
use std::path::PathBuf;

use super::{GlobalOptions, connect};
use crate::error::Result;
use crate::util::{parse_labels, read_manifests};

/// Run the plan command
pub async fn run(
    global: &GlobalOptions,
    files: &[PathBuf],
    namespace: &str,
    labels: &[String],
) -> Result<()> {
    let selector = parse_labels(labels)?;
    let desired = read_manifests(files)?;

    let installer = connect(global).await?;
    let plan = installer.plan(namespace, &desired, &selector).await?;

    print_diff(&render_plan(&plan)?);

    let summary = plan.to_summary();
    if summary.is_noop() {
        println!("{} No changes", style("✓").green().bold());
    } else {
        println!("{} Plan: {}", style("→").blue().bold(), summary);
    }
    Ok(())
}

/// Print a rendered plan with colored diff lines
pub fn print_diff(rendered: &str) {
    for line in rendered.lines() {
        match line.chars().next() {
            Some('+') => println!("{}", style(line).green()),
            Some('-') => println!("{}", style(line).red()),
            Some('~') => println!("{}", style(line).yellow()),
            _ => println!("{}", line),
        }
    }
}
