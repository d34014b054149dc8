//! Shared utility functions for CLI commands

use converge_core::{LabelSelector, ResourceDocument, parse_manifests};
use converge_kube::ReconcilerConfig;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{CliError, Result};

/// Read every manifest in `paths`, in order
///
/// `-` reads from standard input. Directories are walked recursively and
/// contribute their `.yaml`, `.yml` and `.json` files, sorted by path.
pub fn read_manifests(paths: &[PathBuf]) -> Result<Vec<ResourceDocument>> {
    let mut resources = Vec::new();

    for path in paths {
        if path.as_os_str() == "-" {
            let mut content = String::new();
            std::io::stdin().read_to_string(&mut content)?;
            resources.extend(parse_file(&content, path)?);
        } else if path.is_dir() {
            for file in manifest_files(path)? {
                let content = std::fs::read_to_string(&file)?;
                resources.extend(parse_file(&content, &file)?);
            }
        } else {
            let content = std::fs::read_to_string(path).map_err(|e| {
                CliError::input(format!("cannot read {}: {}", path.display(), e))
            })?;
            resources.extend(parse_file(&content, path)?);
        }
    }

    Ok(resources)
}

fn parse_file(content: &str, path: &Path) -> Result<Vec<ResourceDocument>> {
    parse_manifests(content)
        .map_err(|e| CliError::input(format!("{}: {}", path.display(), e)))
}

fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        let is_manifest = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| matches!(ext.as_str(), "yaml" | "yml" | "json"));
        if entry.file_type().is_file() && is_manifest {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Combine repeated `-l` flags into one selector
///
/// Each flag may itself hold a comma-separated list.
pub fn parse_labels(flags: &[String]) -> Result<LabelSelector> {
    let mut selector = LabelSelector::new();
    for flag in flags {
        let parsed = LabelSelector::parse(flag).map_err(|e| {
            CliError::input_with_help(e.to_string(), "labels are given as -l key=value")
        })?;
        for (key, value) in parsed.iter() {
            selector = selector.with(key.clone(), value.clone());
        }
    }
    Ok(selector)
}

/// Load the reconciler configuration, or defaults when no file is given
pub fn load_config(path: Option<&Path>) -> Result<ReconcilerConfig> {
    match path {
        Some(path) => ReconcilerConfig::from_file(path).map_err(|e| CliError::Config {
            message: format!("{}: {}", path.display(), e),
        }),
        None => Ok(ReconcilerConfig::default()),
    }
}
