//! CLI commands

pub mod apply;
pub mod list;
pub mod order;
pub mod plan;
pub mod purge;

use console::style;
use converge_kube::{Installer, ListScope, LiveCluster, ResourceCache};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::util::load_config;

/// Options shared by every cluster command
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub namespaces: Vec<String>,
}

impl GlobalOptions {
    fn list_scope(&self) -> ListScope {
        self.namespaces
            .iter()
            .fold(ListScope::new(), |scope, ns| scope.with_namespace(ns.clone()))
    }
}

/// Connect to the cluster and load the resource cache
async fn connect(global: &GlobalOptions) -> Result<Installer> {
    let config = load_config(global.config.as_deref())?;

    let cluster = LiveCluster::try_default().await?;
    let installer = Installer::builder(Arc::new(cluster), Arc::new(ResourceCache::new()))
        .config(config)
        .build();

    eprintln!("{} Loading cluster resources...", style("→").blue().bold());
    installer.init_cache(&global.list_scope()).await?;
    eprintln!(
        "{} Cached {} resource(s)",
        style("✓").green(),
        installer.cache().len().await
    );

    Ok(installer)
}
