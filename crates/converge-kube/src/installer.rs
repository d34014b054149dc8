//! Declarative reconciliation of a desired resource set
//!
//! A run compares the desired documents with the cached resources carrying
//! the same ownership labels and converges the cluster:
//!
//! 1. `pre_install` hooks
//! 2. Plan: label and place the desired documents, classify into
//!    create / update / delete / unchanged
//! 3. Deletes, kind groups in reverse install order
//! 4. Creates, kind groups in install order (target namespace first)
//! 5. Updates, kind groups in install order
//! 6. `post_install` hooks
//!
//! Resources of one kind group are processed concurrently; groups run one
//! after another and the run stops at the first group with a failure.

use converge_core::{
    LabelSelector, NAMESPACE_KIND, ResourceDocument, ResourceKey, ResourceList, VersionedGroup,
};
use futures::{StreamExt, stream};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::annotations::decode_last_applied;
use crate::cache::ResourceCache;
use crate::cluster::{Cluster, ListScope, Scope};
use crate::config::ReconcilerConfig;
use crate::crd;
use crate::error::{KubeError, Result};
use crate::hooks::{HookChain, LastAppliedHook, LifecycleHook};
use crate::patch::{MergePatch, apply_patch, get_patch, matches};
use crate::plan::{PlannedUpdate, ReconcilePlan, ReconcileSummary};
use crate::readiness::{ReadinessCheck, ReadinessRegistry};
use crate::retry::with_retry;

/// Reconciles desired resources against the cluster
pub struct Installer {
    cluster: Arc<dyn Cluster>,
    cache: Arc<ResourceCache>,
    hooks: HookChain,
    readiness: ReadinessRegistry,
    config: ReconcilerConfig,
}

/// Builder for [`Installer`]
pub struct InstallerBuilder {
    cluster: Arc<dyn Cluster>,
    cache: Arc<ResourceCache>,
    hooks: HookChain,
    readiness: ReadinessRegistry,
    config: ReconcilerConfig,
}

impl InstallerBuilder {
    /// Register a hook; hooks run in registration order
    pub fn hook(mut self, hook: impl LifecycleHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Register (or replace) the readiness check for a kind
    pub fn readiness_check(
        mut self,
        kind: impl Into<String>,
        check: impl ReadinessCheck + 'static,
    ) -> Self {
        self.readiness.register(kind, check);
        self
    }

    pub fn config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the installer; the last-applied hook always runs last
    pub fn build(self) -> Installer {
        Installer {
            cluster: self.cluster,
            cache: self.cache,
            hooks: self.hooks.with(LastAppliedHook),
            readiness: self.readiness,
            config: self.config,
        }
    }
}

impl Installer {
    pub fn builder(cluster: Arc<dyn Cluster>, cache: Arc<ResourceCache>) -> InstallerBuilder {
        InstallerBuilder {
            cluster,
            cache,
            hooks: HookChain::new(),
            readiness: ReadinessRegistry::with_defaults(),
            config: ReconcilerConfig::default(),
        }
    }

    /// Installer with default hooks, readiness checks and configuration
    pub fn new(cluster: Arc<dyn Cluster>, cache: Arc<ResourceCache>) -> Self {
        Self::builder(cluster, cache).build()
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    pub fn cluster(&self) -> &Arc<dyn Cluster> {
        &self.cluster
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Populate (or reload) the cache from the cluster
    pub async fn init_cache(&self, scope: &ListScope) -> Result<()> {
        self.cache.init(self.cluster.as_ref(), scope).await
    }

    /// Every cached resource, in install order
    pub async fn list_all_resources(&self) -> ResourceList {
        self.cache.list().await
    }

    /// Converge the resources owned by `labels` to `desired`
    ///
    /// Namespaced documents without a namespace are placed in `namespace`.
    /// Resources written before a failure stay written and cached.
    pub async fn reconcile_resources(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        desired: Vec<ResourceDocument>,
        labels: &LabelSelector,
    ) -> Result<ReconcileSummary> {
        if labels.is_empty() {
            return Err(KubeError::EmptyOwnershipLabels);
        }

        self.hooks.pre_install(&desired).await?;

        let plan = self.build_plan(namespace, &desired, labels).await?;
        tracing::info!(
            namespace,
            labels = %labels,
            creates = plan.creates.len(),
            updates = plan.updates.len(),
            deletes = plan.deletes.len(),
            unchanged = plan.unchanged.len(),
            "reconciling resources"
        );

        for group in ResourceList::from(plan.deletes.clone()).grouped_by_gvk().iter().rev() {
            self.run_group(cancel, "delete", group, |doc| self.delete_one(cancel, doc))
                .await?;
        }

        if self.needs_namespace(&plan) {
            self.ensure_namespace(cancel, namespace).await?;
        }

        for group in ResourceList::from(plan.creates.clone()).grouped_by_gvk() {
            self.run_group(cancel, "create", &group, |doc| self.create_one(cancel, doc))
                .await?;
        }

        let patches: HashMap<ResourceKey, MergePatch> = plan
            .updates
            .iter()
            .map(|u| (u.desired.key(), u.patch.clone()))
            .collect();
        let updates: ResourceList = plan.updates.iter().map(|u| u.desired.clone()).collect();
        for group in updates.grouped_by_gvk() {
            self.run_group(cancel, "update", &group, |doc| {
                let patch = patches
                    .get(&doc.key())
                    .cloned()
                    .unwrap_or_else(MergePatch::empty);
                self.update_one(cancel, doc, patch)
            })
            .await?;
        }

        self.hooks.post_install(&plan.desired).await?;

        let summary = plan.to_summary();
        tracing::info!(namespace, summary = %summary, "reconcile complete");
        Ok(summary)
    }

    /// Delete every resource owned by `labels`
    pub async fn purge_resources(
        &self,
        cancel: &CancellationToken,
        labels: &LabelSelector,
    ) -> Result<ReconcileSummary> {
        self.reconcile_resources(cancel, "", Vec::new(), labels)
            .await
    }

    /// Compute what [`Installer::reconcile_resources`] would do, without writing
    pub async fn plan(
        &self,
        namespace: &str,
        desired: &[ResourceDocument],
        labels: &LabelSelector,
    ) -> Result<ReconcilePlan> {
        if labels.is_empty() {
            return Err(KubeError::EmptyOwnershipLabels);
        }
        self.build_plan(namespace, desired, labels).await
    }

    async fn build_plan(
        &self,
        namespace: &str,
        desired: &[ResourceDocument],
        labels: &LabelSelector,
    ) -> Result<ReconcilePlan> {
        let mut managed: HashMap<ResourceKey, ResourceDocument> = HashMap::new();
        for cached in self.cache.list().await.with_labels(labels) {
            let decoded =
                decode_last_applied(&cached)?.ok_or_else(|| KubeError::UntrackedResource {
                    resource: cached.display_name(),
                })?;
            managed.insert(decoded.key(), decoded);
        }

        let mut prepared = Vec::with_capacity(desired.len());
        for resource in desired {
            prepared.push(self.prepare(resource, desired, namespace, labels).await?);
        }
        let prepared = ResourceList::from(prepared);
        let by_key = prepared.by_key();

        let mut plan = ReconcilePlan {
            namespace: namespace.to_string(),
            ..Default::default()
        };

        for resource in by_key.values() {
            match managed.get(&resource.key()) {
                None => plan.creates.push(resource.clone()),
                Some(cached) if matches(cached, resource) => {
                    plan.unchanged.push(resource.key());
                }
                Some(cached) => plan.updates.push(PlannedUpdate {
                    cached: cached.clone(),
                    desired: resource.clone(),
                    patch: get_patch(cached, resource),
                }),
            }
        }
        plan.deletes = managed
            .into_iter()
            .filter(|(key, _)| !by_key.contains_key(key))
            .map(|(_, cached)| cached)
            .collect();

        plan.desired = ResourceList::from(by_key.into_values().collect::<Vec<_>>())
            .sorted()
            .into_inner();
        plan.creates = ResourceList::from(plan.creates).sorted().into_inner();
        plan.deletes = ResourceList::from(plan.deletes).sorted().into_inner();
        plan.updates.sort_by(|a, b| converge_core::compare_documents(&a.desired, &b.desired));
        plan.unchanged.sort();

        Ok(plan)
    }

    /// Copy of `resource` with ownership labels and a resolved namespace
    async fn prepare(
        &self,
        resource: &ResourceDocument,
        desired: &[ResourceDocument],
        namespace: &str,
        labels: &LabelSelector,
    ) -> Result<ResourceDocument> {
        let mut prepared = resource.clone();
        prepared.validate()?;
        for (key, value) in labels.iter() {
            prepared.set_label(key.as_str(), value.as_str());
        }

        match self.resolve_scope(&prepared, desired).await? {
            Scope::Namespaced => {
                if prepared.namespace().is_none() {
                    if namespace.is_empty() {
                        return Err(KubeError::MissingNamespace {
                            resource: prepared.display_name(),
                        });
                    }
                    prepared.set_namespace(Some(namespace.to_string()));
                }
            }
            Scope::Cluster => prepared.set_namespace(None),
        }

        Ok(prepared)
    }

    /// Scope from the REST mapping, else from the one desired CRD defining the kind
    async fn resolve_scope(
        &self,
        resource: &ResourceDocument,
        desired: &[ResourceDocument],
    ) -> Result<Scope> {
        let gvk = resource.gvk();
        if let Some(scope) = self.cluster.scope_of(&gvk).await? {
            return Ok(scope);
        }

        let defining: Vec<&ResourceDocument> =
            desired.iter().filter(|d| crd::defines(d, &gvk)).collect();
        match defining.as_slice() {
            [] => Err(KubeError::UnknownResourceType {
                gvk: gvk.to_string(),
            }),
            [definition] => crd::scope(definition).ok_or_else(|| KubeError::ScopeResolution {
                gvk: gvk.to_string(),
                reason: format!("{} has no valid spec.scope", definition.display_name()),
            }),
            many => Err(KubeError::ScopeResolution {
                gvk: gvk.to_string(),
                reason: format!("{} CustomResourceDefinitions define it", many.len()),
            }),
        }
    }

    /// The target namespace must be created unless it is itself desired
    fn needs_namespace(&self, plan: &ReconcilePlan) -> bool {
        !plan.namespace.is_empty()
            && !plan.creates.is_empty()
            && !plan.desired.iter().any(|d| {
                d.kind == NAMESPACE_KIND && d.gvk().group.is_empty() && d.name() == plan.namespace
            })
    }

    async fn ensure_namespace(&self, cancel: &CancellationToken, namespace: &str) -> Result<()> {
        let resource = ResourceDocument::namespace_object(namespace);

        match with_retry(&self.config.retry, cancel, "create namespace", || {
            self.cluster.create(&resource)
        })
        .await
        {
            Ok(created) => {
                tracing::info!(namespace, "created namespace");
                self.cache.set(created).await;
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                tracing::debug!(namespace, "namespace already exists");
                Ok(())
            }
            Err(e) => Err(e.in_phase("create", resource.display_name())),
        }
    }

    /// Run `operation` for every resource of a group and wait for all of them
    async fn run_group<F, Fut>(
        &self,
        cancel: &CancellationToken,
        phase: &'static str,
        group: &VersionedGroup,
        operation: F,
    ) -> Result<()>
    where
        F: Fn(ResourceDocument) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if cancel.is_cancelled() {
            return Err(KubeError::Cancelled);
        }

        tracing::debug!(phase, kind = %group.gvk.kind, resources = group.len(), "processing group");

        let results: Vec<Result<()>> = stream::iter(group.resources.iter().cloned())
            .map(|resource| {
                let name = resource.display_name();
                let pending = operation(resource);
                async move { pending.await.map_err(|e| e.in_phase(phase, name)) }
            })
            .buffered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let failures: Vec<KubeError> = results.into_iter().filter_map(Result::err).collect();
        let failed = failures.len();
        let Some(first) = failures.into_iter().next() else {
            return Ok(());
        };

        tracing::error!(phase, kind = %group.gvk.kind, failed, error = %first, "group failed");
        Err(KubeError::GroupFailed {
            phase: phase.to_string(),
            kind: group.gvk.kind.clone(),
            failed,
            source: Box::new(first),
        })
    }

    async fn delete_one(&self, cancel: &CancellationToken, resource: ResourceDocument) -> Result<()> {
        let key = resource.key();
        self.hooks.pre_delete(&resource).await?;

        match with_retry(&self.config.retry, cancel, "delete", || self.cluster.delete(&key)).await {
            Ok(()) => tracing::info!(resource = %key, "deleted"),
            Err(e) if e.is_not_found() => tracing::debug!(resource = %key, "already deleted"),
            Err(e) => return Err(e),
        }

        self.hooks.post_delete(&resource).await?;
        self.cache.delete(&key).await;
        Ok(())
    }

    async fn create_one(&self, cancel: &CancellationToken, desired: ResourceDocument) -> Result<()> {
        let mut resource = desired.clone();
        self.hooks.pre_create(&mut resource, &desired).await?;

        let created =
            with_retry(&self.config.retry, cancel, "create", || self.cluster.create(&resource))
                .await?;
        tracing::info!(resource = %desired.display_name(), "created");
        self.cache.set(tracked(created.clone())?).await;

        self.hooks.post_create(&created).await?;
        self.readiness
            .wait_ready(self.cluster.as_ref(), &desired, &self.config.readiness, cancel)
            .await
    }

    async fn update_one(
        &self,
        cancel: &CancellationToken,
        desired: ResourceDocument,
        patch: MergePatch,
    ) -> Result<()> {
        let written = with_retry(&self.config.retry, cancel, "update", || {
            self.write_update(&desired, &patch)
        })
        .await?;
        tracing::info!(resource = %desired.display_name(), patch = %patch, "updated");
        self.cache.set(tracked(written.clone())?).await;

        self.readiness
            .wait_ready(self.cluster.as_ref(), &desired, &self.config.readiness, cancel)
            .await?;
        self.hooks.post_update(&written).await
    }

    /// Patch a fresh copy of the live object and write it back
    async fn write_update(
        &self,
        desired: &ResourceDocument,
        patch: &MergePatch,
    ) -> Result<ResourceDocument> {
        let Some(mut live) = self.cluster.get(&desired.key()).await? else {
            tracing::warn!(resource = %desired.display_name(), "live object vanished, re-creating");
            let mut resource = desired.clone();
            self.hooks.pre_create(&mut resource, desired).await?;
            return self.cluster.create(&resource).await;
        };

        apply_patch(&mut live, patch)?;
        self.hooks.pre_update(&mut live, desired).await?;
        self.cluster.update(&live).await
    }
}

/// The form a written resource takes in the cache
fn tracked(written: ResourceDocument) -> Result<ResourceDocument> {
    Ok(decode_last_applied(&written)?.unwrap_or(written))
}
