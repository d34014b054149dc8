//! In-memory cluster for testing
//!
//! Stores objects in a map, records every write in an operation log and
//! can simulate slow Deployments, CRD registration and injected failures,
//! so the reconciler can be exercised without a Kubernetes API server.

use async_trait::async_trait;
use converge_core::{GroupVersionKind, ResourceDocument, ResourceKey};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use super::{Cluster, ResourceType, Scope};
use crate::crd;
use crate::error::{KubeError, Result};

/// Timestamp given to every object created by the mock
const CREATION_TIMESTAMP: &str = "2024-01-01T00:00:00Z";

/// A write recorded by [`MockCluster`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Create(ResourceKey),
    Update(ResourceKey),
    Delete(ResourceKey),
}

impl Operation {
    pub fn key(&self) -> &ResourceKey {
        match self {
            Operation::Create(key) | Operation::Update(key) | Operation::Delete(key) => key,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, Operation::Create(_))
    }

    pub fn is_update(&self) -> bool {
        matches!(self, Operation::Update(_))
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Operation::Delete(_))
    }
}

/// Cluster call that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Verb::Get => "get",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Delete => "delete",
        };
        f.write_str(verb)
    }
}

#[derive(Default)]
struct MockState {
    /// Types served right now
    types: BTreeMap<GroupVersionKind, ResourceType>,
    /// Types registered by created CRDs, served after the next refresh
    pending_types: BTreeMap<GroupVersionKind, ResourceType>,
    objects: BTreeMap<ResourceKey, ResourceDocument>,
    operations: Vec<Operation>,
    get_counts: HashMap<ResourceKey, usize>,
    /// Deployments report ready once they have been read this many times
    ready_after: HashMap<ResourceKey, usize>,
    /// Remaining injected transient failures per call
    failures: HashMap<(Verb, ResourceKey), usize>,
    /// Remaining concurrent writes to simulate before an update lands
    conflicts: HashMap<ResourceKey, usize>,
    failing_lists: BTreeSet<GroupVersionKind>,
    refreshes: usize,
    next_version: u64,
}

impl MockState {
    fn take_failure(&mut self, verb: Verb, key: &ResourceKey) -> Result<()> {
        if let Some(remaining) = self.failures.get_mut(&(verb, key.clone())) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(KubeError::Transient(format!(
                    "injected failure: {} {}",
                    verb, key
                )));
            }
        }
        Ok(())
    }

    fn resource_type(&self, gvk: &GroupVersionKind) -> Result<&ResourceType> {
        self.types
            .get(gvk)
            .ok_or_else(|| KubeError::UnknownResourceType {
                gvk: gvk.to_string(),
            })
    }

    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn namespace_exists(&self, namespace: &str) -> bool {
        self.objects
            .keys()
            .any(|k| k.gvk.kind == "Namespace" && k.gvk.group.is_empty() && k.name == namespace)
    }

    /// Object as the API server would return it
    fn read(&self, key: &ResourceKey) -> Option<ResourceDocument> {
        let mut doc = self.objects.get(key)?.clone();
        if let Some(threshold) = self.ready_after.get(key) {
            let reads = self.get_counts.get(key).copied().unwrap_or(0);
            let ready = if reads >= *threshold { 1 } else { 0 };
            doc.body
                .insert("status".to_string(), json!({"readyReplicas": ready}));
        }
        Some(doc)
    }
}

/// In-memory [`Cluster`] for tests
#[derive(Clone)]
pub struct MockCluster {
    state: Arc<Mutex<MockState>>,
}

impl MockCluster {
    /// Create an empty cluster serving the common built-in types
    pub fn new() -> Self {
        let cluster = Self {
            state: Arc::new(Mutex::new(MockState::default())),
        };

        let builtin = [
            ("", "v1", "Namespace", "namespaces", Scope::Cluster),
            ("", "v1", "ConfigMap", "configmaps", Scope::Namespaced),
            ("", "v1", "Secret", "secrets", Scope::Namespaced),
            ("", "v1", "ServiceAccount", "serviceaccounts", Scope::Namespaced),
            ("", "v1", "Service", "services", Scope::Namespaced),
            ("", "v1", "PersistentVolumeClaim", "persistentvolumeclaims", Scope::Namespaced),
            ("apps", "v1", "Deployment", "deployments", Scope::Namespaced),
            ("apps", "v1", "StatefulSet", "statefulsets", Scope::Namespaced),
            ("apps", "v1", "DaemonSet", "daemonsets", Scope::Namespaced),
            ("batch", "v1", "Job", "jobs", Scope::Namespaced),
            ("networking.k8s.io", "v1", "Ingress", "ingresses", Scope::Namespaced),
            ("rbac.authorization.k8s.io", "v1", "Role", "roles", Scope::Namespaced),
            ("rbac.authorization.k8s.io", "v1", "RoleBinding", "rolebindings", Scope::Namespaced),
            ("rbac.authorization.k8s.io", "v1", "ClusterRole", "clusterroles", Scope::Cluster),
            (
                "rbac.authorization.k8s.io",
                "v1",
                "ClusterRoleBinding",
                "clusterrolebindings",
                Scope::Cluster,
            ),
            (
                crd::CRD_GROUP,
                "v1",
                "CustomResourceDefinition",
                "customresourcedefinitions",
                Scope::Cluster,
            ),
        ];
        for (group, version, kind, plural, scope) in builtin {
            cluster.add_type(ResourceType::new(
                GroupVersionKind::new(group, version, kind),
                plural,
                scope,
            ));
        }

        // Read-only type, never cached
        let mut statuses = ResourceType::new(
            GroupVersionKind::new("", "v1", "ComponentStatus"),
            "componentstatuses",
            Scope::Cluster,
        );
        statuses.verbs = vec!["get".to_string(), "list".to_string()];
        cluster.add_type(statuses);

        cluster
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Serve an additional resource type
    pub fn add_type(&self, resource_type: ResourceType) {
        self.state()
            .types
            .insert(resource_type.gvk.clone(), resource_type);
    }

    /// Store an object directly, bypassing the operation log
    ///
    /// Inserted CRDs register their type immediately.
    pub fn insert(&self, mut resource: ResourceDocument) {
        let mut state = self.state();
        if !resource.metadata.extra.contains_key("resourceVersion") {
            let version = state.bump_version();
            resource
                .metadata
                .extra
                .insert("resourceVersion".to_string(), Value::String(version));
        }
        if let Some(served) = crd::served_type(&resource) {
            state.types.insert(served.gvk.clone(), served);
        }
        state.objects.insert(resource.key(), resource);
    }

    /// Make every listing of `gvk` fail
    pub fn fail_list(&self, gvk: GroupVersionKind) {
        self.state().failing_lists.insert(gvk);
    }

    /// Let listings of `gvk` succeed again
    pub fn restore_list(&self, gvk: &GroupVersionKind) {
        self.state().failing_lists.remove(gvk);
    }

    /// Make the next `times` calls of `verb` on `key` fail with a transient error
    pub fn fail_next(&self, verb: Verb, key: ResourceKey, times: usize) {
        self.state().failures.insert((verb, key), times);
    }

    /// Let another writer modify `key` just before each of the next `times` updates
    pub fn conflict_next(&self, key: ResourceKey, times: usize) {
        self.state().conflicts.insert(key, times);
    }

    /// Report the Deployment at `key` ready only from its `reads`-th read on
    pub fn ready_after(&self, key: ResourceKey, reads: usize) {
        self.state().ready_after.insert(key, reads);
    }

    /// Every write performed so far, in order
    pub fn operations(&self) -> Vec<Operation> {
        self.state().operations.clone()
    }

    pub fn clear_operations(&self) {
        self.state().operations.clear();
    }

    /// Stored object, as last written
    pub fn object(&self, key: &ResourceKey) -> Option<ResourceDocument> {
        self.state().objects.get(key).cloned()
    }

    /// Every stored object
    pub fn objects(&self) -> Vec<ResourceDocument> {
        self.state().objects.values().cloned().collect()
    }

    /// Number of `get` calls made for `key`
    pub fn get_count(&self, key: &ResourceKey) -> usize {
        self.state().get_counts.get(key).copied().unwrap_or(0)
    }

    /// Number of REST mapping refreshes
    pub fn refresh_count(&self) -> usize {
        self.state().refreshes
    }
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cluster for MockCluster {
    async fn resource_types(&self) -> Result<Vec<ResourceType>> {
        Ok(self.state().types.values().cloned().collect())
    }

    async fn scope_of(&self, gvk: &GroupVersionKind) -> Result<Option<Scope>> {
        Ok(self.state().types.get(gvk).map(|t| t.scope))
    }

    async fn refresh_mappings(&self) -> Result<()> {
        let mut state = self.state();
        state.refreshes += 1;
        let pending = std::mem::take(&mut state.pending_types);
        state.types.extend(pending);
        Ok(())
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<ResourceDocument>> {
        let state = self.state();
        if state.failing_lists.contains(gvk) {
            return Err(KubeError::Transient(format!("injected list failure: {}", gvk)));
        }
        state.resource_type(gvk)?;

        Ok(state
            .objects
            .keys()
            .filter(|k| &k.gvk == gvk)
            .filter(|k| namespace.is_none_or(|ns| k.namespace == ns))
            .filter_map(|k| state.read(k))
            .collect())
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<ResourceDocument>> {
        let mut state = self.state();
        state.take_failure(Verb::Get, key)?;
        state.resource_type(&key.gvk)?;
        *state.get_counts.entry(key.clone()).or_default() += 1;
        Ok(state.read(key))
    }

    async fn create(&self, resource: &ResourceDocument) -> Result<ResourceDocument> {
        let key = resource.key();
        let mut state = self.state();
        state.take_failure(Verb::Create, &key)?;

        let scope = state.resource_type(&key.gvk)?.scope;
        if let Some(ns) = key.namespace() {
            if scope == Scope::Namespaced && !state.namespace_exists(ns) {
                return Err(KubeError::NotFound {
                    resource: format!("Namespace/{}", ns),
                });
            }
        } else if scope == Scope::Namespaced {
            return Err(KubeError::MissingNamespace {
                resource: key.to_string(),
            });
        }
        if state.objects.contains_key(&key) {
            return Err(KubeError::AlreadyExists {
                resource: key.to_string(),
            });
        }

        let mut stored = resource.clone();
        let version = state.bump_version();
        let extra = &mut stored.metadata.extra;
        extra.insert("uid".to_string(), Value::String(format!("uid-{}", version)));
        extra.insert("resourceVersion".to_string(), Value::String(version));
        extra.insert(
            "creationTimestamp".to_string(),
            Value::String(CREATION_TIMESTAMP.to_string()),
        );

        if stored.kind == "Deployment" {
            let replicas = stored
                .field(&["spec", "replicas"])
                .and_then(Value::as_i64)
                .unwrap_or(1);
            stored
                .body
                .insert("status".to_string(), json!({"readyReplicas": replicas}));
        }
        if let Some(served) = crd::served_type(&stored) {
            stored.body.insert(
                "status".to_string(),
                json!({"conditions": [{"type": "Established", "status": "True"}]}),
            );
            state.pending_types.insert(served.gvk.clone(), served);
        }

        state.objects.insert(key.clone(), stored.clone());
        state.operations.push(Operation::Create(key));
        Ok(stored)
    }

    async fn update(&self, resource: &ResourceDocument) -> Result<ResourceDocument> {
        let key = resource.key();
        let mut state = self.state();
        state.take_failure(Verb::Update, &key)?;
        state.resource_type(&key.gvk)?;

        if let Some(remaining) = state.conflicts.get_mut(&key).filter(|n| **n > 0) {
            *remaining -= 1;
            let version = state.bump_version();
            if let Some(object) = state.objects.get_mut(&key) {
                object
                    .metadata
                    .extra
                    .insert("resourceVersion".to_string(), Value::String(version));
            }
        }

        let Some(current) = state.objects.get(&key).cloned() else {
            return Err(KubeError::NotFound {
                resource: key.to_string(),
            });
        };

        let current_version = current.metadata.extra.get("resourceVersion");
        if let Some(version) = resource.metadata.extra.get("resourceVersion") {
            if Some(version) != current_version {
                return Err(KubeError::Conflict {
                    resource: key.to_string(),
                    message: "the object has been modified".to_string(),
                });
            }
        }

        let mut stored = resource.clone();
        let version = state.bump_version();
        for field in ["uid", "creationTimestamp"] {
            if let Some(value) = current.metadata.extra.get(field) {
                stored.metadata.extra.insert(field.to_string(), value.clone());
            }
        }
        stored
            .metadata
            .extra
            .insert("resourceVersion".to_string(), Value::String(version));
        // Status is owned by the server
        match current.body.get("status") {
            Some(status) => {
                stored.body.insert("status".to_string(), status.clone());
            }
            None => {
                stored.body.remove("status");
            }
        }

        state.objects.insert(key.clone(), stored.clone());
        state.operations.push(Operation::Update(key));
        Ok(stored)
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        let mut state = self.state();
        state.take_failure(Verb::Delete, key)?;
        state.resource_type(&key.gvk)?;

        let Some(removed) = state.objects.remove(key) else {
            return Err(KubeError::NotFound {
                resource: key.to_string(),
            });
        };
        if let Some(served) = crd::served_type(&removed) {
            state.types.remove(&served.gvk);
        }
        state.operations.push(Operation::Delete(key.clone()));
        Ok(())
    }
}
