//! Cluster access for the reconciler
//!
//! The reconciler talks to the cluster only through the [`Cluster`] trait:
//! - **LiveCluster**: Dynamic `kube` client with discovery-backed REST mapping
//! - **MockCluster**: In-memory cluster with an operation log, for tests
//!
//! [`list_all`] is the parallel listing used to seed the resource cache.

mod live;
mod mock;

pub use live::LiveCluster;
pub use mock::{MockCluster, Operation, Verb};

use async_trait::async_trait;
use converge_core::{GroupVersionKind, ResourceDocument, ResourceKey};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// Verbs a resource type must support to be cached and reconciled
pub const CRUD_VERBS: &[&str] = &["list", "get", "create", "update", "delete"];

/// Whether a resource type lives inside namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Namespaced,
    Cluster,
}

impl Scope {
    /// Parse the `spec.scope` value of a CustomResourceDefinition
    pub fn from_crd_scope(scope: &str) -> Option<Self> {
        match scope {
            "Namespaced" => Some(Scope::Namespaced),
            "Cluster" => Some(Scope::Cluster),
            _ => None,
        }
    }
}

/// An API resource type as reported by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceType {
    pub gvk: GroupVersionKind,
    /// Plural resource name used in URLs
    pub plural: String,
    pub scope: Scope,
    pub verbs: Vec<String>,
}

impl ResourceType {
    pub fn new(gvk: GroupVersionKind, plural: impl Into<String>, scope: Scope) -> Self {
        Self {
            gvk,
            plural: plural.into(),
            scope,
            verbs: CRUD_VERBS.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn supports(&self, verb: &str) -> bool {
        self.verbs.iter().any(|v| v == verb)
    }

    pub fn is_crud_capable(&self) -> bool {
        CRUD_VERBS.iter().all(|verb| self.supports(verb))
    }
}

/// Access to a Kubernetes-style API server
///
/// Implementations must be Send + Sync for use across concurrent resource workers.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// All resource types the server currently serves
    async fn resource_types(&self) -> Result<Vec<ResourceType>>;

    /// Scope of a kind per the current REST mapping, `None` if unmapped
    async fn scope_of(&self, gvk: &GroupVersionKind) -> Result<Option<Scope>>;

    /// Re-read the REST mapping (after CRDs are established)
    async fn refresh_mappings(&self) -> Result<()>;

    /// List objects of a type, in one namespace or across all of them
    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<ResourceDocument>>;

    /// Fetch a single object
    async fn get(&self, key: &ResourceKey) -> Result<Option<ResourceDocument>>;

    /// Create an object, returning the stored version
    async fn create(&self, resource: &ResourceDocument) -> Result<ResourceDocument>;

    /// Replace an object, returning the stored version
    async fn update(&self, resource: &ResourceDocument) -> Result<ResourceDocument>;

    /// Delete an object
    async fn delete(&self, key: &ResourceKey) -> Result<()>;
}

/// Predicate deciding whether a resource type is listed
pub type TypeFilter = Arc<dyn Fn(&ResourceType) -> bool + Send + Sync>;

/// What [`list_all`] lists
#[derive(Clone, Default)]
pub struct ListScope {
    /// Restrict namespaced types to these namespaces (empty means all)
    pub namespaces: BTreeSet<String>,
    /// Every filter must accept a type for it to be listed
    pub type_filters: Vec<TypeFilter>,
}

impl ListScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.insert(namespace.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Fn(&ResourceType) -> bool + Send + Sync + 'static) -> Self {
        self.type_filters.push(Arc::new(filter));
        self
    }

    /// Only list the given kinds
    pub fn with_kinds<I, S>(self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kinds: BTreeSet<String> = kinds.into_iter().map(Into::into).collect();
        self.with_filter(move |t| kinds.contains(&t.gvk.kind))
    }

    fn accepts(&self, resource_type: &ResourceType) -> bool {
        resource_type.is_crud_capable() && self.type_filters.iter().all(|f| f(resource_type))
    }
}

impl fmt::Debug for ListScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListScope")
            .field("namespaces", &self.namespaces)
            .field("type_filters", &self.type_filters.len())
            .finish()
    }
}

/// List every CRUD-capable resource in the cluster, one request per type and namespace in parallel
///
/// Fails as a whole if any single listing fails.
pub async fn list_all(cluster: &dyn Cluster, scope: &ListScope) -> Result<Vec<ResourceDocument>> {
    let types: Vec<ResourceType> = cluster
        .resource_types()
        .await?
        .into_iter()
        .filter(|t| scope.accepts(t))
        .collect();

    let mut requests = Vec::new();
    for resource_type in &types {
        if resource_type.scope == Scope::Namespaced && !scope.namespaces.is_empty() {
            for ns in &scope.namespaces {
                requests.push((&resource_type.gvk, Some(ns.as_str())));
            }
        } else {
            requests.push((&resource_type.gvk, None));
        }
    }

    tracing::debug!(
        types = types.len(),
        requests = requests.len(),
        "listing cluster resources"
    );

    let listed = try_join_all(
        requests
            .into_iter()
            .map(|(gvk, namespace)| cluster.list(gvk, namespace)),
    )
    .await?;

    Ok(listed.into_iter().flatten().collect())
}
