//! Resource identity and install ordering
//!
//! Resources are installed kind by kind following [`INSTALL_ORDER`]:
//! namespaces first, then policies, config, CRDs, RBAC, services,
//! workloads and finally ingress and API services. Kinds missing from the
//! table are installed after every listed kind. Deletion walks the same
//! order backwards.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::document::{GroupVersionKind, ResourceDocument};

/// Kinds in the order they must be installed
pub const INSTALL_ORDER: &[&str] = &[
    "Namespace",
    "NetworkPolicy",
    "ResourceQuota",
    "LimitRange",
    "PodSecurityPolicy",
    "PodDisruptionBudget",
    "ServiceAccount",
    "Secret",
    "SecretList",
    "ConfigMap",
    "StorageClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleList",
    "ClusterRoleBinding",
    "ClusterRoleBindingList",
    "Role",
    "RoleList",
    "RoleBinding",
    "RoleBindingList",
    "Service",
    "DaemonSet",
    "Pod",
    "ReplicationController",
    "ReplicaSet",
    "Deployment",
    "HorizontalPodAutoscaler",
    "StatefulSet",
    "Job",
    "CronJob",
    "IngressClass",
    "Ingress",
    "APIService",
];

/// Position of a kind in the install order; unlisted kinds share the last rank
pub fn install_rank(kind: &str) -> usize {
    INSTALL_ORDER
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(INSTALL_ORDER.len())
}

/// Total order over GVKs: install rank, then kind, group and version
pub fn compare_kinds(a: &GroupVersionKind, b: &GroupVersionKind) -> Ordering {
    install_rank(&a.kind)
        .cmp(&install_rank(&b.kind))
        .then_with(|| a.kind.cmp(&b.kind))
        .then_with(|| a.group.cmp(&b.group))
        .then_with(|| a.version.cmp(&b.version))
}

/// Total order over documents: kind order, then namespace, then name
pub fn compare_documents(a: &ResourceDocument, b: &ResourceDocument) -> Ordering {
    compare_kinds(&a.gvk(), &b.gvk())
        .then_with(|| a.namespace().unwrap_or_default().cmp(b.namespace().unwrap_or_default()))
        .then_with(|| a.name().cmp(b.name()))
}

/// Identity of a resource: two documents are the same resource iff their keys are equal
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub gvk: GroupVersionKind,
    /// Empty for cluster-scoped resources
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(gvk: GroupVersionKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            gvk,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.gvk.kind
    }

    pub fn namespace(&self) -> Option<&str> {
        Some(self.namespace.as_str()).filter(|ns| !ns.is_empty())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace() {
            Some(ns) => write!(f, "{}/{}/{}", ns, self.gvk.kind, self.name),
            None => write!(f, "{}/{}", self.gvk.kind, self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gvk(api_version: &str, kind: &str) -> GroupVersionKind {
        GroupVersionKind::from_api_version(api_version, kind)
    }

    #[test]
    fn test_install_order_dependencies() {
        assert!(install_rank("Namespace") < install_rank("ConfigMap"));
        assert!(install_rank("CustomResourceDefinition") < install_rank("ClusterRole"));
        assert!(install_rank("Role") < install_rank("RoleBinding"));
        assert!(install_rank("Service") < install_rank("Deployment"));
        assert!(install_rank("Deployment") < install_rank("Ingress"));
        assert_eq!(install_rank("Widget"), INSTALL_ORDER.len());
    }

    #[test]
    fn test_unlisted_kinds_sort_last_and_lexically() {
        let mut kinds = vec![
            gvk("example.com/v1", "Zebra"),
            gvk("apiregistration.k8s.io/v1", "APIService"),
            gvk("example.com/v1", "Apple"),
            gvk("v1", "Namespace"),
        ];
        kinds.sort_by(compare_kinds);

        let names: Vec<&str> = kinds.iter().map(|g| g.kind.as_str()).collect();
        assert_eq!(names, vec!["Namespace", "APIService", "Apple", "Zebra"]);
    }

    #[test]
    fn test_same_kind_different_groups_are_ordered() {
        let a = gvk("apps/v1", "Deployment");
        let b = gvk("extensions/v1beta1", "Deployment");
        assert_eq!(compare_kinds(&a, &b), Ordering::Less);
        assert_eq!(compare_kinds(&b, &a), Ordering::Greater);
    }

    #[test]
    fn test_documents_tie_break_on_namespace_then_name() {
        let mut a = ResourceDocument::new("v1", "ConfigMap", "b");
        a.set_namespace(Some("ns1".to_string()));
        let mut b = ResourceDocument::new("v1", "ConfigMap", "a");
        b.set_namespace(Some("ns2".to_string()));
        let mut c = ResourceDocument::new("v1", "ConfigMap", "a");
        c.set_namespace(Some("ns1".to_string()));

        let mut docs = vec![a, b, c];
        docs.sort_by(compare_documents);
        let names: Vec<String> = docs.iter().map(|d| d.display_name()).collect();
        assert_eq!(
            names,
            vec!["ns1/ConfigMap/a", "ns1/ConfigMap/b", "ns2/ConfigMap/a"]
        );
    }

    #[test]
    fn test_key_display() {
        let key = ResourceKey::new(gvk("v1", "Namespace"), "", "prod");
        assert_eq!(key.to_string(), "Namespace/prod");

        let key = ResourceKey::new(gvk("v1", "ConfigMap"), "prod", "cm");
        assert_eq!(key.to_string(), "prod/ConfigMap/cm");
    }
}
