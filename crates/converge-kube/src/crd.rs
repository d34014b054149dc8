//! CustomResourceDefinition inspection
//!
//! Helpers reading the served type, scope and establishment state out of a
//! CRD document without a typed `k8s-openapi` round trip, so CRDs of any
//! apiextensions version are handled the same way.

use converge_core::{GroupVersionKind, ResourceDocument};
use serde_json::Value;

use crate::cluster::{ResourceType, Scope};

/// API group of CustomResourceDefinition objects
pub const CRD_GROUP: &str = "apiextensions.k8s.io";

/// The custom type a CRD serves
///
/// The storage version is preferred; otherwise the first served version.
pub fn served_type(crd: &ResourceDocument) -> Option<ResourceType> {
    if !crd.is_crd() {
        return None;
    }

    let group = crd.field(&["spec", "group"])?.as_str()?;
    let kind = crd.field(&["spec", "names", "kind"])?.as_str()?;
    let plural = crd.field(&["spec", "names", "plural"])?.as_str()?;
    let scope = scope(crd)?;
    let version = served_version(crd)?;

    Some(ResourceType::new(
        GroupVersionKind::new(group, version, kind),
        plural,
        scope,
    ))
}

/// Scope declared by `spec.scope`
pub fn scope(crd: &ResourceDocument) -> Option<Scope> {
    crd.field(&["spec", "scope"])
        .and_then(Value::as_str)
        .and_then(Scope::from_crd_scope)
}

/// Whether this CRD defines the given group and kind
pub fn defines(crd: &ResourceDocument, gvk: &GroupVersionKind) -> bool {
    crd.is_crd()
        && crd.field(&["spec", "group"]).and_then(Value::as_str) == Some(gvk.group.as_str())
        && crd.field(&["spec", "names", "kind"]).and_then(Value::as_str) == Some(gvk.kind.as_str())
}

/// A CRD is established when its `Established` condition is `True`
pub fn is_established(crd: &ResourceDocument) -> bool {
    crd.field(&["status", "conditions"])
        .and_then(Value::as_array)
        .is_some_and(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some("Established")
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        })
}

fn served_version(crd: &ResourceDocument) -> Option<&str> {
    let versions = crd.field(&["spec", "versions"])?.as_array()?;
    let served: Vec<&Value> = versions
        .iter()
        .filter(|v| v.get("served").and_then(Value::as_bool).unwrap_or(false))
        .collect();

    served
        .iter()
        .find(|v| v.get("storage").and_then(Value::as_bool).unwrap_or(false))
        .or_else(|| served.first())
        .and_then(|v| v.get("name"))
        .and_then(Value::as_str)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn widget_crd(scope: &str) -> ResourceDocument {
        ResourceDocument::from_value(json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": {"name": "widgets.example.com"},
            "spec": {
                "group": "example.com",
                "names": {"kind": "Widget", "plural": "widgets"},
                "scope": scope,
                "versions": [
                    {"name": "v1alpha1", "served": true, "storage": false},
                    {"name": "v1", "served": true, "storage": true},
                    {"name": "v0", "served": false, "storage": false}
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_served_type_prefers_storage_version() {
        let served = served_type(&widget_crd("Namespaced")).unwrap();
        assert_eq!(served.gvk, GroupVersionKind::new("example.com", "v1", "Widget"));
        assert_eq!(served.plural, "widgets");
        assert_eq!(served.scope, Scope::Namespaced);
    }

    #[test]
    fn test_defines_matches_group_and_kind() {
        let crd = widget_crd("Cluster");
        assert!(defines(&crd, &GroupVersionKind::new("example.com", "v2", "Widget")));
        assert!(!defines(&crd, &GroupVersionKind::new("other.com", "v1", "Widget")));
        assert_eq!(scope(&crd), Some(Scope::Cluster));
    }

    #[test]
    fn test_established_condition() {
        let mut crd = widget_crd("Namespaced");
        assert!(!is_established(&crd));

        crd.body.insert(
            "status".to_string(),
            json!({"conditions": [
                {"type": "NamesAccepted", "status": "True"},
                {"type": "Established", "status": "False"}
            ]}),
        );
        assert!(!is_established(&crd));

        crd.body.insert(
            "status".to_string(),
            json!({"conditions": [{"type": "Established", "status": "True"}]}),
        );
        assert!(is_established(&crd));
    }
}
