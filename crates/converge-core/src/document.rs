//! Generic Kubernetes resource documents
//!
//! A [`ResourceDocument`] carries the identity fields Converge needs
//! (apiVersion, kind, name, namespace, labels, annotations) as typed fields,
//! and keeps everything else as an open JSON tree so that unknown fields
//! survive a decode/encode round trip.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CoreError, Result};
use crate::key::ResourceKey;

/// Kind name of CustomResourceDefinition objects
pub const CRD_KIND: &str = "CustomResourceDefinition";

/// Kind name of Namespace objects
pub const NAMESPACE_KIND: &str = "Namespace";

/// Group-Version-Kind of an API resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group (empty for the core group)
    pub group: String,
    /// API version
    pub version: String,
    /// Resource kind
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Build a GVK from an `apiVersion` string and a kind
    ///
    /// - "apps/v1" -> group="apps", version="v1"
    /// - "v1" -> group="", version="v1" (core API)
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.rsplit_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };

        Self {
            group,
            version,
            kind: kind.to_string(),
        }
    }

    /// The `apiVersion` string for this GVK
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// Object metadata with the fields Converge manipulates broken out
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub labels: BTreeMap<String, String>,

    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub annotations: BTreeMap<String, String>,

    /// Every other metadata field (uid, resourceVersion, ownerReferences, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single Kubernetes-style object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDocument {
    pub api_version: String,

    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Every top-level field other than apiVersion, kind and metadata
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ResourceDocument {
    /// Create an empty document of the given type
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: ObjectMeta {
                name: name.into(),
                ..Default::default()
            },
            body: Map::new(),
        }
    }

    /// A bare `v1/Namespace` document
    pub fn namespace_object(name: impl Into<String>) -> Self {
        Self::new("v1", NAMESPACE_KIND, name)
    }

    /// Decode a document from a JSON value
    ///
    /// Fails if the value is not an object or lacks `apiVersion`/`kind`.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(CoreError::InvalidResource {
                message: "resource document must be an object".to_string(),
            });
        }
        let doc: Self = serde_json::from_value(value)?;
        doc.validate()?;
        Ok(doc)
    }

    /// Encode the document as a JSON value
    pub fn to_value(&self) -> Value {
        let mut metadata = self.metadata.extra.clone();
        if !self.metadata.name.is_empty() {
            metadata.insert("name".to_string(), Value::String(self.metadata.name.clone()));
        }
        if let Some(ns) = &self.metadata.namespace {
            metadata.insert("namespace".to_string(), Value::String(ns.clone()));
        }
        if !self.metadata.labels.is_empty() {
            metadata.insert("labels".to_string(), string_map(&self.metadata.labels));
        }
        if !self.metadata.annotations.is_empty() {
            metadata.insert(
                "annotations".to_string(),
                string_map(&self.metadata.annotations),
            );
        }

        let mut object = self.body.clone();
        object.insert(
            "apiVersion".to_string(),
            Value::String(self.api_version.clone()),
        );
        object.insert("kind".to_string(), Value::String(self.kind.clone()));
        object.insert("metadata".to_string(), Value::Object(metadata));
        Value::Object(object)
    }

    /// Check the identity fields are present
    pub fn validate(&self) -> Result<()> {
        if self.api_version.is_empty() {
            return Err(CoreError::MissingField {
                field: "apiVersion".to_string(),
            });
        }
        if self.kind.is_empty() {
            return Err(CoreError::MissingField {
                field: "kind".to_string(),
            });
        }
        if self.metadata.name.is_empty() {
            return Err(CoreError::MissingField {
                field: format!("metadata.name ({})", self.kind),
            });
        }
        Ok(())
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::from_api_version(&self.api_version, &self.kind)
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(
            self.gvk(),
            self.namespace().unwrap_or_default(),
            &self.metadata.name,
        )
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Namespace, treating an empty string as unset
    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    pub fn set_namespace(&mut self, namespace: Option<String>) {
        self.metadata.namespace = namespace.filter(|ns| !ns.is_empty());
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.metadata.labels
    }

    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.labels.insert(key.into(), value.into());
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.metadata.annotations
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.annotations.insert(key.into(), value.into());
    }

    pub fn remove_annotation(&mut self, key: &str) -> Option<String> {
        self.metadata.annotations.remove(key)
    }

    /// Look up a nested body field, e.g. `["spec", "replicas"]`
    pub fn field(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.body.get(*first)?, |value, segment| value.get(segment))
    }

    pub fn is_crd(&self) -> bool {
        self.kind == CRD_KIND
    }

    /// Display name used in logs and errors: `namespace/Kind/name` or `Kind/name`
    pub fn display_name(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}/{}", ns, self.kind, self.metadata.name),
            None => format!("{}/{}", self.kind, self.metadata.name),
        }
    }
}

impl fmt::Display for ResourceDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

fn string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment() -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "namespace": "prod",
                "labels": {"app": "web"},
                "uid": "1234",
                "resourceVersion": "42"
            },
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 1}
        })
    }

    #[test]
    fn test_round_trip_preserves_unknown_fields() {
        let value = deployment();
        let doc = ResourceDocument::from_value(value.clone()).unwrap();

        assert_eq!(doc.metadata.extra.get("uid"), Some(&json!("1234")));
        assert_eq!(doc.to_value(), value);
    }

    #[test]
    fn test_identity_accessors() {
        let doc = ResourceDocument::from_value(deployment()).unwrap();

        assert_eq!(doc.gvk(), GroupVersionKind::new("apps", "v1", "Deployment"));
        assert_eq!(doc.namespace(), Some("prod"));
        assert_eq!(doc.field(&["spec", "replicas"]), Some(&json!(3)));
        assert_eq!(doc.field(&["spec", "missing"]), None);
        assert_eq!(doc.display_name(), "prod/Deployment/web");
    }

    #[test]
    fn test_gvk_from_api_version() {
        let gvk = GroupVersionKind::from_api_version("networking.k8s.io/v1", "Ingress");
        assert_eq!(gvk.group, "networking.k8s.io");
        assert_eq!(gvk.version, "v1");

        let core = GroupVersionKind::from_api_version("v1", "ConfigMap");
        assert_eq!(core.group, "");
        assert_eq!(core.api_version(), "v1");
    }

    #[test]
    fn test_rejects_non_documents() {
        assert!(ResourceDocument::from_value(json!([1, 2])).is_err());
        assert!(ResourceDocument::from_value(json!({"kind": "ConfigMap"})).is_err());
        assert!(
            ResourceDocument::from_value(json!({"apiVersion": "v1", "kind": "ConfigMap"}))
                .is_err()
        );
    }

    #[test]
    fn test_null_labels_are_empty() {
        let doc = ResourceDocument::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "cm", "labels": null}
        }))
        .unwrap();

        assert!(doc.labels().is_empty());
    }

    #[test]
    fn test_empty_namespace_is_unset() {
        let mut doc = ResourceDocument::new("v1", "ConfigMap", "cm");
        doc.set_namespace(Some(String::new()));
        assert_eq!(doc.namespace(), None);
        assert_eq!(doc.key().namespace, "");
    }
}
