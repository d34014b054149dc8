//! JSON merge patches between resource documents
//!
//! Patches follow RFC 7386: objects merge recursively, `null` removes a
//! field, and any other value (arrays included) replaces the target
//! wholesale. Server-generated fields are zeroed before comparing so that
//! a freshly read live object matches the document it was written from.

use converge_core::ResourceDocument;
use serde_json::{Map, Value};
use std::fmt;

use crate::annotations::LAST_APPLIED_ANNOTATION;
use crate::error::{KubeError, Result};

/// Metadata fields owned by the API server
const GENERATED_METADATA: &[&str] = &[
    "uid",
    "resourceVersion",
    "generation",
    "creationTimestamp",
    "deletionTimestamp",
    "deletionGracePeriodSeconds",
    "managedFields",
    "selfLink",
    "finalizers",
    "ownerReferences",
];

/// An RFC 7386 merge patch
#[derive(Debug, Clone, PartialEq)]
pub struct MergePatch(Value);

impl MergePatch {
    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// A patch is empty when applying it changes nothing
    pub fn is_empty(&self) -> bool {
        matches!(&self.0, Value::Object(map) if map.is_empty())
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(Self(serde_json::from_slice(bytes)?))
    }
}

impl From<Value> for MergePatch {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl fmt::Display for MergePatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Copy of `doc` without server-generated fields, status or the last-applied annotation
pub fn strip_generated(doc: &ResourceDocument) -> ResourceDocument {
    let mut stripped = doc.clone();
    for field in GENERATED_METADATA {
        stripped.metadata.extra.remove(*field);
    }
    stripped.remove_annotation(LAST_APPLIED_ANNOTATION);
    stripped.body.remove("status");
    stripped
}

/// Merge patch turning `from` into `to`, both zeroed first
pub fn get_patch(from: &ResourceDocument, to: &ResourceDocument) -> MergePatch {
    let from = strip_generated(from).to_value();
    let to = strip_generated(to).to_value();
    MergePatch(diff_values(&from, &to).unwrap_or_else(|| Value::Object(Map::new())))
}

/// Whether two documents are equal once zeroed
pub fn matches(a: &ResourceDocument, b: &ResourceDocument) -> bool {
    get_patch(a, b).is_empty()
}

/// Apply a merge patch to `doc` in place
///
/// Fails, leaving `doc` untouched, when the result is not a resource document.
pub fn apply_patch(doc: &mut ResourceDocument, patch: &MergePatch) -> Result<()> {
    let mut value = doc.to_value();
    json_patch::merge(&mut value, &patch.0);

    *doc = ResourceDocument::from_value(value).map_err(|e| KubeError::InvalidPatch {
        resource: doc.display_name(),
        message: e.to_string(),
    })?;
    Ok(())
}

/// Merge patch between two JSON values, `None` when they are equal
fn diff_values(from: &Value, to: &Value) -> Option<Value> {
    match (from, to) {
        (Value::Object(from), Value::Object(to)) => {
            let mut patch = Map::new();

            for (key, old) in from {
                match to.get(key) {
                    Some(new) => {
                        if let Some(change) = diff_values(old, new) {
                            patch.insert(key.clone(), change);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                }
            }
            for (key, new) in to {
                if !from.contains_key(key) {
                    patch.insert(key.clone(), new.clone());
                }
            }

            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        _ if from == to => None,
        _ => Some(to.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> ResourceDocument {
        ResourceDocument::from_value(value).unwrap()
    }

    fn config_map(data: Value) -> ResourceDocument {
        doc(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings", "namespace": "prod"},
            "data": data
        }))
    }

    #[test]
    fn test_patch_of_identical_documents_is_empty() {
        let a = config_map(json!({"a": "1"}));
        assert!(get_patch(&a, &a).is_empty());
        assert!(matches(&a, &a));
    }

    #[test]
    fn test_changed_value() {
        let patch = get_patch(&config_map(json!({"a": "1"})), &config_map(json!({"a": "2"})));
        assert_eq!(patch.as_value(), &json!({"data": {"a": "2"}}));
    }

    #[test]
    fn test_removed_and_added_fields() {
        let patch = get_patch(
            &config_map(json!({"a": "1", "b": "2"})),
            &config_map(json!({"a": "1", "c": "3"})),
        );
        assert_eq!(patch.as_value(), &json!({"data": {"b": null, "c": "3"}}));
    }

    #[test]
    fn test_arrays_replace_wholesale() {
        let a = doc(json!({
            "apiVersion": "v1", "kind": "Service",
            "metadata": {"name": "web"},
            "spec": {"ports": [{"port": 80}, {"port": 443}]}
        }));
        let b = doc(json!({
            "apiVersion": "v1", "kind": "Service",
            "metadata": {"name": "web"},
            "spec": {"ports": [{"port": 80}]}
        }));
        assert_eq!(
            get_patch(&a, &b).as_value(),
            &json!({"spec": {"ports": [{"port": 80}]}})
        );
    }

    #[test]
    fn test_generated_fields_are_ignored() {
        let intent = config_map(json!({"a": "1"}));
        let mut live = intent.clone();
        live.metadata.extra.insert("uid".to_string(), json!("abc"));
        live.metadata.extra.insert("resourceVersion".to_string(), json!("9"));
        live.metadata.extra.insert("managedFields".to_string(), json!([{"manager": "x"}]));
        live.set_annotation(LAST_APPLIED_ANNOTATION, "{}");
        live.body.insert("status".to_string(), json!({"phase": "Active"}));

        assert!(matches(&intent, &live));
    }

    #[test]
    fn test_apply_patch() {
        let mut live = config_map(json!({"a": "1", "b": "2"}));
        live.metadata.extra.insert("resourceVersion".to_string(), json!("5"));

        let patch = MergePatch::from(json!({"data": {"a": "2", "b": null}}));
        apply_patch(&mut live, &patch).unwrap();

        assert_eq!(live.field(&["data"]), Some(&json!({"a": "2"})));
        assert_eq!(live.metadata.extra.get("resourceVersion"), Some(&json!("5")));
    }

    #[test]
    fn test_apply_patch_rejects_broken_result() {
        let mut live = config_map(json!({"a": "1"}));
        let before = live.clone();

        let err = apply_patch(&mut live, &MergePatch::from(json!({"kind": null}))).unwrap_err();
        assert!(matches!(err, KubeError::InvalidPatch { .. }));
        assert_eq!(live, before);

        assert!(apply_patch(&mut live, &MergePatch::from(json!([1]))).is_err());
    }

    #[test]
    fn test_patch_bytes() {
        let patch = MergePatch::from(json!({"data": {"a": "2"}}));
        let bytes = patch.to_bytes().unwrap();
        assert_eq!(bytes, br#"{"data":{"a":"2"}}"#);
        assert_eq!(MergePatch::from_slice(&bytes).unwrap(), patch);
    }
}
