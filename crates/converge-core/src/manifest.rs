//! Multi-document manifest parsing
//!
//! Splits a YAML stream (JSON is accepted as a YAML subset) into resource
//! documents. Empty and comment-only documents are skipped, and `kind: List`
//! wrappers are flattened into their items.

use serde::Deserialize;
use serde_json::Value;

use crate::document::ResourceDocument;
use crate::error::{CoreError, Result};

/// Parse every resource document in `content`
pub fn parse_manifests(content: &str) -> Result<Vec<ResourceDocument>> {
    let mut resources = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let yaml = serde_yaml::Value::deserialize(document).map_err(|e| {
            CoreError::InvalidDocument {
                index,
                message: e.to_string(),
            }
        })?;

        if yaml.is_null() {
            continue;
        }

        let value = serde_json::to_value(&yaml).map_err(|e| CoreError::InvalidDocument {
            index,
            message: e.to_string(),
        })?;

        collect_document(value, index, &mut resources)?;
    }

    Ok(resources)
}

fn collect_document(value: Value, index: usize, out: &mut Vec<ResourceDocument>) -> Result<()> {
    if is_list(&value) {
        let items = match value.get("items") {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(CoreError::InvalidDocument {
                    index,
                    message: "List items must be an array".to_string(),
                });
            }
        };
        for item in items {
            collect_document(item, index, out)?;
        }
        return Ok(());
    }

    let doc = ResourceDocument::from_value(value).map_err(|e| CoreError::InvalidDocument {
        index,
        message: e.to_string(),
    })?;
    out.push(doc);
    Ok(())
}

fn is_list(value: &Value) -> bool {
    value
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind == "List" || (kind.ends_with("List") && value.get("items").is_some()))
}
