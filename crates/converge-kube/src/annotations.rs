//! Last-applied annotation
//!
//! Every resource written by Converge carries the JSON encoding of the
//! document it was written from. The annotation is the only persisted
//! state: it is what later runs diff against, so drift introduced by other
//! writers (defaulting, controllers, status) never shows up as a change.

use converge_core::ResourceDocument;

use crate::error::{KubeError, Result};

/// Annotation holding the JSON-encoded last-applied document
pub const LAST_APPLIED_ANNOTATION: &str = "converge.dev/last-applied-configuration";

/// Record `intent` as the last-applied configuration of `target`
///
/// The encoded document never contains the annotation itself.
pub fn stamp_last_applied(target: &mut ResourceDocument, intent: &ResourceDocument) -> Result<()> {
    let mut intent = intent.clone();
    intent.remove_annotation(LAST_APPLIED_ANNOTATION);
    let encoded = serde_json::to_string(&intent.to_value())?;
    target.set_annotation(LAST_APPLIED_ANNOTATION, encoded);
    Ok(())
}

/// Decode the last-applied document stored on `live`
///
/// Returns `None` when the annotation is absent. The decoded document gets
/// the raw annotation re-attached so that it compares equal to a freshly
/// stamped write of the same intent.
pub fn decode_last_applied(live: &ResourceDocument) -> Result<Option<ResourceDocument>> {
    let Some(raw) = live.annotation(LAST_APPLIED_ANNOTATION) else {
        return Ok(None);
    };

    let corrupt = |message: String| KubeError::CorruptLastApplied {
        resource: live.display_name(),
        message,
    };

    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| corrupt(e.to_string()))?;
    let mut decoded = ResourceDocument::from_value(value).map_err(|e| corrupt(e.to_string()))?;

    let (expected, actual) = (live.key(), decoded.key());
    if expected.gvk.group != actual.gvk.group
        || expected.gvk.kind != actual.gvk.kind
        || expected.namespace != actual.namespace
        || expected.name != actual.name
    {
        return Err(corrupt(format!("annotation describes {}", actual)));
    }

    decoded.set_annotation(LAST_APPLIED_ANNOTATION, raw);
    Ok(Some(decoded))
}
