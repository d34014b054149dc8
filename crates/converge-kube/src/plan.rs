//! Reconciliation plans and run summaries

use converge_core::{ResourceDocument, ResourceKey};
use std::fmt;

use crate::patch::MergePatch;

/// An update the installer would perform
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedUpdate {
    /// Last-applied form currently cached
    pub cached: ResourceDocument,
    /// Prepared desired document
    pub desired: ResourceDocument,
    /// Patch turning `cached` into `desired`
    pub patch: MergePatch,
}

/// What a run would change, computed without writing
///
/// Every list is in install order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Target namespace of the run (empty when purging)
    pub namespace: String,
    /// Desired documents after labelling and namespace resolution
    pub desired: Vec<ResourceDocument>,
    pub creates: Vec<ResourceDocument>,
    pub updates: Vec<PlannedUpdate>,
    /// Cached last-applied forms of resources to delete
    pub deletes: Vec<ResourceDocument>,
    pub unchanged: Vec<ResourceKey>,
}

impl ReconcilePlan {
    /// Nothing would be written
    pub fn is_noop(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Summary of a run that executed this plan in full
    pub fn to_summary(&self) -> ReconcileSummary {
        ReconcileSummary {
            created: self.creates.iter().map(ResourceDocument::key).collect(),
            updated: self
                .updates
                .iter()
                .map(|u| UpdatedResource {
                    key: u.desired.key(),
                    patch: u.patch.clone(),
                })
                .collect(),
            deleted: self.deletes.iter().map(ResourceDocument::key).collect(),
            unchanged: self.unchanged.clone(),
        }
    }
}

/// A resource updated by a run and the patch that was applied
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatedResource {
    pub key: ResourceKey,
    pub patch: MergePatch,
}

/// Outcome of a successful run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileSummary {
    pub created: Vec<ResourceKey>,
    pub updated: Vec<UpdatedResource>,
    pub deleted: Vec<ResourceKey>,
    pub unchanged: Vec<ResourceKey>,
}

impl ReconcileSummary {
    /// The run wrote nothing
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Number of resources considered
    pub fn total(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len() + self.unchanged.len()
    }

    /// Format as human-readable summary
    pub fn summary(&self) -> String {
        let counts = [
            (self.created.len(), "created"),
            (self.updated.len(), "updated"),
            (self.deleted.len(), "deleted"),
            (self.unchanged.len(), "unchanged"),
        ];
        let parts: Vec<String> = counts
            .iter()
            .filter(|(count, _)| *count > 0)
            .map(|(count, label)| format!("{} {}", count, label))
            .collect();

        if parts.is_empty() {
            "No resources processed".to_string()
        } else {
            parts.join(", ")
        }
    }
}

impl fmt::Display for ReconcileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_map(name: &str) -> ResourceDocument {
        let mut doc = ResourceDocument::new("v1", "ConfigMap", name);
        doc.set_namespace(Some("prod".to_string()));
        doc
    }

    #[test]
    fn test_summary_text() {
        let plan = ReconcilePlan {
            creates: vec![config_map("a"), config_map("b")],
            updates: vec![PlannedUpdate {
                cached: config_map("c"),
                desired: config_map("c"),
                patch: MergePatch::from(json!({"data": {"x": "1"}})),
            }],
            unchanged: vec![config_map("d").key()],
            ..Default::default()
        };

        let summary = plan.to_summary();
        assert!(!summary.is_noop());
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.to_string(), "2 created, 1 updated, 1 unchanged");
        assert_eq!(summary.updated[0].key.name, "c");
    }

    #[test]
    fn test_empty_summary() {
        let summary = ReconcilePlan::default().to_summary();
        assert!(summary.is_noop());
        assert_eq!(summary.summary(), "No resources processed");
    }
}
