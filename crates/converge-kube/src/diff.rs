//! Text diffs of reconciliation plans
//!
//! Renders a [`ReconcilePlan`] as YAML diffs, one section per resource:
//! created resources as all-added lines, deleted ones as all-removed lines
//! and updates as a line diff between the cached last-applied form and the
//! desired document. Server-generated fields are stripped first.

use converge_core::{ResourceDocument, ResourceKey};
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use std::fmt::Write as _;

use crate::error::Result;
use crate::patch::strip_generated;
use crate::plan::ReconcilePlan;

/// A change to a single resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceChange {
    pub key: ResourceKey,

    /// Type of change
    pub change_type: ChangeType,

    /// Line diff of the YAML rendering
    pub diff: DiffContent,
}

impl ResourceChange {
    /// Get a display name for the resource
    pub fn display_name(&self) -> String {
        self.key.to_string()
    }
}

/// Type of resource change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Resource will be created
    Added,

    /// Resource will be updated
    Modified,

    /// Resource will be deleted
    Removed,
}

impl ChangeType {
    fn symbol(&self) -> &'static str {
        match self {
            ChangeType::Added => "+",
            ChangeType::Modified => "~",
            ChangeType::Removed => "-",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Added => write!(f, "added"),
            ChangeType::Modified => write!(f, "modified"),
            ChangeType::Removed => write!(f, "removed"),
        }
    }
}

/// Detailed diff content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffContent {
    /// Lines of the diff
    pub lines: Vec<DiffLine>,
}

impl DiffContent {
    /// Line diff between two texts
    pub fn between(old: &str, new: &str) -> Self {
        let diff = TextDiff::from_lines(old, new);
        let lines = diff
            .iter_all_changes()
            .map(|change| DiffLine {
                line_type: match change.tag() {
                    ChangeTag::Delete => LineType::Removed,
                    ChangeTag::Insert => LineType::Added,
                    ChangeTag::Equal => LineType::Context,
                },
                content: change.value().trim_end().to_string(),
                old_line_no: change.old_index(),
                new_line_no: change.new_index(),
            })
            .collect();

        Self { lines }
    }

    /// Every line of `content` as an addition
    pub fn addition(content: &str) -> Self {
        Self::between("", content)
    }

    /// Every line of `content` as a removal
    pub fn removal(content: &str) -> Self {
        Self::between(content, "")
    }

    /// Number of added and removed lines
    pub fn stats(&self) -> (usize, usize) {
        let added = self
            .lines
            .iter()
            .filter(|l| l.line_type == LineType::Added)
            .count();
        let removed = self
            .lines
            .iter()
            .filter(|l| l.line_type == LineType::Removed)
            .count();
        (added, removed)
    }

    /// Generate a unified diff string
    pub fn to_unified_diff(&self) -> String {
        let mut output = String::new();

        for line in &self.lines {
            let prefix = match line.line_type {
                LineType::Added => "+",
                LineType::Removed => "-",
                LineType::Context => " ",
            };
            output.push_str(prefix);
            output.push_str(&line.content);
            output.push('\n');
        }

        output
    }
}

/// A single line in a diff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffLine {
    /// Type of line
    pub line_type: LineType,

    /// Line content
    pub content: String,

    /// Line number in the old text
    pub old_line_no: Option<usize>,

    /// Line number in the new text
    pub new_line_no: Option<usize>,
}

/// Type of diff line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    Added,
    Removed,
    Context,
}

/// YAML rendering of a document without server-generated fields
pub fn to_yaml(resource: &ResourceDocument) -> Result<String> {
    Ok(serde_yaml::to_string(&strip_generated(resource).to_value())?)
}

/// Per-resource changes of a plan: deletes, then creates, then updates
pub fn plan_changes(plan: &ReconcilePlan) -> Result<Vec<ResourceChange>> {
    let mut changes = Vec::with_capacity(plan.deletes.len() + plan.creates.len() + plan.updates.len());

    for resource in plan.deletes.iter().rev() {
        changes.push(ResourceChange {
            key: resource.key(),
            change_type: ChangeType::Removed,
            diff: DiffContent::removal(&to_yaml(resource)?),
        });
    }
    for resource in &plan.creates {
        changes.push(ResourceChange {
            key: resource.key(),
            change_type: ChangeType::Added,
            diff: DiffContent::addition(&to_yaml(resource)?),
        });
    }
    for update in &plan.updates {
        changes.push(ResourceChange {
            key: update.desired.key(),
            change_type: ChangeType::Modified,
            diff: DiffContent::between(&to_yaml(&update.cached)?, &to_yaml(&update.desired)?),
        });
    }

    Ok(changes)
}

/// Render a plan as text, one diff section per changed resource
pub fn render_plan(plan: &ReconcilePlan) -> Result<String> {
    let changes = plan_changes(plan)?;
    if changes.is_empty() {
        return Ok("No changes\n".to_string());
    }

    let mut output = String::new();
    for change in &changes {
        // Writing to a String cannot fail
        let _ = writeln!(
            output,
            "{} {} ({})",
            change.change_type.symbol(),
            change.display_name(),
            change.change_type
        );
        output.push_str(&change.diff.to_unified_diff());
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::get_patch;
    use crate::plan::PlannedUpdate;
    use serde_json::json;

    fn config_map(value: &str) -> ResourceDocument {
        ResourceDocument::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings", "namespace": "prod", "uid": "1234"},
            "data": {"a": value}
        }))
        .unwrap()
    }

    #[test]
    fn test_render_update() {
        let cached = config_map("one");
        let desired = config_map("two");
        let plan = ReconcilePlan {
            namespace: "prod".to_string(),
            updates: vec![PlannedUpdate {
                patch: get_patch(&cached, &desired),
                cached,
                desired,
            }],
            ..Default::default()
        };

        insta::assert_snapshot!(render_plan(&plan).unwrap(), @r"
        ~ prod/ConfigMap/settings (modified)
         apiVersion: v1
         data:
        -  a: one
        +  a: two
         kind: ConfigMap
         metadata:
           name: settings
           namespace: prod
        ");
    }

    #[test]
    fn test_create_and_delete_are_whole_documents() {
        let plan = ReconcilePlan {
            creates: vec![config_map("one")],
            deletes: vec![ResourceDocument::namespace_object("old")],
            ..Default::default()
        };

        let changes = plan_changes(&plan).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].change_type, ChangeType::Removed);
        assert_eq!(changes[0].diff.stats(), (0, 4));
        assert_eq!(changes[1].change_type, ChangeType::Added);
        assert_eq!(changes[1].diff.stats().1, 0);
        assert!(
            changes[1]
                .diff
                .lines
                .iter()
                .all(|l| !l.content.contains("uid"))
        );
    }

    #[test]
    fn test_empty_plan() {
        assert_eq!(render_plan(&ReconcilePlan::default()).unwrap(), "No changes\n");
    }
}
