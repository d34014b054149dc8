//! Operations over collections of resource documents
//!
//! Every operation returns a fresh collection; the input is never mutated,
//! so cached and desired document sets cannot alias each other.

use std::collections::HashMap;
use std::ops::Deref;

use crate::document::{GroupVersionKind, ResourceDocument};
use crate::key::{ResourceKey, compare_documents, compare_kinds};
use crate::selector::LabelSelector;

/// Documents of a single GVK, sorted by namespace and name
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedGroup {
    pub gvk: GroupVersionKind,
    pub resources: Vec<ResourceDocument>,
}

impl VersionedGroup {
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// An owned list of resource documents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceList(Vec<ResourceDocument>);

impl ResourceList {
    pub fn new(resources: Vec<ResourceDocument>) -> Self {
        Self(resources)
    }

    pub fn into_inner(self) -> Vec<ResourceDocument> {
        self.0
    }

    /// Documents for which `predicate` holds
    pub fn filter(&self, predicate: impl Fn(&ResourceDocument) -> bool) -> Self {
        Self(self.0.iter().filter(|d| predicate(d)).cloned().collect())
    }

    /// Documents whose labels satisfy `selector`
    pub fn with_labels(&self, selector: &LabelSelector) -> Self {
        self.filter(|d| selector.matches(d.labels()))
    }

    /// Copy sorted by install order, namespace and name
    pub fn sorted(&self) -> Self {
        let mut resources = self.0.clone();
        resources.sort_by(compare_documents);
        Self(resources)
    }

    /// Index by resource key
    ///
    /// When two documents share a key the later one wins; use
    /// [`ResourceList::duplicate_keys`] to detect such collisions.
    pub fn by_key(&self) -> HashMap<ResourceKey, ResourceDocument> {
        let mut map = HashMap::with_capacity(self.0.len());
        for doc in &self.0 {
            if let Some(previous) = map.insert(doc.key(), doc.clone()) {
                tracing::warn!(
                    resource = %previous.display_name(),
                    "duplicate resource key, keeping the last document"
                );
            }
        }
        map
    }

    /// Keys that appear more than once, in sorted order
    pub fn duplicate_keys(&self) -> Vec<ResourceKey> {
        let mut counts: HashMap<ResourceKey, usize> = HashMap::new();
        for doc in &self.0 {
            *counts.entry(doc.key()).or_default() += 1;
        }
        let mut duplicates: Vec<ResourceKey> = counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(key, _)| key)
            .collect();
        duplicates.sort();
        duplicates
    }

    /// Group by GVK, groups in install order and documents sorted inside each group
    pub fn grouped_by_gvk(&self) -> Vec<VersionedGroup> {
        let mut groups: HashMap<GroupVersionKind, Vec<ResourceDocument>> = HashMap::new();
        for doc in &self.0 {
            groups.entry(doc.gvk()).or_default().push(doc.clone());
        }

        let mut groups: Vec<VersionedGroup> = groups
            .into_iter()
            .map(|(gvk, mut resources)| {
                resources.sort_by(compare_documents);
                VersionedGroup { gvk, resources }
            })
            .collect();
        groups.sort_by(|a, b| compare_kinds(&a.gvk, &b.gvk));
        groups
    }
}

impl Deref for ResourceList {
    type Target = [ResourceDocument];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<ResourceDocument>> for ResourceList {
    fn from(resources: Vec<ResourceDocument>) -> Self {
        Self(resources)
    }
}

impl FromIterator<ResourceDocument> for ResourceList {
    fn from_iter<I: IntoIterator<Item = ResourceDocument>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ResourceList {
    type Item = ResourceDocument;
    type IntoIter = std::vec::IntoIter<ResourceDocument>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(api_version: &str, kind: &str, ns: Option<&str>, name: &str) -> ResourceDocument {
        let mut d = ResourceDocument::new(api_version, kind, name);
        d.set_namespace(ns.map(String::from));
        d
    }

    fn sample() -> ResourceList {
        ResourceList::from(vec![
            doc("apps/v1", "Deployment", Some("prod"), "web"),
            doc("v1", "ConfigMap", Some("prod"), "b"),
            doc("v1", "Namespace", None, "prod"),
            doc("v1", "ConfigMap", Some("prod"), "a"),
            doc("example.com/v1", "Widget", Some("prod"), "w"),
        ])
    }

    #[test]
    fn test_grouped_by_gvk_order() {
        let groups = sample().grouped_by_gvk();
        let kinds: Vec<&str> = groups.iter().map(|g| g.gvk.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Namespace", "ConfigMap", "Deployment", "Widget"]);

        let config_maps: Vec<&str> = groups[1].resources.iter().map(|d| d.name()).collect();
        assert_eq!(config_maps, vec!["a", "b"]);
    }

    #[test]
    fn test_sorted_does_not_mutate_input() {
        let list = sample();
        let sorted = list.sorted();

        assert_eq!(sorted[0].kind, "Namespace");
        assert_eq!(list[0].kind, "Deployment");
    }

    #[test]
    fn test_with_labels() {
        let mut list = sample().into_inner();
        list[0].set_label("owner", "team-a");
        let list = ResourceList::from(list);

        let owned = list.with_labels(&LabelSelector::new().with("owner", "team-a"));
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].name(), "web");
    }

    #[test]
    fn test_by_key_last_write_wins() {
        let mut first = doc("v1", "ConfigMap", Some("prod"), "a");
        first.set_label("version", "1");
        let mut second = doc("v1", "ConfigMap", Some("prod"), "a");
        second.set_label("version", "2");
        let list = ResourceList::from(vec![first, second]);

        let map = list.by_key();
        assert_eq!(map.len(), 1);
        let only = map.values().next().unwrap();
        assert_eq!(only.labels().get("version").map(String::as_str), Some("2"));
        assert_eq!(list.duplicate_keys().len(), 1);
    }
}
