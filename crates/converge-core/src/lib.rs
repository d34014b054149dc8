//! Converge Core - Resource document model for the Converge reconciler
//!
//! This crate provides the foundational types used throughout Converge:
//! - `ResourceDocument`: A schema-less Kubernetes object with an open JSON body
//! - `ResourceKey`: The identity of a resource (GVK + namespace + name)
//! - `ResourceList`: Grouping, sorting, filtering and keying of documents
//! - `LabelSelector`: Equality-based label matching
//! - `parse_manifests`: Multi-document YAML/JSON manifest parsing

pub mod collection;
pub mod document;
pub mod error;
pub mod key;
pub mod manifest;
pub mod selector;

pub use collection::{ResourceList, VersionedGroup};
pub use document::{CRD_KIND, GroupVersionKind, NAMESPACE_KIND, ObjectMeta, ResourceDocument};
pub use error::{CoreError, Result};
pub use key::{INSTALL_ORDER, ResourceKey, compare_documents, compare_kinds, install_rank};
pub use manifest::parse_manifests;
pub use selector::LabelSelector;
