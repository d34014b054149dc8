//! Converge Kube - Declarative reconciliation of Kubernetes resources
//!
//! This crate provides:
//! - **Cluster**: The `Cluster` trait, a live `kube`-backed implementation and an in-memory mock
//! - **Cache**: Resource cache keyed by identity, locked until initialized
//! - **Patch**: JSON merge patches between documents, ignoring server-generated fields
//! - **Installer**: Ordered create/update/delete passes scoped by ownership labels
//! - **Hooks**: Lifecycle callbacks around every operation, including the last-applied recorder
//! - **Readiness**: Per-kind readiness polling (CRDs, Deployments)
//! - **Retry**: Bounded exponential backoff for cluster writes
//! - **Diff**: Text rendering of reconciliation plans

pub mod annotations;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod crd;
pub mod diff;
pub mod error;
pub mod hooks;
pub mod installer;
pub mod patch;
pub mod plan;
pub mod readiness;
pub mod retry;

pub use annotations::{LAST_APPLIED_ANNOTATION, decode_last_applied, stamp_last_applied};
pub use cache::ResourceCache;
pub use cluster::{
    Cluster, ListScope, LiveCluster, MockCluster, Operation, ResourceType, Scope, Verb, list_all,
};
pub use config::ReconcilerConfig;
pub use diff::{ChangeType, DiffContent, ResourceChange, plan_changes, render_plan};
pub use error::{KubeError, Result};
pub use hooks::{HookChain, HookPhase, LastAppliedHook, LifecycleHook};
pub use installer::{Installer, InstallerBuilder};
pub use patch::{MergePatch, apply_patch, get_patch, matches, strip_generated};
pub use plan::{PlannedUpdate, ReconcilePlan, ReconcileSummary, UpdatedResource};
pub use readiness::{CrdEstablished, DeploymentReady, ReadinessCheck, ReadinessConfig, ReadinessRegistry};
pub use retry::{RetryPolicy, with_retry};
