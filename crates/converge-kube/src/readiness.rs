//! Readiness waits after writes
//!
//! A [`ReadinessRegistry`] maps kinds to [`ReadinessCheck`]s. Kinds without
//! a check are ready as soon as the write succeeds. Checks are polled with
//! a fixed delay and a bounded number of attempts; running out of attempts
//! fails the resource.
//!
//! Built-in checks:
//! - `CustomResourceDefinition`: `Established=True` and the served custom
//!   type can be listed (REST mappings are refreshed first)
//! - `Deployment`: at least one ready replica, unless scaled to zero

use async_trait::async_trait;
use converge_core::ResourceDocument;
use k8s_openapi::api::apps::v1::DeploymentStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cluster::Cluster;
use crate::crd;
use crate::error::{KubeError, Result};
use crate::retry::sleep;

/// Poll policy for readiness waits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadinessConfig {
    /// Delay between polls
    #[serde(with = "humantime_serde")]
    pub delay: Duration,

    /// Polls before giving up
    pub attempts: u32,

    /// Polls before giving up on a CustomResourceDefinition
    pub crd_attempts: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            attempts: 150,
            crd_attempts: 300,
        }
    }
}

/// Decides whether a written resource is ready for dependents
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    /// Poll once; `resource` is the document that was written
    async fn is_ready(&self, cluster: &dyn Cluster, resource: &ResourceDocument) -> Result<bool>;

    /// Poll budget for this check
    fn attempts(&self, config: &ReadinessConfig) -> u32 {
        config.attempts
    }
}

/// CRD is established and its custom type is served
#[derive(Debug, Clone, Copy, Default)]
pub struct CrdEstablished;

#[async_trait]
impl ReadinessCheck for CrdEstablished {
    async fn is_ready(&self, cluster: &dyn Cluster, resource: &ResourceDocument) -> Result<bool> {
        let Some(live) = cluster.get(&resource.key()).await? else {
            return Ok(false);
        };
        if !crd::is_established(&live) {
            return Ok(false);
        }

        cluster.refresh_mappings().await?;

        let Some(served) = crd::served_type(&live) else {
            return Err(KubeError::InvalidConfig(format!(
                "{} does not declare a served version",
                resource.display_name()
            )));
        };
        match cluster.list(&served.gvk, None).await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::debug!(gvk = %served.gvk, error = %e, "custom type not served yet");
                Ok(false)
            }
        }
    }

    fn attempts(&self, config: &ReadinessConfig) -> u32 {
        config.crd_attempts
    }
}

/// Deployment has at least one ready replica
#[derive(Debug, Clone, Copy, Default)]
pub struct DeploymentReady;

#[async_trait]
impl ReadinessCheck for DeploymentReady {
    async fn is_ready(&self, cluster: &dyn Cluster, resource: &ResourceDocument) -> Result<bool> {
        if resource.field(&["spec", "replicas"]).and_then(Value::as_i64) == Some(0) {
            return Ok(true);
        }

        let Some(live) = cluster.get(&resource.key()).await? else {
            return Ok(false);
        };
        let status: DeploymentStatus = match live.body.get("status") {
            Some(status) => serde_json::from_value(status.clone())?,
            None => return Ok(false),
        };

        Ok(status.ready_replicas.unwrap_or(0) >= 1)
    }
}

/// Readiness checks by kind
#[derive(Clone, Default)]
pub struct ReadinessRegistry {
    checks: HashMap<String, Arc<dyn ReadinessCheck>>,
}

impl ReadinessRegistry {
    /// A registry without any checks: everything is ready immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the CRD and Deployment checks
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("CustomResourceDefinition", CrdEstablished);
        registry.register("Deployment", DeploymentReady);
        registry
    }

    /// Register (or replace) the check for `kind`
    pub fn register(&mut self, kind: impl Into<String>, check: impl ReadinessCheck + 'static) {
        self.checks.insert(kind.into(), Arc::new(check));
    }

    pub fn has_check(&self, kind: &str) -> bool {
        self.checks.contains_key(kind)
    }

    /// Poll until `resource` is ready, its budget runs out or `cancel` fires
    ///
    /// Transient errors while polling count as "not ready yet".
    pub async fn wait_ready(
        &self,
        cluster: &dyn Cluster,
        resource: &ResourceDocument,
        config: &ReadinessConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(check) = self.checks.get(&resource.kind) else {
            return Ok(());
        };

        let attempts = check.attempts(config).max(1);
        tracing::debug!(resource = %resource.display_name(), attempts, "waiting for readiness");

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(KubeError::Cancelled);
            }

            match check.is_ready(cluster, resource).await {
                Ok(true) => {
                    tracing::debug!(resource = %resource.display_name(), attempt, "resource ready");
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) if e.is_transient() => {
                    tracing::debug!(resource = %resource.display_name(), error = %e, "readiness poll failed");
                }
                Err(e) => return Err(e),
            }

            if attempt < attempts {
                sleep(config.delay, cancel).await?;
            }
        }

        Err(KubeError::ReadinessTimeout {
            resource: resource.display_name(),
            attempts,
        })
    }
}

impl std::fmt::Debug for ReadinessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&String> = self.checks.keys().collect();
        kinds.sort();
        f.debug_struct("ReadinessRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{MockCluster, Verb};
    use serde_json::json;

    fn fast(attempts: u32) -> ReadinessConfig {
        ReadinessConfig {
            delay: Duration::from_millis(1),
            attempts,
            crd_attempts: attempts,
        }
    }

    fn deployment(replicas: i64) -> ResourceDocument {
        ResourceDocument::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "prod"},
            "spec": {"replicas": replicas}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_deployment_waits_for_ready_replica() {
        let cluster = MockCluster::new();
        let web = deployment(2);
        cluster.insert(web.clone());
        cluster.ready_after(web.key(), 4);

        let registry = ReadinessRegistry::with_defaults();
        registry
            .wait_ready(&cluster, &web, &fast(10), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(cluster.get_count(&web.key()), 4);
    }

    #[tokio::test]
    async fn test_deployment_timeout() {
        let cluster = MockCluster::new();
        let web = deployment(1);
        cluster.insert(web.clone());
        cluster.ready_after(web.key(), 100);

        let err = ReadinessRegistry::with_defaults()
            .wait_ready(&cluster, &web, &fast(3), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::ReadinessTimeout { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_zero_replicas_is_ready_without_polling() {
        let cluster = MockCluster::new();
        let web = deployment(0);

        ReadinessRegistry::with_defaults()
            .wait_ready(&cluster, &web, &fast(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(cluster.get_count(&web.key()), 0);
    }

    #[tokio::test]
    async fn test_transient_poll_errors_are_tolerated() {
        let cluster = MockCluster::new();
        let web = deployment(1);
        let mut live = web.clone();
        live.body
            .insert("status".to_string(), json!({"readyReplicas": 1}));
        cluster.insert(live);
        cluster.fail_next(Verb::Get, web.key(), 2);

        ReadinessRegistry::with_defaults()
            .wait_ready(&cluster, &web, &fast(5), &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_crd_established_refreshes_mappings() {
        let cluster = MockCluster::new();
        let crd = crate::crd::tests::widget_crd("Namespaced");
        cluster.create(&crd).await.unwrap();

        ReadinessRegistry::with_defaults()
            .wait_ready(&cluster, &crd, &fast(3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(cluster.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_established_crd_waits_until_type_lists() {
        let cluster = MockCluster::new();
        let crd = crate::crd::tests::widget_crd("Namespaced");
        let widget = converge_core::GroupVersionKind::new("example.com", "v1", "Widget");
        cluster.create(&crd).await.unwrap();
        cluster.fail_list(widget.clone());

        let registry = ReadinessRegistry::with_defaults();
        let err = registry
            .wait_ready(&cluster, &crd, &fast(3), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::ReadinessTimeout { attempts: 3, .. }));

        cluster.restore_list(&widget);
        registry
            .wait_ready(&cluster, &crd, &fast(3), &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_kinds_without_check_are_ready() {
        let cluster = MockCluster::new();
        let cm = ResourceDocument::new("v1", "ConfigMap", "missing");

        let registry = ReadinessRegistry::with_defaults();
        assert!(registry.has_check("CustomResourceDefinition"));
        assert!(!registry.has_check("ConfigMap"));
        registry
            .wait_ready(&cluster, &cm, &fast(1), &CancellationToken::new())
            .await
            .unwrap();
    }
}
