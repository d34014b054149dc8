//! Live cluster backed by the dynamic `kube` client
//!
//! Objects are handled as `DynamicObject`s resolved through API discovery,
//! so any kind the server serves can be reconciled without compile-time
//! type knowledge.

use async_trait::async_trait;
use converge_core::{GroupVersionKind, ResourceDocument, ResourceKey};
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, ListParams, PostParams},
    core::TypeMeta,
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope as KubeScope},
};
use tokio::sync::RwLock;

use super::{Cluster, ResourceType, Scope};
use crate::error::{KubeError, Result};

/// Cluster implementation talking to a real API server
pub struct LiveCluster {
    /// Kubernetes client
    client: Client,
    /// Cached discovery information, rebuilt by `refresh_mappings`
    discovery: RwLock<Discovery>,
}

impl LiveCluster {
    /// Connect using the default kubeconfig / in-cluster configuration
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Self::new(client).await
    }

    /// Create from an existing client, running discovery once
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self {
            client,
            discovery: RwLock::new(discovery),
        })
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, ApiCapabilities)> {
        self.discovery
            .read()
            .await
            .resolve_gvk(&to_kube_gvk(gvk))
            .ok_or_else(|| KubeError::UnknownResourceType {
                gvk: gvk.to_string(),
            })
    }

    /// Create an Api client for a type, namespaced when the type is
    async fn api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<(Api<DynamicObject>, ApiResource)> {
        let (resource, capabilities) = self.resolve(gvk).await?;
        let api = match (capabilities.scope, namespace) {
            (KubeScope::Namespaced, Some(ns)) => {
                Api::namespaced_with(self.client.clone(), ns, &resource)
            }
            _ => Api::all_with(self.client.clone(), &resource),
        };
        Ok((api, resource))
    }
}

#[async_trait]
impl Cluster for LiveCluster {
    async fn resource_types(&self) -> Result<Vec<ResourceType>> {
        let discovery = self.discovery.read().await;
        let mut types = Vec::new();

        for group in discovery.groups() {
            for (resource, capabilities) in group.recommended_resources() {
                types.push(ResourceType {
                    gvk: GroupVersionKind::new(&resource.group, &resource.version, &resource.kind),
                    plural: resource.plural.clone(),
                    scope: from_kube_scope(&capabilities.scope),
                    verbs: capabilities.operations.clone(),
                });
            }
        }

        Ok(types)
    }

    async fn scope_of(&self, gvk: &GroupVersionKind) -> Result<Option<Scope>> {
        Ok(self
            .discovery
            .read()
            .await
            .resolve_gvk(&to_kube_gvk(gvk))
            .map(|(_, capabilities)| from_kube_scope(&capabilities.scope)))
    }

    async fn refresh_mappings(&self) -> Result<()> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        *self.discovery.write().await = discovery;
        tracing::debug!("refreshed API discovery");
        Ok(())
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<ResourceDocument>> {
        let (api, resource) = self.api(gvk, namespace).await?;
        let list = api.list(&ListParams::default()).await?;

        list.items
            .into_iter()
            .map(|mut obj| {
                // List responses omit per-item type information
                if obj.types.is_none() {
                    obj.types = Some(TypeMeta {
                        api_version: resource.api_version.clone(),
                        kind: resource.kind.clone(),
                    });
                }
                from_dynamic(obj)
            })
            .collect()
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<ResourceDocument>> {
        let (api, resource) = self.api(&key.gvk, key.namespace()).await?;
        match api.get_opt(&key.name).await? {
            Some(mut obj) => {
                if obj.types.is_none() {
                    obj.types = Some(TypeMeta {
                        api_version: resource.api_version.clone(),
                        kind: resource.kind.clone(),
                    });
                }
                Ok(Some(from_dynamic(obj)?))
            }
            None => Ok(None),
        }
    }

    async fn create(&self, resource: &ResourceDocument) -> Result<ResourceDocument> {
        let (api, _) = self.api(&resource.gvk(), resource.namespace()).await?;
        let created = api
            .create(&PostParams::default(), &to_dynamic(resource)?)
            .await
            .map_err(|e| map_write_error(e, resource))?;
        from_dynamic(created)
    }

    async fn update(&self, resource: &ResourceDocument) -> Result<ResourceDocument> {
        let (api, _) = self.api(&resource.gvk(), resource.namespace()).await?;
        let updated = api
            .replace(resource.name(), &PostParams::default(), &to_dynamic(resource)?)
            .await
            .map_err(|e| map_write_error(e, resource))?;
        from_dynamic(updated)
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        let (api, _) = self.api(&key.gvk, key.namespace()).await?;
        match api.delete(&key.name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(KubeError::NotFound {
                resource: key.to_string(),
            }),
            Err(e) => Err(KubeError::Api(e)),
        }
    }
}

fn map_write_error(error: kube::Error, resource: &ResourceDocument) -> KubeError {
    match error {
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            KubeError::AlreadyExists {
                resource: resource.display_name(),
            }
        }
        kube::Error::Api(resp) if resp.code == 409 => KubeError::Conflict {
            resource: resource.display_name(),
            message: resp.message,
        },
        kube::Error::Api(resp) if resp.code == 404 => KubeError::NotFound {
            resource: resource.display_name(),
        },
        other => KubeError::Api(other),
    }
}

fn to_kube_gvk(gvk: &GroupVersionKind) -> kube::core::GroupVersionKind {
    kube::core::GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind)
}

fn from_kube_scope(scope: &KubeScope) -> Scope {
    match scope {
        KubeScope::Namespaced => Scope::Namespaced,
        KubeScope::Cluster => Scope::Cluster,
    }
}

fn to_dynamic(resource: &ResourceDocument) -> Result<DynamicObject> {
    Ok(serde_json::from_value(resource.to_value())?)
}

fn from_dynamic(obj: DynamicObject) -> Result<ResourceDocument> {
    let value = serde_json::to_value(&obj)?;
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dynamic_round_trip() {
        let doc = ResourceDocument::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "namespace": "prod",
                "labels": {"app": "web"},
                "resourceVersion": "7"
            },
            "spec": {"replicas": 2}
        }))
        .unwrap();

        let obj = to_dynamic(&doc).unwrap();
        assert_eq!(obj.metadata.name.as_deref(), Some("web"));
        assert_eq!(obj.metadata.resource_version.as_deref(), Some("7"));
        assert_eq!(obj.data["spec"]["replicas"], json!(2));

        let back = from_dynamic(obj).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_gvk_conversion() {
        let gvk = GroupVersionKind::new("apps", "v1", "Deployment");
        let kube_gvk = to_kube_gvk(&gvk);
        assert_eq!(kube_gvk.group, "apps");
        assert_eq!(kube_gvk.version, "v1");
        assert_eq!(kube_gvk.kind, "Deployment");
    }
}
