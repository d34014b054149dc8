//! In-memory cache of cluster resources
//!
//! The cache holds the last-applied form of every resource it can decode and
//! the live form of everything else. It is created locked: every accessor
//! waits until [`ResourceCache::init`] has completed successfully, and a
//! [`ResourceCache::refresh`] re-locks it for the duration of the reload.

use converge_core::{ResourceDocument, ResourceKey, ResourceList};
use std::collections::HashMap;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, watch};

use crate::annotations::decode_last_applied;
use crate::cluster::{Cluster, ListScope, list_all};
use crate::error::Result;

type ResourceMap = HashMap<ResourceKey, ResourceDocument>;

/// Cluster resources keyed by identity
pub struct ResourceCache {
    resources: RwLock<ResourceMap>,
    /// `true` once populated; accessors wait on it
    ready: watch::Sender<bool>,
}

impl ResourceCache {
    /// Create an empty, locked cache
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            resources: RwLock::new(HashMap::new()),
            ready,
        }
    }

    /// Populate from the cluster and unlock
    ///
    /// On failure the cache is left empty and locked.
    pub async fn init(&self, cluster: &dyn Cluster, scope: &ListScope) -> Result<()> {
        let mut resources = self.resources.write().await;
        self.ready.send_replace(false);
        resources.clear();

        let listed = list_all(cluster, scope).await?;
        let mut untracked = 0usize;

        for live in listed {
            let cached = match decode_last_applied(&live) {
                Ok(Some(decoded)) => decoded,
                Ok(None) => {
                    untracked += 1;
                    live
                }
                Err(e) => {
                    tracing::warn!(resource = %live.display_name(), error = %e, "caching live object");
                    live
                }
            };
            resources.insert(cached.key(), cached);
        }

        tracing::info!(
            resources = resources.len(),
            untracked,
            "resource cache initialized"
        );
        self.ready.send_replace(true);
        Ok(())
    }

    /// Re-lock and reload from the cluster
    pub async fn refresh(&self, cluster: &dyn Cluster, scope: &ListScope) -> Result<()> {
        self.init(cluster, scope).await
    }

    pub fn is_initialized(&self) -> bool {
        *self.ready.borrow()
    }

    async fn wait_initialized(&self) {
        let mut ready = self.ready.subscribe();
        // The sender lives as long as `self`, so this only returns once ready
        let _ = ready.wait_for(|ready| *ready).await;
    }

    async fn read(&self) -> RwLockReadGuard<'_, ResourceMap> {
        loop {
            self.wait_initialized().await;
            let guard = self.resources.read().await;
            if self.is_initialized() {
                return guard;
            }
        }
    }

    async fn write(&self) -> RwLockWriteGuard<'_, ResourceMap> {
        loop {
            self.wait_initialized().await;
            let guard = self.resources.write().await;
            if self.is_initialized() {
                return guard;
            }
        }
    }

    pub async fn get(&self, key: &ResourceKey) -> Option<ResourceDocument> {
        self.read().await.get(key).cloned()
    }

    /// Every cached resource, in install order
    pub async fn list(&self) -> ResourceList {
        let resources: ResourceList = self.read().await.values().cloned().collect();
        resources.sorted()
    }

    pub async fn set(&self, resource: ResourceDocument) {
        self.write().await.insert(resource.key(), resource);
    }

    pub async fn delete(&self, key: &ResourceKey) -> Option<ResourceDocument> {
        self.write().await.remove(key)
    }

    pub async fn len(&self) -> usize {
        self.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.read().await.is_empty()
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}
