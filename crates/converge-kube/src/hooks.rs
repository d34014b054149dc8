//! Lifecycle hooks around reconciler operations
//!
//! Hooks observe (and may adjust) resources at fixed points of a run:
//!
//! - `pre_install` / `post_install`: once per run, with the desired set
//! - `pre_create` / `post_create`: around each create
//! - `pre_update` / `post_update`: around each update
//! - `pre_delete` / `post_delete`: around each delete
//!
//! A [`HookChain`] runs hooks in registration order and stops at the first
//! error. [`LastAppliedHook`] is what records the last-applied annotation,
//! and the installer always runs it after every user hook.

use async_trait::async_trait;
use converge_core::ResourceDocument;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::annotations::stamp_last_applied;
use crate::error::{KubeError, Result};

/// Point of a run at which hooks are invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookPhase {
    PreInstall,
    PostInstall,
    PreCreate,
    PostCreate,
    PreUpdate,
    PostUpdate,
    PreDelete,
    PostDelete,
}

impl HookPhase {
    /// Is this a "pre" phase (before the operation)?
    pub fn is_pre(&self) -> bool {
        matches!(
            self,
            HookPhase::PreInstall
                | HookPhase::PreCreate
                | HookPhase::PreUpdate
                | HookPhase::PreDelete
        )
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HookPhase::PreInstall => "pre-install",
            HookPhase::PostInstall => "post-install",
            HookPhase::PreCreate => "pre-create",
            HookPhase::PostCreate => "post-create",
            HookPhase::PreUpdate => "pre-update",
            HookPhase::PostUpdate => "post-update",
            HookPhase::PreDelete => "pre-delete",
            HookPhase::PostDelete => "post-delete",
        };
        write!(f, "{}", s)
    }
}

/// Callbacks invoked by the installer; every method defaults to a no-op
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// Name used in error messages
    fn name(&self) -> &str;

    /// Before anything is written, with the desired resources as given
    async fn pre_install(&self, _resources: &[ResourceDocument]) -> Result<()> {
        Ok(())
    }

    /// After every pass succeeded, with the prepared desired resources
    async fn post_install(&self, _resources: &[ResourceDocument]) -> Result<()> {
        Ok(())
    }

    /// Before `resource` is created from `desired`
    async fn pre_create(
        &self,
        _resource: &mut ResourceDocument,
        _desired: &ResourceDocument,
    ) -> Result<()> {
        Ok(())
    }

    /// After `resource` was created
    async fn post_create(&self, _resource: &ResourceDocument) -> Result<()> {
        Ok(())
    }

    /// Before the patched live object `target` is written
    async fn pre_update(
        &self,
        _target: &mut ResourceDocument,
        _desired: &ResourceDocument,
    ) -> Result<()> {
        Ok(())
    }

    /// After `resource` was updated
    async fn post_update(&self, _resource: &ResourceDocument) -> Result<()> {
        Ok(())
    }

    /// Before `resource` is deleted
    async fn pre_delete(&self, _resource: &ResourceDocument) -> Result<()> {
        Ok(())
    }

    /// After `resource` was deleted
    async fn post_delete(&self, _resource: &ResourceDocument) -> Result<()> {
        Ok(())
    }
}

/// Stamps the last-applied annotation on every create and update
#[derive(Debug, Clone, Copy, Default)]
pub struct LastAppliedHook;

#[async_trait]
impl LifecycleHook for LastAppliedHook {
    fn name(&self) -> &str {
        "last-applied"
    }

    async fn pre_create(
        &self,
        resource: &mut ResourceDocument,
        desired: &ResourceDocument,
    ) -> Result<()> {
        stamp_last_applied(resource, desired)
    }

    async fn pre_update(
        &self,
        target: &mut ResourceDocument,
        desired: &ResourceDocument,
    ) -> Result<()> {
        stamp_last_applied(target, desired)
    }
}

/// Ordered list of hooks
#[derive(Clone)]
pub struct HookChain {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl HookChain {
    /// An empty chain
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn push(&mut self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.push(hook);
    }

    pub fn with(mut self, hook: impl LifecycleHook + 'static) -> Self {
        self.push(Arc::new(hook));
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    pub async fn pre_install(&self, resources: &[ResourceDocument]) -> Result<()> {
        for hook in &self.hooks {
            hook.pre_install(resources)
                .await
                .map_err(|e| wrap(hook.as_ref(), HookPhase::PreInstall, e))?;
        }
        Ok(())
    }

    pub async fn post_install(&self, resources: &[ResourceDocument]) -> Result<()> {
        for hook in &self.hooks {
            hook.post_install(resources)
                .await
                .map_err(|e| wrap(hook.as_ref(), HookPhase::PostInstall, e))?;
        }
        Ok(())
    }

    pub async fn pre_create(
        &self,
        resource: &mut ResourceDocument,
        desired: &ResourceDocument,
    ) -> Result<()> {
        for hook in &self.hooks {
            hook.pre_create(resource, desired)
                .await
                .map_err(|e| wrap(hook.as_ref(), HookPhase::PreCreate, e))?;
        }
        Ok(())
    }

    pub async fn post_create(&self, resource: &ResourceDocument) -> Result<()> {
        for hook in &self.hooks {
            hook.post_create(resource)
                .await
                .map_err(|e| wrap(hook.as_ref(), HookPhase::PostCreate, e))?;
        }
        Ok(())
    }

    pub async fn pre_update(
        &self,
        target: &mut ResourceDocument,
        desired: &ResourceDocument,
    ) -> Result<()> {
        for hook in &self.hooks {
            hook.pre_update(target, desired)
                .await
                .map_err(|e| wrap(hook.as_ref(), HookPhase::PreUpdate, e))?;
        }
        Ok(())
    }

    pub async fn post_update(&self, resource: &ResourceDocument) -> Result<()> {
        for hook in &self.hooks {
            hook.post_update(resource)
                .await
                .map_err(|e| wrap(hook.as_ref(), HookPhase::PostUpdate, e))?;
        }
        Ok(())
    }

    pub async fn pre_delete(&self, resource: &ResourceDocument) -> Result<()> {
        for hook in &self.hooks {
            hook.pre_delete(resource)
                .await
                .map_err(|e| wrap(hook.as_ref(), HookPhase::PreDelete, e))?;
        }
        Ok(())
    }

    pub async fn post_delete(&self, resource: &ResourceDocument) -> Result<()> {
        for hook in &self.hooks {
            hook.post_delete(resource)
                .await
                .map_err(|e| wrap(hook.as_ref(), HookPhase::PostDelete, e))?;
        }
        Ok(())
    }
}

/// The default chain records the last-applied annotation
impl Default for HookChain {
    fn default() -> Self {
        Self::new().with(LastAppliedHook)
    }
}

impl fmt::Debug for HookChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

fn wrap(hook: &dyn LifecycleHook, phase: HookPhase, source: KubeError) -> KubeError {
    KubeError::Hook {
        hook: hook.name().to_string(),
        phase: phase.to_string(),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{LAST_APPLIED_ANNOTATION, decode_last_applied};
    use std::sync::Mutex;

    /// Records every call as `name:phase:resource`
    struct Recorder {
        name: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
        fail_on: Option<HookPhase>,
    }

    impl Recorder {
        fn record(&self, phase: HookPhase, resource: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:{}:{}", self.name, phase, resource));
            if self.fail_on == Some(phase) {
                return Err(KubeError::HookMessage("refused".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl LifecycleHook for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn pre_install(&self, resources: &[ResourceDocument]) -> Result<()> {
            self.record(HookPhase::PreInstall, &resources.len().to_string())
        }

        async fn pre_delete(&self, resource: &ResourceDocument) -> Result<()> {
            self.record(HookPhase::PreDelete, resource.name())
        }
    }

    fn recorder(
        name: &'static str,
        calls: &Arc<Mutex<Vec<String>>>,
        fail_on: Option<HookPhase>,
    ) -> Recorder {
        Recorder {
            name,
            calls: calls.clone(),
            fail_on,
        }
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(HookPhase::PreCreate.to_string(), "pre-create");
        assert!(HookPhase::PreDelete.is_pre());
        assert!(!HookPhase::PostInstall.is_pre());
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let chain = HookChain::new()
            .with(recorder("first", &calls, None))
            .with(recorder("second", &calls, None));

        chain.pre_install(&[]).await.unwrap();
        chain
            .pre_delete(&ResourceDocument::new("v1", "ConfigMap", "cm"))
            .await
            .unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "first:pre-install:0",
                "second:pre-install:0",
                "first:pre-delete:cm",
                "second:pre-delete:cm",
            ]
        );
    }

    #[tokio::test]
    async fn test_first_error_aborts_and_is_wrapped() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let chain = HookChain::new()
            .with(recorder("guard", &calls, Some(HookPhase::PreDelete)))
            .with(recorder("after", &calls, None));

        let err = chain
            .pre_delete(&ResourceDocument::new("v1", "ConfigMap", "cm"))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "hook 'guard' failed during pre-delete: refused"
        );
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_default_chain_stamps_last_applied() {
        let chain = HookChain::default();
        assert_eq!(chain.names(), vec!["last-applied"]);

        let mut desired = ResourceDocument::new("v1", "ConfigMap", "cm");
        desired.set_namespace(Some("prod".to_string()));
        let mut resource = desired.clone();
        chain.pre_create(&mut resource, &desired).await.unwrap();

        assert!(resource.annotation(LAST_APPLIED_ANNOTATION).is_some());
        let decoded = decode_last_applied(&resource).unwrap().unwrap();
        assert_eq!(decoded.key(), desired.key());
    }
}
