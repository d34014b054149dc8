//! Error types for converge-kube

use thiserror::Error;

/// Result type for converge-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while reconciling resources
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Resource document model error
    #[error("invalid resource: {0}")]
    Core(#[from] converge_core::CoreError),

    /// Resource does not exist in the cluster
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Resource already exists in the cluster
    #[error("{resource} already exists")]
    AlreadyExists { resource: String },

    /// Write rejected because the object changed since it was read
    #[error("conflict writing {resource}: {message}")]
    Conflict { resource: String, message: String },

    /// Temporary failure reported by the cluster
    #[error("transient cluster error: {0}")]
    Transient(String),

    /// The cluster has no REST mapping for a kind
    #[error("unknown resource type {gvk}")]
    UnknownResourceType { gvk: String },

    /// Scope could not be derived from a co-installed CRD
    #[error("cannot determine scope of {gvk}: {reason}")]
    ScopeResolution { gvk: String, reason: String },

    /// Namespaced resource without a namespace and no target namespace
    #[error("{resource} is namespaced but no namespace was given")]
    MissingNamespace { resource: String },

    /// Reconciliation needs a non-empty ownership label set
    #[error("ownership labels must not be empty")]
    EmptyOwnershipLabels,

    /// A managed resource was not written by the reconciler
    #[error("{resource} carries ownership labels but has no last-applied annotation")]
    UntrackedResource { resource: String },

    /// The last-applied annotation could not be decoded
    #[error("corrupt last-applied annotation on {resource}: {message}")]
    CorruptLastApplied { resource: String, message: String },

    /// A merge patch produced something that is not a resource document
    #[error("invalid patch for {resource}: {message}")]
    InvalidPatch { resource: String, message: String },

    /// Resource did not become ready within its poll budget
    #[error("{resource} not ready after {attempts} attempts")]
    ReadinessTimeout { resource: String, attempts: u32 },

    /// Retry budget exhausted
    #[error("giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<KubeError>,
    },

    /// Lifecycle hook failed
    #[error("hook '{hook}' failed during {phase}: {source}")]
    Hook {
        hook: String,
        phase: String,
        #[source]
        source: Box<KubeError>,
    },

    /// Hook implementation error
    #[error("{0}")]
    HookMessage(String),

    /// A single resource operation failed
    #[error("{phase} {resource}: {source}")]
    Resource {
        phase: String,
        resource: String,
        #[source]
        source: Box<KubeError>,
    },

    /// One or more resources of a kind group failed
    #[error("{phase} of {kind} failed for {failed} resource(s): {source}")]
    GroupFailed {
        phase: String,
        kind: String,
        failed: usize,
        #[source]
        source: Box<KubeError>,
    },

    /// Operation cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Walk through wrapping variants to the underlying error
    pub fn root(&self) -> &KubeError {
        match self {
            KubeError::RetriesExhausted { source, .. }
            | KubeError::Hook { source, .. }
            | KubeError::Resource { source, .. }
            | KubeError::GroupFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            KubeError::NotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check if the object already exists (409 AlreadyExists)
    pub fn is_already_exists(&self) -> bool {
        match self.root() {
            KubeError::AlreadyExists { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => {
                resp.code == 409 && resp.reason == "AlreadyExists"
            }
            _ => false,
        }
    }

    /// Check if this is a write conflict (409 Conflict)
    pub fn is_conflict(&self) -> bool {
        match self.root() {
            KubeError::Conflict { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 409 && resp.reason == "Conflict",
            _ => false,
        }
    }

    /// Check if retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        match self.root() {
            KubeError::Transient(_) | KubeError::Conflict { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => {
                matches!(resp.code, 429 | 500 | 502 | 503 | 504)
                    || (resp.code == 409 && resp.reason == "Conflict")
            }
            KubeError::Api(kube::Error::HyperError(_) | kube::Error::Service(_)) => true,
            _ => false,
        }
    }

    /// Wrap with the phase and resource the error happened in
    pub fn in_phase(self, phase: impl std::fmt::Display, resource: impl std::fmt::Display) -> Self {
        KubeError::Resource {
            phase: phase.to_string(),
            resource: resource.to_string(),
            source: Box::new(self),
        }
    }
}
