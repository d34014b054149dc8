//! CLI error types with exit code handling
//!
//! This module provides a unified error type for CLI operations that
//! maps errors to appropriate exit codes.

use converge_core::CoreError;
use converge_kube::KubeError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Manifests or labels given on the command line are invalid
    #[error("Invalid input: {message}")]
    #[diagnostic(code(converge::cli::input))]
    Input {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Reconciler configuration could not be loaded
    #[error("Configuration error: {message}")]
    #[diagnostic(
        code(converge::cli::config),
        help("see `converge --help` for the --config file format")
    )]
    Config { message: String },

    /// The cluster rejected or failed an operation
    #[error("Cluster error: {source}")]
    #[diagnostic(code(converge::cli::cluster))]
    Cluster {
        #[source]
        source: KubeError,
        #[help]
        help: Option<String>,
    },

    /// The run was cancelled by the user
    #[error("Interrupted")]
    #[diagnostic(code(converge::cli::interrupted))]
    Interrupted,

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(converge::cli::io))]
    Io { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(converge::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Input { .. } => exit_codes::INPUT_ERROR,
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::Interrupted => exit_codes::INTERRUPTED,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    /// Create an input error (user provided invalid input)
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
            help: None,
        }
    }

    /// Create an input error with help text
    pub fn input_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Suggestion shown beneath a cluster error
fn cluster_help(err: &KubeError) -> Option<String> {
    match err {
        KubeError::EmptyOwnershipLabels => {
            Some("pass at least one ownership label with -l key=value".to_string())
        }
        KubeError::UntrackedResource { .. } => Some(
            "the resource was not created by converge; remove its ownership labels or delete it"
                .to_string(),
        ),
        KubeError::MissingNamespace { .. } => {
            Some("set metadata.namespace or pass -n NAMESPACE".to_string())
        }
        KubeError::Api(_) => Some("check your kubeconfig and cluster connectivity".to_string()),
        _ => None,
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        match err {
            KubeError::Cancelled => CliError::Interrupted,
            KubeError::InvalidConfig(message) => CliError::Config { message },
            KubeError::Core(err) => CliError::from(err),
            KubeError::Io(err) => CliError::from(err),
            err => CliError::Cluster {
                help: cluster_help(&err),
                source: err,
            },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        CliError::input(err.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
