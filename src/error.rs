//! Error types for the e2e harness.
//!
//! Every failure of a setup or teardown step is fatal to the test (or suite)
//! that triggered it; the variants only exist to produce a precise message.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Error type for harness operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Kubeconfig could not be loaded or turned into a client configuration
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// Filesystem error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The e2e configuration is not usable
    #[error("Invalid e2e configuration: {0}")]
    InvalidConfig(String),

    /// A required configuration variable is absent
    #[error("Missing {0} variable in the config")]
    MissingVariable(String),

    /// A path that must exist does not
    #[error("{what}: {} does not exist", path.display())]
    FileNotFound { what: String, path: PathBuf },

    /// A provider source that cannot be materialized locally
    #[error("Unsupported provider source {0}: only local files are supported")]
    UnsupportedSource(String),

    /// External tool was not found on PATH
    #[error("Required tool {tool} not found: {source}")]
    ToolNotFound {
        tool: String,
        #[source]
        source: which::Error,
    },

    /// External command returned a non-zero exit status
    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The kubeconfig's active context is not the expected one
    #[error(
        "current-context of the kubeconfig should be the same as KUBE_CONTEXT ({expected}), got {actual}"
    )]
    ContextMismatch { expected: String, actual: String },

    /// The API server reported a version that cannot be interpreted
    #[error("Invalid API server version {major}.{minor}: {reason}")]
    InvalidServerVersion {
        major: String,
        minor: String,
        reason: String,
    },

    /// The API server is older than the suite's minimum
    #[error(
        "This test suite requires a Kube API server of at least version 1.{minimum}, current version is 1.{actual}"
    )]
    ServerVersionTooOld { minimum: u32, actual: String },

    /// Certificate generation failed
    #[error("Certificate generation failed: {0}")]
    Certificate(String),

    /// The test environment could not be started
    #[error("Test environment error: {0}")]
    Environment(String),

    /// A webhook could not be registered with the manager
    #[error("{kind} webhook should be registered with manager: {reason}")]
    WebhookRegistration { kind: String, reason: String },

    /// The manager failed while serving
    #[error("Manager failed: {0}")]
    ManagerFailed(String),

    /// The manager did not signal completion in time after cancellation
    #[error("Manager should stop within {0:?}")]
    ManagerStopTimeout(Duration),

    /// A watch stream failed
    #[error("Watch error: {0}")]
    Watch(#[from] kube::runtime::watcher::Error),

    /// A watched resource disappeared while waiting for a condition on it
    #[error("{0} was deleted while waiting")]
    ResourceDeleted(String),

    /// A bounded wait elapsed before its condition held
    #[error("Timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },
}

impl Error {
    /// Wrap an I/O error with the path it occurred on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Check if this error indicates a not-found condition from the API server
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }
}

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, Error>;
