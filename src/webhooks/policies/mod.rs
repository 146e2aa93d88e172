//! Validation policies for the provider's admission webhooks.
//!
//! Each resource kind has one policy module exposing
//! `validate(&ValidationContext<'_, K>) -> ValidationResult`. Policies are
//! pure functions of the admission request so they can be unit tested
//! without a server.

pub mod openstackcluster;
pub mod openstackclustertemplate;
pub mod openstackmachine;
pub mod openstackmachinetemplate;

use kube::ResourceExt;

/// Annotation set by the topology controller on objects used for dry-run planning.
pub const TOPOLOGY_DRY_RUN_ANNOTATION: &str = "topology.cluster.x-k8s.io/dry-run";

/// Result of a validation check
#[derive(Debug)]
pub struct ValidationResult {
    /// Whether the validation passed
    pub allowed: bool,
    /// Reason for denial (if not allowed)
    pub reason: Option<String>,
    /// Detailed message (if not allowed)
    pub message: Option<String>,
}

impl ValidationResult {
    /// Create an allowed result
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    /// Create a denied result
    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }

    /// Deny when any field errors were collected
    pub fn from_field_errors(reason: &str, kind: &str, name: &str, errors: &[FieldError]) -> Self {
        if errors.is_empty() {
            return Self::allowed();
        }
        let details: Vec<String> = errors.iter().map(FieldError::to_string).collect();
        Self::denied(
            reason,
            &format!("{} {:?} is invalid: {}", kind, name, details.join(", ")),
        )
    }
}

/// A single invalid field, reported as `<path>: <detail>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub detail: String,
}

impl FieldError {
    pub fn new(path: &str, detail: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            detail: detail.into(),
        }
    }

    /// The canonical "cannot be modified" error
    pub fn forbidden(path: &str) -> Self {
        Self::new(path, "cannot be modified")
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.detail)
    }
}

/// Context for validation
pub struct ValidationContext<'a, K> {
    /// The resource being validated
    pub resource: &'a K,
    /// The old resource (for UPDATE operations)
    pub old_resource: Option<&'a K>,
    /// Whether this is a dry-run request
    pub dry_run: bool,
    /// The namespace of the resource
    pub namespace: Option<&'a str>,
}

impl<'a, K> ValidationContext<'a, K> {
    /// Check if this is an UPDATE operation
    pub fn is_update(&self) -> bool {
        self.old_resource.is_some()
    }
}

impl<'a, K: kube::Resource> ValidationContext<'a, K> {
    /// Immutability checks are skipped for topology dry-run requests
    pub fn should_skip_immutability_checks(&self) -> bool {
        self.dry_run
            && self
                .resource
                .annotations()
                .contains_key(TOPOLOGY_DRY_RUN_ANNOTATION)
    }
}
