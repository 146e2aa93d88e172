//! OpenStackCluster validation.
//!
//! On CREATE:
//! - at most one managed subnet
//! - a fixed API server IP is required when neither a floating IP nor a load
//!   balancer exposes the API server
//!
//! On UPDATE the spec is frozen except for `identityRef`, `bastion`,
//! `managedSecurityGroups`, the load balancer's `allowedCIDRs`, and a
//! `controlPlaneEndpoint` that has not been set before.

use kube::ResourceExt;

use super::{FieldError, ValidationContext, ValidationResult};
use crate::api::v1beta1::{OpenStackCluster, OpenStackClusterSpec};

/// Validate an OpenStackCluster admission request
pub fn validate(ctx: &ValidationContext<'_, OpenStackCluster>) -> ValidationResult {
    let name = ctx.resource.name_any();
    let errors = match ctx.old_resource {
        None => validate_create(&ctx.resource.spec),
        Some(old) => validate_update(&old.spec, &ctx.resource.spec),
    };
    ValidationResult::from_field_errors("FieldValueInvalid", "OpenStackCluster", &name, &errors)
}

fn validate_create(spec: &OpenStackClusterSpec) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if spec.managed_subnets.len() > 1 {
        errors.push(FieldError::new(
            "spec.managedSubnets",
            format!("at most one subnet is supported, got {}", spec.managed_subnets.len()),
        ));
    }

    let load_balancer = spec
        .api_server_load_balancer
        .as_ref()
        .is_some_and(|lb| lb.is_enabled());
    if spec.disable_api_server_floating_ip == Some(true)
        && !load_balancer
        && spec.api_server_fixed_ip.is_none()
    {
        errors.push(FieldError::new(
            "spec.apiServerFixedIP",
            "is required when the API server floating IP is disabled and no load balancer is enabled",
        ));
    }

    if spec.identity_ref.name.is_empty() {
        errors.push(FieldError::new("spec.identityRef.name", "is required"));
    }
    if spec.identity_ref.cloud_name.is_empty() {
        errors.push(FieldError::new("spec.identityRef.cloudName", "is required"));
    }

    errors
}

fn validate_update(old: &OpenStackClusterSpec, new: &OpenStackClusterSpec) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if let Some(old_endpoint) = old.control_plane_endpoint.as_ref().filter(|e| !e.is_zero())
        && new.control_plane_endpoint.as_ref() != Some(old_endpoint)
    {
        errors.push(FieldError::forbidden("spec.controlPlaneEndpoint"));
    }

    let mut old_spec = old.clone();
    let mut new_spec = new.clone();
    for spec in [&mut old_spec, &mut new_spec] {
        spec.identity_ref = Default::default();
        spec.bastion = None;
        spec.managed_security_groups = None;
        spec.control_plane_endpoint = None;
        if let Some(lb) = spec.api_server_load_balancer.as_mut() {
            lb.allowed_cidrs.clear();
        }
    }

    if old_spec != new_spec {
        errors.push(FieldError::new(
            "spec",
            "cannot be modified apart from identityRef, bastion, managedSecurityGroups, \
             apiServerLoadBalancer.allowedCIDRs and an unset controlPlaneEndpoint",
        ));
    }

    errors
}
