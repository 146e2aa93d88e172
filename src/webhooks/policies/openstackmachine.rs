//! OpenStackMachine validation.
//!
//! After creation the spec is frozen except for:
//! - `spec.identityRef`, which may be rotated
//! - `spec.providerID`, which the controller may set once

use kube::ResourceExt;

use super::{FieldError, ValidationContext, ValidationResult};
use crate::api::v1beta1::OpenStackMachine;

/// Validate an OpenStackMachine admission request
pub fn validate(ctx: &ValidationContext<'_, OpenStackMachine>) -> ValidationResult {
    let Some(old) = ctx.old_resource else {
        return ValidationResult::allowed();
    };
    let new = ctx.resource;

    let mut errors = Vec::new();

    if old.spec.provider_id.is_some() && old.spec.provider_id != new.spec.provider_id {
        errors.push(FieldError::forbidden("spec.providerID"));
    }

    let mut old_spec = old.spec.clone();
    let mut new_spec = new.spec.clone();
    old_spec.identity_ref = None;
    new_spec.identity_ref = None;
    old_spec.provider_id = None;
    new_spec.provider_id = None;

    if old_spec != new_spec {
        errors.push(FieldError::new(
            "spec",
            "cannot be modified apart from identityRef and a once-only providerID",
        ));
    }

    ValidationResult::from_field_errors("FieldImmutable", "OpenStackMachine", &new.name_any(), &errors)
}
