//! OpenStackMachineTemplate validation.
//!
//! The machine spec stamped out by a template is immutable; rolling out a new
//! machine configuration means creating a new template.

use kube::ResourceExt;

use super::{ValidationContext, ValidationResult};
use crate::api::v1beta1::OpenStackMachineTemplate;

/// Validate an OpenStackMachineTemplate admission request
pub fn validate(ctx: &ValidationContext<'_, OpenStackMachineTemplate>) -> ValidationResult {
    let Some(old) = ctx.old_resource else {
        return ValidationResult::allowed();
    };

    if ctx.should_skip_immutability_checks() {
        return ValidationResult::allowed();
    }

    if old.spec.template.spec != ctx.resource.spec.template.spec {
        return ValidationResult::denied(
            "FieldImmutable",
            &format!(
                "OpenStackMachineTemplate {:?}: spec.template.spec field is immutable. Please create a new resource instead.",
                ctx.resource.name_any()
            ),
        );
    }

    ValidationResult::allowed()
}
