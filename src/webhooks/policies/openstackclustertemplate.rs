//! OpenStackClusterTemplate validation.

use kube::ResourceExt;

use super::{ValidationContext, ValidationResult};
use crate::api::v1beta1::OpenStackClusterTemplate;

/// Validate an OpenStackClusterTemplate admission request
pub fn validate(ctx: &ValidationContext<'_, OpenStackClusterTemplate>) -> ValidationResult {
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
                "OpenStackClusterTemplate {:?}: spec.template.spec field is immutable. Please create new resource instead.",
                ctx.resource.name_any()
            ),
        );
    }

    ValidationResult::allowed()
}
