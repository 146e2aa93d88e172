//! OpenStackMachineTemplate and OpenStackClusterTemplate admission cases.

use capo_e2e::TestCase;
use capo_e2e::api::v1beta1::{OpenStackClusterTemplate, OpenStackMachineTemplate};
use kube::api::PostParams;

use crate::common::fixtures::{DRY_RUN_ANNOTATION, OpenStackClusterBuilder, OpenStackMachineBuilder};
use crate::support::{expect_allowed, expect_denied};

fn dry_run() -> PostParams {
    PostParams {
        dry_run: true,
        ..Default::default()
    }
}

pub fn cases() -> Vec<TestCase> {
    vec![
        TestCase::new(
            "OpenStackMachineTemplate: spec.template.spec is immutable",
            |ctx| async move {
                let ns = ctx.create_namespace().await?;
                let api = ctx.api::<OpenStackMachineTemplate>(&ns);

                let template = OpenStackMachineBuilder::new("md-0").build_template();
                let mut template = expect_allowed(api.create(&PostParams::default(), &template).await);

                template.spec.template.spec.flavor = Some("m1.xlarge".to_string());
                expect_denied(
                    api.replace("md-0", &PostParams::default(), &template).await,
                    "spec.template.spec field is immutable",
                );
                Ok(())
            },
        ),
        TestCase::new(
            "OpenStackMachineTemplate: topology dry-run may change the spec",
            |ctx| async move {
                let ns = ctx.create_namespace().await?;
                let api = ctx.api::<OpenStackMachineTemplate>(&ns);

                let template = OpenStackMachineBuilder::new("md-1")
                    .annotation(DRY_RUN_ANNOTATION, "")
                    .build_template();
                let mut template = expect_allowed(api.create(&PostParams::default(), &template).await);
                template.spec.template.spec.flavor = Some("m1.xlarge".to_string());

                expect_allowed(api.replace("md-1", &dry_run(), &template).await);
                // Without dry-run the annotation alone is not enough.
                expect_denied(
                    api.replace("md-1", &PostParams::default(), &template).await,
                    "spec.template.spec field is immutable",
                );
                Ok(())
            },
        ),
        TestCase::new(
            "OpenStackMachineTemplate: dry-run without the annotation is rejected",
            |ctx| async move {
                let ns = ctx.create_namespace().await?;
                let api = ctx.api::<OpenStackMachineTemplate>(&ns);

                let template = OpenStackMachineBuilder::new("md-2").build_template();
                let mut template = expect_allowed(api.create(&PostParams::default(), &template).await);
                template.spec.template.spec.flavor = Some("m1.xlarge".to_string());

                expect_denied(
                    api.replace("md-2", &dry_run(), &template).await,
                    "spec.template.spec field is immutable",
                );
                Ok(())
            },
        ),
        TestCase::new(
            "OpenStackClusterTemplate: spec.template.spec is immutable",
            |ctx| async move {
                let ns = ctx.create_namespace().await?;
                let api = ctx.api::<OpenStackClusterTemplate>(&ns);

                let template = OpenStackClusterBuilder::new("cluster-class")
                    .managed_subnet("10.6.0.0/24")
                    .build_template();
                let mut template = expect_allowed(api.create(&PostParams::default(), &template).await);

                template.spec.template.spec.api_server_port = Some(8443);
                expect_denied(
                    api.replace("cluster-class", &PostParams::default(), &template).await,
                    "spec.template.spec field is immutable",
                );
                Ok(())
            },
        ),
    ]
}
