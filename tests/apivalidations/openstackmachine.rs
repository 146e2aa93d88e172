//! OpenStackMachine admission cases.

use capo_e2e::TestCase;
use capo_e2e::api::v1beta1::{OpenStackIdentityReference, OpenStackMachine};
use kube::api::PostParams;

use crate::common::fixtures::OpenStackMachineBuilder;
use crate::support::{expect_allowed, expect_denied};

pub fn cases() -> Vec<TestCase> {
    vec![
        TestCase::new("OpenStackMachine: providerID can be set once", |ctx| async move {
            let ns = ctx.create_namespace().await?;
            let api = ctx.api::<OpenStackMachine>(&ns);

            let machine = OpenStackMachineBuilder::new("worker-0").build();
            let mut machine = expect_allowed(api.create(&PostParams::default(), &machine).await);

            machine.spec.provider_id = Some("openstack:///b5a5e4b0-5ab4-4f2a-9fa8-a38c5b18a3b2".to_string());
            let mut machine = expect_allowed(
                api.replace("worker-0", &PostParams::default(), &machine).await,
            );

            machine.spec.provider_id = Some("openstack:///c6b6f5c1-6bc5-5a3b-0ab9-b49d6c29b4c3".to_string());
            expect_denied(
                api.replace("worker-0", &PostParams::default(), &machine).await,
                "spec.providerID",
            );
            Ok(())
        }),
        TestCase::new("OpenStackMachine: identityRef may be rotated", |ctx| async move {
            let ns = ctx.create_namespace().await?;
            let api = ctx.api::<OpenStackMachine>(&ns);

            let machine = OpenStackMachineBuilder::new("worker-1").build();
            let mut machine = expect_allowed(api.create(&PostParams::default(), &machine).await);

            machine.spec.identity_ref = Some(OpenStackIdentityReference {
                name: "rotated-cloud-config".to_string(),
                cloud_name: "openstack".to_string(),
                region: None,
            });
            expect_allowed(api.replace("worker-1", &PostParams::default(), &machine).await);
            Ok(())
        }),
        TestCase::new("OpenStackMachine: rejects a flavor change", |ctx| async move {
            let ns = ctx.create_namespace().await?;
            let api = ctx.api::<OpenStackMachine>(&ns);

            let machine = OpenStackMachineBuilder::new("worker-2").build();
            let mut machine = expect_allowed(api.create(&PostParams::default(), &machine).await);

            machine.spec.flavor = Some("m1.xlarge".to_string());
            expect_denied(
                api.replace("worker-2", &PostParams::default(), &machine).await,
                "cannot be modified",
            );
            Ok(())
        }),
    ]
}
