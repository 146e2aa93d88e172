//! OpenStackCluster admission cases.

use capo_e2e::TestCase;
use capo_e2e::api::v1beta1::{ApiEndpoint, Bastion, OpenStackCluster};
use kube::api::PostParams;

use crate::common::fixtures::OpenStackClusterBuilder;
use crate::support::{expect_allowed, expect_denied};

pub fn cases() -> Vec<TestCase> {
    vec![
        TestCase::new("OpenStackCluster: allows a minimal cluster", |ctx| async move {
            let ns = ctx.create_namespace().await?;
            let api = ctx.api::<OpenStackCluster>(&ns);

            let cluster = OpenStackClusterBuilder::new("minimal")
                .managed_subnet("10.6.0.0/24")
                .build();
            expect_allowed(api.create(&PostParams::default(), &cluster).await);
            Ok(())
        }),
        TestCase::new("OpenStackCluster: rejects more than one managed subnet", |ctx| async move {
            let ns = ctx.create_namespace().await?;
            let api = ctx.api::<OpenStackCluster>(&ns);

            let cluster = OpenStackClusterBuilder::new("two-subnets")
                .managed_subnet("10.6.0.0/24")
                .managed_subnet("10.7.0.0/24")
                .build();
            expect_denied(
                api.create(&PostParams::default(), &cluster).await,
                "spec.managedSubnets",
            );
            Ok(())
        }),
        TestCase::new(
            "OpenStackCluster: requires a fixed IP without floating IP or load balancer",
            |ctx| async move {
                let ns = ctx.create_namespace().await?;
                let api = ctx.api::<OpenStackCluster>(&ns);

                let without_fixed_ip = OpenStackClusterBuilder::new("no-fixed-ip")
                    .without_floating_ip()
                    .load_balancer(false)
                    .build();
                expect_denied(
                    api.create(&PostParams::default(), &without_fixed_ip).await,
                    "spec.apiServerFixedIP",
                );

                let with_fixed_ip = OpenStackClusterBuilder::new("fixed-ip")
                    .without_floating_ip()
                    .load_balancer(false)
                    .fixed_ip("10.6.0.10")
                    .build();
                expect_allowed(api.create(&PostParams::default(), &with_fixed_ip).await);

                let with_load_balancer = OpenStackClusterBuilder::new("load-balancer")
                    .without_floating_ip()
                    .load_balancer(true)
                    .build();
                expect_allowed(api.create(&PostParams::default(), &with_load_balancer).await);
                Ok(())
            },
        ),
        TestCase::new(
            "OpenStackCluster: controlPlaneEndpoint can be set once",
            |ctx| async move {
                let ns = ctx.create_namespace().await?;
                let api = ctx.api::<OpenStackCluster>(&ns);

                let cluster = OpenStackClusterBuilder::new("endpoint").build();
                let mut cluster = expect_allowed(api.create(&PostParams::default(), &cluster).await);

                cluster.spec.control_plane_endpoint = Some(ApiEndpoint {
                    host: "192.0.2.10".to_string(),
                    port: 6443,
                });
                let mut cluster = expect_allowed(
                    api.replace("endpoint", &PostParams::default(), &cluster).await,
                );

                cluster.spec.control_plane_endpoint = Some(ApiEndpoint {
                    host: "192.0.2.11".to_string(),
                    port: 6443,
                });
                expect_denied(
                    api.replace("endpoint", &PostParams::default(), &cluster).await,
                    "spec.controlPlaneEndpoint",
                );
                Ok(())
            },
        ),
        TestCase::new(
            "OpenStackCluster: only mutable fields may change",
            |ctx| async move {
                let ns = ctx.create_namespace().await?;
                let api = ctx.api::<OpenStackCluster>(&ns);

                let cluster = OpenStackClusterBuilder::new("mutable")
                    .managed_subnet("10.6.0.0/24")
                    .external_network_id("8a1b6e30-5f8f-4a43-b1e4-6f34b7b8c1f1")
                    .build();
                let mut cluster = expect_allowed(api.create(&PostParams::default(), &cluster).await);

                cluster.spec.bastion = Some(Bastion {
                    enabled: Some(true),
                    ..Default::default()
                });
                cluster.spec.identity_ref.cloud_name = "openstack-rotated".to_string();
                let mut cluster = expect_allowed(
                    api.replace("mutable", &PostParams::default(), &cluster).await,
                );

                cluster.spec.external_network = None;
                expect_denied(
                    api.replace("mutable", &PostParams::default(), &cluster).await,
                    "cannot be modified",
                );
                Ok(())
            },
        ),
        TestCase::new("OpenStackCluster: deletion is always allowed", |ctx| async move {
            let ns = ctx.create_namespace().await?;
            let api = ctx.api::<OpenStackCluster>(&ns);

            let cluster = OpenStackClusterBuilder::new("deleted").build();
            expect_allowed(api.create(&PostParams::default(), &cluster).await);
            expect_allowed(api.delete("deleted", &Default::default()).await);
            Ok(())
        }),
    ]
}
