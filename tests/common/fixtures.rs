//! Test fixtures and builder patterns for the provider's resources.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use capo_e2e::api::v1beta1::{
    ApiServerLoadBalancer, ImageParam, NameTagFilter, NetworkParam, OpenStackCluster,
    OpenStackClusterSpec, OpenStackClusterTemplate, OpenStackClusterTemplateResource,
    OpenStackClusterTemplateSpec, OpenStackIdentityReference, OpenStackMachine,
    OpenStackMachineSpec, OpenStackMachineTemplate, OpenStackMachineTemplateResource,
    OpenStackMachineTemplateSpec, SubnetSpec,
};

/// Annotation the topology controller sets on dry-run requests
pub const DRY_RUN_ANNOTATION: &str = "topology.cluster.x-k8s.io/dry-run";

/// Identity reference pointing at the e2e cloud credentials.
pub fn identity_ref() -> OpenStackIdentityReference {
    OpenStackIdentityReference {
        name: "capo-e2e-cloud-config".to_string(),
        cloud_name: "openstack".to_string(),
        region: None,
    }
}

fn metadata(
    name: String,
    namespace: Option<String>,
    annotations: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace,
        annotations: (!annotations.is_empty()).then_some(annotations),
        ..Default::default()
    }
}

/// Builder for OpenStackCluster test fixtures.
///
/// # Example
/// ```
/// let cluster = OpenStackClusterBuilder::new("capo-e2e")
///     .namespace("test-abcde")
///     .managed_subnet("10.6.0.0/24")
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct OpenStackClusterBuilder {
    name: String,
    namespace: Option<String>,
    annotations: BTreeMap<String, String>,
    spec: OpenStackClusterSpec,
}

impl OpenStackClusterBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            annotations: BTreeMap::new(),
            spec: OpenStackClusterSpec {
                identity_ref: identity_ref(),
                ..Default::default()
            },
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Add a managed subnet with the given CIDR.
    pub fn managed_subnet(mut self, cidr: impl Into<String>) -> Self {
        self.spec.managed_subnets.push(SubnetSpec {
            cidr: cidr.into(),
            ..Default::default()
        });
        self
    }

    pub fn external_network_id(mut self, id: impl Into<String>) -> Self {
        self.spec.external_network = Some(NetworkParam {
            id: Some(id.into()),
            filter: None,
        });
        self
    }

    /// Disable the API server floating IP.
    pub fn without_floating_ip(mut self) -> Self {
        self.spec.disable_api_server_floating_ip = Some(true);
        self
    }

    pub fn load_balancer(mut self, enabled: bool) -> Self {
        self.spec.api_server_load_balancer = Some(ApiServerLoadBalancer {
            enabled: Some(enabled),
            ..Default::default()
        });
        self
    }

    pub fn fixed_ip(mut self, ip: impl Into<String>) -> Self {
        self.spec.api_server_fixed_ip = Some(ip.into());
        self
    }

    pub fn spec(&self) -> OpenStackClusterSpec {
        self.spec.clone()
    }

    pub fn build(self) -> OpenStackCluster {
        OpenStackCluster {
            metadata: metadata(self.name, self.namespace, self.annotations),
            spec: self.spec,
            status: None,
        }
    }

    /// An OpenStackClusterTemplate stamping out this cluster's spec.
    pub fn build_template(self) -> OpenStackClusterTemplate {
        OpenStackClusterTemplate {
            metadata: metadata(self.name, self.namespace, self.annotations),
            spec: OpenStackClusterTemplateSpec {
                template: OpenStackClusterTemplateResource { spec: self.spec },
            },
        }
    }
}

/// Builder for OpenStackMachine test fixtures.
#[derive(Clone, Debug)]
pub struct OpenStackMachineBuilder {
    name: String,
    namespace: Option<String>,
    annotations: BTreeMap<String, String>,
    spec: OpenStackMachineSpec,
}

impl OpenStackMachineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            annotations: BTreeMap::new(),
            spec: OpenStackMachineSpec {
                flavor: Some("m1.medium".to_string()),
                image: ImageParam {
                    id: None,
                    filter: Some(NameTagFilter {
                        name: Some("ubuntu-2204-kube-v1.31".to_string()),
                        tags: Vec::new(),
                    }),
                },
                ..Default::default()
            },
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn flavor(mut self, flavor: impl Into<String>) -> Self {
        self.spec.flavor = Some(flavor.into());
        self
    }

    pub fn provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.spec.provider_id = Some(provider_id.into());
        self
    }

    pub fn build(self) -> OpenStackMachine {
        OpenStackMachine {
            metadata: metadata(self.name, self.namespace, self.annotations),
            spec: self.spec,
            status: None,
        }
    }

    /// An OpenStackMachineTemplate stamping out this machine's spec.
    pub fn build_template(self) -> OpenStackMachineTemplate {
        OpenStackMachineTemplate {
            metadata: metadata(self.name, self.namespace, self.annotations),
            spec: OpenStackMachineTemplateSpec {
                template: OpenStackMachineTemplateResource { spec: self.spec },
            },
        }
    }
}

