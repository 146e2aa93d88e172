//! OpenStackCluster and OpenStackClusterTemplate.

use kube::CustomResource;
use kube::core::ObjectList;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::openstackmachine::OpenStackMachineSpec;
use super::types::{
    ApiEndpoint, NetworkParam, OpenStackIdentityReference, SecurityGroupRuleSpec, SubnetParam,
    SubnetSpec,
};

/// OpenStackCluster holds the OpenStack-side infrastructure of a workload cluster:
/// networking, the API server load balancer and an optional bastion.
///
/// Example:
/// ```yaml
/// apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
/// kind: OpenStackCluster
/// metadata:
///   name: capo-e2e
/// spec:
///   identityRef:
///     name: capo-e2e-cloud-config
///     cloudName: openstack
///   managedSubnets:
///     - cidr: 10.6.0.0/24
///   externalNetwork:
///     id: 8a1b6e30-5f8f-4a43-b1e4-6f34b7b8c1f1
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "OpenStackCluster",
    plural = "openstackclusters",
    shortname = "osc",
    status = "OpenStackClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Endpoint", "type":"string", "jsonPath":".spec.controlPlaneEndpoint.host"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackClusterSpec {
    /// Subnets the provider creates for the cluster network. At most one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_subnets: Vec<SubnetSpec>,

    /// Pre-existing cluster network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkParam>,

    /// Pre-existing subnets of the cluster network.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<SubnetParam>,

    /// Network providing floating IPs and router gateways.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_network: Option<NetworkParam>,

    /// Do not attach the cluster to an external network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_external_network: Option<bool>,

    /// Load balancer in front of the control plane.
    #[serde(default, rename = "apiServerLoadBalancer", skip_serializing_if = "Option::is_none")]
    pub api_server_load_balancer: Option<ApiServerLoadBalancer>,

    /// Do not allocate a floating IP for the API server.
    #[serde(default, rename = "disableAPIServerFloatingIP", skip_serializing_if = "Option::is_none")]
    pub disable_api_server_floating_ip: Option<bool>,

    /// Floating IP to use for the API server.
    #[serde(default, rename = "apiServerFloatingIP", skip_serializing_if = "Option::is_none")]
    pub api_server_floating_ip: Option<String>,

    /// Fixed IP of the API server on the cluster network.
    #[serde(default, rename = "apiServerFixedIP", skip_serializing_if = "Option::is_none")]
    pub api_server_fixed_ip: Option<String>,

    /// Port the API server listens on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_port: Option<i32>,

    /// Security groups managed by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_security_groups: Option<ManagedSecurityGroups>,

    /// Disable port security on all ports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_port_security: Option<bool>,

    /// Tags added to every created resource.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Endpoint of the control plane; set once by the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,

    /// Availability zones control plane machines may be placed in.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub control_plane_availability_zones: Vec<String>,

    /// Bastion host for SSH access to the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bastion: Option<Bastion>,

    /// Credentials used to talk to OpenStack.
    pub identity_ref: OpenStackIdentityReference,
}

/// API server load balancer settings.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerLoadBalancer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_ports: Vec<i32>,

    #[serde(default, rename = "allowedCIDRs", skip_serializing_if = "Vec::is_empty")]
    pub allowed_cidrs: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl ApiServerLoadBalancer {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// Security groups created by the provider.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedSecurityGroups {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_nodes_security_group_rules: Vec<SecurityGroupRuleSpec>,

    #[serde(default)]
    pub allow_all_in_cluster_traffic: bool,
}

/// Bastion host configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bastion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<OpenStackMachineSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,

    #[serde(default, rename = "floatingIP", skip_serializing_if = "Option::is_none")]
    pub floating_ip: Option<String>,
}

/// Observed state of an OpenStackCluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackClusterStatus {
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

/// OpenStackClusterTemplate is the cluster blueprint used by ClusterClasses.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "OpenStackClusterTemplate",
    plural = "openstackclustertemplates",
    shortname = "osct",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackClusterTemplateSpec {
    pub template: OpenStackClusterTemplateResource,
}

/// Wrapper holding the cluster spec stamped out by the template.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct OpenStackClusterTemplateResource {
    pub spec: OpenStackClusterSpec,
}

pub type OpenStackClusterList = ObjectList<OpenStackCluster>;
