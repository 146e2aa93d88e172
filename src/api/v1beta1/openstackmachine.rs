//! OpenStackMachine and OpenStackMachineTemplate.

use kube::CustomResource;
use kube::core::ObjectList;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    ImageParam, OpenStackIdentityReference, PortOpts, RootVolume, SecurityGroupParam,
    ServerMetadata,
};

/// OpenStackMachine describes a single Nova server backing a Cluster API Machine.
///
/// Example:
/// ```yaml
/// apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
/// kind: OpenStackMachine
/// metadata:
///   name: worker-0
/// spec:
///   flavor: m1.medium
///   image:
///     filter:
///       name: ubuntu-2204-kube-v1.29.2
///   sshKeyName: capo-e2e
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "OpenStackMachine",
    plural = "openstackmachines",
    shortname = "osm",
    status = "OpenStackMachineStatus",
    namespaced,
    printcolumn = r#"{"name":"InstanceState", "type":"string", "jsonPath":".status.instanceState"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"ProviderID", "type":"string", "jsonPath":".spec.providerID"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackMachineSpec {
    /// Unique identifier set by the controller once the server exists.
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Flavor name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,

    /// Image to boot from.
    #[serde(default)]
    pub image: ImageParam,

    /// SSH key pair injected into the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_name: Option<String>,

    /// Ports to create; an empty list means one port on the cluster network.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortOpts>,

    /// Security groups applied to every port without its own.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<SecurityGroupParam>,

    /// Create a trunk port.
    #[serde(default)]
    pub trunk: bool,

    /// Tags added to the server and its ports.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Server metadata.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_metadata: Vec<ServerMetadata>,

    /// Attach a config drive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_drive: Option<bool>,

    /// Boot from a volume instead of ephemeral disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume: Option<RootVolume>,

    /// Credentials override for this machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_ref: Option<OpenStackIdentityReference>,
}

/// Observed state of an OpenStackMachine.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackMachineStatus {
    #[serde(default)]
    pub ready: bool,

    #[serde(default, rename = "instanceID", skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

/// OpenStackMachineTemplate is the machine blueprint referenced by MachineDeployments
/// and control planes.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "OpenStackMachineTemplate",
    plural = "openstackmachinetemplates",
    shortname = "osmt",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackMachineTemplateSpec {
    pub template: OpenStackMachineTemplateResource,
}

/// Wrapper holding the machine spec stamped out by the template.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct OpenStackMachineTemplateResource {
    pub spec: OpenStackMachineSpec,
}

pub type OpenStackMachineList = ObjectList<OpenStackMachine>;
pub type OpenStackMachineTemplateList = ObjectList<OpenStackMachineTemplate>;
