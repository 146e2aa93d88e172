//! `infrastructure.cluster.x-k8s.io/v1beta1` resources.

mod openstackcluster;
mod openstackmachine;
mod types;

pub use openstackcluster::*;
pub use openstackmachine::*;
pub use types::*;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// API group of the provider's resources
pub const GROUP: &str = "infrastructure.cluster.x-k8s.io";
/// API version served by this module
pub const VERSION: &str = "v1beta1";

/// CRDs for every resource in this version
pub fn crds() -> Vec<CustomResourceDefinition> {
    vec![
        OpenStackCluster::crd(),
        OpenStackClusterTemplate::crd(),
        OpenStackMachine::crd(),
        OpenStackMachineTemplate::crd(),
    ]
}
