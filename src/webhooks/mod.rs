//! Validating admission webhooks for the provider's kinds.
//!
//! Each kind implements [`Webhook`], which registers its policy with a
//! [`Manager`]. List kinds are registered too but serve no admission path:
//! the API server never sends admission requests for lists.

pub mod policies;
mod server;

pub use policies::{FieldError, ValidationContext, ValidationResult};
pub use server::{Validator, WEBHOOK_PORT, WebhookState, validation_router};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};

use kube::Resource;

use crate::api::v1beta1::{
    OpenStackCluster, OpenStackClusterList, OpenStackClusterTemplate, OpenStackMachine,
    OpenStackMachineList, OpenStackMachineTemplate, OpenStackMachineTemplateList,
};
use crate::error::Result;
use crate::manager::Manager;

/// A kind whose webhooks can be installed into a [`Manager`]
pub trait Webhook {
    /// Kind name used in registration errors and metrics
    const KIND: &'static str;

    fn setup_webhook_with_manager(manager: &mut Manager) -> Result<()>;
}

/// Path the validating webhook for `K` is served on:
/// `/validate-<group with dots as dashes>-<version>-<lowercase kind>`
pub fn validate_path<K: Resource<DynamicType = ()>>() -> String {
    format!(
        "/validate-{}-{}-{}",
        K::group(&()).replace('.', "-"),
        K::version(&()),
        K::kind(&()).to_lowercase()
    )
}

impl Webhook for OpenStackCluster {
    const KIND: &'static str = "OpenStackCluster";

    fn setup_webhook_with_manager(manager: &mut Manager) -> Result<()> {
        manager.register_validating_webhook::<Self>(policies::openstackcluster::validate)
    }
}

impl Webhook for OpenStackClusterTemplate {
    const KIND: &'static str = "OpenStackClusterTemplate";

    fn setup_webhook_with_manager(manager: &mut Manager) -> Result<()> {
        manager.register_validating_webhook::<Self>(policies::openstackclustertemplate::validate)
    }
}

impl Webhook for OpenStackMachine {
    const KIND: &'static str = "OpenStackMachine";

    fn setup_webhook_with_manager(manager: &mut Manager) -> Result<()> {
        manager.register_validating_webhook::<Self>(policies::openstackmachine::validate)
    }
}

impl Webhook for OpenStackMachineTemplate {
    const KIND: &'static str = "OpenStackMachineTemplate";

    fn setup_webhook_with_manager(manager: &mut Manager) -> Result<()> {
        manager.register_validating_webhook::<Self>(policies::openstackmachinetemplate::validate)
    }
}

impl Webhook for OpenStackClusterList {
    const KIND: &'static str = "OpenStackClusterList";

    fn setup_webhook_with_manager(manager: &mut Manager) -> Result<()> {
        manager.register_kind(Self::KIND)
    }
}

impl Webhook for OpenStackMachineList {
    const KIND: &'static str = "OpenStackMachineList";

    fn setup_webhook_with_manager(manager: &mut Manager) -> Result<()> {
        manager.register_kind(Self::KIND)
    }
}

impl Webhook for OpenStackMachineTemplateList {
    const KIND: &'static str = "OpenStackMachineTemplateList";

    fn setup_webhook_with_manager(manager: &mut Manager) -> Result<()> {
        manager.register_kind(Self::KIND)
    }
}

/// Register every provider webhook, in the order the suite expects
pub fn setup_all(manager: &mut Manager) -> Result<()> {
    OpenStackMachineTemplate::setup_webhook_with_manager(manager)?;
    OpenStackMachineTemplateList::setup_webhook_with_manager(manager)?;
    OpenStackCluster::setup_webhook_with_manager(manager)?;
    OpenStackClusterTemplate::setup_webhook_with_manager(manager)?;
    OpenStackMachine::setup_webhook_with_manager(manager)?;
    OpenStackMachineList::setup_webhook_with_manager(manager)?;
    OpenStackClusterList::setup_webhook_with_manager(manager)?;
    Ok(())
}
