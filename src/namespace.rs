//! Per-test-case namespaces.
//!
//! Each case gets a namespace with a server-generated name. Deletion uses
//! foreground propagation so the namespace only disappears once everything in
//! it is gone.
//!
//! Dropping a namespace that was never deleted falls back to a synchronous
//! delete via `block_in_place`, which needs the multi-threaded runtime.

use std::sync::atomic::{AtomicBool, Ordering};

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Label marking namespaces created by the harness
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// A namespace owned by one test case
pub struct TestNamespace {
    client: Client,
    name: String,
    deleted: AtomicBool,
}

impl TestNamespace {
    /// Create a namespace named `<generate_name><random suffix>`
    pub async fn create(client: Client, generate_name: &str) -> Result<Self> {
        let api: Api<Namespace> = Api::all(client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                generate_name: Some(generate_name.to_string()),
                labels: Some(
                    [(MANAGED_BY_LABEL.to_string(), "capo-e2e".to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };

        let created = api.create(&PostParams::default(), &namespace).await?;
        let name = created.name_any();
        if name.is_empty() {
            return Err(Error::Environment(
                "API server returned a namespace without a name".to_string(),
            ));
        }
        info!(namespace = %name, "Created test namespace");

        Ok(Self {
            client,
            name,
            deleted: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Client the namespace was created with
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Api for namespaced resources in this namespace
    pub fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.name)
    }

    /// Delete the namespace with foreground propagation.
    ///
    /// A namespace that is already gone counts as deleted.
    pub async fn delete(&self) -> Result<()> {
        if self.deleted.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        delete_namespace(&self.client, &self.name).await
    }
}

/// Namespaces go only once everything in them is gone
fn delete_params() -> DeleteParams {
    DeleteParams::foreground()
}

async fn delete_namespace(client: &Client, name: &str) -> Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    match api.delete(name, &delete_params()).await {
        Ok(_) => {
            info!(namespace = %name, "Deleted test namespace");
            Ok(())
        }
        Err(kube::Error::Api(e)) if e.code == 404 => {
            debug!(namespace = %name, "Test namespace already deleted");
            Ok(())
        }
        Err(e) => Err(Error::Kube(e)),
    }
}

impl Drop for TestNamespace {
    fn drop(&mut self) {
        if self.deleted.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(namespace = %self.name, "No runtime available, leaking test namespace");
            return;
        };
        if handle.runtime_flavor() != tokio::runtime::RuntimeFlavor::MultiThread {
            warn!(namespace = %self.name, "Single-threaded runtime, leaking test namespace");
            return;
        }

        let client = self.client.clone();
        let name = self.name.clone();
        tokio::task::block_in_place(|| {
            handle.block_on(async {
                if let Err(e) = delete_namespace(&client, &name).await {
                    warn!(namespace = %name, error = %e, "Drop: failed to delete test namespace");
                }
            });
        });
    }
}

impl std::fmt::Debug for TestNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestNamespace")
            .field("name", &self.name)
            .field("deleted", &self.deleted.load(Ordering::SeqCst))
            .finish()
    }
}
