//! Bootstrap cluster lifecycle.
//!
//! A bootstrap cluster is either created with kind or, when
//! `use_existing_cluster` is set, taken from the default kubeconfig. Either way
//! the caller gets back a [`ClusterProxy`] named `"bootstrap"` and, when a
//! cluster was created, the [`ClusterProvider`] that owns it.

mod kind;
mod proxy;

pub use kind::{KIND_CONFIG_WITH_DOCKER_SOCK, KindBootstrapClusterCreator, KindClusterProvider};
pub use proxy::ClusterProxy;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kube::config::Kubeconfig;
use tracing::{info, warn};

use crate::config::{ContainerImage, E2EConfig, KUBE_CONTEXT};
use crate::error::{Error, Result};

/// Name of the proxy returned by [`setup_bootstrap_cluster`]
pub const BOOTSTRAP_PROXY_NAME: &str = "bootstrap";

/// A cluster the harness created and must delete
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    fn kubeconfig_path(&self) -> PathBuf;

    /// Delete the cluster. Calling it more than once is a no-op.
    async fn dispose(&self) -> Result<()>;
}

/// Input for creating a bootstrap cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateKindBootstrapClusterInput {
    pub name: String,
    /// Mount the host's docker socket into the node
    pub requires_docker_sock: bool,
    pub images: Vec<ContainerImage>,
}

impl CreateKindBootstrapClusterInput {
    pub fn from_config(config: &E2EConfig) -> Self {
        Self {
            name: config.management_cluster_name.clone(),
            requires_docker_sock: config.has_docker_provider(),
            images: config.images.clone(),
        }
    }
}

/// Creates bootstrap clusters
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BootstrapClusterCreator: Send + Sync {
    async fn create(&self, input: CreateKindBootstrapClusterInput)
    -> Result<Box<dyn ClusterProvider>>;
}

/// Kubeconfig used when no cluster is created: the first existing entry of
/// `KUBECONFIG`, else its first entry, else `~/.kube/config`
pub fn default_kubeconfig_path() -> PathBuf {
    resolve_default_kubeconfig(std::env::var_os("KUBECONFIG"), dirs::home_dir())
}

fn resolve_default_kubeconfig(kubeconfig_env: Option<OsString>, home: Option<PathBuf>) -> PathBuf {
    let candidates: Vec<PathBuf> = kubeconfig_env
        .map(|value| {
            std::env::split_paths(&value)
                .filter(|p| !p.as_os_str().is_empty())
                .collect()
        })
        .unwrap_or_default();

    if let Some(existing) = candidates.iter().find(|p| p.exists()) {
        return existing.clone();
    }
    if let Some(first) = candidates.into_iter().next() {
        return first;
    }
    home.unwrap_or_default().join(".kube").join("config")
}

/// Fail unless the kubeconfig's current-context is `expected`
pub fn verify_current_context(kubeconfig_path: &Path, expected: &str) -> Result<()> {
    let kubeconfig = Kubeconfig::read_from(kubeconfig_path)?;
    let actual = kubeconfig.current_context.unwrap_or_default();
    if actual != expected {
        return Err(Error::ContextMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Create (or reuse) the bootstrap cluster using kind
pub async fn setup_bootstrap_cluster(
    config: &E2EConfig,
    use_existing_cluster: bool,
) -> Result<(Option<Box<dyn ClusterProvider>>, ClusterProxy)> {
    if use_existing_cluster {
        return Ok((None, bootstrap_proxy(config, None)?));
    }
    let creator = KindBootstrapClusterCreator::new()?;
    setup_bootstrap_cluster_with(&creator, config, use_existing_cluster).await
}

/// Create (or reuse) the bootstrap cluster with a custom creator.
///
/// When a cluster was created but a later step fails, the cluster is
/// deleted before the error is returned.
pub async fn setup_bootstrap_cluster_with(
    creator: &dyn BootstrapClusterCreator,
    config: &E2EConfig,
    use_existing_cluster: bool,
) -> Result<(Option<Box<dyn ClusterProvider>>, ClusterProxy)> {
    if use_existing_cluster {
        return Ok((None, bootstrap_proxy(config, None)?));
    }

    info!(name = %config.management_cluster_name, "Creating the bootstrap cluster");
    let provider = creator
        .create(CreateKindBootstrapClusterInput::from_config(config))
        .await?;

    let kubeconfig_path = provider.kubeconfig_path();
    if !kubeconfig_path.is_file() {
        discard(provider).await;
        return Err(Error::FileNotFound {
            what: "Failed to get the kubeconfig file for the bootstrap cluster".to_string(),
            path: kubeconfig_path,
        });
    }

    match bootstrap_proxy(config, Some(kubeconfig_path)) {
        Ok(proxy) => Ok((Some(provider), proxy)),
        Err(e) => {
            discard(provider).await;
            Err(e)
        }
    }
}

async fn discard(provider: Box<dyn ClusterProvider>) {
    if let Err(e) = provider.dispose().await {
        warn!(error = %e, "Failed to delete bootstrap cluster after setup failure");
    }
}

/// Proxy for `kubeconfig_path` (or the default kubeconfig), after checking
/// `KUBE_CONTEXT` when it is set
fn bootstrap_proxy(config: &E2EConfig, kubeconfig_path: Option<PathBuf>) -> Result<ClusterProxy> {
    let kubeconfig_path = kubeconfig_path.unwrap_or_else(default_kubeconfig_path);

    if let Some(expected) = config.get_variable(KUBE_CONTEXT).filter(|c| !c.is_empty()) {
        verify_current_context(&kubeconfig_path, &expected)?;
    }

    Ok(ClusterProxy::new(BOOTSTRAP_PROXY_NAME, kubeconfig_path))
}

/// Dispose the proxy, then the provider. Either may be absent.
///
/// Both are always attempted; the first error is returned.
pub async fn tear_down(
    provider: Option<Box<dyn ClusterProvider>>,
    proxy: Option<&ClusterProxy>,
) -> Result<()> {
    let mut first_error = None;
    if let Some(proxy) = proxy
        && let Err(e) = proxy.dispose().await
    {
        warn!(proxy = %proxy.name(), error = %e, "Failed to dispose cluster proxy");
        first_error = Some(e);
    }
    if let Some(provider) = provider
        && let Err(e) = provider.dispose().await
    {
        warn!(error = %e, "Failed to dispose bootstrap cluster");
        first_error.get_or_insert(e);
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
