//! capo-e2e - bring up a management cluster for the OpenStack provider.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Loads the e2e configuration and builds the local clusterctl repository
//! - Creates (or reuses) the bootstrap cluster and installs the providers
//! - Keeps the cluster until interrupted, then tears it down

use std::future::Future;

use tokio::signal;
use tracing::{error, info, warn};

use capo_e2e::bootstrap::{setup_bootstrap_cluster, tear_down};
use capo_e2e::config::E2EConfig;
use capo_e2e::management::{E2EContext, RuntimeEnvironment, Settings, init_bootstrap_cluster};
use capo_e2e::repository::create_clusterctl_local_repository;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("capo_e2e=info".parse()?)
                .add_directive("kube=warn".parse()?),
        )
        .json()
        .init();
    capo_e2e::ensure_crypto_provider();

    let settings = Settings::from_env()?;
    info!(config = %settings.config_path.display(), artifacts = %settings.artifact_folder.display(), "Starting capo-e2e");

    let e2e_config = E2EConfig::load(&settings.config_path)?;

    info!("Creating a clusterctl local repository");
    let clusterctl_config_path =
        create_clusterctl_local_repository(&e2e_config, settings.artifact_folder.join("repository"))?;

    info!("Setting up the bootstrap cluster");
    let (provider, proxy) =
        setup_bootstrap_cluster(&e2e_config, settings.use_existing_cluster).await?;

    let mut ctx = E2EContext {
        settings,
        environment: RuntimeEnvironment {
            bootstrap_cluster_provider: provider,
            bootstrap_cluster_proxy: Some(proxy),
            clusterctl_config_path,
        },
        e2e_config,
    };

    info!("Initializing the bootstrap cluster");
    let result = init_bootstrap_cluster(&ctx).await;
    match &result {
        Ok(()) => {
            info!("Management cluster ready, press Ctrl-C to tear down");
            wait_for_interrupt(signal::ctrl_c()).await;
        }
        Err(e) => error!(error = %e, "Failed to initialize the bootstrap cluster"),
    }

    let provider = ctx.environment.bootstrap_cluster_provider.take();
    let provider = if ctx.settings.skip_cleanup {
        warn!("Skipping cleanup, the bootstrap cluster is left running");
        None
    } else {
        provider
    };
    tear_down(provider, ctx.environment.bootstrap_cluster_proxy.as_ref()).await?;

    result?;
    info!("capo-e2e shutdown complete");
    Ok(())
}

/// Wait for `interrupt`. Failing to listen counts as an interrupt so the
/// clusters still get torn down.
async fn wait_for_interrupt(interrupt: impl Future<Output = std::io::Result<()>>) {
    if let Err(e) = interrupt.await {
        error!(error = %e, "Failed to listen for Ctrl-C, tearing down now");
    }
}
