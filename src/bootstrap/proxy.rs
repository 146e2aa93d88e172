//! Named handle to a cluster reachable through a kubeconfig.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

/// A cluster proxy owns a lazily built client and any background log
/// followers started against the cluster.
pub struct ClusterProxy {
    name: String,
    kubeconfig_path: PathBuf,
    client: OnceCell<Client>,
    cancel: CancellationToken,
    watchers: Mutex<JoinSet<()>>,
    disposed: AtomicBool,
}

impl ClusterProxy {
    pub fn new(name: impl Into<String>, kubeconfig_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kubeconfig_path: kubeconfig_path.into(),
            client: OnceCell::new(),
            cancel: CancellationToken::new(),
            watchers: Mutex::new(JoinSet::new()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kubeconfig_path(&self) -> &Path {
        &self.kubeconfig_path
    }

    /// Client for the cluster, built from the kubeconfig on first use
    pub async fn client(&self) -> Result<Client> {
        let client = self
            .client
            .get_or_try_init(|| async {
                let kubeconfig = Kubeconfig::read_from(&self.kubeconfig_path)?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await?;
                debug!(proxy = %self.name, url = %config.cluster_url, "Built cluster client");
                crate::ensure_crypto_provider();
                Ok::<_, crate::error::Error>(Client::try_from(config)?)
            })
            .await?;
        Ok(client.clone())
    }

    /// Run `task` in the background until it completes or the proxy is disposed
    pub async fn spawn_watcher<F>(&self, description: impl Into<String>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let description = description.into();
        let token = self.cancel.clone();
        self.watchers.lock().await.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!(watcher = %description, "Watcher cancelled"),
                _ = task => debug!(watcher = %description, "Watcher finished"),
            }
        });
    }

    /// Number of background watchers still running
    pub async fn active_watchers(&self) -> usize {
        self.watchers.lock().await.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Stop every watcher and wait for them to exit. Idempotent.
    pub async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        let mut watchers = std::mem::take(&mut *self.watchers.lock().await);
        while let Some(joined) = watchers.join_next().await {
            if let Err(e) = joined {
                warn!(proxy = %self.name, error = %e, "Log watcher ended abnormally");
            }
        }
        info!(proxy = %self.name, "Disposed cluster proxy");
        Ok(())
    }
}

impl std::fmt::Debug for ClusterProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterProxy")
            .field("name", &self.name)
            .field("kubeconfig_path", &self.kubeconfig_path)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
