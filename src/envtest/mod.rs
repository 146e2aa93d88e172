//! Test environment: a Kubernetes API server with the provider's CRDs and
//! webhook configurations installed, pointing at a locally served webhook.
//!
//! Either a local control plane is started from the etcd and kube-apiserver
//! binaries, or an existing cluster is used when `USE_EXISTING_CLUSTER=true`.

pub mod certs;
pub mod control_plane;
pub mod install;

use std::path::PathBuf;
use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{Client, Config};
use tempfile::TempDir;
use tracing::{info, warn};

pub use certs::{CertPair, TinyCa};
pub use control_plane::{BinaryAssets, ControlPlane};

use crate::error::{Error, Result};
use crate::manager::{CERT_FILE, KEY_FILE, WebhookServerOptions};

/// Set to `true` to run against the cluster of the current kubeconfig
pub const USE_EXISTING_CLUSTER: &str = "USE_EXISTING_CLUSTER";

/// Reserve an unused local TCP port
pub fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))
        .map_err(|e| Error::Environment(format!("no free local port: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Environment(format!("no free local port: {e}")))?
        .port();
    Ok(port)
}

/// Whether `USE_EXISTING_CLUSTER` is set to `true`
pub fn use_existing_cluster_from_env() -> bool {
    std::env::var(USE_EXISTING_CLUSTER).is_ok_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Where webhook configurations come from and where the webhook server listens
#[derive(Clone, Debug)]
pub struct WebhookInstallOptions {
    /// Files or directories holding ValidatingWebhookConfiguration manifests
    pub paths: Vec<PathBuf>,
    pub local_serving_host: String,
    /// `0` picks a free port on start
    pub local_serving_port: u16,
    /// `None` creates a temporary directory on start
    pub local_serving_cert_dir: Option<PathBuf>,
}

impl Default for WebhookInstallOptions {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            local_serving_host: "127.0.0.1".to_string(),
            local_serving_port: 0,
            local_serving_cert_dir: None,
        }
    }
}

impl WebhookInstallOptions {
    /// Server options for a manager serving these webhooks
    pub fn server_options(&self) -> Result<WebhookServerOptions> {
        let cert_dir = self.local_serving_cert_dir.clone().ok_or_else(|| {
            Error::Environment("webhook serving certificates have not been generated".to_string())
        })?;
        Ok(WebhookServerOptions {
            host: self.local_serving_host.clone(),
            port: self.local_serving_port,
            cert_dir,
        })
    }
}

struct Running {
    client: Client,
    control_plane: Option<ControlPlane>,
    installed_webhooks: Vec<String>,
    _cert_dir: Option<TempDir>,
}

/// API server + CRDs + webhook configurations
pub struct TestEnvironment {
    pub crd_directory_paths: Vec<PathBuf>,
    /// CRDs installed in addition to those read from disk
    pub crds: Vec<CustomResourceDefinition>,
    pub error_if_crd_path_missing: bool,
    pub webhook_install_options: WebhookInstallOptions,
    /// `None` defers to `USE_EXISTING_CLUSTER`
    pub use_existing_cluster: Option<bool>,
    pub control_plane_start_timeout: Duration,
    pub crd_install_timeout: Duration,
    running: Option<Running>,
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self {
            crd_directory_paths: Vec::new(),
            crds: Vec::new(),
            error_if_crd_path_missing: false,
            webhook_install_options: WebhookInstallOptions::default(),
            use_existing_cluster: None,
            control_plane_start_timeout: Duration::from_secs(60),
            crd_install_timeout: Duration::from_secs(30),
            running: None,
        }
    }
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_crd_directory_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.crd_directory_paths = paths;
        self
    }

    pub fn with_crds(mut self, crds: Vec<CustomResourceDefinition>) -> Self {
        self.crds = crds;
        self
    }

    /// Fail on start when a CRD directory does not exist
    pub fn with_error_if_crd_path_missing(mut self, error: bool) -> Self {
        self.error_if_crd_path_missing = error;
        self
    }

    pub fn with_webhook_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.webhook_install_options.paths = paths;
        self
    }

    pub fn with_use_existing_cluster(mut self, use_existing: Option<bool>) -> Self {
        self.use_existing_cluster = use_existing;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn attach_to_existing(&self) -> bool {
        self.use_existing_cluster
            .unwrap_or_else(use_existing_cluster_from_env)
    }

    /// Start (or attach to) the API server and install CRDs and webhooks.
    ///
    /// On failure everything started so far is torn down again.
    pub async fn start(&mut self) -> Result<Config> {
        if self.running.is_some() {
            return Err(Error::Environment("test environment already started".to_string()));
        }

        crate::ensure_crypto_provider();
        let ca = TinyCa::new()?;
        let cert_dir = self.prepare_webhook_serving(&ca)?;

        let (config, mut control_plane) = if self.attach_to_existing() {
            info!("Using existing cluster");
            let config = Config::infer()
                .await
                .map_err(|e| Error::Environment(format!("loading existing cluster config: {e}")))?;
            (config, None)
        } else {
            let assets = BinaryAssets::discover()?;
            let plane = ControlPlane::start(&assets, &ca, self.control_plane_start_timeout).await?;
            let config = plane.config().await?;
            (config, Some(plane))
        };

        match self.install(&config, &ca).await {
            Ok((client, installed_webhooks)) => {
                self.running = Some(Running {
                    client,
                    control_plane,
                    installed_webhooks,
                    _cert_dir: cert_dir,
                });
                Ok(config)
            }
            Err(e) => {
                if let Some(plane) = control_plane.as_mut() {
                    plane.stop().await;
                }
                Err(e)
            }
        }
    }

    fn prepare_webhook_serving(&mut self, ca: &TinyCa) -> Result<Option<TempDir>> {
        let options = &mut self.webhook_install_options;
        if options.local_serving_port == 0 {
            options.local_serving_port = free_port()?;
        }
        let temp = match options.local_serving_cert_dir {
            Some(_) => None,
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("capo-webhook-certs-")
                    .tempdir()
                    .map_err(|e| Error::io(std::env::temp_dir(), e))?;
                options.local_serving_cert_dir = Some(dir.path().to_path_buf());
                Some(dir)
            }
        };
        let cert_dir = options.server_options()?.cert_dir;
        ca.serving_cert(&[options.local_serving_host.as_str(), "localhost"])?
            .write(&cert_dir, CERT_FILE, KEY_FILE)?;
        Ok(temp)
    }

    async fn install(&self, config: &Config, ca: &TinyCa) -> Result<(Client, Vec<String>)> {
        let client = Client::try_from(config.clone())?;

        let mut crds = install::read_crds(&self.crd_directory_paths, self.error_if_crd_path_missing)?;
        crds.extend(self.crds.iter().cloned());
        install::install_crds(&client, &crds, self.crd_install_timeout).await?;

        let options = &self.webhook_install_options;
        let mut configs = install::read_webhook_configs(&options.paths)?;
        for webhook_config in &mut configs {
            install::rewrite_webhook_config(
                webhook_config,
                &options.local_serving_host,
                options.local_serving_port,
                ca.ca_cert_pem().as_bytes(),
            );
        }
        let installed = install::install_webhook_configs(&client, &configs).await?;
        Ok((client, installed))
    }

    /// Tear the environment down. Calling it again is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };

        let mut result = Ok(());
        match running.control_plane.as_mut() {
            Some(plane) => plane.stop().await,
            None => {
                if let Err(e) =
                    install::uninstall_webhook_configs(&running.client, &running.installed_webhooks)
                        .await
                {
                    warn!(error = %e, "Failed to remove webhook configurations");
                    result = Err(e);
                }
            }
        }
        info!("Test environment stopped");
        result
    }
}
