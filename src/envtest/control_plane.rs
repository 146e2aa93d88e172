//! Local etcd + kube-apiserver processes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::certs::{self, TinyCa};
use super::free_port;
use crate::error::{Error, Result};

/// Directory holding `etcd` and `kube-apiserver`
pub const KUBEBUILDER_ASSETS: &str = "KUBEBUILDER_ASSETS";
/// Explicit path to the etcd binary
pub const TEST_ASSET_ETCD: &str = "TEST_ASSET_ETCD";
/// Explicit path to the kube-apiserver binary
pub const TEST_ASSET_KUBE_APISERVER: &str = "TEST_ASSET_KUBE_APISERVER";

const KUBECONFIG_FILE: &str = "admin.kubeconfig";

/// Locations of the control plane binaries
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryAssets {
    pub etcd: PathBuf,
    pub kube_apiserver: PathBuf,
}

impl BinaryAssets {
    /// Resolve binaries from `TEST_ASSET_*`, then `KUBEBUILDER_ASSETS`, then `PATH`
    pub fn discover() -> Result<Self> {
        let assets_dir = std::env::var_os(KUBEBUILDER_ASSETS).map(PathBuf::from);
        Ok(Self {
            etcd: locate("etcd", TEST_ASSET_ETCD, assets_dir.as_deref())?,
            kube_apiserver: locate(
                "kube-apiserver",
                TEST_ASSET_KUBE_APISERVER,
                assets_dir.as_deref(),
            )?,
        })
    }

    /// Whether binaries can be found without searching `PATH`
    pub fn configured() -> bool {
        std::env::var_os(KUBEBUILDER_ASSETS).is_some()
            || (std::env::var_os(TEST_ASSET_ETCD).is_some()
                && std::env::var_os(TEST_ASSET_KUBE_APISERVER).is_some())
    }
}

fn locate(binary: &str, env_var: &str, assets_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(env_var) {
        return existing(binary, PathBuf::from(path));
    }
    if let Some(dir) = assets_dir {
        return existing(binary, dir.join(binary));
    }
    which::which(binary).map_err(|source| Error::ToolNotFound {
        tool: binary.to_string(),
        source,
    })
}

fn existing(binary: &str, path: PathBuf) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(Error::FileNotFound {
            what: format!("{binary} binary"),
            path,
        })
    }
}

/// A running local control plane
pub struct ControlPlane {
    etcd: Child,
    apiserver: Child,
    dir: TempDir,
    url: String,
}

impl ControlPlane {
    /// Start etcd and kube-apiserver, then wait until the API server answers
    pub async fn start(assets: &BinaryAssets, ca: &TinyCa, timeout: Duration) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("capo-envtest-")
            .tempdir()
            .map_err(|e| Error::io(std::env::temp_dir(), e))?;
        let root = dir.path();

        let etcd_client_port = free_port()?;
        let etcd_peer_port = free_port()?;
        let etcd_url = format!("http://127.0.0.1:{etcd_client_port}");
        info!(url = %etcd_url, "Starting etcd");
        let etcd = spawn(
            &assets.etcd,
            &[
                format!("--data-dir={}", root.join("etcd").display()),
                format!("--listen-client-urls={etcd_url}"),
                format!("--advertise-client-urls={etcd_url}"),
                format!("--listen-peer-urls=http://127.0.0.1:{etcd_peer_port}"),
                "--unsafe-no-fsync=true".to_string(),
            ],
            root,
            "etcd",
        )?;

        let certs_dir = root.join("certs");
        std::fs::create_dir_all(&certs_dir).map_err(|e| Error::io(&certs_dir, e))?;
        let ca_path = certs_dir.join("ca.crt");
        std::fs::write(&ca_path, ca.ca_cert_pem()).map_err(|e| Error::io(&ca_path, e))?;
        ca.serving_cert(&["127.0.0.1", "localhost"])?
            .write(&certs_dir, "apiserver.crt", "apiserver.key")?;
        let sa_key = certs_dir.join("sa.key");
        std::fs::write(&sa_key, certs::service_account_key()?).map_err(|e| Error::io(&sa_key, e))?;

        let secure_port = free_port()?;
        let url = format!("https://127.0.0.1:{secure_port}");
        info!(url = %url, "Starting kube-apiserver");
        let apiserver = spawn(
            &assets.kube_apiserver,
            &[
                format!("--etcd-servers={etcd_url}"),
                format!("--cert-dir={}", certs_dir.display()),
                format!("--tls-cert-file={}", certs_dir.join("apiserver.crt").display()),
                format!("--tls-private-key-file={}", certs_dir.join("apiserver.key").display()),
                format!("--client-ca-file={}", ca_path.display()),
                format!("--service-account-key-file={}", sa_key.display()),
                format!("--service-account-signing-key-file={}", sa_key.display()),
                "--service-account-issuer=https://127.0.0.1".to_string(),
                format!("--secure-port={secure_port}"),
                "--bind-address=127.0.0.1".to_string(),
                "--advertise-address=127.0.0.1".to_string(),
                "--service-cluster-ip-range=10.0.0.0/24".to_string(),
                "--allow-privileged=true".to_string(),
                "--authorization-mode=RBAC".to_string(),
                "--disable-admission-plugins=ServiceAccount".to_string(),
            ],
            root,
            "kube-apiserver",
        )?;

        let admin = ca.client_cert("admin", &["system:masters"])?;
        write_kubeconfig(
            &root.join(KUBECONFIG_FILE),
            &url,
            ca.ca_cert_pem(),
            &admin.cert_pem,
            &admin.key_pem,
        )?;

        let mut plane = Self {
            etcd,
            apiserver,
            dir,
            url,
        };
        if let Err(e) = plane.wait_ready(timeout).await {
            plane.stop().await;
            return Err(e);
        }
        Ok(plane)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Admin kubeconfig for this control plane
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.dir.path().join(KUBECONFIG_FILE)
    }

    /// Client configuration authenticated as a cluster admin
    pub async fn config(&self) -> Result<Config> {
        let kubeconfig = Kubeconfig::read_from(self.kubeconfig_path())?;
        Ok(Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?)
    }

    async fn wait_ready(&mut self, timeout: Duration) -> Result<()> {
        crate::ensure_crypto_provider();
        let client = Client::try_from(self.config().await?)?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(status) = self.exited()? {
                return Err(Error::Environment(format!(
                    "control plane process exited with {status}; logs in {}",
                    self.dir.path().display()
                )));
            }
            match client.apiserver_version().await {
                Ok(info) => {
                    info!(version = %info.git_version, "API server is ready");
                    return Ok(());
                }
                Err(e) => debug!(error = %e, "API server not ready yet"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout {
                    what: format!("API server at {}", self.url),
                    timeout,
                });
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    fn exited(&mut self) -> Result<Option<std::process::ExitStatus>> {
        let root = self.dir.path().to_path_buf();
        for child in [&mut self.etcd, &mut self.apiserver] {
            if let Some(status) = child.try_wait().map_err(|e| Error::io(&root, e))? {
                return Ok(Some(status));
            }
        }
        Ok(None)
    }

    /// Kill both processes; the scratch directory goes when `self` drops
    pub async fn stop(&mut self) {
        for (name, child) in [("kube-apiserver", &mut self.apiserver), ("etcd", &mut self.etcd)] {
            if let Err(e) = child.kill().await {
                warn!(process = name, error = %e, "Failed to stop control plane process");
            }
        }
        info!("Control plane stopped");
    }
}

fn spawn(binary: &Path, args: &[String], log_dir: &Path, name: &str) -> Result<Child> {
    let log_path = log_dir.join(format!("{name}.log"));
    let log = std::fs::File::create(&log_path).map_err(|e| Error::io(&log_path, e))?;
    let stderr = log.try_clone().map_err(|e| Error::io(&log_path, e))?;
    debug!(binary = %binary.display(), ?args, "Spawning");
    Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::io(binary, e))
}

/// Write a single-context kubeconfig with embedded certificate data
pub fn write_kubeconfig(
    path: &Path,
    server: &str,
    ca_pem: &str,
    client_cert_pem: &str,
    client_key_pem: &str,
) -> Result<()> {
    let kubeconfig = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": "envtest",
            "cluster": {
                "server": server,
                "certificate-authority-data": STANDARD.encode(ca_pem),
            },
        }],
        "users": [{
            "name": "envtest-admin",
            "user": {
                "client-certificate-data": STANDARD.encode(client_cert_pem),
                "client-key-data": STANDARD.encode(client_key_pem),
            },
        }],
        "contexts": [{
            "name": "envtest",
            "context": {"cluster": "envtest", "user": "envtest-admin"},
        }],
        "current-context": "envtest",
    });
    let yaml = serde_yaml::to_string(&kubeconfig)?;
    std::fs::write(path, yaml).map_err(|e| Error::io(path, e))
}
