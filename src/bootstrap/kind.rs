//! kind-backed bootstrap clusters.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

use super::{BootstrapClusterCreator, ClusterProvider, CreateKindBootstrapClusterInput};
use crate::config::LoadImageBehavior;
use crate::error::{Error, Result};

/// kind cluster config mounting the host's docker socket, needed when the
/// docker infrastructure provider runs inside the cluster
pub const KIND_CONFIG_WITH_DOCKER_SOCK: &str = r#"kind: Cluster
apiVersion: kind.x-k8s.io/v1alpha4
nodes:
- role: control-plane
  extraMounts:
  - hostPath: /var/run/docker.sock
    containerPath: /var/run/docker.sock
"#;

/// Run `kind` with `args`, feeding `stdin` when given
async fn run_kind(binary: &Path, args: &[&str], stdin: Option<&str>) -> Result<()> {
    let command = format!("kind {}", args.join(" "));
    let mut child = Command::new(binary)
        .args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::io(binary, e))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())
            .await
            .map_err(|e| Error::io(binary, e))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| Error::io(binary, e))?;
    if !output.status.success() {
        return Err(Error::CommandFailed {
            command,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| Error::Environment(format!(
        "path {} is not valid UTF-8",
        path.display()
    )))
}

/// A kind cluster created by [`KindBootstrapClusterCreator`]
pub struct KindClusterProvider {
    name: String,
    kind: PathBuf,
    kubeconfig_path: PathBuf,
    disposed: AtomicBool,
}

impl KindClusterProvider {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl ClusterProvider for KindClusterProvider {
    fn kubeconfig_path(&self) -> PathBuf {
        self.kubeconfig_path.clone()
    }

    async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(cluster = %self.name, "Deleting bootstrap cluster");
        run_kind(&self.kind, &["delete", "cluster", "--name", &self.name], None).await?;
        match std::fs::remove_file(&self.kubeconfig_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(&self.kubeconfig_path, e)),
        }
        Ok(())
    }
}

/// Creates bootstrap clusters with the `kind` CLI
#[derive(Clone, Debug)]
pub struct KindBootstrapClusterCreator {
    kind: PathBuf,
}

impl KindBootstrapClusterCreator {
    /// Locate `kind` on `PATH`
    pub fn new() -> Result<Self> {
        let kind = which::which("kind").map_err(|source| Error::ToolNotFound {
            tool: "kind".to_string(),
            source,
        })?;
        Ok(Self { kind })
    }

    pub fn with_binary(kind: impl Into<PathBuf>) -> Self {
        Self { kind: kind.into() }
    }

    async fn load_images(&self, input: &CreateKindBootstrapClusterInput) -> Result<()> {
        for image in &input.images {
            info!(cluster = %input.name, image = %image.name, "Loading image into bootstrap cluster");
            let loaded = run_kind(
                &self.kind,
                &["load", "docker-image", "--name", &input.name, &image.name],
                None,
            )
            .await;
            match (loaded, image.load_behavior) {
                (Ok(()), _) => {}
                (Err(e), LoadImageBehavior::TryLoad) => {
                    warn!(image = %image.name, error = %e, "Failed to load optional image");
                }
                (Err(e), LoadImageBehavior::MustLoad) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BootstrapClusterCreator for KindBootstrapClusterCreator {
    async fn create(
        &self,
        input: CreateKindBootstrapClusterInput,
    ) -> Result<Box<dyn ClusterProvider>> {
        let kubeconfig_path =
            std::env::temp_dir().join(format!("kind-cluster-{}.kubeconfig", input.name));

        info!(cluster = %input.name, docker_sock = input.requires_docker_sock, "Creating bootstrap cluster");
        let mut args = vec![
            "create",
            "cluster",
            "--name",
            input.name.as_str(),
            "--kubeconfig",
            path_arg(&kubeconfig_path)?,
        ];
        let config = if input.requires_docker_sock {
            args.extend(["--config", "-"]);
            Some(KIND_CONFIG_WITH_DOCKER_SOCK)
        } else {
            None
        };
        run_kind(&self.kind, &args, config).await?;

        let provider = KindClusterProvider {
            name: input.name.clone(),
            kind: self.kind.clone(),
            kubeconfig_path,
            disposed: AtomicBool::new(false),
        };

        if let Err(e) = self.load_images(&input).await {
            if let Err(cleanup) = provider.dispose().await {
                warn!(error = %cleanup, "Failed to delete bootstrap cluster after image load failure");
            }
            return Err(e);
        }

        Ok(Box::new(provider))
    }
}
