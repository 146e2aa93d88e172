//! Management cluster initialisation.
//!
//! Installs the Cluster API providers into the bootstrap cluster with
//! `clusterctl init`, waits for their controllers and streams the controller
//! logs into the artifact folder for the lifetime of the cluster proxy.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, LogParams};
use kube::{Client, ResourceExt};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::bootstrap::{ClusterProvider, ClusterProxy};
use crate::config::{E2EConfig, Intervals};
use crate::envtest::USE_EXISTING_CLUSTER;
use crate::error::{Error, Result};
use crate::wait::eventually_within;

/// Label carried by every provider controller Deployment
pub const PROVIDER_LABEL: &str = "cluster.x-k8s.io/provider";

/// Command-line settings of an e2e run
#[derive(Clone, Debug, Default)]
pub struct Settings {
    /// Root folder for logs and generated files
    pub artifact_folder: PathBuf,
    pub config_path: PathBuf,
    pub use_existing_cluster: bool,
    /// Leave clusters behind after the run
    pub skip_cleanup: bool,
}

/// Environment variable naming the e2e configuration file
pub const E2E_CONF_FILE: &str = "E2E_CONF_FILE";
/// Environment variable naming the artifact folder
pub const ARTIFACTS: &str = "ARTIFACTS";
/// Set to `true` to leave clusters behind
pub const SKIP_CLEANUP: &str = "SKIP_CLEANUP";

impl Settings {
    /// Settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Settings from `lookup`; only the configuration file is required
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let flag = |name: &str| lookup(name).is_some_and(|v| v.eq_ignore_ascii_case("true"));
        let config_path = lookup(E2E_CONF_FILE)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::MissingVariable(E2E_CONF_FILE.to_string()))?;
        Ok(Self {
            artifact_folder: lookup(ARTIFACTS)
                .filter(|p| !p.is_empty())
                .map_or_else(|| PathBuf::from("_artifacts"), PathBuf::from),
            config_path: PathBuf::from(config_path),
            use_existing_cluster: flag(USE_EXISTING_CLUSTER),
            skip_cleanup: flag(SKIP_CLEANUP),
        })
    }
}

/// State accumulated while the run sets itself up
#[derive(Default)]
pub struct RuntimeEnvironment {
    pub bootstrap_cluster_provider: Option<Box<dyn ClusterProvider>>,
    pub bootstrap_cluster_proxy: Option<ClusterProxy>,
    pub clusterctl_config_path: PathBuf,
}

/// Everything an e2e run shares between its phases
#[derive(Default)]
pub struct E2EContext {
    pub settings: Settings,
    pub environment: RuntimeEnvironment,
    pub e2e_config: E2EConfig,
}

/// Input for [`init_management_cluster_and_watch_controller_logs`]
pub struct InitManagementClusterInput<'a> {
    pub cluster_proxy: &'a ClusterProxy,
    pub clusterctl_config_path: PathBuf,
    pub core_provider: Option<String>,
    pub bootstrap_providers: Vec<String>,
    pub control_plane_providers: Vec<String>,
    pub infrastructure_providers: Vec<String>,
    pub log_folder: PathBuf,
}

impl InitManagementClusterInput<'_> {
    /// `clusterctl init` arguments for this input
    pub fn clusterctl_args(&self) -> Result<Vec<String>> {
        let mut args = vec![
            "init".to_string(),
            "--config".to_string(),
            path_string(&self.clusterctl_config_path)?,
            "--kubeconfig".to_string(),
            path_string(self.cluster_proxy.kubeconfig_path())?,
        ];
        if let Some(core) = &self.core_provider {
            args.extend(["--core".to_string(), core.clone()]);
        }
        for (flag, providers) in [
            ("--bootstrap", &self.bootstrap_providers),
            ("--control-plane", &self.control_plane_providers),
            ("--infrastructure", &self.infrastructure_providers),
        ] {
            if !providers.is_empty() {
                args.extend([flag.to_string(), providers.join(",")]);
            }
        }
        Ok(args)
    }
}

fn path_string(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| Error::Environment(format!("path {} is not valid UTF-8", path.display())))
}

/// Initialise the bootstrap cluster as the management cluster
pub async fn init_bootstrap_cluster(ctx: &E2EContext) -> Result<()> {
    let proxy = ctx
        .environment
        .bootstrap_cluster_proxy
        .as_ref()
        .ok_or_else(|| Error::Environment("bootstrap cluster proxy is not set".to_string()))?;
    let config = &ctx.e2e_config;

    let input = InitManagementClusterInput {
        cluster_proxy: proxy,
        clusterctl_config_path: ctx.environment.clusterctl_config_path.clone(),
        core_provider: config.core_provider(),
        bootstrap_providers: config.bootstrap_providers(),
        control_plane_providers: config.control_plane_providers(),
        infrastructure_providers: config.infrastructure_providers(),
        log_folder: ctx
            .settings
            .artifact_folder
            .join("clusters")
            .join(proxy.name()),
    };
    let intervals = config.get_intervals(proxy.name(), "wait-controllers")?;
    init_management_cluster_and_watch_controller_logs(&input, intervals).await
}

/// Name of the `clusterctl init` output file inside the log folder
pub const CLUSTERCTL_INIT_LOG: &str = "clusterctl-init.log";

/// Runs `clusterctl`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterctlRunner: Send + Sync {
    /// Run `clusterctl <args>`, writing stdout and stderr to `log_path`
    async fn run(&self, args: Vec<String>, log_path: PathBuf) -> Result<()>;
}

/// The `clusterctl` binary found on `PATH`
#[derive(Clone, Copy, Debug, Default)]
pub struct ClusterctlBinary;

#[async_trait]
impl ClusterctlRunner for ClusterctlBinary {
    async fn run(&self, args: Vec<String>, log_path: PathBuf) -> Result<()> {
        let clusterctl = which::which("clusterctl").map_err(|source| Error::ToolNotFound {
            tool: "clusterctl".to_string(),
            source,
        })?;
        let log = std::fs::File::create(&log_path).map_err(|e| Error::io(&log_path, e))?;
        let log_err = log.try_clone().map_err(|e| Error::io(&log_path, e))?;

        let status = Command::new(&clusterctl)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::io(&clusterctl, e))?;

        if !status.success() {
            let output = tokio::fs::read_to_string(&log_path).await.unwrap_or_default();
            return Err(Error::CommandFailed {
                command: format!("clusterctl {}", args.join(" ")),
                stderr: output.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Run `clusterctl init` unless provider controllers are already installed,
/// wait for every provider controller to become available and follow the
/// controller logs.
pub async fn init_management_cluster_and_watch_controller_logs(
    input: &InitManagementClusterInput<'_>,
    intervals: Intervals,
) -> Result<()> {
    init_management_cluster_with(&ClusterctlBinary, input, intervals).await
}

/// [`init_management_cluster_and_watch_controller_logs`] with a custom runner
pub async fn init_management_cluster_with(
    runner: &dyn ClusterctlRunner,
    input: &InitManagementClusterInput<'_>,
    intervals: Intervals,
) -> Result<()> {
    let client = input.cluster_proxy.client().await?;
    let deployments: Api<Deployment> = Api::all(client.clone());

    let mut controllers = list_controllers(&deployments).await?;
    if init_unless_installed(runner, input, &controllers).await? {
        controllers = list_controllers(&deployments).await?;
    }
    if controllers.is_empty() {
        return Err(Error::Environment(format!(
            "no controller deployments labelled {PROVIDER_LABEL} found after clusterctl init"
        )));
    }

    for deployment in &controllers {
        let namespace = deployment.namespace().unwrap_or_default();
        let name = deployment.name_any();
        info!(deployment = %name, namespace = %namespace, "Waiting for controller to be available");

        let api: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
        let what = format!("deployment {namespace}/{name} to be available");
        eventually_within(&what, intervals, || {
            let api = api.clone();
            let name = name.clone();
            async move {
                api.get(&name)
                    .await
                    .ok()
                    .filter(is_deployment_available)
                    .map(|_| ())
            }
        })
        .await?;

        watch_deployment_logs(input.cluster_proxy, &client, deployment, &input.log_folder).await?;
    }
    Ok(())
}

async fn list_controllers(deployments: &Api<Deployment>) -> Result<Vec<Deployment>> {
    Ok(deployments
        .list(&ListParams::default().labels(PROVIDER_LABEL))
        .await?
        .items)
}

/// Run `clusterctl init` when `installed` is empty. Returns whether it ran.
async fn init_unless_installed(
    runner: &dyn ClusterctlRunner,
    input: &InitManagementClusterInput<'_>,
    installed: &[Deployment],
) -> Result<bool> {
    if !installed.is_empty() {
        info!(
            controllers = installed.len(),
            "Provider controllers already installed, skipping clusterctl init"
        );
        return Ok(false);
    }

    let args = input.clusterctl_args()?;
    tokio::fs::create_dir_all(&input.log_folder)
        .await
        .map_err(|e| Error::io(&input.log_folder, e))?;
    info!(kubeconfig = %input.cluster_proxy.kubeconfig_path().display(), "Running clusterctl init");
    runner
        .run(args, input.log_folder.join(CLUSTERCTL_INIT_LOG))
        .await?;
    Ok(true)
}

/// A Deployment whose `Available` condition is `True`
pub fn is_deployment_available(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Available" && c.status == "True")
        })
}

/// Start one log follower per container of every pod the deployment selects
async fn watch_deployment_logs(
    proxy: &ClusterProxy,
    client: &Client,
    deployment: &Deployment,
    log_folder: &Path,
) -> Result<()> {
    let namespace = deployment.namespace().unwrap_or_default();
    let name = deployment.name_any();
    let Some(selector) = deployment
        .spec
        .as_ref()
        .and_then(|s| s.selector.match_labels.as_ref())
        .map(|labels| {
            labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",")
        })
    else {
        warn!(deployment = %name, "Deployment has no label selector, not following logs");
        return Ok(());
    };

    let pods: Api<Pod> = Api::namespaced(client.clone(), &namespace);
    for pod in pods.list(&ListParams::default().labels(&selector)).await?.items {
        let pod_name = pod.name_any();
        let containers = pod
            .spec
            .as_ref()
            .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_else(Vec::new);

        for container in containers {
            let path = controller_log_path(log_folder, &namespace, &name, &pod_name, &container);
            let pods = pods.clone();
            let pod_name = pod_name.clone();
            proxy
                .spawn_watcher(
                    format!("{namespace}/{pod_name}/{container}"),
                    async move {
                        if let Err(e) = follow_container_log(pods, &pod_name, &container, &path).await {
                            warn!(pod = %pod_name, container = %container, error = %e, "Log follower stopped");
                        }
                    },
                )
                .await;
        }
    }
    Ok(())
}

/// `<folder>/logs/<namespace>/<deployment>/<pod>/<container>.log`
pub fn controller_log_path(
    log_folder: &Path,
    namespace: &str,
    deployment: &str,
    pod: &str,
    container: &str,
) -> PathBuf {
    log_folder
        .join("logs")
        .join(namespace)
        .join(deployment)
        .join(pod)
        .join(format!("{container}.log"))
}

async fn follow_container_log(pods: Api<Pod>, pod: &str, container: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent, e))?;
    }
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| Error::io(path, e))?;

    let params = LogParams {
        container: Some(container.to_string()),
        follow: true,
        ..Default::default()
    };
    let lines = pods.log_stream(pod, &params).await?.lines();
    futures::pin_mut!(lines);
    while let Some(line) = lines.try_next().await.map_err(|e| Error::io(path, e))? {
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::io(path, e))?;
        file.write_all(b"\n").await.map_err(|e| Error::io(path, e))?;
    }
    debug!(pod = %pod, container = %container, "Log stream ended");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentCondition, DeploymentStatus};

    fn deployment_with(conditions: Vec<(&str, &str)>) -> Deployment {
        Deployment {
            status: Some(DeploymentStatus {
                conditions: Some(
                    conditions
                        .into_iter()
                        .map(|(type_, status)| DeploymentCondition {
                            type_: type_.to_string(),
                            status: status.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_deployment_availability() {
        assert!(is_deployment_available(&deployment_with(vec![
            ("Progressing", "True"),
            ("Available", "True"),
        ])));
        assert!(!is_deployment_available(&deployment_with(vec![("Available", "False")])));
        assert!(!is_deployment_available(&Deployment::default()));
    }

    #[test]
    fn test_clusterctl_args() {
        let proxy = ClusterProxy::new("bootstrap", "/tmp/kubeconfig");
        let input = InitManagementClusterInput {
            cluster_proxy: &proxy,
            clusterctl_config_path: PathBuf::from("/repo/clusterctl-config.yaml"),
            core_provider: Some("cluster-api:v1.8.0".to_string()),
            bootstrap_providers: vec!["kubeadm:v1.8.0".to_string()],
            control_plane_providers: vec![],
            infrastructure_providers: vec!["openstack:v0.11.99".to_string(), "docker:v1.8.0".to_string()],
            log_folder: PathBuf::from("/artifacts/clusters/bootstrap"),
        };
        assert_eq!(
            input.clusterctl_args().unwrap(),
            vec![
                "init",
                "--config",
                "/repo/clusterctl-config.yaml",
                "--kubeconfig",
                "/tmp/kubeconfig",
                "--core",
                "cluster-api:v1.8.0",
                "--bootstrap",
                "kubeadm:v1.8.0",
                "--infrastructure",
                "openstack:v0.11.99,docker:v1.8.0",
            ]
        );
    }

    #[test]
    fn test_controller_log_path() {
        assert_eq!(
            controller_log_path(Path::new("/a"), "capo-system", "capo-controller-manager", "pod-1", "manager"),
            PathBuf::from("/a/logs/capo-system/capo-controller-manager/pod-1/manager.log")
        );
    }

    #[test]
    fn test_settings_from_lookup() {
        let vars = |name: &str| match name {
            E2E_CONF_FILE => Some("/conf/e2e.yaml".to_string()),
            USE_EXISTING_CLUSTER => Some("TRUE".to_string()),
            SKIP_CLEANUP => Some("no".to_string()),
            _ => None,
        };
        let settings = Settings::from_lookup(vars).unwrap();
        assert_eq!(settings.config_path, PathBuf::from("/conf/e2e.yaml"));
        assert_eq!(settings.artifact_folder, PathBuf::from("_artifacts"));
        assert!(settings.use_existing_cluster);
        assert!(!settings.skip_cleanup);

        assert!(matches!(
            Settings::from_lookup(|_| None),
            Err(Error::MissingVariable(name)) if name == E2E_CONF_FILE
        ));
    }

    fn init_input<'a>(proxy: &'a ClusterProxy, log_folder: &Path) -> InitManagementClusterInput<'a> {
        InitManagementClusterInput {
            cluster_proxy: proxy,
            clusterctl_config_path: PathBuf::from("/repo/clusterctl-config.yaml"),
            core_provider: Some("cluster-api:v1.8.0".to_string()),
            bootstrap_providers: vec![],
            control_plane_providers: vec![],
            infrastructure_providers: vec!["openstack:v0.11.99".to_string()],
            log_folder: log_folder.to_path_buf(),
        }
    }

    fn controller(name: &str) -> Deployment {
        Deployment {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("capo-system".to_string()),
                labels: Some([(PROVIDER_LABEL.to_string(), "infrastructure-openstack".to_string())].into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_init_skipped_when_providers_installed() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = ClusterProxy::new("bootstrap", "/tmp/kubeconfig");
        let input = init_input(&proxy, &dir.path().join("bootstrap"));

        let mut runner = MockClusterctlRunner::new();
        runner.expect_run().never();

        let ran = init_unless_installed(&runner, &input, &[controller("capo-controller-manager")])
            .await
            .unwrap();
        assert!(!ran);
        assert!(!dir.path().join("bootstrap").exists());
    }

    #[tokio::test]
    async fn test_init_runs_on_fresh_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let log_folder = dir.path().join("bootstrap");
        let proxy = ClusterProxy::new("bootstrap", "/tmp/kubeconfig");
        let input = init_input(&proxy, &log_folder);

        let expected_log = log_folder.join(CLUSTERCTL_INIT_LOG);
        let mut runner = MockClusterctlRunner::new();
        runner
            .expect_run()
            .withf(move |args, log_path| {
                args.first().map(String::as_str) == Some("init")
                    && args.contains(&"openstack:v0.11.99".to_string())
                    && *log_path == expected_log
            })
            .times(1)
            .returning(|_, _| Ok(()));

        assert!(init_unless_installed(&runner, &input, &[]).await.unwrap());
        assert!(log_folder.is_dir());
    }

    #[tokio::test]
    async fn test_init_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = ClusterProxy::new("bootstrap", "/tmp/kubeconfig");
        let input = init_input(&proxy, dir.path());

        let mut runner = MockClusterctlRunner::new();
        runner.expect_run().times(1).returning(|args, _| {
            Err(Error::CommandFailed {
                command: format!("clusterctl {}", args.join(" ")),
                stderr: "provider not found".to_string(),
            })
        });

        let err = init_unless_installed(&runner, &input, &[]).await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed { ref stderr, .. } if stderr == "provider not found"));
    }

    #[tokio::test]
    async fn test_init_bootstrap_cluster_requires_proxy() {
        let err = init_bootstrap_cluster(&E2EContext::default()).await.unwrap_err();
        assert!(matches!(err, Error::Environment(_)));
    }
}
