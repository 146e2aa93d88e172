// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! End-to-end helper tests.
//!
//! Repository generation runs on temporary directories and always runs.
//! Bootstrap cluster tests need `kind` and a container runtime and are marked
//! `#[ignore]`:
//!
//! ```bash
//! cargo test --test e2e -- --ignored
//! ```

use std::path::{Path, PathBuf};

use capo_e2e::bootstrap::{BOOTSTRAP_PROXY_NAME, setup_bootstrap_cluster, tear_down};
use capo_e2e::config::{CNI_PATH, E2EConfig, ProviderVersionSource};
use capo_e2e::repository::{
    CLUSTERCTL_CONFIG_FILE, COMPONENTS_FILE, create_clusterctl_local_repository,
};
use capo_e2e::{Error, init_tracing};

const CNI_MANIFEST: &str = "apiVersion: apps/v1\nkind: DaemonSet\nmetadata:\n  name: calico-node";

const CLUSTER_TEMPLATE: &str = "apiVersion: v1
kind: ConfigMap
metadata:
  name: cni-${CLUSTER_NAME}-crs-0
data: ${CNI_RESOURCES}
";

/// Lay out provider sources and an e2e config under `dir`.
fn write_fixture(dir: &Path, with_cni: bool) -> PathBuf {
    let data = dir.join("data");
    std::fs::create_dir_all(&data).unwrap();
    std::fs::write(
        data.join("infrastructure-components.yaml"),
        "image: registry.k8s.io/capi-openstack/capi-openstack-controller:dev\n",
    )
    .unwrap();
    std::fs::write(data.join("core-components.yaml"), "kind: Namespace\n").unwrap();
    std::fs::write(data.join("cluster-template.yaml"), CLUSTER_TEMPLATE).unwrap();
    std::fs::write(data.join("metadata.yaml"), "apiVersion: clusterctl.cluster.x-k8s.io/v1alpha3\n").unwrap();
    std::fs::write(data.join("calico.yaml"), CNI_MANIFEST).unwrap();

    let cni = if with_cni {
        format!("  CNI: \"{}\"\n", data.join("calico.yaml").display())
    } else {
        String::new()
    };
    let config = format!(
        r#"managementClusterName: capo-e2e
images:
  - name: registry.k8s.io/capi-openstack/capi-openstack-controller:e2e
    loadBehavior: tryLoad
providers:
  - name: cluster-api
    type: CoreProvider
    versions:
      - name: v1.8.0
        value: ./data/core-components.yaml
        contract: v1beta1
  - name: openstack
    type: InfrastructureProvider
    versions:
      - name: v0.11.99
        value: ./data/infrastructure-components.yaml
        contract: v1beta1
        replacements:
          - old: "capi-openstack-controller:dev"
            new: "capi-openstack-controller:e2e"
    files:
      - sourcePath: ./data/cluster-template.yaml
      - sourcePath: ./data/metadata.yaml
variables:
  KUBERNETES_VERSION: "v1.31.0"
{cni}intervals:
  default/wait-controllers: ["3m", "10s"]
"#
    );
    let path = dir.join("e2e_conf.yaml");
    std::fs::write(&path, config).unwrap();
    path
}

#[test]
fn test_local_repository_layout() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = E2EConfig::load(write_fixture(dir.path(), true)).unwrap();
    let repository = dir.path().join("repository");

    let clusterctl_config = create_clusterctl_local_repository(&config, &repository).unwrap();
    assert_eq!(clusterctl_config, repository.join(CLUSTERCTL_CONFIG_FILE));

    let version_folder = repository.join("infrastructure-openstack").join("v0.11.99");
    let components = std::fs::read_to_string(version_folder.join(COMPONENTS_FILE)).unwrap();
    assert!(components.contains("capi-openstack-controller:e2e"));
    assert!(!version_folder.join("infrastructure-components.yaml").exists());
    assert!(version_folder.join("metadata.yaml").is_file());
    assert!(repository.join("cluster-api").join("v1.8.0").join(COMPONENTS_FILE).is_file());

    let template = std::fs::read_to_string(version_folder.join("cluster-template.yaml")).unwrap();
    assert!(!template.contains("${CNI_RESOURCES}"));
    assert!(template.contains("data:\n  resources: |\n    apiVersion: apps/v1\n    kind: DaemonSet"));
    // Other variables are left for clusterctl to substitute.
    assert!(template.contains("cni-${CLUSTER_NAME}-crs-0"));
}

#[test]
fn test_clusterctl_config_lists_providers_and_variables() {
    let dir = tempfile::tempdir().unwrap();
    let config = E2EConfig::load(write_fixture(dir.path(), true)).unwrap();
    let clusterctl_config =
        create_clusterctl_local_repository(&config, dir.path().join("repository")).unwrap();

    let written: serde_yaml::Value =
        serde_yaml::from_str(&std::fs::read_to_string(clusterctl_config).unwrap()).unwrap();
    let providers = written["providers"].as_sequence().unwrap();
    let names: Vec<&str> = providers
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["cluster-api", "openstack"]);
    assert_eq!(providers[1]["type"].as_str(), Some("InfrastructureProvider"));
    assert_eq!(written["KUBERNETES_VERSION"].as_str(), Some("v1.31.0"));
    assert!(written["overridesFolder"].as_str().unwrap().ends_with("overrides"));
}

#[test]
fn test_versions_with_different_source_names_share_components_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = E2EConfig::load(write_fixture(dir.path(), true)).unwrap();
    let next = dir.path().join("data").join("openstack-next.yaml");
    std::fs::write(&next, "image: capi-openstack-controller:next\n").unwrap();
    config.providers[1].versions.push(ProviderVersionSource {
        name: "v0.12.99".to_string(),
        value: next.display().to_string(),
        contract: "v1beta1".to_string(),
        replacements: Vec::new(),
        files: Vec::new(),
    });

    let repository = dir.path().join("repository");
    let clusterctl_config = create_clusterctl_local_repository(&config, &repository).unwrap();

    let provider = repository.join("infrastructure-openstack");
    assert!(provider.join("v0.11.99").join(COMPONENTS_FILE).is_file());
    let next_components =
        std::fs::read_to_string(provider.join("v0.12.99").join(COMPONENTS_FILE)).unwrap();
    assert!(next_components.contains("controller:next"));

    let written: serde_yaml::Value =
        serde_yaml::from_str(&std::fs::read_to_string(clusterctl_config).unwrap()).unwrap();
    let url = written["providers"][1]["url"].as_str().unwrap();
    assert_eq!(
        Path::new(url),
        provider.join("latest").join(COMPONENTS_FILE)
    );
}

#[test]
fn test_clusterctl_config_prefers_environment_values() {
    const VARIABLE: &str = "CAPO_E2E_REPOSITORY_IMAGE_TAG";
    let dir = tempfile::tempdir().unwrap();
    let mut config = E2EConfig::load(write_fixture(dir.path(), true)).unwrap();
    config
        .variables
        .insert(VARIABLE.to_string(), "from-file".to_string());

    // Only this test reads or writes the variable.
    unsafe { std::env::set_var(VARIABLE, "from-env") };
    let written = create_clusterctl_local_repository(&config, dir.path().join("repository"));
    unsafe { std::env::remove_var(VARIABLE) };

    let written: serde_yaml::Value =
        serde_yaml::from_str(&std::fs::read_to_string(written.unwrap()).unwrap()).unwrap();
    assert_eq!(written[VARIABLE].as_str(), Some("from-env"));
    assert_eq!(written["KUBERNETES_VERSION"].as_str(), Some("v1.31.0"));
}

#[test]
fn test_missing_cni_variable_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = E2EConfig::load(write_fixture(dir.path(), false)).unwrap();
    let repository = dir.path().join("repository");

    let err = create_clusterctl_local_repository(&config, &repository).unwrap_err();
    assert!(matches!(err, Error::MissingVariable(ref name) if name == CNI_PATH));
    assert!(!repository.exists());
}

#[test]
fn test_missing_cni_file_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = E2EConfig::load(write_fixture(dir.path(), true)).unwrap();
    std::fs::remove_file(dir.path().join("data").join("calico.yaml")).unwrap();
    let repository = dir.path().join("repository");

    let err = create_clusterctl_local_repository(&config, &repository).unwrap_err();
    assert!(matches!(err, Error::FileNotFound { .. }));
    assert!(!repository.exists());
}

#[test]
fn test_intervals_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = E2EConfig::load(write_fixture(dir.path(), true)).unwrap();
    let intervals = config
        .get_intervals(BOOTSTRAP_PROXY_NAME, "wait-controllers")
        .unwrap();
    assert_eq!(intervals.timeout, std::time::Duration::from_secs(180));
    assert_eq!(intervals.polling, std::time::Duration::from_secs(10));
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires kind and a container runtime"]
async fn test_kind_bootstrap_cluster_lifecycle() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut config = E2EConfig::load(write_fixture(dir.path(), true)).unwrap();
    config.management_cluster_name = format!("capo-e2e-{}", &uuid::Uuid::new_v4().to_string()[..6]);
    config.images.clear();

    let (provider, proxy) = setup_bootstrap_cluster(&config, false).await.unwrap();
    let provider = provider.expect("a created cluster has a provider");
    assert_eq!(proxy.name(), BOOTSTRAP_PROXY_NAME);
    assert!(provider.kubeconfig_path().is_file());

    let version = proxy.client().await.unwrap().apiserver_version().await.unwrap();
    assert_eq!(version.major, "1");

    let kubeconfig = provider.kubeconfig_path();
    tear_down(Some(provider), Some(&proxy)).await.unwrap();
    assert!(!kubeconfig.exists());
    assert!(proxy.is_disposed());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a cluster in the current kubeconfig"]
async fn test_existing_cluster_is_not_deleted() {
    init_tracing();
    let config = E2EConfig::default();

    let (provider, proxy) = setup_bootstrap_cluster(&config, true).await.unwrap();
    assert!(provider.is_none());
    proxy.client().await.unwrap().apiserver_version().await.unwrap();
    tear_down(None, Some(&proxy)).await.unwrap();
}
