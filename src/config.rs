//! E2E test configuration.
//!
//! The configuration is a YAML document describing the management cluster,
//! the providers to install, images to preload, free-form variables and wait
//! intervals:
//!
//! ```yaml
//! managementClusterName: capo-e2e
//! images:
//!   - name: gcr.io/k8s-staging-capi-openstack/capi-openstack-controller:e2e
//!     loadBehavior: mustLoad
//! providers:
//!   - name: openstack
//!     type: InfrastructureProvider
//!     versions:
//!       - name: v0.10.99
//!         value: ../../config/default/components.yaml
//!         contract: v1beta1
//!     files:
//!       - sourcePath: ./data/cluster-template.yaml
//! variables:
//!   CNI: ./data/cni/calico.yaml
//!   KUBE_CONTEXT: ""
//! intervals:
//!   default/wait-controllers: ["3m", "10s"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Variable holding the path of the CNI manifest injected into templates.
pub const CNI_PATH: &str = "CNI";
/// Placeholder variable replaced by the CNI manifest contents.
pub const CNI_RESOURCES: &str = "CNI_RESOURCES";
/// Variable holding the kube-context the bootstrap kubeconfig must be using.
pub const KUBE_CONTEXT: &str = "KUBE_CONTEXT";

/// Default timeout when no interval is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default polling period when no interval is configured
pub const DEFAULT_POLLING: Duration = Duration::from_secs(1);

/// Configuration for an e2e test run
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct E2EConfig {
    /// Name of the kind cluster hosting the management components
    #[serde(default)]
    pub management_cluster_name: String,

    /// Images to preload into the bootstrap cluster
    #[serde(default)]
    pub images: Vec<ContainerImage>,

    /// Providers to publish in the local clusterctl repository
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Free-form variables, overridable from the process environment
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// Wait intervals keyed by `<spec>/<name>`
    #[serde(default)]
    pub intervals: BTreeMap<String, Vec<String>>,
}

/// An image to load into the bootstrap cluster
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerImage {
    pub name: String,
    #[serde(default)]
    pub load_behavior: LoadImageBehavior,
}

/// Whether a failure to load an image aborts cluster creation
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LoadImageBehavior {
    #[default]
    MustLoad,
    TryLoad,
}

/// clusterctl provider types
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum ProviderType {
    CoreProvider,
    BootstrapProvider,
    ControlPlaneProvider,
    InfrastructureProvider,
}

impl ProviderType {
    /// Prefix clusterctl uses for repository folder names ("infrastructure-openstack")
    pub fn manifest_prefix(&self) -> &'static str {
        match self {
            ProviderType::CoreProvider => "cluster-api",
            ProviderType::BootstrapProvider => "bootstrap",
            ProviderType::ControlPlaneProvider => "control-plane",
            ProviderType::InfrastructureProvider => "infrastructure",
        }
    }

    /// Folder label for a provider of this type
    pub fn manifest_label(&self, name: &str) -> String {
        match self {
            ProviderType::CoreProvider => self.manifest_prefix().to_string(),
            _ => format!("{}-{}", self.manifest_prefix(), name),
        }
    }
}

/// A provider and the versions to publish for it
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    #[serde(default)]
    pub versions: Vec<ProviderVersionSource>,
    /// Files added to every version of the provider
    #[serde(default)]
    pub files: Vec<FileSource>,
}

/// Where to get the components of one provider version
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderVersionSource {
    /// Version name, e.g. `v0.10.0`
    pub name: String,
    /// Path of the components manifest
    pub value: String,
    /// Cluster API contract implemented by this version
    #[serde(default)]
    pub contract: String,
    /// Regex replacements applied to the components manifest
    #[serde(default)]
    pub replacements: Vec<Replacement>,
    /// Files added to this version only
    #[serde(default)]
    pub files: Vec<FileSource>,
}

/// A regex replacement applied to a components manifest
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Replacement {
    pub old: String,
    pub new: String,
}

/// A file copied into a provider version folder
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSource {
    pub source_path: String,
    /// Target file name; defaults to the source's base name
    #[serde(default)]
    pub target_name: String,
}

impl FileSource {
    /// File name to use inside the repository
    pub fn target(&self) -> String {
        if !self.target_name.is_empty() {
            return self.target_name.clone();
        }
        Path::new(&self.source_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Timeout and polling period for an eventually-style wait
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Intervals {
    pub timeout: Duration,
    pub polling: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            polling: DEFAULT_POLLING,
        }
    }
}

impl E2EConfig {
    /// Load a configuration file, apply defaults and validate it.
    ///
    /// Relative source paths are resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let mut config: E2EConfig = serde_yaml::from_str(&data)?;

        config.apply_defaults();
        if let Some(base) = path.parent() {
            config.abs_paths(base);
        }
        config.validate()?;

        debug!(path = %path.display(), providers = config.providers.len(), "Loaded e2e config");
        Ok(config)
    }

    /// Fill in values the file may leave out
    pub fn apply_defaults(&mut self) {
        if self.management_cluster_name.is_empty() {
            let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(6).collect();
            self.management_cluster_name = format!("test-{}", suffix);
        }
    }

    /// Resolve relative source paths against `base`
    pub fn abs_paths(&mut self, base: &Path) {
        let resolve = |p: &mut String| {
            let stripped = p.strip_prefix("file://").unwrap_or(p);
            if is_remote(stripped) {
                return;
            }
            let candidate = Path::new(stripped);
            if candidate.is_relative() {
                *p = base.join(candidate).to_string_lossy().to_string();
            }
        };

        for provider in &mut self.providers {
            for version in &mut provider.versions {
                resolve(&mut version.value);
                for file in &mut version.files {
                    resolve(&mut file.source_path);
                }
            }
            for file in &mut provider.files {
                resolve(&mut file.source_path);
            }
        }
    }

    /// Check structural requirements
    pub fn validate(&self) -> Result<()> {
        if self.management_cluster_name.is_empty() {
            return Err(Error::InvalidConfig(
                "managementClusterName must be set".to_string(),
            ));
        }

        for (i, image) in self.images.iter().enumerate() {
            if image.name.is_empty() {
                return Err(Error::InvalidConfig(format!("images[{}].name is empty", i)));
            }
        }

        for provider in &self.providers {
            if provider.name.is_empty() {
                return Err(Error::InvalidConfig("provider name is empty".to_string()));
            }
            if provider.versions.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "provider {} has no versions",
                    provider.name
                )));
            }
            for version in &provider.versions {
                let trimmed = version.name.strip_prefix('v').unwrap_or(&version.name);
                semver::Version::parse(trimmed).map_err(|e| {
                    Error::InvalidConfig(format!(
                        "provider {} version {} is not a semantic version: {}",
                        provider.name, version.name, e
                    ))
                })?;
                if version.value.is_empty() {
                    return Err(Error::InvalidConfig(format!(
                        "provider {} version {} has no source",
                        provider.name, version.name
                    )));
                }
            }
        }

        for (key, values) in &self.intervals {
            parse_intervals(key, values)?;
        }

        Ok(())
    }

    /// Whether `name` is a key of the configuration's variables.
    ///
    /// The process environment is not consulted.
    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Value of a variable; the process environment takes precedence.
    pub fn get_variable(&self, name: &str) -> Option<String> {
        if let Ok(value) = std::env::var(name) {
            return Some(value);
        }
        self.variables.get(name).cloned()
    }

    /// Whether the docker infrastructure provider is configured
    pub fn has_docker_provider(&self) -> bool {
        self.providers.iter().any(|p| {
            p.provider_type == ProviderType::InfrastructureProvider && p.name == "docker"
        })
    }

    fn providers_of(&self, provider_type: ProviderType) -> Vec<String> {
        self.providers
            .iter()
            .filter(|p| p.provider_type == provider_type)
            .map(|p| p.name.clone())
            .collect()
    }

    /// Name of the core provider, if configured
    pub fn core_provider(&self) -> Option<String> {
        self.providers_of(ProviderType::CoreProvider).into_iter().next()
    }

    /// Names of bootstrap providers
    pub fn bootstrap_providers(&self) -> Vec<String> {
        self.providers_of(ProviderType::BootstrapProvider)
    }

    /// Names of control plane providers
    pub fn control_plane_providers(&self) -> Vec<String> {
        self.providers_of(ProviderType::ControlPlaneProvider)
    }

    /// Names of infrastructure providers
    pub fn infrastructure_providers(&self) -> Vec<String> {
        self.providers_of(ProviderType::InfrastructureProvider)
    }

    /// Intervals for `key`, looked up under `spec` first and `default` second.
    pub fn get_intervals(&self, spec: &str, key: &str) -> Result<Intervals> {
        let spec_key = format!("{}/{}", spec, key);
        let default_key = format!("default/{}", key);

        match self
            .intervals
            .get(&spec_key)
            .map(|v| (spec_key.as_str(), v))
            .or_else(|| self.intervals.get(&default_key).map(|v| (default_key.as_str(), v)))
        {
            Some((name, values)) => parse_intervals(name, values),
            None => Ok(Intervals::default()),
        }
    }
}

/// Whether a source is fetched over the network
pub(crate) fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

fn parse_intervals(key: &str, values: &[String]) -> Result<Intervals> {
    let invalid = |reason: String| Error::InvalidConfig(format!("intervals {}: {}", key, reason));

    let timeout = match values.first() {
        Some(v) => parse_go_duration(v).map_err(invalid)?,
        None => return Err(invalid("at least a timeout is required".to_string())),
    };
    let polling = match values.get(1) {
        Some(v) => parse_go_duration(v).map_err(invalid)?,
        None => DEFAULT_POLLING,
    };
    if values.len() > 2 {
        return Err(invalid(format!("expected [timeout, polling], got {:?}", values)));
    }

    Ok(Intervals { timeout, polling })
}

static DURATION_PART: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"([0-9]*\.?[0-9]+)(ns|us|µs|ms|s|m|h)").ok());

/// Parse a Go-style duration string such as `"1m30s"`, `"500ms"` or `"2h"`.
pub fn parse_go_duration(input: &str) -> std::result::Result<Duration, String> {
    let re = DURATION_PART
        .as_ref()
        .ok_or_else(|| "duration pattern failed to compile".to_string())?;

    let s = input.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total_nanos = 0f64;
    let mut consumed = 0;
    for caps in re.captures_iter(s) {
        let (Some(whole), Some(number), Some(unit)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        if whole.start() != consumed {
            return Err(format!("invalid duration {:?}", input));
        }
        consumed = whole.end();

        let value: f64 = number
            .as_str()
            .parse()
            .map_err(|_| format!("invalid number in duration {:?}", input))?;
        let unit_nanos = match unit.as_str() {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(format!("unknown unit in duration {:?}", input)),
        };
        total_nanos += (value * unit_nanos).round();
    }

    if consumed != s.len() {
        return Err(format!("invalid duration {:?}", input));
    }
    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(format!("duration {:?} out of range", input));
    }

    Ok(Duration::from_nanos(total_nanos as u64))
}

/// Absolute path for a source that may carry a `file://` prefix
pub(crate) fn local_source_path(source: &str) -> PathBuf {
    PathBuf::from(source.strip_prefix("file://").unwrap_or(source))
}
