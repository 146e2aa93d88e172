//! Local clusterctl repository generation.
//!
//! Materializes every provider version of an [`E2EConfig`] into a folder laid
//! out the way clusterctl's local repository expects
//! (`<folder>/<provider-label>/<version>/components.yaml` plus extra files) and writes a
//! `clusterctl-config.yaml` pointing at it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{
    CNI_PATH, CNI_RESOURCES, E2EConfig, FileSource, ProviderType, is_remote, local_source_path,
};
use crate::error::{Error, Result};

/// Name of the generated clusterctl configuration file
pub const CLUSTERCTL_CONFIG_FILE: &str = "clusterctl-config.yaml";

/// File name every provider version's components are published under
pub const COMPONENTS_FILE: &str = "components.yaml";

/// A transformation applied to every template file copied into the repository
pub type FileTransformation = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Input for [`create_repository`]
pub struct CreateRepositoryInput<'a> {
    pub e2e_config: &'a E2EConfig,
    pub repository_folder: PathBuf,
    file_transformations: Vec<FileTransformation>,
}

impl<'a> CreateRepositoryInput<'a> {
    pub fn new(e2e_config: &'a E2EConfig, repository_folder: impl Into<PathBuf>) -> Self {
        Self {
            e2e_config,
            repository_folder: repository_folder.into(),
            file_transformations: Vec::new(),
        }
    }

    /// Register an arbitrary transformation for template files
    pub fn register_transformation(&mut self, transformation: FileTransformation) {
        self.file_transformations.push(transformation);
    }

    /// Inject a manifest into ClusterResourceSet ConfigMaps.
    ///
    /// Every `data: ${<envsubst_var>}` in the generated templates becomes a
    /// `data:` block whose `resources` key holds the manifest at `manifest_path`.
    pub fn register_cluster_resource_set_config_map_transformation(
        &mut self,
        manifest_path: impl AsRef<Path>,
        envsubst_var: &str,
    ) -> Result<()> {
        let manifest_path = manifest_path.as_ref();
        let manifest =
            std::fs::read_to_string(manifest_path).map_err(|e| Error::io(manifest_path, e))?;

        let placeholder = format!("data: ${{{}}}", envsubst_var);
        let replacement = config_map_data_block(&manifest);

        debug!(
            manifest = %manifest_path.display(),
            placeholder = %placeholder,
            "Registered ClusterResourceSet ConfigMap transformation"
        );
        self.register_transformation(Box::new(move |template: &str| {
            Ok(template.replace(&placeholder, &replacement))
        }));
        Ok(())
    }

    fn transform(&self, data: String) -> Result<String> {
        self.file_transformations
            .iter()
            .try_fold(data, |acc, t| t(&acc))
    }
}

/// Render a manifest as the data block of a ConfigMap
fn config_map_data_block(manifest: &str) -> String {
    let mut block = String::from("data:\n  resources: |\n");
    for line in manifest.split('\n') {
        block.push_str("    ");
        block.push_str(line);
        block.push('\n');
    }
    block
}

#[derive(Serialize)]
struct ProviderEntry {
    name: String,
    url: String,
    #[serde(rename = "type")]
    provider_type: ProviderType,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterctlConfig {
    providers: Vec<ProviderEntry>,
    overrides_folder: String,
    #[serde(flatten)]
    variables: BTreeMap<String, String>,
}

/// Write the provider repository and return the clusterctl config file path.
pub fn create_repository(input: &CreateRepositoryInput<'_>) -> Result<PathBuf> {
    let folder = &input.repository_folder;
    create_dir(folder)?;

    let mut providers = Vec::new();
    for provider in &input.e2e_config.providers {
        let label = provider.provider_type.manifest_label(&provider.name);

        for version in &provider.versions {
            if is_remote(&version.value) {
                return Err(Error::UnsupportedSource(version.value.clone()));
            }

            let version_folder = folder.join(&label).join(&version.name);
            create_dir(&version_folder)?;

            let source = local_source_path(&version.value);
            let mut components = read(&source)?;
            for replacement in &version.replacements {
                let re = Regex::new(&replacement.old).map_err(|e| {
                    Error::InvalidConfig(format!(
                        "replacement {:?} for {} {}: {}",
                        replacement.old, provider.name, version.name, e
                    ))
                })?;
                components = re
                    .replace_all(&components, replacement.new.as_str())
                    .into_owned();
            }

            write(&version_folder.join(COMPONENTS_FILE), &components)?;

            for file in provider.files.iter().chain(&version.files) {
                copy_transformed(input, file, &version_folder)?;
            }

            debug!(provider = %label, version = %version.name, "Published provider version");
        }

        providers.push(ProviderEntry {
            name: provider.name.clone(),
            url: folder
                .join(&label)
                .join("latest")
                .join(COMPONENTS_FILE)
                .to_string_lossy()
                .to_string(),
            provider_type: provider.provider_type,
        });
    }

    let overrides = folder.join("overrides");
    create_dir(&overrides)?;

    let config = ClusterctlConfig {
        providers,
        overrides_folder: overrides.to_string_lossy().to_string(),
        variables: input
            .e2e_config
            .variables
            .keys()
            .map(|name| {
                let value = input.e2e_config.get_variable(name).unwrap_or_default();
                (name.clone(), value)
            })
            .collect(),
    };
    let config_path = folder.join(CLUSTERCTL_CONFIG_FILE);
    write(&config_path, &serde_yaml::to_string(&config)?)?;

    info!(path = %config_path.display(), "Created clusterctl local repository");
    Ok(config_path)
}

/// Generate a clusterctl repository with the CNI manifest injected into templates.
///
/// The configuration must define the `CNI` variable and it must resolve to an
/// existing file; both are checked before anything is written.
pub fn create_clusterctl_local_repository(
    config: &E2EConfig,
    repository_folder: impl Into<PathBuf>,
) -> Result<PathBuf> {
    let repository_folder = repository_folder.into();
    let mut input = CreateRepositoryInput::new(config, repository_folder.clone());

    if !config.has_variable(CNI_PATH) {
        return Err(Error::MissingVariable(CNI_PATH.to_string()));
    }
    let cni_path = PathBuf::from(config.get_variable(CNI_PATH).unwrap_or_default());
    if !cni_path.is_file() {
        return Err(Error::FileNotFound {
            what: format!("The {} variable should resolve to an existing file", CNI_PATH),
            path: cni_path,
        });
    }
    input.register_cluster_resource_set_config_map_transformation(&cni_path, CNI_RESOURCES)?;

    let clusterctl_config = create_repository(&input)?;
    if !clusterctl_config.is_file() {
        return Err(Error::FileNotFound {
            what: format!(
                "The clusterctl config file does not exist in the local repository {}",
                repository_folder.display()
            ),
            path: clusterctl_config,
        });
    }
    Ok(clusterctl_config)
}

fn copy_transformed(
    input: &CreateRepositoryInput<'_>,
    file: &FileSource,
    version_folder: &Path,
) -> Result<()> {
    let source = local_source_path(&file.source_path);
    let data = input.transform(read(&source)?)?;
    write(&version_folder.join(file.target()), &data)
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::io(path, e))
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

fn write(path: &Path, data: &str) -> Result<()> {
    std::fs::write(path, data).map_err(|e| Error::io(path, e))
}
