//! Installing CRDs and webhook configurations into the test API server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use k8s_openapi::ByteString;
use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::runtime::conditions;
use kube::runtime::wait::await_condition;
use kube::{Api, Client, ResourceExt};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{Error, Result};

const FIELD_MANAGER: &str = "capo-e2e";

fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| Error::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yaml" | "yml" | "json")
                )
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Every document of `kind` in a multi-document YAML file
fn documents_of_kind<T: DeserializeOwned>(path: &Path, kind: &str) -> Result<Vec<T>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let mut found = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&content) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.get("kind").and_then(|k| k.as_str()) != Some(kind) {
            continue;
        }
        found.push(serde_yaml::from_value(value)?);
    }
    Ok(found)
}

/// Read every CRD found in `paths`; each path may be a file or a directory
pub fn read_crds(paths: &[PathBuf], error_if_missing: bool) -> Result<Vec<CustomResourceDefinition>> {
    let mut crds = Vec::new();
    for path in paths {
        if !path.exists() {
            if error_if_missing {
                return Err(Error::FileNotFound {
                    what: "CRD directory".to_string(),
                    path: path.clone(),
                });
            }
            debug!(path = %path.display(), "Skipping missing CRD path");
            continue;
        }
        let files = if path.is_dir() {
            manifest_files(path)?
        } else {
            vec![path.clone()]
        };
        for file in files {
            crds.extend(documents_of_kind::<CustomResourceDefinition>(
                &file,
                "CustomResourceDefinition",
            )?);
        }
    }
    Ok(crds)
}

/// Read every ValidatingWebhookConfiguration found in `paths`
pub fn read_webhook_configs(paths: &[PathBuf]) -> Result<Vec<ValidatingWebhookConfiguration>> {
    let mut configs = Vec::new();
    for path in paths {
        let files = if path.is_dir() {
            manifest_files(path)?
        } else if path.is_file() {
            vec![path.clone()]
        } else {
            return Err(Error::FileNotFound {
                what: "webhook manifest".to_string(),
                path: path.clone(),
            });
        };
        for file in files {
            configs.extend(documents_of_kind::<ValidatingWebhookConfiguration>(
                &file,
                "ValidatingWebhookConfiguration",
            )?);
        }
    }
    Ok(configs)
}

/// Point every webhook at the local server instead of an in-cluster service
pub fn rewrite_webhook_config(
    config: &mut ValidatingWebhookConfiguration,
    host: &str,
    port: u16,
    ca_bundle: &[u8],
) {
    for webhook in config.webhooks.iter_mut().flatten() {
        let client = &mut webhook.client_config;
        let path = client
            .service
            .take()
            .and_then(|service| service.path)
            .unwrap_or_default();
        client.url = Some(format!("https://{host}:{port}{path}"));
        client.ca_bundle = Some(ByteString(ca_bundle.to_vec()));
    }
}

/// Apply CRDs and wait until the API server reports them Established
pub async fn install_crds(
    client: &Client,
    crds: &[CustomResourceDefinition],
    timeout: Duration,
) -> Result<Vec<String>> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let mut names = Vec::with_capacity(crds.len());
    for crd in crds {
        let name = crd.name_any();
        api.patch(&name, &params, &Patch::Apply(crd)).await?;
        debug!(crd = %name, "Applied CRD");
        names.push(name);
    }

    for name in &names {
        tokio::time::timeout(
            timeout,
            await_condition(api.clone(), name, conditions::is_crd_established()),
        )
        .await
        .map_err(|_| Error::Timeout {
            what: format!("CRD {name} to be established"),
            timeout,
        })?
        .map_err(|e| Error::Environment(format!("waiting for CRD {name}: {e}")))?;
    }
    info!(count = names.len(), "CRDs installed");
    Ok(names)
}

/// Apply webhook configurations, returning their names
pub async fn install_webhook_configs(
    client: &Client,
    configs: &[ValidatingWebhookConfiguration],
) -> Result<Vec<String>> {
    let api: Api<ValidatingWebhookConfiguration> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let mut names = Vec::with_capacity(configs.len());
    for config in configs {
        let name = config.name_any();
        api.patch(&name, &params, &Patch::Apply(config)).await?;
        info!(webhook_configuration = %name, "Installed webhook configuration");
        names.push(name);
    }
    Ok(names)
}

/// Delete webhook configurations by name; missing ones are ignored
pub async fn uninstall_webhook_configs(client: &Client, names: &[String]) -> Result<()> {
    let api: Api<ValidatingWebhookConfiguration> = Api::all(client.clone());
    for name in names {
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => debug!(webhook_configuration = %name, "Deleted webhook configuration"),
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
