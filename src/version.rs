//! API server version precondition.

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::Client;
use tracing::info;

use crate::error::{Error, Result};

/// Oldest Kubernetes minor version the validation suite supports
pub const MINIMUM_MINOR_VERSION: u32 = 25;

/// Check that `info` reports Kubernetes `1.<minor>` with `minor >= min_minor`.
///
/// The minor version must be a plain integer; provider-decorated values
/// such as `"25+"` are rejected rather than guessed at.
pub fn check_minimum_server_version(info: &Info, min_minor: u32) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidServerVersion {
        major: info.major.clone(),
        minor: info.minor.clone(),
        reason: reason.to_string(),
    };

    if info.major != "1" {
        return Err(invalid("major version must be 1"));
    }
    let minor: u32 = info
        .minor
        .parse()
        .map_err(|_| invalid("minor version must be an integer"))?;
    if minor < min_minor {
        return Err(Error::ServerVersionTooOld {
            minimum: min_minor,
            actual: info.minor.clone(),
        });
    }
    Ok(())
}

/// Query the server's version and check it against `min_minor`
pub async fn ensure_minimum_server_version(client: &Client, min_minor: u32) -> Result<Info> {
    let info = client.apiserver_version().await?;
    info!(major = %info.major, minor = %info.minor, git_version = %info.git_version, "API server version");
    check_minimum_server_version(&info, min_minor)?;
    Ok(info)
}
