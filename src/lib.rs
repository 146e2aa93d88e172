//! capo-e2e library crate
//!
//! Test harness for the OpenStack Cluster API infrastructure provider: e2e
//! helpers (configuration, local clusterctl repository, bootstrap and
//! management clusters) and the API validation suite (local control plane,
//! validating webhooks, per-case namespaces).

pub mod api;
pub mod bootstrap;
pub mod cleanup;
pub mod config;
pub mod envtest;
pub mod error;
pub mod health;
pub mod management;
pub mod manager;
pub mod namespace;
pub mod repository;
pub mod suite;
pub mod version;
pub mod wait;
pub mod webhooks;

pub use cleanup::CleanupStack;
pub use config::{E2EConfig, Intervals};
pub use error::{Error, Result};
pub use health::HealthState;
pub use manager::{Manager, ManagerHandle, ManagerOptions, WebhookServerOptions};
pub use suite::{ApiValidationSuite, CaseContext, SuiteOptions, SuiteReport, TestCase};

use std::sync::{Once, OnceLock};

use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();
static CRYPTO_INIT: Once = Once::new();

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "capo_e2e=info,kube=warn";

/// Install the fmt subscriber once per process.
///
/// Output goes through the test writer so `cargo test` captures it.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
        // Another subscriber may already be installed by the embedding binary.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Install aws-lc-rs as the process-wide rustls provider.
///
/// Must run before the first kube client or TLS listener is built: with more
/// than one provider compiled in, rustls refuses to pick one itself.
pub fn ensure_crypto_provider() {
    CRYPTO_INIT.call_once(|| {
        // Err means another provider was installed first, which is fine.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}
