//! API validation suite harness.
//!
//! [`ApiValidationSuite::start`] brings up the test environment, checks the
//! server version, and serves every webhook from a background manager. Each
//! setup step registers its teardown on the suite's [`CleanupStack`], so a
//! failure half-way through releases whatever was already started.
//!
//! Cases run one after another, each on its own task with its own cleanup
//! stack. A case fails by returning an error or by panicking; its cleanup
//! runs either way.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::Api;
use kube::core::NamespaceResourceScope;
use kube::{Client, Resource};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::api::v1beta1;
use crate::cleanup::CleanupStack;
use crate::envtest::TestEnvironment;
use crate::error::{Error, Result};
use crate::manager::{METRICS_DISABLED, Manager, ManagerOptions};
use crate::namespace::TestNamespace;
use crate::version::{MINIMUM_MINOR_VERSION, ensure_minimum_server_version};
use crate::wait::eventually;
use crate::webhooks;

/// Prefix of the namespaces created for test cases
pub const NAMESPACE_PREFIX: &str = "test-";

/// How the suite is brought up
#[derive(Clone, Debug)]
pub struct SuiteOptions {
    /// ValidatingWebhookConfiguration manifests to install
    pub webhook_paths: Vec<PathBuf>,
    pub crd_directory_paths: Vec<PathBuf>,
    /// CRDs installed in addition to the directories
    pub crds: Vec<CustomResourceDefinition>,
    pub min_minor_version: u32,
    pub manager_stop_timeout: Duration,
    /// How long to wait for the webhook server to accept connections
    pub webhook_ready_timeout: Duration,
    /// `"0"` disables the metrics endpoint
    pub metrics_bind_address: String,
    /// `None` defers to `USE_EXISTING_CLUSTER`
    pub use_existing_cluster: Option<bool>,
}

impl Default for SuiteOptions {
    fn default() -> Self {
        Self {
            webhook_paths: vec![PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/webhook")],
            crd_directory_paths: Vec::new(),
            crds: v1beta1::crds(),
            min_minor_version: MINIMUM_MINOR_VERSION,
            manager_stop_timeout: Duration::from_secs(10),
            webhook_ready_timeout: Duration::from_secs(10),
            metrics_bind_address: METRICS_DISABLED.to_string(),
            use_existing_cluster: None,
        }
    }
}

type CaseBody = Box<dyn FnOnce(Arc<CaseContext>) -> BoxFuture<'static, Result<()>> + Send>;

/// A named test case
pub struct TestCase {
    name: String,
    body: CaseBody,
}

impl TestCase {
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(Arc<CaseContext>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Box::new(move |ctx| body(ctx).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Per-case state: a client and the case's cleanup stack
pub struct CaseContext {
    client: Client,
    cleanup: CleanupStack,
}

impl CaseContext {
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Api for namespaced resources of kind `K` in `namespace`
    pub fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Create a `test-` namespace deleted (in the foreground) when the case ends
    pub async fn create_namespace(&self) -> Result<String> {
        let namespace = TestNamespace::create(self.client.clone(), NAMESPACE_PREFIX).await?;
        let name = namespace.name().to_string();
        self.cleanup.push(format!("delete namespace {name}"), move || {
            async move { namespace.delete().await }.boxed()
        });
        Ok(name)
    }

    /// Register an extra action to run when the case ends
    pub fn defer<F, Fut>(&self, description: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.cleanup.push(description, move || action().boxed());
    }
}

/// Outcome of [`ApiValidationSuite::run`]
#[derive(Debug, Default)]
pub struct SuiteReport {
    pub passed: Vec<String>,
    /// Case name and failure message
    pub failed: Vec<(String, String)>,
}

impl SuiteReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A running API validation suite
pub struct ApiValidationSuite {
    client: Client,
    webhook_addr: SocketAddr,
    cleanup: CleanupStack,
}

impl ApiValidationSuite {
    /// Bring the suite up. On failure everything already started is torn
    /// down before the error is returned.
    pub async fn start(options: SuiteOptions) -> Result<Self> {
        let cleanup = CleanupStack::new();
        match setup(&options, &cleanup).await {
            Ok((client, webhook_addr)) => Ok(Self {
                client,
                webhook_addr,
                cleanup,
            }),
            Err(e) => {
                error!(error = %e, "API validation suite setup failed");
                if let Err(teardown) = cleanup.run().await {
                    warn!(error = %teardown, "Teardown after failed setup also failed");
                }
                Err(e)
            }
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Address the webhook server listens on
    pub fn webhook_addr(&self) -> SocketAddr {
        self.webhook_addr
    }

    /// A fresh context for one case
    pub fn case(&self) -> CaseContext {
        CaseContext {
            client: self.client.clone(),
            cleanup: CleanupStack::new(),
        }
    }

    /// Run `cases` in order and report the outcome of each
    pub async fn run(&self, cases: Vec<TestCase>) -> SuiteReport {
        let mut report = SuiteReport::default();
        for TestCase { name, body } in cases {
            let ctx = Arc::new(self.case());
            info!(case = %name, "Running case");
            let started = Instant::now();

            let outcome = match tokio::spawn(body(ctx.clone())).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) if e.is_panic() => Err(panic_message(e.into_panic())),
                Err(e) => Err(e.to_string()),
            };

            let outcome = match (outcome, ctx.cleanup.run().await) {
                (Err(message), _) => Err(message),
                (Ok(()), Err(e)) => Err(format!("cleanup failed: {e}")),
                (Ok(()), Ok(())) => Ok(()),
            };

            match outcome {
                Ok(()) => {
                    info!(case = %name, elapsed = ?started.elapsed(), "Case passed");
                    report.passed.push(name);
                }
                Err(message) => {
                    error!(case = %name, elapsed = ?started.elapsed(), %message, "Case failed");
                    report.failed.push((name, message));
                }
            }
        }
        report
    }

    /// Stop the manager and the environment
    pub async fn stop(self) -> Result<()> {
        let result = self.cleanup.run().await;
        info!("API validation suite stopped");
        result
    }
}

async fn setup(options: &SuiteOptions, cleanup: &CleanupStack) -> Result<(Client, SocketAddr)> {
    info!("Starting the test environment");
    let environment = Arc::new(Mutex::new(
        TestEnvironment::new()
            .with_crd_directory_paths(options.crd_directory_paths.clone())
            .with_crds(options.crds.clone())
            .with_error_if_crd_path_missing(true)
            .with_webhook_paths(options.webhook_paths.clone())
            .with_use_existing_cluster(options.use_existing_cluster),
    ));
    let config = environment.lock().await.start().await?;
    {
        let environment = environment.clone();
        cleanup.push("stop test environment", move || {
            async move { environment.lock().await.stop().await }.boxed()
        });
    }

    let client = Client::try_from(config)?;

    info!("Checking the API server version");
    ensure_minimum_server_version(&client, options.min_minor_version).await?;

    info!("Setting up the webhook manager");
    let webhook_server = environment
        .lock()
        .await
        .webhook_install_options
        .server_options()?;
    let webhook_addr = webhook_server.socket_addr()?;
    let mut manager = Manager::new(ManagerOptions {
        webhook_server,
        metrics_bind_address: options.metrics_bind_address.clone(),
    });
    webhooks::setup_all(&mut manager)?;

    info!("Starting the webhook manager");
    let handle = manager.spawn();

    info!(address = %webhook_addr, "Waiting for the webhook server");
    let manager_task = &handle;
    let ready = eventually(
        "webhook server to accept connections",
        options.webhook_ready_timeout,
        Duration::from_millis(100),
        move || async move {
            if manager_task.is_finished() {
                return Some(false);
            }
            tokio::net::TcpStream::connect(webhook_addr)
                .await
                .ok()
                .map(|_| true)
        },
    )
    .await;

    let stop_timeout = options.manager_stop_timeout;
    match ready {
        Ok(true) => {
            cleanup.push("stop webhook manager", move || {
                async move { handle.stop(stop_timeout).await }.boxed()
            });
            Ok((client, webhook_addr))
        }
        Ok(false) => {
            handle.stop(stop_timeout).await?;
            Err(Error::ManagerFailed(
                "manager stopped before serving webhooks".to_string(),
            ))
        }
        Err(e) => {
            if let Err(stop) = handle.stop(stop_timeout).await {
                warn!(error = %stop, "Failed to stop webhook manager");
            }
            Err(e)
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "case panicked".to_string(),
        },
    }
}
