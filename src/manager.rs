//! Webhook manager: owns the TLS webhook server and the metrics endpoint.
//!
//! A [`Manager`] collects webhook registrations, then either runs in the
//! foreground with [`Manager::start`] or in a background task with
//! [`Manager::spawn`]. The returned [`ManagerHandle`] cancels the server and
//! waits, bounded, for it to report completion.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::health::{self, HealthState};
use crate::webhooks::{Validator, WEBHOOK_PORT, WebhookState, validate_path, validation_router};

/// Serving certificate file name inside the cert dir
pub const CERT_FILE: &str = "tls.crt";
/// Serving key file name inside the cert dir
pub const KEY_FILE: &str = "tls.key";

/// Metrics bind address that disables the metrics endpoint
pub const METRICS_DISABLED: &str = "0";

/// Where and with which certificate the webhook server listens
#[derive(Clone, Debug)]
pub struct WebhookServerOptions {
    pub host: String,
    pub port: u16,
    pub cert_dir: PathBuf,
}

impl Default for WebhookServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: WEBHOOK_PORT,
            cert_dir: std::env::temp_dir()
                .join("k8s-webhook-server")
                .join("serving-certs"),
        }
    }
}

impl WebhookServerOptions {
    pub fn cert_path(&self) -> PathBuf {
        self.cert_dir.join(CERT_FILE)
    }

    pub fn key_path(&self) -> PathBuf {
        self.cert_dir.join(KEY_FILE)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::ManagerFailed(format!("invalid webhook address: {e}")))
    }
}

#[derive(Clone, Debug)]
pub struct ManagerOptions {
    pub webhook_server: WebhookServerOptions,
    /// `host:port` for `/healthz`, `/readyz` and `/metrics`; `"0"` disables it
    pub metrics_bind_address: String,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            webhook_server: WebhookServerOptions::default(),
            metrics_bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Webhook manager
pub struct Manager {
    options: ManagerOptions,
    router: Router,
    /// Registered kind -> served path (`None` for kinds without admission)
    registered: BTreeMap<String, Option<String>>,
    health: Arc<HealthState>,
}

impl Manager {
    pub fn new(options: ManagerOptions) -> Self {
        Self {
            options,
            router: Router::new(),
            registered: BTreeMap::new(),
            health: Arc::new(HealthState::new()),
        }
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Serve `validator` for `K` on its validation path
    pub fn register_validating_webhook<K>(&mut self, validator: Validator<K>) -> Result<()>
    where
        K: Resource<DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Send
            + Sync
            + 'static,
    {
        let kind = K::kind(&()).to_string();
        self.ensure_unregistered(&kind)?;

        let path = validate_path::<K>();
        let state = Arc::new(WebhookState::new(kind.clone(), validator, self.health.clone()));
        let router = std::mem::take(&mut self.router);
        self.router = router.merge(validation_router(&path, state));

        debug!(kind = %kind, path = %path, "Registered validating webhook");
        self.registered.insert(kind, Some(path));
        Ok(())
    }

    /// Record a kind that has no admission endpoint
    pub fn register_kind(&mut self, kind: &str) -> Result<()> {
        self.ensure_unregistered(kind)?;
        debug!(kind, "Registered kind without admission path");
        self.registered.insert(kind.to_string(), None);
        Ok(())
    }

    fn ensure_unregistered(&self, kind: &str) -> Result<()> {
        if self.registered.contains_key(kind) {
            return Err(Error::WebhookRegistration {
                kind: kind.to_string(),
                reason: "already registered".to_string(),
            });
        }
        Ok(())
    }

    pub fn registered_kinds(&self) -> impl Iterator<Item = &str> {
        self.registered.keys().map(String::as_str)
    }

    /// Paths with a validating handler behind them
    pub fn webhook_paths(&self) -> Vec<&str> {
        self.registered.values().flatten().map(String::as_str).collect()
    }

    /// Serve until `cancel` fires
    pub async fn start(self, cancel: CancellationToken) -> Result<()> {
        crate::ensure_crypto_provider();

        let server = &self.options.webhook_server;
        let addr = server.socket_addr()?;
        let tls = RustlsConfig::from_pem_file(server.cert_path(), server.key_path())
            .await
            .map_err(|e| {
                Error::ManagerFailed(format!(
                    "loading serving certificate from {}: {e}",
                    server.cert_dir.display()
                ))
            })?;

        let metrics = if self.options.metrics_bind_address == METRICS_DISABLED {
            None
        } else {
            let listener = tokio::net::TcpListener::bind(&self.options.metrics_bind_address)
                .await
                .map_err(|e| {
                    Error::ManagerFailed(format!(
                        "binding metrics address {}: {e}",
                        self.options.metrics_bind_address
                    ))
                })?;
            info!(address = %self.options.metrics_bind_address, "Serving health and metrics");
            let app = health::create_router(self.health.clone());
            let shutdown = cancel.clone().cancelled_owned();
            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown)
                    .await
            }))
        };

        let handle = Handle::new();
        let shutdown = handle.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            shutdown.graceful_shutdown(Some(Duration::from_secs(1)));
        });

        info!(address = %addr, paths = ?self.webhook_paths(), "Starting webhook server");
        self.health.set_ready(true).await;
        let served = axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router.into_make_service())
            .await;
        self.health.set_ready(false).await;
        cancel.cancel();

        if let Some(task) = metrics {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Metrics server failed"),
                Err(e) => warn!(error = %e, "Metrics server task failed"),
            }
        }

        served.map_err(|e| Error::ManagerFailed(format!("webhook server: {e}")))?;
        info!("Webhook server stopped");
        Ok(())
    }

    /// Run [`Manager::start`] in a background task
    pub fn spawn(self) -> ManagerHandle {
        ManagerHandle::run(move |token| self.start(token))
    }
}

/// Handle to a manager running in the background
pub struct ManagerHandle {
    cancel: CancellationToken,
    done: oneshot::Receiver<Result<()>>,
    task: JoinHandle<()>,
}

impl ManagerHandle {
    /// Spawn `serve` with a fresh cancellation token; its result is the
    /// completion signal [`ManagerHandle::stop`] waits for.
    fn run<F, Fut>(serve: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();
        let serving = serve(cancel.clone());
        let task = tokio::spawn(async move {
            let _ = done_tx.send(serving.await);
        });
        Self {
            cancel,
            done: done_rx,
            task,
        }
    }

    /// Token that stops the manager when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the manager and wait for it to signal completion.
    ///
    /// Returns [`Error::ManagerStopTimeout`] when no completion arrives
    /// within `timeout`; the task is left running in that case.
    pub async fn stop(self, timeout: Duration) -> Result<()> {
        self.cancel.cancel();
        match tokio::time::timeout(timeout, self.done).await {
            Err(_) => Err(Error::ManagerStopTimeout(timeout)),
            Ok(Ok(result)) => result,
            Ok(Err(_)) => match self.task.await {
                Err(e) if e.is_panic() => Err(Error::ManagerFailed("manager task panicked".to_string())),
                Err(e) => Err(Error::ManagerFailed(e.to_string())),
                Ok(()) => Err(Error::ManagerFailed(
                    "manager exited without reporting a result".to_string(),
                )),
            },
        }
    }
}
