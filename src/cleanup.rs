//! Scoped cleanup registration.
//!
//! Every setup step that succeeds pushes the action undoing it. Running the
//! stack executes the actions newest-first and keeps going after failures, so
//! a partially completed setup is always released.

use std::sync::Mutex;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::error::{Error, Result};

type CleanupAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// A LIFO stack of asynchronous cleanup actions
#[derive(Default)]
pub struct CleanupStack {
    actions: Mutex<Vec<(String, CleanupAction)>>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action to run when the stack is drained.
    pub fn push<F>(&self, description: impl Into<String>, action: F)
    where
        F: FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        let description = description.into();
        debug!(cleanup = %description, "Registered cleanup");
        self.lock().push((description, Box::new(action)));
    }

    /// Number of pending actions
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every pending action in reverse registration order.
    ///
    /// All actions run even if some fail; the first failure is returned.
    pub async fn run(&self) -> Result<()> {
        let mut first_error: Option<Error> = None;

        loop {
            // The lock must not be held across the await below.
            let next = self.lock().pop();
            let Some((description, action)) = next else {
                break;
            };

            debug!(cleanup = %description, "Running cleanup");
            if let Err(e) = action().await {
                warn!(cleanup = %description, error = %e, "Cleanup failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, CleanupAction)>> {
        // A panic while holding the lock cannot leave the Vec half-updated.
        self.actions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
