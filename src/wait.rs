//! Bounded waits.
//!
//! [`eventually`] polls an arbitrary probe; [`wait_for_condition`] and
//! [`wait_for_deletion`] use the watch API for a single named resource.

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use kube::Resource;
use kube::api::Api;
use kube::runtime::watcher::{self, Event};
use serde::de::DeserializeOwned;
use tokio::time::timeout;

use crate::config::Intervals;
use crate::error::{Error, Result};

/// Poll `probe` every `polling` until it yields a value or `timeout` elapses.
pub async fn eventually<T, F, Fut>(
    what: &str,
    timeout_duration: Duration,
    polling: Duration,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout_duration;
    loop {
        if let Some(value) = probe().await {
            return Ok(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Timeout {
                what: what.to_string(),
                timeout: timeout_duration,
            });
        }
        tokio::time::sleep(polling).await;
    }
}

/// [`eventually`] with configured intervals
pub async fn eventually_within<T, F, Fut>(what: &str, intervals: Intervals, probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    eventually(what, intervals.timeout, intervals.polling, probe).await
}

/// Wait for a resource to satisfy a condition.
///
/// Returns the resource once `condition` holds, [`Error::ResourceDeleted`]
/// when it is deleted first, or [`Error::Timeout`].
pub async fn wait_for_condition<K, F>(
    api: &Api<K>,
    name: &str,
    condition: F,
    timeout_duration: Duration,
) -> Result<K>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + 'static,
    <K as Resource>::DynamicType: Default,
    F: Fn(&K) -> bool,
{
    let watch_future = async {
        let mut stream = watcher::watcher(
            api.clone(),
            watcher::Config::default().fields(&format!("metadata.name={}", name)),
        )
        .boxed();

        if let Ok(resource) = api.get(name).await
            && condition(&resource)
        {
            return Ok(resource);
        }

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => return Err(Error::Watch(e)),
            };
            match event {
                Event::Apply(resource) | Event::InitApply(resource) => {
                    if condition(&resource) {
                        return Ok(resource);
                    }
                }
                Event::Delete(_) => return Err(Error::ResourceDeleted(name.to_string())),
                Event::Init | Event::InitDone => {}
            }
        }

        Err(Error::Environment(format!("watch on {name} ended unexpectedly")))
    };

    timeout(timeout_duration, watch_future)
        .await
        .map_err(|_| Error::Timeout {
            what: format!("condition on {name}"),
            timeout: timeout_duration,
        })?
}

/// Wait for a resource to be deleted.
pub async fn wait_for_deletion<K>(api: &Api<K>, name: &str, timeout_duration: Duration) -> Result<()>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + 'static,
    <K as Resource>::DynamicType: Default,
{
    let wait_future = async {
        match api.get(name).await {
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
            Err(e) => return Err(Error::Kube(e)),
            Ok(_) => {}
        }

        let mut stream = watcher::watcher(
            api.clone(),
            watcher::Config::default().fields(&format!("metadata.name={}", name)),
        )
        .boxed();

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => return Err(Error::Watch(e)),
            };
            match event {
                Event::Delete(_) => return Ok(()),
                // A relist that no longer contains the object means it is gone.
                Event::InitDone => {
                    if let Err(kube::Error::Api(e)) = api.get(name).await
                        && e.code == 404
                    {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }

        Err(Error::Environment(format!("watch on {name} ended unexpectedly")))
    };

    timeout(timeout_duration, wait_future)
        .await
        .map_err(|_| Error::Timeout {
            what: format!("deletion of {name}"),
            timeout: timeout_duration,
        })?
}
