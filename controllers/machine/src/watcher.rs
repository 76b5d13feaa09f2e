//! Kubernetes resource watchers.
//!
//! Machines and nodes are both driven through a generic `watch_resource()`
//! helper built on `kube_runtime::Controller`, which handles reconnection,
//! per-object queueing and requeues.

use crate::error::ControllerError;
use futures::StreamExt;
use kube::{Api, Resource};
use kube_runtime::{Controller, controller::{Action, Config as ControllerConfig}, watcher};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Debounce applied before reconciling after an event
const DEBOUNCE: Duration = Duration::from_secs(5);

/// Concurrent reconciliations per watcher
const CONCURRENCY: u16 = 5;

/// Run `reconcile` for every object of `api` until the watch stream ends.
pub async fn watch_resource<K, Ctx, ReconcileFut>(
    api: Api<K>,
    ctx: Arc<Ctx>,
    reconcile: impl FnMut(Arc<K>, Arc<Ctx>) -> ReconcileFut,
    error_policy: impl Fn(Arc<K>, &ControllerError, Arc<Ctx>) -> Action,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Debug + Unpin,
    Ctx: Send + Sync + 'static,
    ReconcileFut: Future<Output = Result<Action, ControllerError>> + Send + 'static,
{
    info!("Starting {} watcher", resource_name);

    let controller_config = ControllerConfig::default()
        .debounce(DEBOUNCE)
        .concurrency(CONCURRENCY);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((object, action)) => debug!("Reconciled {} {}: {:?}", resource_name, object.name, action),
                Err(e) => error!("Controller error for {}: {}", resource_name, e),
            }
        })
        .await;

    Ok(())
}
