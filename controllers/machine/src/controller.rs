//! Main controller implementation.
//!
//! This module contains the `Controller` struct that hosts the actuator. It
//! runs two watchers:
//! - Machine: finalizer-guarded create/update on apply, delete on cleanup
//! - Node: keeps tenant nodes in line with their VMs

use crate::actuator::Actuator;
use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::node_update::{NodeAction, NodeUpdater};
use crate::watcher::watch_resource;
use crds::Machine;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::finalizer::{Event as FinalizerEvent, finalizer};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Finalizer keeping a machine around until its VM is deleted
pub const MACHINE_FINALIZER: &str = "machine.openshift.io/kubevirt-actuator";

/// Periodic resync of a successfully reconciled machine
pub const MACHINE_RESYNC_PERIOD: Duration = Duration::from_secs(600);

/// Retry delay after a failed node reconciliation
const NODE_ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// Backoff state for a single machine
#[derive(Debug)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(1, 10), // 1 minute min, 10 minutes max
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared state of the machine watcher.
pub struct MachineContext {
    client: Client,
    actuator: Actuator,
    /// Error count tracking per machine (namespace/name -> BackoffState)
    backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl std::fmt::Debug for MachineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineContext")
            .field("actuator", &self.actuator)
            .finish_non_exhaustive()
    }
}

impl MachineContext {
    #[must_use]
    pub fn new(client: Client, actuator: Actuator) -> Self {
        Self {
            client,
            actuator,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    async fn apply(&self, machine: &Machine) -> Result<Action, ControllerError> {
        if self.actuator.exists(machine).await? {
            self.actuator.update(machine).await?;
        } else {
            self.actuator.create(machine).await?;
        }
        Ok(Action::requeue(MACHINE_RESYNC_PERIOD))
    }

    async fn cleanup(&self, machine: &Machine) -> Result<Action, ControllerError> {
        self.actuator.delete(machine).await?;
        Ok(Action::await_change())
    }

    /// Increment the error count of `key` and return the next backoff
    /// delay with the updated count.
    fn next_backoff(&self, key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states.entry(key.to_string()).or_insert_with(BackoffState::new);
                state.increment_error();
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (Duration::from_secs(60), 0)
            }
        }
    }

    /// Reset the error count of `key` after a successful reconciliation
    fn reset_error(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(key) {
                state.reset();
            }
        }
    }
}

fn machine_key(machine: &Machine) -> String {
    format!("{}/{}", machine.namespace().unwrap_or_default(), machine.name_any())
}

async fn reconcile_machine(machine: Arc<Machine>, ctx: Arc<MachineContext>) -> Result<Action, ControllerError> {
    let key = machine_key(&machine);
    let api: Api<Machine> = Api::namespaced(ctx.client.clone(), &machine.namespace().unwrap_or_default());

    let context = ctx.as_ref();
    let action = finalizer(&api, MACHINE_FINALIZER, machine, |event| async move {
        match event {
            FinalizerEvent::Apply(machine) => context.apply(&machine).await,
            FinalizerEvent::Cleanup(machine) => context.cleanup(&machine).await,
        }
    })
    .await?;

    ctx.reset_error(&key);
    Ok(action)
}

fn machine_error_policy(machine: Arc<Machine>, error: &ControllerError, ctx: Arc<MachineContext>) -> Action {
    let key = machine_key(&machine);

    if let Some(requeue_after) = error.requeue_after() {
        info!("{}: requeue after {}s", key, requeue_after.as_secs());
        return Action::requeue(requeue_after);
    }

    let (backoff, error_count) = ctx.next_backoff(&key);
    if error.is_invalid_config() {
        warn!(
            "{}: invalid machine configuration, retrying in {}s: {}",
            key,
            backoff.as_secs(),
            error
        );
        return Action::requeue(backoff);
    }
    warn!(
        "{}: reconciliation failed ({} consecutive errors), retrying in {}s: {}",
        key,
        error_count,
        backoff.as_secs(),
        error
    );
    Action::requeue(backoff)
}

async fn reconcile_node(node: Arc<Node>, updater: Arc<NodeUpdater>) -> Result<Action, ControllerError> {
    match updater.reconcile(&node).await? {
        NodeAction::RequeueAfter(after) => Ok(Action::requeue(after)),
        NodeAction::Delete | NodeAction::SetProviderId(_) | NodeAction::Nothing => Ok(Action::await_change()),
    }
}

fn node_error_policy(node: Arc<Node>, error: &ControllerError, _updater: Arc<NodeUpdater>) -> Action {
    warn!("{}: node reconciliation failed: {}", node.name_any(), error);
    Action::requeue(NODE_ERROR_REQUEUE)
}

/// Hosts the actuator and the node updater.
#[derive(Debug)]
pub struct Controller {
    machine_watcher: JoinHandle<Result<(), ControllerError>>,
    node_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Start both watchers. Machines are watched in `watch_namespace`, or in
    /// all namespaces when unset.
    #[must_use]
    pub fn new(
        client: Client,
        actuator: Actuator,
        node_updater: NodeUpdater,
        watch_namespace: Option<&str>,
    ) -> Self {
        let machine_api: Api<Machine> = match watch_namespace {
            Some(namespace) => Api::namespaced(client.clone(), namespace),
            None => Api::all(client.clone()),
        };
        let node_api: Api<Node> = Api::all(client.clone());

        let machine_context = Arc::new(MachineContext::new(client, actuator));
        let machine_watcher = tokio::spawn(watch_resource(
            machine_api,
            machine_context,
            reconcile_machine,
            machine_error_policy,
            "Machine",
        ));

        let node_watcher = tokio::spawn(watch_resource(
            node_api,
            Arc::new(node_updater),
            reconcile_node,
            node_error_policy,
            "Node",
        ));

        Self {
            machine_watcher,
            node_watcher,
        }
    }

    /// Runs the controller until a watcher stops.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("KubeVirt Machine Controller running");

        tokio::select! {
            result = &mut self.machine_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Machine watcher panicked: {e}")))??;
            }
            result = &mut self.node_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Node watcher panicked: {e}")))??;
            }
        }

        warn!("Watcher exited unexpectedly");
        Ok(())
    }
}
