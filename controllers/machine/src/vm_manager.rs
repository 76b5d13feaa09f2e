//! VM Manager.
//!
//! Drives the infrastructure-cluster side of the four actuator operations
//! for one machine. The manager keeps no state between calls; every
//! operation re-derives the desired VM from the scope and re-reads the
//! observed VM before acting.
//!
//! Every failing step is logged and returned as a
//! [`ControllerError::Step`] naming the machine, the action and the step.
//! A VM that cannot be found during an update is reported as
//! [`ControllerError::RequeueAfter`] instead, since it is usually still
//! propagating through the infrastructure cluster's caches.

use crate::error::{ControllerError, MachineAction};
use crate::ignition::add_hostname_to_user_data;
use crate::machine_scope::MachineScope;
use crate::provider_id::format_provider_id;
use cluster_clients::InfraClusterClient;
use crds::VirtualMachine;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Requeue delay for a missing VM on a machine that may still be settling
pub const REQUEUE_AFTER_UPDATE_ALLOWED: Duration = Duration::from_secs(20);

/// Requeue delay for a missing VM on a machine that was synced recently
pub const REQUEUE_AFTER_UPDATE_NOT_ALLOWED: Duration = Duration::from_secs(180);

/// Grace period handed to the infrastructure cluster when deleting a VM
pub const DELETE_GRACE_PERIOD_SECONDS: u32 = 10;

const STEP_ADD_HOSTNAME: &str = "failed to add hostname to ignition payload";
const STEP_CREATE_SECRET: &str = "failed to create ignition secret in infraCluster";
const STEP_BUILD_VM: &str = "failed to build Virtual Machine struct";
const STEP_CREATE_VM: &str = "failed to create Virtual Machine in infraCluster";
const STEP_GET_VM: &str = "failed to get Virtual Machine from infraCluster";
const STEP_UPDATE_VM: &str = "failed to update Virtual Machine in infraCluster";
const STEP_DELETE_VM: &str = "failed to delete Virtual Machine in infraCluster";
const STEP_GET_VMI: &str = "failed to get vmi of the Machine";
const STEP_SYNC: &str = "failed to sync the Machine";
const STEP_EXISTS: &str = "failed to get vm of the Machine";

/// Wrap and log a failed step.
fn step_failed(
    machine: &str,
    action: MachineAction,
    step: &'static str,
    source: impl Into<ControllerError>,
) -> ControllerError {
    let err = ControllerError::step(machine, action, step, source);
    error!("{}", err);
    err
}

/// Reconciler of the backing VMs in the infrastructure cluster.
#[derive(Clone)]
pub struct VmManager {
    infra: Arc<dyn InfraClusterClient>,
}

impl std::fmt::Debug for VmManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmManager").finish_non_exhaustive()
    }
}

impl VmManager {
    /// Manager operating on `infra`
    #[must_use]
    pub fn new(infra: Arc<dyn InfraClusterClient>) -> Self {
        Self { infra }
    }

    /// Create the ignition secret and the VM, then sync the machine.
    pub async fn create(&self, scope: &mut dyn MachineScope, user_data: &[u8]) -> Result<(), ControllerError> {
        let action = MachineAction::Create;
        let machine_name = scope.machine_name().to_string();
        let infra_namespace = scope.infra_namespace().to_string();

        let user_data = add_hostname_to_user_data(user_data, &machine_name)
            .map_err(|e| step_failed(&machine_name, action, STEP_ADD_HOSTNAME, e))?;

        let secret = scope.create_ignition_secret_from_machine(&user_data);
        match self.infra.create_secret(&infra_namespace, &secret).await {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => {
                debug!("{}: ignition secret already exists in infracluster", machine_name);
            }
            Err(e) => return Err(step_failed(&machine_name, action, STEP_CREATE_SECRET, e)),
        }

        let vm = scope
            .create_virtual_machine_from_machine()
            .map_err(|e| step_failed(&machine_name, action, STEP_BUILD_VM, e))?;

        let created = self
            .infra
            .create_virtual_machine(&infra_namespace, &vm)
            .await
            .map_err(|e| step_failed(&machine_name, action, STEP_CREATE_VM, e))?;

        info!("{}: VirtualMachine was created in infracluster for the Machine", machine_name);

        self.sync_machine(scope, &created, action).await
    }

    /// Replace the VM with the freshly derived one and sync the machine.
    ///
    /// Returns whether the infrastructure cluster recorded a change, judged
    /// by the VM's resourceVersion before and after the replace.
    pub async fn update(&self, scope: &mut dyn MachineScope) -> Result<bool, ControllerError> {
        let action = MachineAction::Update;
        let machine_name = scope.machine_name().to_string();

        let mut desired = scope
            .create_virtual_machine_from_machine()
            .map_err(|e| step_failed(&machine_name, action, STEP_BUILD_VM, e))?;
        let vm_name = desired.name_any();
        let vm_namespace = scope.infra_namespace().to_string();

        let existing = match self.infra.get_virtual_machine(&vm_namespace, &vm_name).await {
            Ok(vm) => vm,
            Err(e) if e.is_not_found() => {
                let requeue_after = if scope.update_allowed(REQUEUE_AFTER_UPDATE_ALLOWED) {
                    REQUEUE_AFTER_UPDATE_ALLOWED
                } else {
                    REQUEUE_AFTER_UPDATE_NOT_ALLOWED
                };
                warn!(
                    "{}: Virtual Machine {}/{} not found in infraCluster, requeue after {}s",
                    machine_name,
                    vm_namespace,
                    vm_name,
                    requeue_after.as_secs()
                );
                return Err(ControllerError::RequeueAfter {
                    machine: machine_name,
                    requeue_after,
                });
            }
            Err(e) => return Err(step_failed(&machine_name, action, STEP_GET_VM, e)),
        };

        let previous_version = existing.metadata.resource_version.clone();
        desired.metadata.resource_version.clone_from(&previous_version);
        desired.status = Some(existing.status.clone().unwrap_or_default());

        let updated = self
            .infra
            .update_virtual_machine(&vm_namespace, &desired)
            .await
            .map_err(|e| step_failed(&machine_name, action, STEP_UPDATE_VM, e))?;
        let current_version = updated.metadata.resource_version.clone();

        let was_updated = previous_version != current_version;
        let result = if was_updated {
            "the virtual machine was changed - updated successfully"
        } else {
            "the virtual machine wasn't changed"
        };
        info!(
            "{}: VirtualMachine update was called in infracluster for the Machine, result: {} (oldVersion = {}, newVersion = {})",
            machine_name,
            result,
            previous_version.unwrap_or_default(),
            current_version.unwrap_or_default()
        );

        self.sync_machine(scope, &updated, action).await?;
        Ok(was_updated)
    }

    /// Delete the VM. A VM that is already gone counts as deleted.
    pub async fn delete(&self, scope: &dyn MachineScope) -> Result<(), ControllerError> {
        let action = MachineAction::Delete;
        let machine_name = scope.machine_name();
        let vm_namespace = scope.infra_namespace();

        match self.infra.get_virtual_machine(vm_namespace, machine_name).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                info!("{}: Virtual Machine does not exist (already deleted)", machine_name);
                return Ok(());
            }
            Err(e) => return Err(step_failed(machine_name, action, STEP_GET_VM, e)),
        }

        self.infra
            .delete_virtual_machine(vm_namespace, machine_name, DELETE_GRACE_PERIOD_SECONDS)
            .await
            .map_err(|e| step_failed(machine_name, action, STEP_DELETE_VM, e))?;

        info!("{}: VirtualMachine was deleted in infracluster for the Machine", machine_name);
        Ok(())
    }

    /// Whether the VM backing `machine_name` exists in `infra_namespace`.
    pub async fn exists(&self, machine_name: &str, infra_namespace: &str) -> Result<bool, ControllerError> {
        debug!("{}: check if machine exists", machine_name);
        match self.infra.get_virtual_machine(infra_namespace, machine_name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => {
                info!("{}: Virtual Machine of this Machine does not exist", machine_name);
                Ok(false)
            }
            Err(e) => Err(step_failed(machine_name, MachineAction::Exists, STEP_EXISTS, e)),
        }
    }

    async fn sync_machine(
        &self,
        scope: &mut dyn MachineScope,
        vm: &VirtualMachine,
        action: MachineAction,
    ) -> Result<(), ControllerError> {
        let machine_name = scope.machine_name().to_string();
        let vm_name = vm.name_any();
        let vm_namespace = vm.namespace().unwrap_or_else(|| scope.infra_namespace().to_string());

        let vmi = self
            .infra
            .get_virtual_machine_instance(&vm_namespace, &vm_name)
            .await
            .map_err(|e| step_failed(&machine_name, action, STEP_GET_VMI, e))?;

        let provider_id = format_provider_id(&vm_namespace, &vm_name);
        scope
            .sync_machine(vm, &vmi, &provider_id)
            .await
            .map_err(|e| step_failed(&machine_name, action, STEP_SYNC, e))
    }
}
