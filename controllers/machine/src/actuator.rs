//! Machine actuator.
//!
//! The facade the hosting controller calls for every machine: `create`,
//! `update`, `delete` and `exists`. Each call builds a fresh
//! [`MachineScope`], hands it to the [`VmManager`], persists whatever the
//! scope changed on the machine, and reports the outcome as an event.

use crate::config::InfraClusterConfig;
use crate::error::{ControllerError, MachineAction};
use crate::events::{EventPublisher, EventSeverity};
use crate::machine_scope::{MachineScope, MachineScopeCreator};
use crate::vm_manager::VmManager;
use chrono::{DateTime, SecondsFormat, Utc};
use cluster_clients::{ClientError, TenantClusterClient};
use crds::Machine;
use kube::ResourceExt;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Key of the bootstrap payload in the tenant ignition secret
pub const USER_DATA_KEY: &str = "userData";

/// Drives the lifecycle of KubeVirt-backed machines.
pub struct Actuator {
    vm_manager: VmManager,
    events: Arc<dyn EventPublisher>,
    scope_creator: Arc<dyn MachineScopeCreator>,
    tenant: Arc<dyn TenantClusterClient>,
    infra_config: InfraClusterConfig,
}

impl std::fmt::Debug for Actuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actuator")
            .field("infra_config", &self.infra_config)
            .finish_non_exhaustive()
    }
}

impl Actuator {
    /// Actuator creating VMs in `infra_config.namespace`
    #[must_use]
    pub fn new(
        vm_manager: VmManager,
        events: Arc<dyn EventPublisher>,
        scope_creator: Arc<dyn MachineScopeCreator>,
        tenant: Arc<dyn TenantClusterClient>,
        infra_config: InfraClusterConfig,
    ) -> Self {
        Self {
            vm_manager,
            events,
            scope_creator,
            tenant,
            infra_config,
        }
    }

    /// Build an actuator whose infrastructure location is read from the
    /// tenant config map `config_map_namespace/config_map_name`.
    pub async fn from_config_map(
        vm_manager: VmManager,
        events: Arc<dyn EventPublisher>,
        scope_creator: Arc<dyn MachineScopeCreator>,
        tenant: Arc<dyn TenantClusterClient>,
        config_map_namespace: &str,
        config_map_name: &str,
    ) -> Result<Self, ControllerError> {
        let infra_config = InfraClusterConfig::load(tenant.as_ref(), config_map_namespace, config_map_name).await?;
        info!(
            "Actuator: infrastructure namespace {}, infra id {}",
            infra_config.namespace, infra_config.infra_id
        );
        Ok(Self::new(vm_manager, events, scope_creator, tenant, infra_config))
    }

    /// Where the tenant cluster lives in the infrastructure cluster
    #[must_use]
    pub fn infra_config(&self) -> &InfraClusterConfig {
        &self.infra_config
    }

    /// Create the VM backing `machine`.
    pub async fn create(&self, machine: &Machine) -> Result<(), ControllerError> {
        let action = MachineAction::Create;
        match self.try_create(machine).await {
            Ok(()) => {
                self.publish_success(machine, action, format!("Created Machine {}", machine.name_any()))
                    .await;
                Ok(())
            }
            Err(e) => Err(self.handle_machine_error(machine, action, e).await),
        }
    }

    /// Bring the VM backing `machine` in line with the machine.
    pub async fn update(&self, machine: &Machine) -> Result<(), ControllerError> {
        let action = MachineAction::Update;
        match self.try_update(machine).await {
            Ok(true) => {
                self.publish_success(machine, action, format!("Updated Machine {}", machine.name_any()))
                    .await;
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => Err(self.handle_machine_error(machine, action, e).await),
        }
    }

    /// Delete the VM backing `machine`.
    pub async fn delete(&self, machine: &Machine) -> Result<(), ControllerError> {
        let action = MachineAction::Delete;
        match self.try_delete(machine).await {
            Ok(()) => {
                self.publish_success(machine, action, format!("Deleted Machine {}", machine.name_any()))
                    .await;
                Ok(())
            }
            Err(e) => Err(self.handle_machine_error(machine, action, e).await),
        }
    }

    /// Whether the VM backing `machine` exists.
    pub async fn exists(&self, machine: &Machine) -> Result<bool, ControllerError> {
        let name = machine.name_any();
        info!("{}: actuator checking if machine exists", name);
        match self.vm_manager.exists(&name, &self.infra_config.namespace).await {
            Ok(exists) => Ok(exists),
            Err(e) => Err(self.handle_machine_error(machine, MachineAction::Exists, e).await),
        }
    }

    async fn try_create(&self, machine: &Machine) -> Result<(), ControllerError> {
        let mut scope = self.create_machine_scope(machine)?;
        info!("{}: actuator creating machine", scope.machine_name());

        let user_data = self.get_user_data(&*scope).await?;

        let result = self.vm_manager.create(&mut *scope, &user_data).await;
        let persisted = self.patch_machine(machine, scope.machine(), MachineAction::Create).await;
        result.and(persisted)
    }

    async fn try_update(&self, machine: &Machine) -> Result<bool, ControllerError> {
        let mut scope = self.create_machine_scope(machine)?;
        info!("{}: actuator updating machine", scope.machine_name());

        let result = self.vm_manager.update(&mut *scope).await;
        let persisted = self.patch_machine(machine, scope.machine(), MachineAction::Update).await;
        let was_updated = result?;
        persisted?;
        Ok(was_updated)
    }

    async fn try_delete(&self, machine: &Machine) -> Result<(), ControllerError> {
        let scope = self.create_machine_scope(machine)?;
        info!("{}: actuator deleting machine", scope.machine_name());
        self.vm_manager.delete(&*scope).await
    }

    fn create_machine_scope(&self, machine: &Machine) -> Result<Box<dyn MachineScope>, ControllerError> {
        self.scope_creator
            .create_machine_scope(machine, &self.infra_config.namespace, &self.infra_config.infra_id)
    }

    /// Read the bootstrap payload from the machine's tenant ignition secret.
    async fn get_user_data(&self, scope: &dyn MachineScope) -> Result<Vec<u8>, ControllerError> {
        let namespace = scope.machine_namespace();
        let secret_name = scope.ignition_secret_name();

        let secret = match self.tenant.get_secret(namespace, secret_name).await {
            Ok(secret) => secret,
            Err(e) if e.is_not_found() => {
                return Err(ControllerError::InvalidConfig(format!(
                    "ignition secret {namespace}/{secret_name} not found"
                )));
            }
            Err(e) => return Err(e.into()),
        };

        secret
            .data
            .and_then(|mut data| data.remove(USER_DATA_KEY))
            .map(|user_data| user_data.0)
            .ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "ignition secret {namespace}/{secret_name} doesn't contain the key {USER_DATA_KEY}"
                ))
            })
    }

    /// Persist what the scope changed on the machine: metadata and spec
    /// first, then the status subresource.
    async fn patch_machine(
        &self,
        original: &Machine,
        updated: &Machine,
        action: MachineAction,
    ) -> Result<(), ControllerError> {
        let name = updated.name_any();
        let namespace = updated.namespace().unwrap_or_default();
        debug!("{}: patching machine", name);

        if let Some(patch) = machine_patch(original, updated) {
            self.tenant
                .patch_machine(&namespace, &name, &patch)
                .await
                .map_err(|e| ControllerError::step(&name, action, "failed to patch machine", e))?;
        }

        let status = machine_status_patch(original, updated, Utc::now()).map_err(ClientError::from)?;
        if let Some(patch) = status {
            self.tenant
                .patch_machine_status(&namespace, &name, &patch)
                .await
                .map_err(|e| ControllerError::step(&name, action, "failed to patch machine status", e))?;
        }
        Ok(())
    }

    async fn publish_success(&self, machine: &Machine, action: MachineAction, note: String) {
        self.events
            .publish(machine, EventSeverity::Normal, action, action.reason(), note)
            .await;
    }

    /// Log `err`, report it as a warning event and hand it back.
    async fn handle_machine_error(
        &self,
        machine: &Machine,
        action: MachineAction,
        err: ControllerError,
    ) -> ControllerError {
        let message = format!("{}: kubevirt wrapper failed to {}: {}", machine.name_any(), action.describe(), err);
        error!("{}", message);
        self.events
            .publish(machine, EventSeverity::Warning, action, &action.failed_reason(), message)
            .await;
        err
    }
}

/// Entries of `after` that differ from `before`, with removed keys set to null.
fn string_map_patch(before: Option<&BTreeMap<String, String>>, after: Option<&BTreeMap<String, String>>) -> Option<Value> {
    let empty = BTreeMap::new();
    let before = before.unwrap_or(&empty);
    let after = after.unwrap_or(&empty);

    let mut patch = Map::new();
    for (key, value) in after {
        if before.get(key) != Some(value) {
            patch.insert(key.clone(), Value::String(value.clone()));
        }
    }
    for key in before.keys().filter(|key| !after.contains_key(*key)) {
        patch.insert(key.clone(), Value::Null);
    }

    (!patch.is_empty()).then_some(Value::Object(patch))
}

/// Merge patch of the labels, annotations and providerID changed between
/// `original` and `updated`, or `None` when nothing changed.
#[must_use]
pub fn machine_patch(original: &Machine, updated: &Machine) -> Option<Value> {
    let mut metadata = Map::new();
    if let Some(labels) = string_map_patch(original.metadata.labels.as_ref(), updated.metadata.labels.as_ref()) {
        metadata.insert("labels".to_string(), labels);
    }
    if let Some(annotations) =
        string_map_patch(original.metadata.annotations.as_ref(), updated.metadata.annotations.as_ref())
    {
        metadata.insert("annotations".to_string(), annotations);
    }

    let mut patch = Map::new();
    if !metadata.is_empty() {
        patch.insert("metadata".to_string(), Value::Object(metadata));
    }
    if original.spec.provider_id != updated.spec.provider_id {
        let provider_id = updated.spec.provider_id.clone().map_or(Value::Null, Value::String);
        patch.insert(
            "spec".to_string(),
            Value::Object(Map::from_iter([("providerID".to_string(), provider_id)])),
        );
    }

    (!patch.is_empty()).then_some(Value::Object(patch))
}

/// Merge patch of the status addresses and providerStatus changed between
/// `original` and `updated`, stamped with `now` as `lastUpdated`.
pub fn machine_status_patch(
    original: &Machine,
    updated: &Machine,
    now: DateTime<Utc>,
) -> Result<Option<Value>, serde_json::Error> {
    let before = original.status.clone().unwrap_or_default();
    let after = updated.status.clone().unwrap_or_default();

    let mut status = Map::new();
    if before.addresses != after.addresses {
        status.insert("addresses".to_string(), serde_json::to_value(&after.addresses)?);
    }
    if before.provider_status != after.provider_status {
        status.insert(
            "providerStatus".to_string(),
            after.provider_status.unwrap_or(Value::Null),
        );
    }
    if status.is_empty() {
        return Ok(None);
    }

    status.insert(
        "lastUpdated".to_string(),
        Value::String(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    Ok(Some(Value::Object(Map::from_iter([(
        "status".to_string(),
        Value::Object(status),
    )]))))
}
