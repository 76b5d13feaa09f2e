//! Mock infrastructure cluster
//!
//! Behaves like the API server where the actuator depends on it: create
//! assigns a uid and `resourceVersion`, replace checks the version and only
//! bumps it when the object actually changed, and KubeVirt's controller is
//! simulated by creating a VMI next to every new VM.

use super::helpers::lock;
use crate::cluster_trait::InfraClusterClient;
use crate::error::ClientError;
use crds::{VirtualMachine, VirtualMachineInstance, VirtualMachineInstanceSpec, VirtualMachineStatus};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Operations of [`MockInfraClusterClient`] that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfraOperation {
    CreateVirtualMachine,
    GetVirtualMachine,
    UpdateVirtualMachine,
    DeleteVirtualMachine,
    GetVirtualMachineInstance,
    CreateSecret,
}

/// Mock infrastructure cluster client for testing
#[derive(Debug, Clone)]
pub struct MockInfraClusterClient {
    pub(crate) virtual_machines: Arc<Mutex<HashMap<Key, VirtualMachine>>>,
    pub(crate) instances: Arc<Mutex<HashMap<Key, VirtualMachineInstance>>>,
    pub(crate) secrets: Arc<Mutex<HashMap<Key, Secret>>>,
    pub(crate) deletions: Arc<Mutex<Vec<(String, String, u32)>>>,
    pub(crate) failures: Arc<Mutex<HashMap<InfraOperation, String>>>,
    pub(crate) create_instances: bool,
    pub(crate) next_uid: Arc<Mutex<u64>>,
}

impl Default for MockInfraClusterClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInfraClusterClient {
    /// Create an empty mock cluster that spawns a VMI for every created VM
    #[must_use]
    pub fn new() -> Self {
        Self {
            virtual_machines: Arc::new(Mutex::new(HashMap::new())),
            instances: Arc::new(Mutex::new(HashMap::new())),
            secrets: Arc::new(Mutex::new(HashMap::new())),
            deletions: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            create_instances: true,
            next_uid: Arc::new(Mutex::new(1)),
        }
    }

    /// Do not create a VMI when a VM is created
    #[must_use]
    pub fn without_instances(mut self) -> Self {
        self.create_instances = false;
        self
    }

    /// Make `operation` fail with an API error carrying `message`
    pub fn fail_on(&self, operation: InfraOperation, message: impl Into<String>) {
        lock(&self.failures).insert(operation, message.into());
    }

    /// Let `operation` succeed again
    pub fn clear_failure(&self, operation: InfraOperation) {
        lock(&self.failures).remove(&operation);
    }

    /// Add a VM to the mock store as-is (for test setup)
    pub fn add_virtual_machine(&self, vm: VirtualMachine) {
        let namespace = vm.metadata.namespace.clone().unwrap_or_default();
        let name = vm.metadata.name.clone().unwrap_or_default();
        lock(&self.virtual_machines).insert(key(&namespace, &name), vm);
    }

    /// Add a VMI to the mock store (for test setup)
    pub fn add_instance(&self, vmi: VirtualMachineInstance) {
        let namespace = vmi.metadata.namespace.clone().unwrap_or_default();
        let name = vmi.metadata.name.clone().unwrap_or_default();
        lock(&self.instances).insert(key(&namespace, &name), vmi);
    }

    /// Set the server-owned status of a stored VM
    pub fn set_status(&self, namespace: &str, name: &str, created: bool, ready: bool) {
        if let Some(vm) = lock(&self.virtual_machines).get_mut(&key(namespace, name)) {
            vm.status = Some(VirtualMachineStatus { created, ready });
        }
    }

    #[must_use]
    pub fn virtual_machine(&self, namespace: &str, name: &str) -> Option<VirtualMachine> {
        lock(&self.virtual_machines).get(&key(namespace, name)).cloned()
    }

    #[must_use]
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        lock(&self.secrets).get(&key(namespace, name)).cloned()
    }

    /// `(namespace, name, grace_period_seconds)` of every delete call
    #[must_use]
    pub fn deletions(&self) -> Vec<(String, String, u32)> {
        lock(&self.deletions).clone()
    }

    fn check_failure(&self, operation: InfraOperation) -> Result<(), ClientError> {
        match lock(&self.failures).get(&operation) {
            Some(message) => Err(ClientError::Api(message.clone())),
            None => Ok(()),
        }
    }

    fn next_uid(&self) -> String {
        let mut uid = lock(&self.next_uid);
        let current = *uid;
        *uid += 1;
        format!("00000000-0000-0000-0000-{current:012}")
    }
}

#[async_trait::async_trait]
impl InfraClusterClient for MockInfraClusterClient {
    async fn create_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine, ClientError> {
        self.check_failure(InfraOperation::CreateVirtualMachine)?;

        let name = vm.metadata.name.clone().unwrap_or_default();
        let mut vms = lock(&self.virtual_machines);
        if vms.contains_key(&key(namespace, &name)) {
            return Err(ClientError::AlreadyExists(format!("VirtualMachine {namespace}/{name}")));
        }

        let mut created = vm.clone();
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.uid = Some(self.next_uid());
        created.metadata.resource_version = Some("1".to_string());
        created.status = Some(VirtualMachineStatus::default());
        vms.insert(key(namespace, &name), created.clone());
        drop(vms);

        if self.create_instances {
            let vmi = VirtualMachineInstance {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(namespace.to_string()),
                    ..ObjectMeta::default()
                },
                spec: created
                    .spec
                    .template
                    .as_ref()
                    .map(|template| template.spec.clone())
                    .unwrap_or_else(VirtualMachineInstanceSpec::default),
            };
            lock(&self.instances).insert(key(namespace, &name), vmi);
        }

        Ok(created)
    }

    async fn get_virtual_machine(&self, namespace: &str, name: &str) -> Result<VirtualMachine, ClientError> {
        self.check_failure(InfraOperation::GetVirtualMachine)?;
        self.virtual_machine(namespace, name)
            .ok_or_else(|| ClientError::NotFound(format!("VirtualMachine {namespace}/{name}")))
    }

    async fn update_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine, ClientError> {
        self.check_failure(InfraOperation::UpdateVirtualMachine)?;

        let name = vm.metadata.name.clone().unwrap_or_default();
        let mut vms = lock(&self.virtual_machines);
        let stored = vms
            .get_mut(&key(namespace, &name))
            .ok_or_else(|| ClientError::NotFound(format!("VirtualMachine {namespace}/{name}")))?;

        if vm.metadata.resource_version != stored.metadata.resource_version {
            return Err(ClientError::Api(format!(
                "VirtualMachine {namespace}/{name}: the object has been modified"
            )));
        }

        let changed = vm.spec != stored.spec
            || vm.metadata.labels != stored.metadata.labels
            || vm.metadata.annotations != stored.metadata.annotations;
        if changed {
            let version = stored
                .metadata
                .resource_version
                .as_deref()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or_default()
                + 1;
            stored.spec = vm.spec.clone();
            stored.metadata.labels = vm.metadata.labels.clone();
            stored.metadata.annotations = vm.metadata.annotations.clone();
            stored.metadata.resource_version = Some(version.to_string());
        }

        Ok(stored.clone())
    }

    async fn delete_virtual_machine(&self, namespace: &str, name: &str, grace_period_seconds: u32) -> Result<(), ClientError> {
        self.check_failure(InfraOperation::DeleteVirtualMachine)?;

        lock(&self.virtual_machines)
            .remove(&key(namespace, name))
            .ok_or_else(|| ClientError::NotFound(format!("VirtualMachine {namespace}/{name}")))?;
        lock(&self.instances).remove(&key(namespace, name));
        lock(&self.deletions).push((namespace.to_string(), name.to_string(), grace_period_seconds));
        Ok(())
    }

    async fn get_virtual_machine_instance(&self, namespace: &str, name: &str) -> Result<VirtualMachineInstance, ClientError> {
        self.check_failure(InfraOperation::GetVirtualMachineInstance)?;
        lock(&self.instances)
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("VirtualMachineInstance {namespace}/{name}")))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClientError> {
        self.check_failure(InfraOperation::CreateSecret)?;

        let name = secret.metadata.name.clone().unwrap_or_default();
        let mut secrets = lock(&self.secrets);
        if secrets.contains_key(&key(namespace, &name)) {
            return Err(ClientError::AlreadyExists(format!("Secret {namespace}/{name}")));
        }
        secrets.insert(key(namespace, &name), secret.clone());
        Ok(secret.clone())
    }
}
