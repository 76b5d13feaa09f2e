//! Mock tenant cluster

use super::helpers::{lock, merge_patch};
use crate::cluster_trait::TenantClusterClient;
use crate::error::ClientError;
use crds::Machine;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{Node, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Operations of [`MockTenantClusterClient`] that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TenantOperation {
    PatchMachine,
    PatchMachineStatus,
    GetSecret,
    GetConfigMapValue,
    DeleteNode,
    PatchNodeProviderId,
}

/// Mock tenant cluster client for testing
///
/// Machine patches are applied as JSON merge patches to the stored machine and
/// recorded so tests can assert on what the actuator persisted.
#[derive(Debug, Clone, Default)]
pub struct MockTenantClusterClient {
    pub(crate) machines: Arc<Mutex<HashMap<Key, Machine>>>,
    pub(crate) machine_patches: Arc<Mutex<Vec<serde_json::Value>>>,
    pub(crate) status_patches: Arc<Mutex<Vec<serde_json::Value>>>,
    pub(crate) secrets: Arc<Mutex<HashMap<Key, Secret>>>,
    pub(crate) config_maps: Arc<Mutex<HashMap<Key, BTreeMap<String, String>>>>,
    pub(crate) nodes: Arc<Mutex<HashMap<String, Node>>>,
    pub(crate) failures: Arc<Mutex<HashMap<TenantOperation, String>>>,
}

impl MockTenantClusterClient {
    /// Create an empty mock cluster
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `operation` fail with an API error carrying `message`
    pub fn fail_on(&self, operation: TenantOperation, message: impl Into<String>) {
        lock(&self.failures).insert(operation, message.into());
    }

    /// Add a machine to the mock store (for test setup)
    pub fn add_machine(&self, machine: Machine) {
        let namespace = machine.metadata.namespace.clone().unwrap_or_default();
        let name = machine.metadata.name.clone().unwrap_or_default();
        lock(&self.machines).insert(key(&namespace, &name), machine);
    }

    /// Add a secret with string data (for test setup)
    pub fn add_secret(&self, namespace: &str, name: &str, data: &[(&str, &[u8])]) {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| ((*k).to_string(), ByteString(v.to_vec())))
                    .collect(),
            ),
            ..Secret::default()
        };
        lock(&self.secrets).insert(key(namespace, name), secret);
    }

    /// Set one key of a config map (for test setup)
    pub fn add_config_map_value(&self, namespace: &str, name: &str, data_key: &str, value: &str) {
        lock(&self.config_maps)
            .entry(key(namespace, name))
            .or_default()
            .insert(data_key.to_string(), value.to_string());
    }

    /// Add a node to the mock store (for test setup)
    pub fn add_node(&self, node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        lock(&self.nodes).insert(name, node);
    }

    #[must_use]
    pub fn machine(&self, namespace: &str, name: &str) -> Option<Machine> {
        lock(&self.machines).get(&key(namespace, name)).cloned()
    }

    #[must_use]
    pub fn node(&self, name: &str) -> Option<Node> {
        lock(&self.nodes).get(name).cloned()
    }

    /// Every metadata/spec patch sent, in order
    #[must_use]
    pub fn machine_patches(&self) -> Vec<serde_json::Value> {
        lock(&self.machine_patches).clone()
    }

    /// Every status patch sent, in order
    #[must_use]
    pub fn status_patches(&self) -> Vec<serde_json::Value> {
        lock(&self.status_patches).clone()
    }

    fn check_failure(&self, operation: TenantOperation) -> Result<(), ClientError> {
        match lock(&self.failures).get(&operation) {
            Some(message) => Err(ClientError::Api(message.clone())),
            None => Ok(()),
        }
    }

    fn apply_machine_patch(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<Machine, ClientError> {
        let mut machines = lock(&self.machines);
        let stored = machines
            .get_mut(&key(namespace, name))
            .ok_or_else(|| ClientError::NotFound(format!("Machine {namespace}/{name}")))?;

        let mut value = serde_json::to_value(&*stored)?;
        merge_patch(&mut value, patch);
        *stored = serde_json::from_value(value)?;
        Ok(stored.clone())
    }
}

#[async_trait::async_trait]
impl TenantClusterClient for MockTenantClusterClient {
    async fn patch_machine(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<Machine, ClientError> {
        self.check_failure(TenantOperation::PatchMachine)?;
        lock(&self.machine_patches).push(patch.clone());
        self.apply_machine_patch(namespace, name, patch)
    }

    async fn patch_machine_status(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<Machine, ClientError> {
        self.check_failure(TenantOperation::PatchMachineStatus)?;
        lock(&self.status_patches).push(patch.clone());
        self.apply_machine_patch(namespace, name, patch)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClientError> {
        self.check_failure(TenantOperation::GetSecret)?;
        lock(&self.secrets)
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("Secret {namespace}/{name}")))
    }

    async fn get_config_map_value(&self, namespace: &str, name: &str, data_key: &str) -> Result<String, ClientError> {
        self.check_failure(TenantOperation::GetConfigMapValue)?;
        let config_maps = lock(&self.config_maps);
        let data = config_maps
            .get(&key(namespace, name))
            .ok_or_else(|| ClientError::NotFound(format!("ConfigMap {namespace}/{name}")))?;
        data.get(data_key).cloned().ok_or_else(|| {
            ClientError::InvalidConfig(format!("ConfigMap {namespace}/{name} does not contain key {data_key}"))
        })
    }

    async fn delete_node(&self, name: &str) -> Result<(), ClientError> {
        self.check_failure(TenantOperation::DeleteNode)?;
        lock(&self.nodes)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(format!("Node {name}")))
    }

    async fn patch_node_provider_id(&self, name: &str, provider_id: &str) -> Result<(), ClientError> {
        self.check_failure(TenantOperation::PatchNodeProviderId)?;
        let mut nodes = lock(&self.nodes);
        let node = nodes
            .get_mut(name)
            .ok_or_else(|| ClientError::NotFound(format!("Node {name}")))?;
        node.spec.get_or_insert_with(Default::default).provider_id = Some(provider_id.to_string());
        Ok(())
    }
}
