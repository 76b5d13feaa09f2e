//! Cluster client traits for mocking
//!
//! The actuator talks to two clusters: the tenant cluster that owns the
//! `Machine` objects, and the infrastructure cluster that runs KubeVirt.
//! Both are abstracted here so unit tests can swap in the in-memory mocks.

use crate::error::ClientError;
use crds::{Machine, VirtualMachine, VirtualMachineInstance};
use k8s_openapi::api::core::v1::Secret;

/// Operations against the infrastructure cluster.
///
/// Lookups of absent resources fail with [`ClientError::NotFound`].
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait InfraClusterClient: Send + Sync {
    async fn create_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine, ClientError>;
    async fn get_virtual_machine(&self, namespace: &str, name: &str) -> Result<VirtualMachine, ClientError>;
    /// Replace a VM. `vm.metadata.resourceVersion` must carry the observed version.
    async fn update_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine, ClientError>;
    async fn delete_virtual_machine(&self, namespace: &str, name: &str, grace_period_seconds: u32) -> Result<(), ClientError>;
    async fn get_virtual_machine_instance(&self, namespace: &str, name: &str) -> Result<VirtualMachineInstance, ClientError>;
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClientError>;
}

/// Operations against the tenant cluster.
#[async_trait::async_trait]
pub trait TenantClusterClient: Send + Sync {
    /// Merge-patch a machine's metadata and spec
    async fn patch_machine(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<Machine, ClientError>;

    /// Merge-patch a machine's status subresource
    async fn patch_machine_status(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<Machine, ClientError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClientError>;

    /// Read `data[key]` of a config map as a string
    async fn get_config_map_value(&self, namespace: &str, name: &str, key: &str) -> Result<String, ClientError>;

    async fn delete_node(&self, name: &str) -> Result<(), ClientError>;
    async fn patch_node_provider_id(&self, name: &str, provider_id: &str) -> Result<(), ClientError>;
}
