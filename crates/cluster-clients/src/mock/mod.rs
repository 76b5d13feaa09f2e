//! Mock cluster clients for unit testing
//!
//! In-memory implementations of [`InfraClusterClient`] and
//! [`TenantClusterClient`] that can be seeded with resources and told to fail
//! specific operations.
//!
//! - `infra.rs` - VirtualMachines, VirtualMachineInstances and secrets
//! - `tenant.rs` - Machines, secrets, config maps and nodes
//! - `helpers.rs` - locking and JSON merge-patch helpers

mod helpers;
mod infra;
mod tenant;

pub use infra::{InfraOperation, MockInfraClusterClient};
pub use tenant::{MockTenantClusterClient, TenantOperation};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_trait::{InfraClusterClient, TenantClusterClient};
    use crds::{Machine, MachineSpec, VirtualMachine, VirtualMachineSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn vm(name: &str) -> VirtualMachine {
        let mut vm = VirtualMachine::new(name, VirtualMachineSpec::default());
        vm.metadata.namespace = Some("infra".to_string());
        vm
    }

    #[tokio::test]
    async fn test_create_assigns_version_and_instance() {
        let client = MockInfraClusterClient::new();
        let created = client.create_virtual_machine("infra", &vm("vm-1")).await.unwrap();

        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));
        assert!(created.metadata.uid.is_some());
        assert!(client.get_virtual_machine_instance("infra", "vm-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_update_without_changes_keeps_version() {
        let client = MockInfraClusterClient::new();
        let created = client.create_virtual_machine("infra", &vm("vm-1")).await.unwrap();

        let unchanged = client.update_virtual_machine("infra", &created).await.unwrap();
        assert_eq!(unchanged.metadata.resource_version.as_deref(), Some("1"));

        let mut changed = created.clone();
        changed.spec.run_strategy = Some("Always".to_string());
        let updated = client.update_virtual_machine("infra", &changed).await.unwrap();
        assert_eq!(updated.metadata.resource_version.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let client = MockInfraClusterClient::new();
        let mut created = client.create_virtual_machine("infra", &vm("vm-1")).await.unwrap();
        created.metadata.resource_version = Some("7".to_string());

        let result = client.update_virtual_machine("infra", &created).await;
        assert!(matches!(result, Err(crate::ClientError::Api(_))));
    }

    #[tokio::test]
    async fn test_missing_resources_are_not_found() {
        let client = MockInfraClusterClient::new();
        let err = client.get_virtual_machine("infra", "absent").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let client = MockInfraClusterClient::new();
        client.fail_on(InfraOperation::CreateSecret, "boom");

        let result = client
            .create_secret("infra", &k8s_openapi::api::core::v1::Secret::default())
            .await;
        assert!(result.unwrap_err().to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_machine_merge_patch() {
        let tenant = MockTenantClusterClient::new();
        tenant.add_machine(Machine {
            metadata: ObjectMeta {
                name: Some("m".to_string()),
                namespace: Some("ns".to_string()),
                labels: Some(BTreeMap::from([("keep".to_string(), "yes".to_string())])),
                ..ObjectMeta::default()
            },
            spec: MachineSpec::default(),
            status: None,
        });

        let patched = tenant
            .patch_machine(
                "ns",
                "m",
                &json!({"metadata": {"labels": {"added": "1"}}, "spec": {"providerID": "kubevirt://infra/m"}}),
            )
            .await
            .unwrap();

        let labels = patched.metadata.labels.unwrap();
        assert_eq!(labels.get("keep").map(String::as_str), Some("yes"));
        assert_eq!(labels.get("added").map(String::as_str), Some("1"));
        assert_eq!(patched.spec.provider_id.as_deref(), Some("kubevirt://infra/m"));
        assert_eq!(tenant.machine_patches().len(), 1);
    }

    #[tokio::test]
    async fn test_config_map_value() {
        let tenant = MockTenantClusterClient::new();
        tenant.add_config_map_value("openshift-config", "cloud-provider-config", "config", "{}");

        assert_eq!(
            tenant
                .get_config_map_value("openshift-config", "cloud-provider-config", "config")
                .await
                .unwrap(),
            "{}"
        );
        assert!(tenant
            .get_config_map_value("openshift-config", "cloud-provider-config", "other")
            .await
            .is_err());
    }
}
