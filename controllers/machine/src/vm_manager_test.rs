//! Unit tests for the VM manager

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::machine_scope::{KubevirtMachineScope, MachineScope};
    use crate::test_utils::*;
    use crate::vm_manager::*;
    use chrono::Utc;
    use cluster_clients::{InfraOperation, MockInfraClusterClient};
    use crds::{
        Machine, MachineStatus, VirtualMachine, VirtualMachineInstance, MACHINE_INSTANCE_STATE_ANNOTATION,
    };
    use k8s_openapi::api::core::v1::Secret;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const USER_DATA: &[u8] = br#"{"ignition":{"version":"2.2.0"}}"#;

    fn manager(infra: &MockInfraClusterClient) -> VmManager {
        VmManager::new(Arc::new(infra.clone()))
    }

    fn worker() -> Machine {
        create_test_machine("worker-0", create_test_provider_spec())
    }

    async fn create_worker(infra: &MockInfraClusterClient) -> KubevirtMachineScope {
        let mut scope = create_test_scope(&worker());
        manager(infra).create(&mut scope, USER_DATA).await.unwrap();
        scope
    }

    /// Scope whose sync always fails
    struct FailingSyncScope(KubevirtMachineScope);

    #[async_trait::async_trait]
    impl MachineScope for FailingSyncScope {
        fn update_allowed(&self, interval: Duration) -> bool {
            self.0.update_allowed(interval)
        }

        fn create_ignition_secret_from_machine(&self, user_data: &[u8]) -> Secret {
            self.0.create_ignition_secret_from_machine(user_data)
        }

        fn create_virtual_machine_from_machine(&self) -> Result<VirtualMachine, ControllerError> {
            self.0.create_virtual_machine_from_machine()
        }

        async fn sync_machine(
            &mut self,
            _vm: &VirtualMachine,
            _vmi: &VirtualMachineInstance,
            _provider_id: &str,
        ) -> Result<(), ControllerError> {
            Err(ControllerError::InvalidConfig("test error".to_string()))
        }

        fn machine(&self) -> &Machine {
            self.0.machine()
        }

        fn machine_name(&self) -> &str {
            self.0.machine_name()
        }

        fn machine_namespace(&self) -> &str {
            self.0.machine_namespace()
        }

        fn infra_namespace(&self) -> &str {
            self.0.infra_namespace()
        }

        fn ignition_secret_name(&self) -> &str {
            self.0.ignition_secret_name()
        }
    }

    #[tokio::test]
    async fn test_create_success() {
        let infra = MockInfraClusterClient::new();
        let scope = create_worker(&infra).await;

        let secret = infra.secret(TEST_INFRA_NAMESPACE, "worker-0-ignition").unwrap();
        let payload: serde_json::Value =
            serde_json::from_slice(&secret.data.unwrap()["userdata"].0).unwrap();
        assert_eq!(payload["ignition"]["version"], "2.2.0");
        assert_eq!(payload["storage"]["files"][0]["contents"]["source"], "data:,worker-0");

        let vm = infra.virtual_machine(TEST_INFRA_NAMESPACE, "worker-0").unwrap();
        assert_eq!(vm.metadata.resource_version.as_deref(), Some("1"));

        let machine = scope.machine();
        assert_eq!(machine.spec.provider_id.as_deref(), Some("kubevirt://tenant-infra/worker-0"));
        assert_eq!(
            machine.metadata.annotations.as_ref().unwrap()[MACHINE_INSTANCE_STATE_ANNOTATION],
            "vmNotCreated"
        );
        assert_eq!(machine.status.as_ref().unwrap().addresses[0].address, "worker-0");
    }

    #[tokio::test]
    async fn test_create_secret_failure() {
        let infra = MockInfraClusterClient::new();
        infra.fail_on(InfraOperation::CreateSecret, "test error");
        let mut scope = create_test_scope(&worker());

        let err = manager(&infra).create(&mut scope, USER_DATA).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "worker-0: Error during Create: failed to create ignition secret in infraCluster, with error: Cluster client error: API error: test error"
        );
        assert!(infra.virtual_machine(TEST_INFRA_NAMESPACE, "worker-0").is_none());
    }

    #[tokio::test]
    async fn test_create_build_failure_is_config_error() {
        let infra = MockInfraClusterClient::new();
        let mut scope = create_test_scope(&create_test_machine(
            "worker-0",
            json!({"sourcePvcName": "rhcos-pvc", "ignitionSecretName": TEST_IGNITION_SECRET}),
        ));

        let err = manager(&infra).create(&mut scope, USER_DATA).await.unwrap_err();
        assert!(err.is_invalid_config());
        assert!(err
            .to_string()
            .starts_with("worker-0: Error during Create: failed to build Virtual Machine struct, with error: "));
    }

    #[tokio::test]
    async fn test_create_vm_failure() {
        let infra = MockInfraClusterClient::new();
        infra.fail_on(InfraOperation::CreateVirtualMachine, "test error");
        let mut scope = create_test_scope(&worker());

        let err = manager(&infra).create(&mut scope, USER_DATA).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("Error during Create: failed to create Virtual Machine in infraCluster"));
    }

    #[tokio::test]
    async fn test_create_retry_after_vm_failure() {
        let infra = MockInfraClusterClient::new();
        infra.fail_on(InfraOperation::CreateVirtualMachine, "transient");
        let mut scope = create_test_scope(&worker());
        manager(&infra).create(&mut scope, USER_DATA).await.unwrap_err();
        assert!(infra.secret(TEST_INFRA_NAMESPACE, "worker-0-ignition").is_some());
        assert!(infra.virtual_machine(TEST_INFRA_NAMESPACE, "worker-0").is_none());

        infra.clear_failure(InfraOperation::CreateVirtualMachine);
        let mut retry = create_test_scope(&worker());
        manager(&infra).create(&mut retry, USER_DATA).await.unwrap();

        assert!(infra.virtual_machine(TEST_INFRA_NAMESPACE, "worker-0").is_some());
        assert_eq!(
            retry.machine().spec.provider_id.as_deref(),
            Some("kubevirt://tenant-infra/worker-0")
        );
    }

    #[tokio::test]
    async fn test_create_twice_fails_on_existing_vm() {
        let infra = MockInfraClusterClient::new();
        create_worker(&infra).await;

        let mut scope = create_test_scope(&worker());
        let err = manager(&infra).create(&mut scope, USER_DATA).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "worker-0: Error during Create: failed to create Virtual Machine in infraCluster, with error: Cluster client error: Already exists: VirtualMachine tenant-infra/worker-0"
        );
    }

    #[tokio::test]
    async fn test_create_without_instance() {
        let infra = MockInfraClusterClient::new().without_instances();
        let mut scope = create_test_scope(&worker());

        let err = manager(&infra).create(&mut scope, USER_DATA).await.unwrap_err();
        assert!(err.to_string().contains("Error during Create: failed to get vmi of the Machine"));
        assert!(infra.virtual_machine(TEST_INFRA_NAMESPACE, "worker-0").is_some());
    }

    #[tokio::test]
    async fn test_create_sync_failure() {
        let infra = MockInfraClusterClient::new();
        let mut scope = FailingSyncScope(create_test_scope(&worker()));

        let err = manager(&infra).create(&mut scope, USER_DATA).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "worker-0: Error during Create: failed to sync the Machine, with error: Invalid configuration: test error"
        );
    }

    #[tokio::test]
    async fn test_update_without_changes() {
        let infra = MockInfraClusterClient::new();
        create_worker(&infra).await;

        let mut scope = create_test_scope(&worker());
        let was_updated = manager(&infra).update(&mut scope).await.unwrap();

        assert!(!was_updated);
        let vm = infra.virtual_machine(TEST_INFRA_NAMESPACE, "worker-0").unwrap();
        assert_eq!(vm.metadata.resource_version.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_update_with_changes() {
        let infra = MockInfraClusterClient::new();
        create_worker(&infra).await;

        let mut machine = worker();
        machine.metadata.labels.as_mut().unwrap().insert("role".to_string(), "infra".to_string());
        let mut scope = create_test_scope(&machine);
        let was_updated = manager(&infra).update(&mut scope).await.unwrap();

        assert!(was_updated);
        let vm = infra.virtual_machine(TEST_INFRA_NAMESPACE, "worker-0").unwrap();
        assert_eq!(vm.metadata.resource_version.as_deref(), Some("2"));
        assert_eq!(vm.metadata.labels.unwrap()["role"], "infra");
    }

    #[tokio::test]
    async fn test_update_syncs_observed_status() {
        let infra = MockInfraClusterClient::new();
        create_worker(&infra).await;
        infra.set_status(TEST_INFRA_NAMESPACE, "worker-0", true, true);

        let mut scope = create_test_scope(&worker());
        manager(&infra).update(&mut scope).await.unwrap();

        let machine = scope.machine();
        assert_eq!(
            machine.metadata.annotations.as_ref().unwrap()[MACHINE_INSTANCE_STATE_ANNOTATION],
            "vmCreatedAndReady"
        );
        assert_eq!(
            machine.status.as_ref().unwrap().provider_status,
            Some(json!({"virtualMachineStatus": {"created": true, "ready": true}}))
        );
    }

    #[tokio::test]
    async fn test_update_missing_vm_on_new_machine_requeues_soon() {
        let infra = MockInfraClusterClient::new();
        let mut scope = create_test_scope(&worker());

        let err = manager(&infra).update(&mut scope).await.unwrap_err();
        assert_eq!(err.requeue_after(), Some(REQUEUE_AFTER_UPDATE_ALLOWED));
        assert_eq!(err.requeue_after(), Some(Duration::from_secs(20)));
    }

    #[tokio::test]
    async fn test_update_missing_vm_on_recent_machine_requeues_later() {
        let infra = MockInfraClusterClient::new();
        let mut machine = worker();
        machine.spec.provider_id = Some("kubevirt://tenant-infra/worker-0".to_string());
        machine.status = Some(MachineStatus {
            last_updated: Some(Utc::now()),
            ..MachineStatus::default()
        });
        let mut scope = create_test_scope(&machine);

        let err = manager(&infra).update(&mut scope).await.unwrap_err();
        assert_eq!(err.requeue_after(), Some(Duration::from_secs(180)));
    }

    #[tokio::test]
    async fn test_update_get_failure() {
        let infra = MockInfraClusterClient::new();
        infra.fail_on(InfraOperation::GetVirtualMachine, "test error");
        let mut scope = create_test_scope(&worker());

        let err = manager(&infra).update(&mut scope).await.unwrap_err();
        assert_eq!(err.requeue_after(), None);
        assert!(err
            .to_string()
            .contains("worker-0: Error during Update: failed to get Virtual Machine from infraCluster"));
    }

    #[tokio::test]
    async fn test_update_replace_failure() {
        let infra = MockInfraClusterClient::new();
        create_worker(&infra).await;
        infra.fail_on(InfraOperation::UpdateVirtualMachine, "test error");
        let mut scope = create_test_scope(&worker());

        let err = manager(&infra).update(&mut scope).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("Error during Update: failed to update Virtual Machine in infraCluster"));
    }

    #[tokio::test]
    async fn test_delete_absent_vm() {
        let infra = MockInfraClusterClient::new();
        let scope = create_test_scope(&worker());

        manager(&infra).delete(&scope).await.unwrap();
        assert!(infra.deletions().is_empty());
    }

    #[tokio::test]
    async fn test_delete_existing_vm() {
        let infra = MockInfraClusterClient::new();
        let scope = create_worker(&infra).await;

        manager(&infra).delete(&scope).await.unwrap();
        assert_eq!(
            infra.deletions(),
            vec![(TEST_INFRA_NAMESPACE.to_string(), "worker-0".to_string(), DELETE_GRACE_PERIOD_SECONDS)]
        );
        assert!(infra.virtual_machine(TEST_INFRA_NAMESPACE, "worker-0").is_none());
    }

    #[tokio::test]
    async fn test_delete_failure() {
        let infra = MockInfraClusterClient::new();
        let scope = create_worker(&infra).await;
        infra.fail_on(InfraOperation::DeleteVirtualMachine, "test error");

        let err = manager(&infra).delete(&scope).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "worker-0: Error during Delete: failed to delete Virtual Machine in infraCluster, with error: Cluster client error: API error: test error"
        );
    }

    #[tokio::test]
    async fn test_exists() {
        let infra = MockInfraClusterClient::new();
        let vm_manager = manager(&infra);
        assert!(!vm_manager.exists("worker-0", TEST_INFRA_NAMESPACE).await.unwrap());

        create_worker(&infra).await;
        assert!(vm_manager.exists("worker-0", TEST_INFRA_NAMESPACE).await.unwrap());
        assert!(!vm_manager.exists("worker-0", "other-namespace").await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_failure() {
        let infra = MockInfraClusterClient::new();
        infra.fail_on(InfraOperation::GetVirtualMachine, "test error");

        let err = manager(&infra).exists("worker-0", TEST_INFRA_NAMESPACE).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "worker-0: Error during Exists: failed to get vm of the Machine, with error: Cluster client error: API error: test error"
        );
    }
}
