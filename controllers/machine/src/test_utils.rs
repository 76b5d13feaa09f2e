//! Test utilities for unit testing the actuator
//!
//! This module provides helpers for creating test machines and recording
//! the events the actuator publishes.

#[cfg(test)]
use crate::error::MachineAction;
#[cfg(test)]
use crate::events::{EventPublisher, EventSeverity};
#[cfg(test)]
use crate::machine_scope::{KubevirtMachineScope, KubevirtMachineScopeCreator, ProviderDefaults};
#[cfg(test)]
use crate::resolver::StaticResolver;
#[cfg(test)]
use crds::{Machine, MachineSpec, ProviderSpec, MACHINE_CLUSTER_ID_LABEL};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use std::collections::BTreeMap;
#[cfg(test)]
use std::net::Ipv4Addr;
#[cfg(test)]
use std::sync::{Arc, Mutex};

#[cfg(test)]
pub const TEST_MACHINE_NAMESPACE: &str = "openshift-machine-api";
#[cfg(test)]
pub const TEST_INFRA_NAMESPACE: &str = "tenant-infra";
#[cfg(test)]
pub const TEST_INFRA_ID: &str = "tenant-abc12";
#[cfg(test)]
pub const TEST_IGNITION_SECRET: &str = "worker-user-data";

/// Provider spec with every mandatory field set
#[cfg(test)]
pub fn create_test_provider_spec() -> serde_json::Value {
    serde_json::json!({
        "sourcePvcName": "rhcos-pvc",
        "ignitionSecretName": TEST_IGNITION_SECRET,
        "networkName": "multus-net"
    })
}

/// Helper to create a test Machine with the cluster-id label and `provider_spec`
#[cfg(test)]
pub fn create_test_machine(name: &str, provider_spec: serde_json::Value) -> Machine {
    Machine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_MACHINE_NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(
                MACHINE_CLUSTER_ID_LABEL.to_string(),
                TEST_INFRA_ID.to_string(),
            )])),
            ..ObjectMeta::default()
        },
        spec: MachineSpec {
            provider_spec: ProviderSpec {
                value: Some(provider_spec),
            },
            provider_id: None,
        },
        status: None,
    }
}

/// Resolver answering each `(host, addresses)` pair
#[cfg(test)]
pub fn create_test_resolver(hosts: &[(&str, &[Ipv4Addr])]) -> StaticResolver {
    hosts
        .iter()
        .fold(StaticResolver::new(), |resolver, (host, ips)| resolver.with_host(host, ips.to_vec()))
}

#[cfg(test)]
pub fn create_test_scope(machine: &Machine) -> KubevirtMachineScope {
    KubevirtMachineScope::new(
        machine,
        TEST_INFRA_NAMESPACE,
        TEST_INFRA_ID,
        Arc::new(ProviderDefaults::default()),
        Arc::new(StaticResolver::new()),
    )
    .unwrap()
}

#[cfg(test)]
pub fn create_test_scope_creator() -> KubevirtMachineScopeCreator {
    KubevirtMachineScopeCreator::new(ProviderDefaults::default(), Arc::new(StaticResolver::new()))
}

/// One event captured by [`RecordingEventPublisher`]
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub machine: String,
    pub severity: EventSeverity,
    pub action: MachineAction,
    pub reason: String,
    pub note: String,
}

/// Event publisher that keeps every event in memory
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct RecordingEventPublisher {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

#[cfg(test)]
impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|event| event.reason).collect()
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        machine: &Machine,
        severity: EventSeverity,
        action: MachineAction,
        reason: &str,
        note: String,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            machine: machine.metadata.name.clone().unwrap_or_default(),
            severity,
            action,
            reason: reason.to_string(),
            note,
        });
    }
}
