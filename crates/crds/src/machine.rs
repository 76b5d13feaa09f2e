//! Machine CRD
//!
//! The `machine.openshift.io/v1beta1` Machine owned by the tenant cluster.
//! Only the fields the KubeVirt actuator reads or writes are modelled.

use k8s_openapi::api::core::v1::NodeAddress;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Label carrying the id of the tenant cluster a machine belongs to.
pub const MACHINE_CLUSTER_ID_LABEL: &str = "machine.openshift.io/cluster-api-cluster";

/// Label describing the instance type backing a machine.
pub const MACHINE_INSTANCE_TYPE_LABEL: &str = "machine.openshift.io/instance-type";

/// Annotation describing the state of the instance backing a machine.
pub const MACHINE_INSTANCE_STATE_ANNOTATION: &str = "machine.openshift.io/instance-state";

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Provider specific configuration
    #[serde(default)]
    pub provider_spec: ProviderSpec,

    /// Identifier of the backing instance, `kubevirt://<namespace>/<name>`
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// Opaque provider configuration wrapper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Addresses assigned to the backing instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<NodeAddress>,

    /// Last time the status was written by the actuator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,

    /// Opaque provider status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<serde_json::Value>,
}
