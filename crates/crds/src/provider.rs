//! KubeVirt provider spec and status
//!
//! The provider-specific payloads stored inside a Machine's
//! `spec.providerSpec.value` and `status.providerStatus`.

use crate::kubevirt::VirtualMachineStatus;
use serde::{Deserialize, Serialize};

/// Provider configuration for a KubeVirt-backed machine.
///
/// `source_pvc_name`, `ignition_secret_name` and `network_name` are required
/// when deriving a VM; the remaining fields fall back to provider defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubevirtMachineProviderSpec {
    /// PVC the boot volume is cloned from
    #[serde(default)]
    pub source_pvc_name: String,

    /// Tenant secret holding the bootstrap payload under `userData`
    #[serde(default)]
    pub ignition_secret_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credentials_secret_name: String,

    /// Multus network attachment the VM is plugged into
    #[serde(default)]
    pub network_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub requested_memory: String,

    /// Requested cores, 0 leaves the request unset
    #[serde(rename = "requestedCPU", default)]
    pub requested_cpu: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub requested_storage: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage_class_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub persistent_volume_access_mode: String,
}

impl KubevirtMachineProviderSpec {
    /// Decode a provider spec from the raw `providerSpec.value`.
    ///
    /// A missing value decodes to the empty spec so that validation reports
    /// the first missing field instead of a decode failure.
    pub fn from_value(value: Option<&serde_json::Value>) -> Result<Self, serde_json::Error> {
        match value {
            Some(value) => serde_json::from_value(value.clone()),
            None => Ok(Self::default()),
        }
    }
}

/// Observed state of the backing VM, written to `status.providerStatus`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubevirtMachineProviderStatus {
    #[serde(default)]
    pub virtual_machine_status: VirtualMachineStatus,
}

impl KubevirtMachineProviderStatus {
    pub fn new(virtual_machine_status: VirtualMachineStatus) -> Self {
        Self { virtual_machine_status }
    }

    /// Encode as the raw JSON stored on the machine.
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_spec_uses_wire_names() {
        let spec = KubevirtMachineProviderSpec::from_value(Some(&json!({
            "sourcePvcName": "rhcos",
            "ignitionSecretName": "worker-user-data",
            "networkName": "multus-net",
            "requestedCPU": 4,
            "persistentVolumeAccessMode": "ReadWriteOnce"
        })))
        .unwrap();

        assert_eq!(spec.source_pvc_name, "rhcos");
        assert_eq!(spec.ignition_secret_name, "worker-user-data");
        assert_eq!(spec.network_name, "multus-net");
        assert_eq!(spec.requested_cpu, 4);
        assert_eq!(spec.persistent_volume_access_mode, "ReadWriteOnce");
        assert!(spec.requested_memory.is_empty());
    }

    #[test]
    fn test_missing_provider_spec_is_empty() {
        let spec = KubevirtMachineProviderSpec::from_value(None).unwrap();
        assert_eq!(spec, KubevirtMachineProviderSpec::default());
    }

    #[test]
    fn test_provider_status_shape() {
        let status = KubevirtMachineProviderStatus::new(VirtualMachineStatus {
            created: true,
            ready: false,
        });
        assert_eq!(
            status.to_value().unwrap(),
            json!({"virtualMachineStatus": {"created": true, "ready": false}})
        );
    }
}
