//! Machine Scope.
//!
//! A scope wraps a clone of one `Machine` for the duration of a single
//! actuator call. It derives the desired `VirtualMachine` and ignition secret
//! from the machine, and writes the observed VM state back onto the machine.
//! It never talks to a cluster; persisting the machine is the actuator's job.

use crate::error::ControllerError;
use crate::resolver::HostResolver;
use chrono::{DateTime, Utc};
use crds::{
    CloudInitConfigDriveSource, DataVolumeRef, DataVolumeSource, DataVolumeSourcePvc, DataVolumeSpec,
    DataVolumeTemplateSpec, Devices, Disk, DiskTarget, DomainSpec, Interface, InterfaceBridge,
    KubevirtMachineProviderSpec, KubevirtMachineProviderStatus, Machine, MachineStatus, MultusNetwork,
    Network, ResourceRequirements, SecretRef, VirtualMachine, VirtualMachineInstance,
    VirtualMachineInstanceSpec, VirtualMachineInstanceTemplateSpec, VirtualMachineSpec,
    VirtualMachineStatus, Volume, MACHINE_CLUSTER_ID_LABEL, MACHINE_INSTANCE_STATE_ANNOTATION,
    MACHINE_INSTANCE_TYPE_LABEL, RUN_STRATEGY_ALWAYS,
};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{
    NodeAddress, PersistentVolumeClaimSpec, Secret, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Annotation recording the uid of the backing VM
pub const VM_ID_ANNOTATION: &str = "VmId";

/// Data key of the ignition secret created in the infrastructure cluster
pub const IGNITION_SECRET_DATA_KEY: &str = "userdata";

/// Access modes accepted for the boot volume
pub const ACCESS_MODES: [&str; 3] = ["ReadWriteMany", "ReadOnlyMany", "ReadWriteOnce"];

/// Fixed values used when deriving VMs, injected at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDefaults {
    /// Guest memory when the provider spec requests none
    pub requested_memory: String,
    /// Boot volume size when the provider spec requests none
    pub requested_storage: String,
    /// Boot volume access mode when the provider spec sets none
    pub persistent_volume_access_mode: String,
    /// Bus of both VM disks
    pub disk_bus: String,
    pub termination_grace_period_seconds: i64,
    /// apiVersion of the embedded CDI DataVolume
    pub data_volume_api_version: String,
    /// Disk and volume name of the boot volume
    pub data_volume_disk_name: String,
    /// Disk and volume name of the cloud-init volume
    pub cloud_init_disk_name: String,
    /// Name of the pod network interface and of the multus network entry
    pub main_network_name: String,
}

impl Default for ProviderDefaults {
    fn default() -> Self {
        Self {
            requested_memory: "2048M".to_string(),
            requested_storage: "35Gi".to_string(),
            persistent_volume_access_mode: "ReadWriteMany".to_string(),
            disk_bus: "virtio".to_string(),
            termination_grace_period_seconds: 600,
            data_volume_api_version: "cdi.kubevirt.io/v1alpha1".to_string(),
            data_volume_disk_name: "datavolumedisk1".to_string(),
            cloud_init_disk_name: "cloudinitdisk".to_string(),
            main_network_name: "main".to_string(),
        }
    }
}

/// Labels marking infrastructure resources as owned by a tenant cluster.
#[must_use]
pub fn ownership_labels(infra_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(
        format!("tenantcluster-{infra_id}-machine.openshift.io"),
        "owned".to_string(),
    )])
}

/// Name of the boot DataVolume of `machine_name`
#[must_use]
pub fn boot_volume_name(machine_name: &str) -> String {
    format!("{machine_name}-bootvolume")
}

/// Name of the infrastructure ignition secret of `machine_name`
#[must_use]
pub fn ignition_secret_name(machine_name: &str) -> String {
    format!("{machine_name}-ignition")
}

/// Lifecycle state of the backing VM, derived from its status on every sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// The VM has not been created yet
    NotCreated,
    /// Created, not yet ready
    CreatedNotReady,
    /// Created and ready
    CreatedAndReady,
}

impl VmState {
    /// State of a VM with `status`
    #[must_use]
    pub fn from_status(status: &VirtualMachineStatus) -> Self {
        match (status.created, status.ready) {
            (false, _) => Self::NotCreated,
            (true, false) => Self::CreatedNotReady,
            (true, true) => Self::CreatedAndReady,
        }
    }

    /// Value written to the instance-state annotation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotCreated => "vmNotCreated",
            Self::CreatedNotReady => "vmCreatedNotReady",
            Self::CreatedAndReady => "vmCreatedAndReady",
        }
    }
}

/// Per-call view of one machine.
#[async_trait::async_trait]
pub trait MachineScope: Send + Sync {
    /// Whether the machine is recent enough that a missing VM is probably
    /// still propagating rather than gone.
    fn update_allowed(&self, interval: Duration) -> bool;

    /// Derive the ignition secret holding `user_data`
    fn create_ignition_secret_from_machine(&self, user_data: &[u8]) -> Secret;

    /// Derive the desired VM. Pure: equal inputs give equal output.
    fn create_virtual_machine_from_machine(&self) -> Result<VirtualMachine, ControllerError>;

    /// Write the observed VM and VMI state onto the scope's machine
    async fn sync_machine(
        &mut self,
        vm: &VirtualMachine,
        vmi: &VirtualMachineInstance,
        provider_id: &str,
    ) -> Result<(), ControllerError>;

    /// The machine as modified by the last sync
    fn machine(&self) -> &Machine;

    fn machine_name(&self) -> &str;

    fn machine_namespace(&self) -> &str;

    /// Namespace of the VM and its ignition secret in the infrastructure cluster
    fn infra_namespace(&self) -> &str;

    /// Tenant secret holding the bootstrap payload
    fn ignition_secret_name(&self) -> &str;
}

/// Builds a [`MachineScope`] for each actuator call.
pub trait MachineScopeCreator: Send + Sync {
    /// Fails with a configuration error when the machine has no cluster-id
    /// label or its provider spec cannot be decoded.
    fn create_machine_scope(
        &self,
        machine: &Machine,
        infra_namespace: &str,
        infra_id: &str,
    ) -> Result<Box<dyn MachineScope>, ControllerError>;
}

/// Creator of [`KubevirtMachineScope`]s.
#[derive(Clone)]
pub struct KubevirtMachineScopeCreator {
    defaults: Arc<ProviderDefaults>,
    resolver: Arc<dyn HostResolver>,
}

impl std::fmt::Debug for KubevirtMachineScopeCreator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubevirtMachineScopeCreator")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl KubevirtMachineScopeCreator {
    /// Creator deriving VMs with `defaults` and resolving addresses through `resolver`
    #[must_use]
    pub fn new(defaults: ProviderDefaults, resolver: Arc<dyn HostResolver>) -> Self {
        Self {
            defaults: Arc::new(defaults),
            resolver,
        }
    }
}

impl MachineScopeCreator for KubevirtMachineScopeCreator {
    fn create_machine_scope(
        &self,
        machine: &Machine,
        infra_namespace: &str,
        infra_id: &str,
    ) -> Result<Box<dyn MachineScope>, ControllerError> {
        Ok(Box::new(KubevirtMachineScope::new(
            machine,
            infra_namespace,
            infra_id,
            Arc::clone(&self.defaults),
            Arc::clone(&self.resolver),
        )?))
    }
}

/// [`MachineScope`] for KubeVirt-backed machines.
pub struct KubevirtMachineScope {
    machine: Machine,
    provider_spec: KubevirtMachineProviderSpec,
    name: String,
    namespace: String,
    infra_namespace: String,
    infra_id: String,
    defaults: Arc<ProviderDefaults>,
    resolver: Arc<dyn HostResolver>,
}

impl std::fmt::Debug for KubevirtMachineScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubevirtMachineScope")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("infra_namespace", &self.infra_namespace)
            .finish_non_exhaustive()
    }
}

impl KubevirtMachineScope {
    /// Scope over a copy of `machine`; fails on a missing cluster-id label
    /// or an undecodable provider spec.
    pub fn new(
        machine: &Machine,
        infra_namespace: &str,
        infra_id: &str,
        defaults: Arc<ProviderDefaults>,
        resolver: Arc<dyn HostResolver>,
    ) -> Result<Self, ControllerError> {
        let name = machine.metadata.name.clone().unwrap_or_default();

        let cluster_id = machine
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(MACHINE_CLUSTER_ID_LABEL))
            .map_or("", String::as_str);
        if cluster_id.is_empty() {
            return Err(ControllerError::InvalidConfig(format!(
                "{name}: missing \"{MACHINE_CLUSTER_ID_LABEL}\" label"
            )));
        }

        let provider_spec = KubevirtMachineProviderSpec::from_value(machine.spec.provider_spec.value.as_ref())
            .map_err(|e| ControllerError::InvalidConfig(format!("{name}: failed to get machine config: {e}")))?;

        Ok(Self {
            machine: machine.clone(),
            provider_spec,
            namespace: machine.metadata.namespace.clone().unwrap_or_default(),
            name,
            infra_namespace: infra_namespace.to_string(),
            infra_id: infra_id.to_string(),
            defaults,
            resolver,
        })
    }

    /// [`MachineScope::update_allowed`] evaluated at `now`.
    #[must_use]
    pub fn update_allowed_at(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        let provider_id_set = self
            .machine
            .spec
            .provider_id
            .as_deref()
            .is_some_and(|id| !id.is_empty());
        if !provider_id_set {
            return true;
        }

        match self.machine.status.as_ref().and_then(|status| status.last_updated) {
            None => true,
            Some(last_updated) => (now - last_updated)
                .to_std()
                .is_ok_and(|elapsed| elapsed > interval),
        }
    }

    fn validate_mandatory_fields(&self) -> Result<(), ControllerError> {
        let missing = if self.provider_spec.source_pvc_name.is_empty() {
            Some("SourcePvcName")
        } else if self.provider_spec.ignition_secret_name.is_empty() {
            Some("IgnitionSecretName")
        } else if self.provider_spec.network_name.is_empty() {
            Some("NetworkName")
        } else {
            None
        };

        match missing {
            Some(field) => Err(ControllerError::InvalidConfig(format!(
                "{}: missing value for {field}",
                self.name
            ))),
            None => Ok(()),
        }
    }

    fn access_mode(&self) -> Result<String, ControllerError> {
        let requested = &self.provider_spec.persistent_volume_access_mode;
        if requested.is_empty() {
            return Ok(self.defaults.persistent_volume_access_mode.clone());
        }
        if ACCESS_MODES.contains(&requested.as_str()) {
            Ok(requested.clone())
        } else {
            Err(ControllerError::InvalidConfig(format!(
                "{}: Value of PersistentVolumeAccessMode, can be only one of: {}",
                self.name,
                ACCESS_MODES.join(", ")
            )))
        }
    }

    fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
        if value.is_empty() { default } else { value }
    }

    fn build_boot_volume_template(&self, access_mode: String) -> DataVolumeTemplateSpec {
        let storage = Self::or_default(&self.provider_spec.requested_storage, &self.defaults.requested_storage);
        let storage_class_name = Some(self.provider_spec.storage_class_name.clone()).filter(|s| !s.is_empty());

        DataVolumeTemplateSpec {
            api_version: Some(self.defaults.data_volume_api_version.clone()),
            metadata: ObjectMeta {
                name: Some(boot_volume_name(&self.name)),
                namespace: Some(self.infra_namespace.clone()),
                ..ObjectMeta::default()
            },
            spec: DataVolumeSpec {
                source: DataVolumeSource {
                    pvc: Some(DataVolumeSourcePvc {
                        name: self.provider_spec.source_pvc_name.clone(),
                        namespace: self.infra_namespace.clone(),
                    }),
                },
                pvc: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec![access_mode]),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "storage".to_string(),
                            Quantity(storage.to_string()),
                        )])),
                        ..VolumeResourceRequirements::default()
                    }),
                    storage_class_name,
                    ..PersistentVolumeClaimSpec::default()
                }),
            },
        }
    }

    fn build_vmi_template(&self) -> VirtualMachineInstanceTemplateSpec {
        let defaults = &self.defaults;
        let memory = Self::or_default(&self.provider_spec.requested_memory, &defaults.requested_memory);

        let mut requests = BTreeMap::from([("memory".to_string(), Quantity(memory.to_string()))]);
        if self.provider_spec.requested_cpu != 0 {
            requests.insert("cpu".to_string(), Quantity(self.provider_spec.requested_cpu.to_string()));
        }

        let disk = |name: &str| Disk {
            name: name.to_string(),
            disk: Some(DiskTarget {
                bus: defaults.disk_bus.clone(),
            }),
        };

        VirtualMachineInstanceTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(BTreeMap::from([
                    ("kubevirt.io/vm".to_string(), self.name.clone()),
                    ("name".to_string(), self.name.clone()),
                ])),
                ..ObjectMeta::default()
            }),
            spec: VirtualMachineInstanceSpec {
                domain: DomainSpec {
                    resources: ResourceRequirements { requests },
                    devices: Devices {
                        disks: vec![
                            disk(&defaults.data_volume_disk_name),
                            disk(&defaults.cloud_init_disk_name),
                        ],
                        interfaces: vec![Interface {
                            name: defaults.main_network_name.clone(),
                            bridge: Some(InterfaceBridge {}),
                        }],
                    },
                    machine: None,
                },
                termination_grace_period_seconds: Some(defaults.termination_grace_period_seconds),
                volumes: vec![
                    Volume {
                        name: defaults.data_volume_disk_name.clone(),
                        data_volume: Some(DataVolumeRef {
                            name: boot_volume_name(&self.name),
                        }),
                        cloud_init_config_drive: None,
                    },
                    Volume {
                        name: defaults.cloud_init_disk_name.clone(),
                        data_volume: None,
                        cloud_init_config_drive: Some(CloudInitConfigDriveSource {
                            user_data_secret_ref: Some(SecretRef {
                                name: ignition_secret_name(&self.name),
                            }),
                        }),
                    },
                ],
                networks: vec![Network {
                    name: defaults.main_network_name.clone(),
                    multus: Some(MultusNetwork {
                        network_name: self.provider_spec.network_name.clone(),
                    }),
                }],
            },
        }
    }

    fn sync_provider_id(&mut self, provider_id: &str) {
        if self.machine.spec.provider_id.as_deref() == Some(provider_id) {
            debug!("{}: providerID already synced to {}", self.name, provider_id);
            return;
        }
        self.machine.spec.provider_id = Some(provider_id.to_string());
        info!("{}: synced providerID to {}", self.name, provider_id);
    }

    fn sync_annotations_and_labels(&mut self, vm: &VirtualMachine) {
        let state = VmState::from_status(&vm.status.clone().unwrap_or_default());

        let annotations = self.machine.metadata.annotations.get_or_insert_with(BTreeMap::new);
        annotations.insert(
            VM_ID_ANNOTATION.to_string(),
            vm.metadata.uid.clone().unwrap_or_default(),
        );
        annotations.insert(MACHINE_INSTANCE_STATE_ANNOTATION.to_string(), state.as_str().to_string());

        let labels = self.machine.metadata.labels.get_or_insert_with(BTreeMap::new);
        if let Some(template) = &vm.spec.template {
            let instance_type = template
                .spec
                .domain
                .machine
                .as_ref()
                .map(|machine| machine.type_.clone())
                .unwrap_or_default();
            labels.insert(MACHINE_INSTANCE_TYPE_LABEL.to_string(), instance_type);
        }
        debug!("{}: synced annotations and labels, state {}", self.name, state.as_str());
    }

    async fn sync_network_addresses(&mut self, vmi: &VirtualMachineInstance) {
        let host = vmi.metadata.name.clone().unwrap_or_default();
        let mut addresses = vec![NodeAddress {
            type_: "InternalDNS".to_string(),
            address: host.clone(),
        }];

        for ip in self.resolver.lookup_ipv4(&host).await {
            let address = NodeAddress {
                type_: "InternalIP".to_string(),
                address: ip.to_string(),
            };
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }

        debug!("{}: synced {} network addresses", self.name, addresses.len());
        self.status_mut().addresses = addresses;
    }

    fn sync_provider_status(&mut self, vm: &VirtualMachine) -> Result<(), ControllerError> {
        let provider_status = KubevirtMachineProviderStatus::new(vm.status.clone().unwrap_or_default())
            .to_value()
            .map_err(|e| {
                ControllerError::InvalidConfig(format!("failed to get machine provider status: {e}"))
            })?;
        self.status_mut().provider_status = Some(provider_status);
        Ok(())
    }

    fn status_mut(&mut self) -> &mut MachineStatus {
        self.machine.status.get_or_insert_with(MachineStatus::default)
    }
}

#[async_trait::async_trait]
impl MachineScope for KubevirtMachineScope {
    fn update_allowed(&self, interval: Duration) -> bool {
        self.update_allowed_at(interval, Utc::now())
    }

    fn create_ignition_secret_from_machine(&self, user_data: &[u8]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(ignition_secret_name(&self.name)),
                namespace: Some(self.infra_namespace.clone()),
                labels: Some(ownership_labels(&self.infra_id)),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([(
                IGNITION_SECRET_DATA_KEY.to_string(),
                ByteString(user_data.to_vec()),
            )])),
            ..Secret::default()
        }
    }

    fn create_virtual_machine_from_machine(&self) -> Result<VirtualMachine, ControllerError> {
        self.validate_mandatory_fields()?;
        let access_mode = self.access_mode()?;

        let mut labels = ownership_labels(&self.infra_id);
        if let Some(machine_labels) = &self.machine.metadata.labels {
            labels.extend(machine_labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let mut vm = VirtualMachine::new(
            &self.name,
            VirtualMachineSpec {
                run_strategy: Some(RUN_STRATEGY_ALWAYS.to_string()),
                data_volume_templates: vec![self.build_boot_volume_template(access_mode)],
                template: Some(self.build_vmi_template()),
            },
        );
        vm.metadata.namespace = Some(self.infra_namespace.clone());
        vm.metadata.labels = Some(labels);
        vm.metadata.annotations.clone_from(&self.machine.metadata.annotations);
        Ok(vm)
    }

    async fn sync_machine(
        &mut self,
        vm: &VirtualMachine,
        vmi: &VirtualMachineInstance,
        provider_id: &str,
    ) -> Result<(), ControllerError> {
        self.sync_provider_id(provider_id);
        self.sync_annotations_and_labels(vm);
        self.sync_network_addresses(vmi).await;
        self.sync_provider_status(vm)
    }

    fn machine(&self) -> &Machine {
        &self.machine
    }

    fn machine_name(&self) -> &str {
        &self.name
    }

    fn machine_namespace(&self) -> &str {
        &self.namespace
    }

    fn infra_namespace(&self) -> &str {
        &self.infra_namespace
    }

    fn ignition_secret_name(&self) -> &str {
        &self.provider_spec.ignition_secret_name
    }
}
