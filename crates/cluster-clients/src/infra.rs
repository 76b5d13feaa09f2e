//! kube-rs backed infrastructure cluster client
//!
//! The infrastructure cluster is reached through a kubeconfig stored in a
//! secret of the tenant cluster.

use crate::cluster_trait::{InfraClusterClient, TenantClusterClient};
use crate::error::ClientError;
use crds::{VirtualMachine, VirtualMachineInstance};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{DeleteParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use tracing::{debug, info};

/// Secret key holding the infrastructure cluster kubeconfig.
pub const CREDENTIALS_KUBECONFIG_KEY: &str = "kubeconfig";

/// Default name of the tenant secret holding the infra-cluster kubeconfig.
pub const DEFAULT_CREDENTIALS_SECRET_NAME: &str = "kubevirt-credentials";

/// Default namespace of the tenant secret holding the infra-cluster kubeconfig.
pub const DEFAULT_CREDENTIALS_SECRET_NAMESPACE: &str = "openshift-machine-api";

/// Infrastructure cluster client over a kube [`Client`].
#[derive(Clone)]
pub struct KubeInfraClusterClient {
    client: Client,
}

impl std::fmt::Debug for KubeInfraClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeInfraClusterClient").finish_non_exhaustive()
    }
}

impl KubeInfraClusterClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build the client from the kubeconfig stored in a tenant-cluster secret.
    ///
    /// A missing secret or a secret without the `kubeconfig` key is reported
    /// as [`ClientError::InvalidConfig`].
    pub async fn from_credentials_secret(
        tenant: &dyn TenantClusterClient,
        secret_namespace: &str,
        secret_name: &str,
    ) -> Result<Self, ClientError> {
        let secret = tenant
            .get_secret(secret_namespace, secret_name)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    ClientError::InvalidConfig(format!(
                        "Infra-cluster credentials secret {secret_namespace}/{secret_name} not found"
                    ))
                } else {
                    e
                }
            })?;

        let kubeconfig = secret
            .data
            .as_ref()
            .and_then(|data| data.get(CREDENTIALS_KUBECONFIG_KEY))
            .ok_or_else(|| {
                ClientError::InvalidConfig(format!(
                    "Infra-cluster credentials secret {secret_namespace}/{secret_name} did not contain key {CREDENTIALS_KUBECONFIG_KEY}"
                ))
            })?;

        let yaml = String::from_utf8(kubeconfig.0.clone()).map_err(|e| {
            ClientError::InvalidConfig(format!(
                "Infra-cluster credentials secret {secret_namespace}/{secret_name}: kubeconfig is not valid UTF-8: {e}"
            ))
        })?;

        info!("Loaded infra-cluster kubeconfig from secret {}/{}", secret_namespace, secret_name);
        Self::from_kubeconfig_yaml(&yaml).await
    }

    /// Build the client from raw kubeconfig YAML.
    pub async fn from_kubeconfig_yaml(yaml: &str) -> Result<Self, ClientError> {
        let kubeconfig = Kubeconfig::from_yaml(yaml)?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }

    fn virtual_machines(&self, namespace: &str) -> Api<VirtualMachine> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl InfraClusterClient for KubeInfraClusterClient {
    async fn create_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine, ClientError> {
        debug!("Creating VirtualMachine {:?} in {}", vm.metadata.name, namespace);
        Ok(self.virtual_machines(namespace).create(&PostParams::default(), vm).await?)
    }

    async fn get_virtual_machine(&self, namespace: &str, name: &str) -> Result<VirtualMachine, ClientError> {
        self.virtual_machines(namespace)
            .get_opt(name)
            .await?
            .ok_or_else(|| ClientError::NotFound(format!("VirtualMachine {namespace}/{name}")))
    }

    async fn update_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine, ClientError> {
        let name = vm.metadata.name.as_deref().ok_or_else(|| {
            ClientError::InvalidConfig("VirtualMachine to update has no name".to_string())
        })?;
        Ok(self.virtual_machines(namespace).replace(name, &PostParams::default(), vm).await?)
    }

    async fn delete_virtual_machine(&self, namespace: &str, name: &str, grace_period_seconds: u32) -> Result<(), ClientError> {
        let params = DeleteParams {
            grace_period_seconds: Some(grace_period_seconds),
            ..DeleteParams::default()
        };
        self.virtual_machines(namespace).delete(name, &params).await?;
        Ok(())
    }

    async fn get_virtual_machine_instance(&self, namespace: &str, name: &str) -> Result<VirtualMachineInstance, ClientError> {
        let api: Api<VirtualMachineInstance> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await?
            .ok_or_else(|| ClientError::NotFound(format!("VirtualMachineInstance {namespace}/{name}")))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClientError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), secret).await?)
    }
}
