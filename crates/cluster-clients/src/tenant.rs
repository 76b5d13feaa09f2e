//! kube-rs backed tenant cluster client

use crate::cluster_trait::TenantClusterClient;
use crate::error::ClientError;
use crds::Machine;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;

/// Tenant cluster client over a kube [`Client`].
#[derive(Clone)]
pub struct KubeTenantClusterClient {
    client: Client,
}

impl std::fmt::Debug for KubeTenantClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeTenantClusterClient").finish_non_exhaustive()
    }
}

impl KubeTenantClusterClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn machines(&self, namespace: &str) -> Api<Machine> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl TenantClusterClient for KubeTenantClusterClient {
    async fn patch_machine(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<Machine, ClientError> {
        Ok(self
            .machines(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    async fn patch_machine_status(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<Machine, ClientError> {
        Ok(self
            .machines(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClientError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await?
            .ok_or_else(|| ClientError::NotFound(format!("Secret {namespace}/{name}")))
    }

    async fn get_config_map_value(&self, namespace: &str, name: &str, key: &str) -> Result<String, ClientError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = api
            .get_opt(name)
            .await?
            .ok_or_else(|| ClientError::NotFound(format!("ConfigMap {namespace}/{name}")))?;

        config_map
            .data
            .and_then(|mut data| data.remove(key))
            .ok_or_else(|| {
                ClientError::InvalidConfig(format!("ConfigMap {namespace}/{name} does not contain key {key}"))
            })
    }

    async fn delete_node(&self, name: &str) -> Result<(), ClientError> {
        let api: Api<Node> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn patch_node_provider_id(&self, name: &str, provider_id: &str) -> Result<(), ClientError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let patch = json!({ "spec": { "providerID": provider_id } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        Ok(())
    }
}
