//! Controller configuration.
//!
//! Process settings come from environment variables. The infrastructure
//! namespace and cluster id are read at startup from a JSON document stored
//! in a tenant-cluster config map.

use crate::error::ControllerError;
use cluster_clients::{
    TenantClusterClient, DEFAULT_CREDENTIALS_SECRET_NAME, DEFAULT_CREDENTIALS_SECRET_NAMESPACE,
};
use std::env;

/// Default namespace of the config map describing the infrastructure cluster
pub const DEFAULT_CONFIG_MAP_NAMESPACE: &str = "openshift-config";

/// Default name of the config map describing the infrastructure cluster
pub const DEFAULT_CONFIG_MAP_NAME: &str = "cloud-provider-config";

/// Config map key holding the JSON document
pub const CONFIG_MAP_DATA_KEY: &str = "config";

const INFRA_NAMESPACE_KEY: &str = "namespace";
const INFRA_ID_KEY: &str = "infraID";

/// Environment configuration of the controller process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Namespace to watch for machines, all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Tenant secret holding the infrastructure cluster kubeconfig
    pub infra_credentials_secret_name: String,
    pub infra_credentials_secret_namespace: String,
    /// Tenant config map describing the infrastructure cluster
    pub config_map_namespace: String,
    pub config_map_name: String,
}

impl Config {
    /// Load configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        Self {
            watch_namespace: get("WATCH_NAMESPACE"),
            infra_credentials_secret_name: get_or("INFRA_CREDENTIALS_SECRET_NAME", DEFAULT_CREDENTIALS_SECRET_NAME),
            infra_credentials_secret_namespace: get_or(
                "INFRA_CREDENTIALS_SECRET_NAMESPACE",
                DEFAULT_CREDENTIALS_SECRET_NAMESPACE,
            ),
            config_map_namespace: get_or("CONFIG_MAP_NAMESPACE", DEFAULT_CONFIG_MAP_NAMESPACE),
            config_map_name: get_or("CONFIG_MAP_NAME", DEFAULT_CONFIG_MAP_NAME),
        }
    }
}

/// Location of the tenant cluster inside the infrastructure cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraClusterConfig {
    /// Namespace all VMs and ignition secrets are created in
    pub namespace: String,
    /// Id of the tenant cluster, used in ownership labels
    pub infra_id: String,
}

impl InfraClusterConfig {
    /// Read and parse the config map value.
    pub async fn load(
        tenant: &dyn TenantClusterClient,
        config_map_namespace: &str,
        config_map_name: &str,
    ) -> Result<Self, ControllerError> {
        let raw = tenant
            .get_config_map_value(config_map_namespace, config_map_name, CONFIG_MAP_DATA_KEY)
            .await?;
        Self::parse(&raw, &format!("{config_map_namespace}/{config_map_name}"))
    }

    /// Parse the JSON document; `source` only names the config map in errors.
    pub fn parse(raw: &str, source: &str) -> Result<Self, ControllerError> {
        let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
            ControllerError::InvalidConfig(format!(
                "configMap {source}: value of key {CONFIG_MAP_DATA_KEY} is not valid JSON: {e}"
            ))
        })?;
        let map = value.as_object().ok_or_else(|| {
            ControllerError::InvalidConfig(format!(
                "configMap {source}: value of key {CONFIG_MAP_DATA_KEY} is not a JSON object"
            ))
        })?;

        let field = |name: &str| {
            map.get(name).and_then(serde_json::Value::as_str).map(str::to_string).ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "configMap {source}: The map extracted with key {CONFIG_MAP_DATA_KEY} doesn't contain key {name}"
                ))
            })
        };

        Ok(Self {
            infra_id: field(INFRA_ID_KEY)?,
            namespace: field(INFRA_NAMESPACE_KEY)?,
        })
    }
}
