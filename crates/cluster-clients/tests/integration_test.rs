//! Integration tests for the cluster clients
//!
//! These tests require a reachable tenant cluster whose
//! `openshift-machine-api/kubevirt-credentials` secret points at a KubeVirt
//! infrastructure cluster. Set INFRA_NAMESPACE to the namespace VMs live in.

use cluster_clients::{
    InfraClusterClient, KubeInfraClusterClient, KubeTenantClusterClient, TenantClusterClient,
    DEFAULT_CREDENTIALS_SECRET_NAME, DEFAULT_CREDENTIALS_SECRET_NAMESPACE,
};

async fn tenant_client() -> KubeTenantClusterClient {
    let client = kube::Client::try_default()
        .await
        .expect("Failed to create tenant kube client");
    KubeTenantClusterClient::new(client)
}

#[tokio::test]
#[ignore] // Requires running tenant and infrastructure clusters
async fn test_infra_client_from_credentials_secret() {
    let tenant = tenant_client().await;

    let infra = KubeInfraClusterClient::from_credentials_secret(
        &tenant,
        DEFAULT_CREDENTIALS_SECRET_NAMESPACE,
        DEFAULT_CREDENTIALS_SECRET_NAME,
    )
    .await;
    assert!(infra.is_ok(), "Failed to build infra client: {:?}", infra.err());
}

#[tokio::test]
#[ignore]
async fn test_get_cloud_provider_config() {
    let tenant = tenant_client().await;

    let config = tenant
        .get_config_map_value("openshift-config", "cloud-provider-config", "config")
        .await
        .expect("Failed to read cloud-provider-config");

    let parsed: serde_json::Value = serde_json::from_str(&config).expect("config is not JSON");
    println!("infraID = {}", parsed["infraID"]);
}

#[tokio::test]
#[ignore]
async fn test_missing_virtual_machine_is_not_found() {
    let tenant = tenant_client().await;
    let infra = KubeInfraClusterClient::from_credentials_secret(
        &tenant,
        DEFAULT_CREDENTIALS_SECRET_NAMESPACE,
        DEFAULT_CREDENTIALS_SECRET_NAME,
    )
    .await
    .expect("Failed to build infra client");
    let namespace = std::env::var("INFRA_NAMESPACE").unwrap_or_else(|_| "default".to_string());

    let err = infra
        .get_virtual_machine(&namespace, "does-not-exist-kubevirt-actuator")
        .await
        .expect_err("VM should not exist");
    assert!(err.is_not_found());
}
