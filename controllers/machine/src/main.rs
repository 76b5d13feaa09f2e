//! KubeVirt Machine Controller
//!
//! Backs OpenShift `Machine` objects of a tenant cluster with KubeVirt
//! `VirtualMachine`s running in a separate infrastructure cluster.
//!
//! The controller reconciles:
//! - Machine: creates, updates and deletes the backing VM and writes the VM
//!   state back onto the machine
//! - Node: deletes nodes whose VM is gone and fills in missing providerIDs

mod actuator;
mod backoff;
mod config;
mod controller;
mod error;
mod events;
mod ignition;
mod machine_scope;
mod node_update;
mod provider_id;
mod resolver;
mod vm_manager;
mod watcher;

#[cfg(test)]
mod test_utils;

mod vm_manager_test;

use actuator::Actuator;
use anyhow::{Context, Result};
use cluster_clients::{KubeInfraClusterClient, KubeTenantClusterClient};
use config::Config;
use controller::Controller;
use events::KubeEventPublisher;
use machine_scope::{KubevirtMachineScopeCreator, ProviderDefaults};
use node_update::NodeUpdater;
use resolver::DnsResolver;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vm_manager::VmManager;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider already installed");
    }

    info!("Starting KubeVirt Machine Controller");

    let config = Config::from_env();
    info!("Configuration:");
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!(
        "  Infra credentials secret: {}/{}",
        config.infra_credentials_secret_namespace, config.infra_credentials_secret_name
    );
    info!("  Infra config map: {}/{}", config.config_map_namespace, config.config_map_name);

    let client = kube::Client::try_default()
        .await
        .context("failed to create tenant cluster client")?;
    let tenant = Arc::new(KubeTenantClusterClient::new(client.clone()));

    let infra = Arc::new(
        KubeInfraClusterClient::from_credentials_secret(
            tenant.as_ref(),
            &config.infra_credentials_secret_namespace,
            &config.infra_credentials_secret_name,
        )
        .await
        .context("failed to create infrastructure cluster client")?,
    );

    let actuator = Actuator::from_config_map(
        VmManager::new(infra.clone()),
        Arc::new(KubeEventPublisher::new(client.clone())),
        Arc::new(KubevirtMachineScopeCreator::new(ProviderDefaults::default(), Arc::new(DnsResolver))),
        tenant.clone(),
        &config.config_map_namespace,
        &config.config_map_name,
    )
    .await
    .context("failed to initialize actuator")?;

    let node_updater = NodeUpdater::new(infra, tenant, actuator.infra_config().namespace.clone());

    let controller = Controller::new(client, actuator, node_updater, config.watch_namespace.as_deref());
    controller.run().await?;

    Ok(())
}
