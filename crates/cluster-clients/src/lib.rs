//! Cluster clients for the KubeVirt machine actuator
//!
//! Two clients are exposed as traits so the actuator can be exercised without
//! a live cluster:
//!
//! - [`TenantClusterClient`]: machines, secrets, config maps and nodes of the
//!   cluster whose machines are being reconciled
//! - [`InfraClusterClient`]: KubeVirt `VirtualMachine`/`VirtualMachineInstance`
//!   objects and ignition secrets in the infrastructure cluster
//!
//! # Example
//!
//! ```no_run
//! use cluster_clients::{
//!     KubeInfraClusterClient, KubeTenantClusterClient, TenantClusterClient,
//!     DEFAULT_CREDENTIALS_SECRET_NAME, DEFAULT_CREDENTIALS_SECRET_NAMESPACE,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tenant = KubeTenantClusterClient::new(kube::Client::try_default().await?);
//! let infra = KubeInfraClusterClient::from_credentials_secret(
//!     &tenant,
//!     DEFAULT_CREDENTIALS_SECRET_NAMESPACE,
//!     DEFAULT_CREDENTIALS_SECRET_NAME,
//! )
//! .await?;
//! let config = tenant
//!     .get_config_map_value("openshift-config", "cloud-provider-config", "config")
//!     .await?;
//! # let _ = (infra, config);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod infra;
pub mod tenant;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use cluster_trait::{InfraClusterClient, TenantClusterClient};
pub use error::ClientError;
pub use infra::{
    KubeInfraClusterClient, CREDENTIALS_KUBECONFIG_KEY, DEFAULT_CREDENTIALS_SECRET_NAME,
    DEFAULT_CREDENTIALS_SECRET_NAMESPACE,
};
pub use tenant::KubeTenantClusterClient;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{InfraOperation, MockInfraClusterClient, MockTenantClusterClient, TenantOperation};
