//! Node update.
//!
//! Keeps tenant `Node` objects consistent with their backing VMs: a node
//! whose VM is gone is deleted, and a node without a providerID gets the id
//! of its VM once that VM is ready. Nodes and VMs are matched by name.

use crate::error::ControllerError;
use crate::provider_id::format_provider_id;
use cluster_clients::{InfraClusterClient, TenantClusterClient};
use crds::VirtualMachine;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Requeue delay while the VM of a node is not ready yet
pub const REQUEUE_AFTER_VM_NOT_READY: Duration = Duration::from_secs(60);

/// What a node needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction {
    /// The backing VM is gone
    Delete,
    /// The backing VM is not ready; look again later
    RequeueAfter(Duration),
    /// The node has no providerID yet
    SetProviderId(String),
    /// The node is in line with its VM
    Nothing,
}

/// Decide what `node` needs given its VM, `None` when the VM does not exist.
#[must_use]
pub fn plan_node_update(node: &Node, vm: Option<&VirtualMachine>, infra_namespace: &str) -> NodeAction {
    let Some(vm) = vm else {
        return NodeAction::Delete;
    };

    if !vm.status.as_ref().is_some_and(|status| status.ready) {
        return NodeAction::RequeueAfter(REQUEUE_AFTER_VM_NOT_READY);
    }

    let provider_id = node
        .spec
        .as_ref()
        .and_then(|spec| spec.provider_id.as_deref())
        .unwrap_or_default();
    if provider_id.is_empty() {
        NodeAction::SetProviderId(format_provider_id(infra_namespace, &node.name_any()))
    } else {
        NodeAction::Nothing
    }
}

/// Applies [`plan_node_update`] against the clusters.
#[derive(Clone)]
pub struct NodeUpdater {
    infra: Arc<dyn InfraClusterClient>,
    tenant: Arc<dyn TenantClusterClient>,
    infra_namespace: String,
}

impl std::fmt::Debug for NodeUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeUpdater")
            .field("infra_namespace", &self.infra_namespace)
            .finish_non_exhaustive()
    }
}

impl NodeUpdater {
    #[must_use]
    pub fn new(
        infra: Arc<dyn InfraClusterClient>,
        tenant: Arc<dyn TenantClusterClient>,
        infra_namespace: impl Into<String>,
    ) -> Self {
        Self {
            infra,
            tenant,
            infra_namespace: infra_namespace.into(),
        }
    }

    /// Reconcile one node and return the action that was taken.
    pub async fn reconcile(&self, node: &Node) -> Result<NodeAction, ControllerError> {
        let name = node.name_any();
        debug!("{}: Reconciling node", name);

        let vm = match self.infra.get_virtual_machine(&self.infra_namespace, &name).await {
            Ok(vm) => Some(vm),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                return Err(ControllerError::NodeUpdate {
                    node: name,
                    step: "Error getting Virtual Machine",
                    source: e,
                });
            }
        };

        let action = plan_node_update(node, vm.as_ref(), &self.infra_namespace);
        match &action {
            NodeAction::Delete => {
                info!("{}: Virtual Machine of this node doesn't exist - delete the node", name);
                match self.tenant.delete_node(&name).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => debug!("{}: Node already deleted", name),
                    Err(e) => {
                        return Err(ControllerError::NodeUpdate {
                            node: name,
                            step: "Error deleting Node",
                            source: e,
                        });
                    }
                }
            }
            NodeAction::RequeueAfter(after) => {
                info!(
                    "{}: Virtual Machine of this node isn't ready - requeue after {}s",
                    name,
                    after.as_secs()
                );
            }
            NodeAction::SetProviderId(provider_id) => {
                info!("{}: ProviderID is not set on the node - setting it to {}", name, provider_id);
                self.tenant
                    .patch_node_provider_id(&name, provider_id)
                    .await
                    .map_err(|e| ControllerError::NodeUpdate {
                        node: name.clone(),
                        step: "failed updating node",
                        source: e,
                    })?;
            }
            NodeAction::Nothing => debug!("{}: Node is up to date", name),
        }
        Ok(action)
    }
}
