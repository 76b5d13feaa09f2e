//! Controller-specific error types.
//!
//! Every failure of an actuator operation is reported through
//! [`ControllerError`]. Failures inside the VM manager are tagged with the
//! machine, the actuator action and the step that failed; eventual-consistency
//! gaps are reported as [`ControllerError::RequeueAfter`] so the hosting
//! controller can retry after a fixed delay instead of backing off.

use cluster_clients::ClientError;
use kube::Error as KubeError;
use kube_runtime::finalizer::Error as FinalizerError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Actuator operation an error or event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineAction {
    /// Create the backing VM
    Create,
    /// Replace the backing VM
    Update,
    /// Delete the backing VM
    Delete,
    /// Check for the backing VM
    Exists,
}

impl MachineAction {
    /// Event reason published when the action succeeds
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Exists => "Exists",
        }
    }

    /// Event reason published when the action fails
    #[must_use]
    pub fn failed_reason(self) -> String {
        format!("Failed{}", self.reason())
    }

    /// Human readable form used in log lines and event notes
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::Create => "create machine",
            Self::Update => "update machine",
            Self::Delete => "delete machine",
            Self::Exists => "check machine exists",
        }
    }
}

impl fmt::Display for MachineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Errors that can occur in the KubeVirt machine controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Tenant or infrastructure cluster client error
    #[error("Cluster client error: {0}")]
    Client(#[from] ClientError),

    /// Invalid configuration; retrying without a change will not help
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A step of an actuator operation failed
    #[error("{machine}: Error during {action}: {step}, with error: {source}")]
    Step {
        machine: String,
        action: MachineAction,
        step: &'static str,
        #[source]
        source: Box<ControllerError>,
    },

    /// A step of the node update failed
    #[error("{node}: {step}, with error: {source}")]
    NodeUpdate {
        node: String,
        step: &'static str,
        #[source]
        source: ClientError,
    },

    /// The machine must be reconciled again after a fixed delay
    #[error("{machine}: requeue after {}s", requeue_after.as_secs())]
    RequeueAfter {
        machine: String,
        requeue_after: Duration,
    },

    /// A watcher task stopped
    #[error("Watch error: {0}")]
    Watch(String),

    /// Finalizer handling failed
    #[error("Finalizer error: {0}")]
    Finalizer(#[source] Box<FinalizerError<ControllerError>>),
}

impl ControllerError {
    /// Wrap `source` as a failed step of `action` on `machine`.
    pub fn step(
        machine: impl Into<String>,
        action: MachineAction,
        step: &'static str,
        source: impl Into<ControllerError>,
    ) -> Self {
        Self::Step {
            machine: machine.into(),
            action,
            step,
            source: Box::new(source.into()),
        }
    }

    /// Requeue delay carried anywhere in this error chain
    #[must_use]
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::RequeueAfter { requeue_after, .. } => Some(*requeue_after),
            Self::Step { source, .. } => source.requeue_after(),
            Self::Finalizer(err) => match err.as_ref() {
                FinalizerError::ApplyFailed(inner) | FinalizerError::CleanupFailed(inner) => {
                    inner.requeue_after()
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// True when this error chain is rooted in a configuration error
    #[must_use]
    pub fn is_invalid_config(&self) -> bool {
        match self {
            Self::InvalidConfig(_) | Self::Client(ClientError::InvalidConfig(_)) => true,
            Self::Step { source, .. } => source.is_invalid_config(),
            Self::Finalizer(err) => match err.as_ref() {
                FinalizerError::ApplyFailed(inner) | FinalizerError::CleanupFailed(inner) => {
                    inner.is_invalid_config()
                }
                _ => false,
            },
            _ => false,
        }
    }
}

impl From<FinalizerError<ControllerError>> for ControllerError {
    fn from(err: FinalizerError<ControllerError>) -> Self {
        Self::Finalizer(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_message_format() {
        let err = ControllerError::step(
            "worker-0",
            MachineAction::Create,
            "failed to create Virtual Machine in infraCluster",
            ClientError::Api("quota exceeded".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "worker-0: Error during Create: failed to create Virtual Machine in infraCluster, with error: Cluster client error: API error: quota exceeded"
        );
    }

    #[test]
    fn test_requeue_after_through_wrappers() {
        let requeue = ControllerError::RequeueAfter {
            machine: "worker-0".to_string(),
            requeue_after: Duration::from_secs(20),
        };
        let wrapped = ControllerError::from(FinalizerError::ApplyFailed(ControllerError::step(
            "worker-0",
            MachineAction::Update,
            "failed to get Virtual Machine from infraCluster",
            requeue,
        )));

        assert_eq!(wrapped.requeue_after(), Some(Duration::from_secs(20)));
        assert!(!wrapped.is_invalid_config());
    }

    #[test]
    fn test_invalid_config_through_step() {
        let err = ControllerError::step(
            "worker-0",
            MachineAction::Delete,
            "failed to build Virtual Machine struct",
            ControllerError::InvalidConfig("worker-0: missing value for NetworkName".to_string()),
        );
        assert!(err.is_invalid_config());
        assert_eq!(err.requeue_after(), None);
    }

    #[test]
    fn test_event_reasons() {
        assert_eq!(MachineAction::Create.reason(), "Create");
        assert_eq!(MachineAction::Update.failed_reason(), "FailedUpdate");
        assert_eq!(MachineAction::Exists.describe(), "check machine exists");
    }
}
