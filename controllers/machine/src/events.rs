//! Kubernetes event publishing for machines.

use crate::error::MachineAction;
use crds::Machine;
use kube::{Client, Resource};
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Controller name reported on published events
pub const REPORTER_NAME: &str = "kubevirt-machine-controller";

/// Severity of a machine event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    /// Successful operation
    Normal,
    /// Failed operation
    Warning,
}

/// Publishes events attached to a machine.
///
/// Publishing is fire-and-forget: failures are logged, never returned.
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        machine: &Machine,
        severity: EventSeverity,
        action: MachineAction,
        reason: &str,
        note: String,
    );
}

/// [`EventPublisher`] backed by the kube-runtime event [`Recorder`].
#[derive(Clone)]
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventPublisher").finish_non_exhaustive()
    }
}

impl KubeEventPublisher {
    /// Publisher reporting as [`REPORTER_NAME`]
    #[must_use]
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: REPORTER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait::async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        machine: &Machine,
        severity: EventSeverity,
        action: MachineAction,
        reason: &str,
        note: String,
    ) {
        let event = Event {
            type_: match severity {
                EventSeverity::Normal => EventType::Normal,
                EventSeverity::Warning => EventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(note),
            action: action.reason().to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &machine.object_ref(&())).await {
            warn!("Failed to publish {} event for machine {:?}: {}", reason, machine.metadata.name, e);
        }
    }
}
