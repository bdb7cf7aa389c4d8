//! Kubernetes Event recording for Shipper controllers.
//!
//! Wraps `kube::runtime::events::Recorder` behind a trait so the strategy
//! controller can be tested without an API server. Rollout progress shows up
//! in `kubectl describe release`.
//!
//! Publishing never fails from the caller's point of view: errors are logged
//! and dropped so a lost event cannot stall a rollout.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events about Shipper objects
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`.
    ///
    /// `reason` is machine readable (see [`reasons`]), `action` names what the
    /// controller did (see [`actions`]), `note` is shown to humans.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by the events API
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish event");
        }
    }
}

/// Publisher that drops everything
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`
pub mod reasons {
    /// Both actors reached the target step and the release status advanced
    pub const STRATEGY_APPLIED: &str = "StrategyApplied";
    /// Capacity or traffic of a release was retargeted
    pub const TARGETS_UPDATED: &str = "TargetsUpdated";
    /// The strategy or release spec cannot be executed as written
    pub const STRATEGY_INVALID: &str = "StrategyInvalid";
    /// An incumbent handed its traffic over to a newer release
    pub const RELEASE_SUPERSEDED: &str = "ReleaseSuperseded";
}

/// Event actions, shown in the ACTION column of `kubectl get events`
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Executing a strategy step
    pub const EXECUTE_STRATEGY: &str = "ExecuteStrategy";
}
