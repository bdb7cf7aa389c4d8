//! Release controller configuration

use std::time::Duration;

use shipper_common::retry::RetryConfig;

/// Field manager used for every patch the controller sends
pub const DEFAULT_FIELD_MANAGER: &str = "shipper-strategy-controller";

/// Tunables of the Release controller, built by the operator from its flags
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Requeue delay after patches were applied
    pub requeue_after_progress: Duration,
    /// Requeue delay after a failed reconcile
    pub requeue_after_error: Duration,
    /// Requeue delay after losing an optimistic concurrency race
    pub requeue_after_conflict: Duration,
    /// Field manager for patches
    pub field_manager: String,
    /// Retry policy for reads
    pub retry: RetryConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            requeue_after_progress: Duration::from_secs(10),
            requeue_after_error: Duration::from_secs(30),
            requeue_after_conflict: Duration::from_secs(1),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            retry: RetryConfig {
                max_attempts: 3,
                ..RetryConfig::default()
            },
        }
    }
}
