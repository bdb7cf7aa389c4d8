//! Patches produced by the strategy executor

use serde::Serialize;
use shipper_common::crd::{CapacityTargetSpec, ReleaseStatus, TrafficTargetSpec};

/// One intended mutation, named by the release that owns the target object.
///
/// Capacity and traffic targets share their release's name, so `name` is
/// enough to address any of the three objects within a namespace.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExecutorResult {
    /// Replace the status of a Release
    ReleaseStatusUpdate { name: String, status: ReleaseStatus },
    /// Replace the spec of a CapacityTarget
    CapacityTargetSpecUpdate {
        name: String,
        spec: CapacityTargetSpec,
    },
    /// Replace the spec of a TrafficTarget
    TrafficTargetSpecUpdate { name: String, spec: TrafficTargetSpec },
}

impl ExecutorResult {
    /// Name of the release the patch targets
    pub fn name(&self) -> &str {
        match self {
            Self::ReleaseStatusUpdate { name, .. }
            | Self::CapacityTargetSpecUpdate { name, .. }
            | Self::TrafficTargetSpecUpdate { name, .. } => name,
        }
    }

    /// True for patches that finalize a step
    pub fn is_status_update(&self) -> bool {
        matches!(self, Self::ReleaseStatusUpdate { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipper_common::crd::{ClusterTrafficTarget, ReleasePhase};

    #[test]
    fn serializes_with_kind_tag() {
        let result = ExecutorResult::ReleaseStatusUpdate {
            name: "web-1".to_string(),
            status: ReleaseStatus {
                achieved_step: 1,
                phase: ReleasePhase::WaitingForCommand,
            },
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["kind"], "releaseStatusUpdate");
        assert_eq!(json["name"], "web-1");
        assert_eq!(json["status"]["phase"], "WaitingForCommand");
        assert!(result.is_status_update());
    }

    #[test]
    fn name_is_available_for_every_variant() {
        let result = ExecutorResult::TrafficTargetSpecUpdate {
            name: "web-2".to_string(),
            spec: TrafficTargetSpec {
                clusters: vec![ClusterTrafficTarget {
                    name: "kube-a".to_string(),
                    weight: 10,
                }],
            },
        };
        assert_eq!(result.name(), "web-2");
        assert!(!result.is_status_update());
    }
}
