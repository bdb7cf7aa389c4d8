//! CapacityTarget CRD types
//!
//! Desired and achieved replica capacity of a release, per cluster. The spec
//! is written by the strategy controller; the status belongs to the capacity
//! controllers running against each cluster.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired capacity on one cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCapacityTarget {
    /// Cluster name
    pub name: String,
    /// Share of the total replica count to run, in percent
    #[serde(default)]
    pub percent: u32,
    /// Replica count the percentage applies to
    #[serde(default)]
    pub total_replica_count: u32,
}

/// Desired capacity of a release
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "shipper.booking.com",
    version = "v1",
    kind = "CapacityTarget",
    plural = "capacitytargets",
    shortname = "ct",
    namespaced,
    status = "CapacityTargetStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CapacityTargetSpec {
    /// Per-cluster capacity
    #[serde(default)]
    pub clusters: Vec<ClusterCapacityTarget>,
}

impl CapacityTargetSpec {
    /// Copy of this spec with every cluster set to `percent`
    pub fn with_percent(&self, percent: u32) -> Self {
        Self {
            clusters: self
                .clusters
                .iter()
                .map(|c| ClusterCapacityTarget {
                    percent,
                    ..c.clone()
                })
                .collect(),
        }
    }

    /// Whether every cluster already asks for `percent`
    pub fn is_at(&self, percent: u32) -> bool {
        self.clusters.iter().all(|c| c.percent == percent)
    }
}

/// Capacity observed on one cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCapacityStatus {
    /// Cluster name
    pub name: String,
    /// Share of the total replica count actually available, in percent
    #[serde(default)]
    pub achieved_percent: u32,
    /// Ready replicas
    #[serde(default)]
    pub available_replicas: u32,
    /// Free-form state reported by the cluster controller
    #[serde(default)]
    pub status: String,
}

/// Observed capacity of a release
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CapacityTargetStatus {
    /// One entry per cluster that reported back
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<ClusterCapacityStatus>,
}

impl CapacityTargetStatus {
    /// Achieved percentage on `cluster`, if it reported
    pub fn achieved(&self, cluster: &str) -> Option<u32> {
        self.clusters
            .iter()
            .find(|c| c.name == cluster)
            .map(|c| c.achieved_percent)
    }
}
