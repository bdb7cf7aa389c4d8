//! TrafficTarget CRD types
//!
//! Desired and achieved traffic weight of a release, per cluster.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired traffic weight on one cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTrafficTarget {
    /// Cluster name
    pub name: String,
    /// Traffic weight, in percent of the application's traffic
    #[serde(default)]
    pub weight: u32,
}

/// Desired traffic of a release
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "shipper.booking.com",
    version = "v1",
    kind = "TrafficTarget",
    plural = "traffictargets",
    shortname = "tt",
    namespaced,
    status = "TrafficTargetStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TrafficTargetSpec {
    /// Per-cluster weights
    #[serde(default)]
    pub clusters: Vec<ClusterTrafficTarget>,
}

impl TrafficTargetSpec {
    /// Copy of this spec with every cluster set to `weight`
    pub fn with_weight(&self, weight: u32) -> Self {
        Self {
            clusters: self
                .clusters
                .iter()
                .map(|c| ClusterTrafficTarget {
                    name: c.name.clone(),
                    weight,
                })
                .collect(),
        }
    }

    /// Whether every cluster already asks for `weight`
    pub fn is_at(&self, weight: u32) -> bool {
        self.clusters.iter().all(|c| c.weight == weight)
    }
}

/// Traffic observed on one cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTrafficStatus {
    /// Cluster name
    pub name: String,
    /// Weight actually served
    #[serde(default)]
    pub achieved_traffic: u32,
    /// Free-form state reported by the cluster controller
    #[serde(default)]
    pub status: String,
}

/// Observed traffic of a release
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficTargetStatus {
    /// One entry per cluster that reported back
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<ClusterTrafficStatus>,
}

impl TrafficTargetStatus {
    /// Achieved weight on `cluster`, if it reported
    pub fn achieved(&self, cluster: &str) -> Option<u32> {
        self.clusters
            .iter()
            .find(|c| c.name == cluster)
            .map(|c| c.achieved_traffic)
    }
}
