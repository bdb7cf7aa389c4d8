//! InstallationTarget CRD types
//!
//! Records which clusters must have a release's workload installed and what
//! each cluster reports back.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Installation state reported for one cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum InstallationStatus {
    /// Chart not installed yet
    #[default]
    Pending,
    /// Chart installed and objects created
    Installed,
    /// Installation failed
    Failed,
}

impl std::fmt::Display for InstallationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Installed => write!(f, "Installed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Installation status of a single cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInstallationStatus {
    /// Cluster name
    pub name: String,
    /// Reported installation state
    #[serde(default)]
    pub status: InstallationStatus,
}

/// Clusters a release must be installed on
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "shipper.booking.com",
    version = "v1",
    kind = "InstallationTarget",
    plural = "installationtargets",
    shortname = "it",
    namespaced,
    status = "InstallationTargetStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct InstallationTargetSpec {
    /// Clusters that must have the workload installed
    #[serde(default)]
    pub clusters: Vec<String>,
}

/// Per-cluster installation results
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallationTargetStatus {
    /// One entry per cluster that reported back
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<ClusterInstallationStatus>,
}

impl InstallationTargetStatus {
    /// Reported state of `cluster`, if it reported at all
    pub fn cluster(&self, cluster: &str) -> Option<InstallationStatus> {
        self.clusters
            .iter()
            .find(|c| c.name == cluster)
            .map(|c| c.status)
    }
}

impl InstallationTarget {
    /// Whether every cluster has reported a finished installation.
    ///
    /// Every cluster in the spec must have reported `Installed`, and no
    /// reporting cluster may be in any other state. A target without status
    /// is never complete.
    pub fn is_complete(&self) -> bool {
        let Some(status) = &self.status else {
            return false;
        };
        let all_reported = self
            .spec
            .clusters
            .iter()
            .all(|name| status.cluster(name) == Some(InstallationStatus::Installed));
        let none_lagging = status
            .clusters
            .iter()
            .all(|c| c.status == InstallationStatus::Installed);
        all_reported && none_lagging
    }
}
