//! Release CRD types
//!
//! A `Release` is one deployed version of an application. Its spec names the
//! strategy step it is trying to reach; its status records the step that was
//! actually achieved and where the release is in its lifecycle.

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{APP_LABEL, RELEASE_CLUSTERS_ANNOTATION, RELEASE_GENERATION_ANNOTATION};

// =============================================================================
// Phase
// =============================================================================

/// Lifecycle phase of a Release
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ReleasePhase {
    /// Release was admitted and awaits cluster scheduling
    #[default]
    WaitingForScheduling,
    /// Release is scheduled and the strategy is working toward its target step
    WaitingForStrategy,
    /// Target step reached; waiting for someone to move the target step forward
    WaitingForCommand,
    /// Final strategy step reached; the release serves its full share
    Installed,
    /// A newer release completed its rollout and replaced this one
    Superseded,
}

impl ReleasePhase {
    /// Whether moving from `self` to `next` is a legal lifecycle transition.
    ///
    /// Staying in the same phase is always allowed.
    pub fn can_transition_to(self, next: ReleasePhase) -> bool {
        use ReleasePhase::*;

        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (WaitingForScheduling, WaitingForStrategy)
                | (WaitingForStrategy, WaitingForCommand | Installed)
                | (WaitingForCommand, WaitingForStrategy | Installed)
                | (Installed, WaitingForStrategy | WaitingForCommand | Superseded)
                | (Superseded, Installed)
        )
    }

    /// Phases in which the strategy executor has nothing to drive
    pub fn is_inactive(self) -> bool {
        matches!(
            self,
            ReleasePhase::WaitingForScheduling | ReleasePhase::Superseded
        )
    }
}

impl std::fmt::Display for ReleasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WaitingForScheduling => write!(f, "WaitingForScheduling"),
            Self::WaitingForStrategy => write!(f, "WaitingForStrategy"),
            Self::WaitingForCommand => write!(f, "WaitingForCommand"),
            Self::Installed => write!(f, "Installed"),
            Self::Superseded => write!(f, "Superseded"),
        }
    }
}

// =============================================================================
// Environment
// =============================================================================

/// Selects target clusters by region and capability
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSelector {
    /// Regions a cluster may live in
    #[serde(default)]
    pub regions: Vec<String>,
    /// Capabilities a cluster must offer
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// The chart a release installs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedChart {
    /// Chart name
    pub name: String,
    /// Chart version
    pub version: String,
    /// Location of the chart tarball
    #[serde(default)]
    pub tarball: String,
}

/// The shipment order a release was created from
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedShipmentOrder {
    /// Cluster selectors requested by the user
    #[serde(default)]
    pub cluster_selectors: Vec<ClusterSelector>,
    /// Name of the Strategy driving this release
    pub strategy: String,
    /// Inlined chart values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<BTreeMap<String, serde_json::Value>>,
}

/// A sidecar deployed alongside the chart
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sidecar {
    /// Sidecar name
    pub name: String,
    /// Sidecar version
    pub version: String,
}

/// Everything a release needs to be rendered and rolled out
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseEnvironment {
    /// Clusters chosen at scheduling time
    #[serde(default)]
    pub clusters: Vec<String>,
    /// Chart to install
    pub chart: EmbeddedChart,
    /// Originating shipment order
    pub shipment_order: EmbeddedShipmentOrder,
    /// Sidecars to inject
    #[serde(default)]
    pub sidecars: Vec<Sidecar>,
}

// =============================================================================
// CRD
// =============================================================================

/// One deployed version of an application
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "shipper.booking.com",
    version = "v1",
    kind = "Release",
    plural = "releases",
    shortname = "rel",
    namespaced,
    status = "ReleaseStatus",
    printcolumn = r#"{"name":"Target","type":"integer","jsonPath":".spec.targetStep"}"#,
    printcolumn = r#"{"name":"Achieved","type":"integer","jsonPath":".status.achievedStep"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSpec {
    /// Index of the strategy step this release is trying to reach
    #[serde(default)]
    pub target_step: i32,

    /// Rollout environment
    pub environment: ReleaseEnvironment,
}

/// Observed state of a Release
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseStatus {
    /// Highest strategy step fully achieved so far
    #[serde(default)]
    pub achieved_step: u32,

    /// Current lifecycle phase
    #[serde(default)]
    pub phase: ReleasePhase,
}

impl Release {
    /// Current status, or the default status of a freshly admitted release
    pub fn current_status(&self) -> ReleaseStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> ReleasePhase {
        self.status
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or_default()
    }

    /// Name of the Strategy driving this release
    pub fn strategy_name(&self) -> &str {
        &self.spec.environment.shipment_order.strategy
    }

    /// Application this release belongs to
    pub fn app_name(&self) -> Option<&str> {
        self.labels().get(APP_LABEL).map(String::as_str)
    }

    /// Generation of this release within its application
    ///
    /// Returns None when the annotation is missing or not a number.
    pub fn generation(&self) -> Option<u64> {
        self.annotations()
            .get(RELEASE_GENERATION_ANNOTATION)
            .and_then(|g| g.trim().parse().ok())
    }

    /// Raw value of the clusters annotation, if set
    pub fn clusters_annotation(&self) -> Option<&str> {
        self.annotations()
            .get(RELEASE_CLUSTERS_ANNOTATION)
            .map(String::as_str)
    }

    /// Clusters this release is scheduled on
    ///
    /// The clusters annotation wins; releases without it fall back to the
    /// clusters recorded in the environment.
    pub fn selected_clusters(&self) -> Vec<String> {
        match self.clusters_annotation() {
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
            None => self.spec.environment.clusters.clone(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
