//! Custom Resource Definitions for Shipper
//!
//! A release owns one target object of each kind, sharing its name and
//! namespace. The strategy controller reads their status and rewrites the
//! capacity and traffic specs.

mod capacity_target;
mod installation_target;
mod release;
mod strategy;
mod traffic_target;

pub use capacity_target::{
    CapacityTarget, CapacityTargetSpec, CapacityTargetStatus, ClusterCapacityStatus,
    ClusterCapacityTarget,
};
pub use installation_target::{
    ClusterInstallationStatus, InstallationStatus, InstallationTarget, InstallationTargetSpec,
    InstallationTargetStatus,
};
pub use release::{
    ClusterSelector, EmbeddedChart, EmbeddedShipmentOrder, Release, ReleaseEnvironment,
    ReleasePhase, ReleaseSpec, ReleaseStatus, Sidecar,
};
pub use strategy::{Strategy, StrategySpec, StrategyStep};
pub use traffic_target::{
    ClusterTrafficStatus, ClusterTrafficTarget, TrafficTarget, TrafficTargetSpec,
    TrafficTargetStatus,
};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// Every CRD Shipper owns, in installation order
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        Strategy::crd(),
        Release::crd(),
        InstallationTarget::crd(),
        CapacityTarget::crd(),
        TrafficTarget::crd(),
    ]
}
