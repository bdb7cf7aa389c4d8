//! Strategy CRD types
//!
//! A `Strategy` is an ordered list of steps. Each step fixes the capacity and
//! traffic share of both the contender and the incumbent release. Percentages
//! are stored as decimal strings and only parsed when a step is evaluated.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One target configuration a rollout must reach before advancing
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrategyStep {
    /// Capacity share of the incumbent release, in percent
    pub incumbent_capacity: String,
    /// Traffic share of the incumbent release, in percent
    pub incumbent_traffic: String,
    /// Capacity share of the contender release, in percent
    pub contender_capacity: String,
    /// Traffic share of the contender release, in percent
    pub contender_traffic: String,
}

impl StrategyStep {
    /// Build a step from numeric shares
    pub fn new(
        contender_capacity: u32,
        contender_traffic: u32,
        incumbent_capacity: u32,
        incumbent_traffic: u32,
    ) -> Self {
        Self {
            incumbent_capacity: incumbent_capacity.to_string(),
            incumbent_traffic: incumbent_traffic.to_string(),
            contender_capacity: contender_capacity.to_string(),
            contender_traffic: contender_traffic.to_string(),
        }
    }
}

/// Sequence of steps to safely deliver a change to production
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "shipper.booking.com",
    version = "v1",
    kind = "Strategy",
    plural = "strategies",
    namespaced,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StrategySpec {
    /// Ordered rollout steps
    #[serde(default)]
    pub steps: Vec<StrategyStep>,
}

impl Strategy {
    /// Step at `index`, or None when the index is out of range
    pub fn step(&self, index: i32) -> Option<&StrategyStep> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.spec.steps.get(i))
    }

    /// Index of the final step (zero for an empty strategy)
    pub fn last_step_index(&self) -> usize {
        self.spec.steps.len().saturating_sub(1)
    }
}
