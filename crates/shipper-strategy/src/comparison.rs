//! Achievement checks for capacity and traffic
//!
//! Contender and incumbent are checked by the same routine. They differ only
//! in the direction values move ([`ComparisonPolicy`]) and in which
//! sub-resource is looked at first ([`CheckOrder`]).

use shipper_common::crd::{CapacityTarget, TrafficTarget};
use tracing::debug;

use crate::error::{StrategyError, TargetKind};
use crate::executor::ReleaseInfo;
use crate::result::ExecutorResult;
use crate::step::ActorTargets;

/// Direction in which achieved values converge on their target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonPolicy {
    /// Achieved once every cluster is at or above the target (contender)
    Ascending,
    /// Achieved once every cluster is at or below the target (incumbent)
    Descending,
}

impl ComparisonPolicy {
    /// Whether `achieved` satisfies `target`
    pub fn is_achieved(self, achieved: u32, target: u32) -> bool {
        match self {
            Self::Ascending => achieved >= target,
            Self::Descending => achieved <= target,
        }
    }

    /// Combine per-cluster values into the one that decides achievement.
    ///
    /// The worst cluster decides: the minimum when ascending, the maximum
    /// when descending. Returns None for an empty input.
    pub fn aggregate(self, values: impl IntoIterator<Item = u32>) -> Option<u32> {
        let values = values.into_iter();
        match self {
            Self::Ascending => values.min(),
            Self::Descending => values.max(),
        }
    }
}

/// Which sub-resource is checked first
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckOrder {
    /// Capacity, then traffic: pods must run before they get requests
    CapacityFirst,
    /// Traffic, then capacity: requests must drain before pods go away
    TrafficFirst,
}

#[derive(Clone, Copy)]
enum SubResource {
    Capacity,
    Traffic,
}

impl CheckOrder {
    fn sequence(self) -> [SubResource; 2] {
        match self {
            Self::CapacityFirst => [SubResource::Capacity, SubResource::Traffic],
            Self::TrafficFirst => [SubResource::Traffic, SubResource::Capacity],
        }
    }
}

/// Outcome of checking an actor, or one of its sub-resources
#[derive(Clone, Debug, PartialEq)]
pub enum Achievement {
    /// Every cluster reached the step
    Achieved,
    /// Not there yet; the patches (possibly none) move the actor closer
    Pending(Vec<ExecutorResult>),
}

impl Achievement {
    /// True when achieved
    pub fn is_achieved(&self) -> bool {
        matches!(self, Self::Achieved)
    }
}

/// A target object whose spec the executor rewrites and whose status it
/// reads back
trait Converging {
    const KIND: TargetKind;

    fn has_status(&self) -> bool;

    /// Spec cluster names paired with the value each has reported, if any
    fn observed(&self) -> Vec<(&str, Option<u32>)>;

    /// Whether the spec already asks every cluster for `value`
    fn spec_is_at(&self, value: u32) -> bool;

    /// Patch setting every cluster to `value`
    fn retarget(&self, release: &str, value: u32) -> ExecutorResult;
}

impl Converging for CapacityTarget {
    const KIND: TargetKind = TargetKind::Capacity;

    fn has_status(&self) -> bool {
        self.status.is_some()
    }

    fn observed(&self) -> Vec<(&str, Option<u32>)> {
        self.spec
            .clusters
            .iter()
            .map(|c| {
                let achieved = self.status.as_ref().and_then(|s| s.achieved(&c.name));
                (c.name.as_str(), achieved)
            })
            .collect()
    }

    fn spec_is_at(&self, value: u32) -> bool {
        self.spec.is_at(value)
    }

    fn retarget(&self, release: &str, value: u32) -> ExecutorResult {
        ExecutorResult::CapacityTargetSpecUpdate {
            name: release.to_string(),
            spec: self.spec.with_percent(value),
        }
    }
}

impl Converging for TrafficTarget {
    const KIND: TargetKind = TargetKind::Traffic;

    fn has_status(&self) -> bool {
        self.status.is_some()
    }

    fn observed(&self) -> Vec<(&str, Option<u32>)> {
        self.spec
            .clusters
            .iter()
            .map(|c| {
                let achieved = self.status.as_ref().and_then(|s| s.achieved(&c.name));
                (c.name.as_str(), achieved)
            })
            .collect()
    }

    fn spec_is_at(&self, value: u32) -> bool {
        self.spec.is_at(value)
    }

    fn retarget(&self, release: &str, value: u32) -> ExecutorResult {
        ExecutorResult::TrafficTargetSpecUpdate {
            name: release.to_string(),
            spec: self.spec.with_weight(value),
        }
    }
}

/// Check one actor against its step targets.
///
/// Sub-resources are checked in `order`; the first one that is not achieved
/// stops the check and its patch, if any, is returned.
pub fn check_actor(
    info: &ReleaseInfo,
    targets: ActorTargets,
    policy: ComparisonPolicy,
    order: CheckOrder,
) -> Result<Achievement, StrategyError> {
    let release = info.name();

    for sub_resource in order.sequence() {
        let outcome = match sub_resource {
            SubResource::Capacity => {
                check_target(&release, info.capacity_target()?, targets.capacity, policy)?
            }
            SubResource::Traffic => {
                check_target(&release, info.traffic_target()?, targets.traffic, policy)?
            }
        };
        if !outcome.is_achieved() {
            return Ok(outcome);
        }
    }

    Ok(Achievement::Achieved)
}

fn check_target<T: Converging>(
    release: &str,
    target: &T,
    value: u32,
    policy: ComparisonPolicy,
) -> Result<Achievement, StrategyError> {
    if !target.has_status() {
        return Err(StrategyError::MissingStatus {
            release: release.to_string(),
            kind: T::KIND,
        });
    }

    let observed = target.observed();
    let unreported: Vec<&str> = observed
        .iter()
        .filter(|(_, achieved)| achieved.is_none())
        .map(|(name, _)| *name)
        .collect();
    let aggregate = policy.aggregate(observed.iter().filter_map(|(_, achieved)| *achieved));

    let achieved = unreported.is_empty()
        && aggregate.map_or(true, |a| policy.is_achieved(a, value));

    if achieved {
        debug!(release, kind = %T::KIND, target = value, ?aggregate, "achieved");
        return Ok(Achievement::Achieved);
    }

    if target.spec_is_at(value) {
        debug!(
            release,
            kind = %T::KIND,
            target = value,
            ?aggregate,
            ?unreported,
            "spec already targets step, waiting for clusters"
        );
        return Ok(Achievement::Pending(Vec::new()));
    }

    debug!(release, kind = %T::KIND, target = value, ?aggregate, "retargeting");
    Ok(Achievement::Pending(vec![target.retarget(release, value)]))
}
