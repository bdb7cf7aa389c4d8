//! Numeric view of a strategy step
//!
//! Step fields are stored as strings on the Strategy object. They are parsed
//! once per execution so a malformed value fails the whole run before any
//! patch is computed.

use shipper_common::crd::StrategyStep;

use crate::error::StrategyError;

/// Capacity and traffic share one actor must reach, in percent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActorTargets {
    pub capacity: u32,
    pub traffic: u32,
}

/// Parsed targets of both actors for one step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepTargets {
    pub contender: ActorTargets,
    pub incumbent: ActorTargets,
}

impl StepTargets {
    /// Parse `step`, the step at `index`, on behalf of `release`.
    ///
    /// All four fields are parsed, including the incumbent's. A malformed
    /// incumbent value therefore fails the step even for a release that has
    /// no incumbent, and even while installation is still pending.
    pub fn parse(release: &str, index: usize, step: &StrategyStep) -> Result<Self, StrategyError> {
        let field = |name: &'static str, value: &str| parse_percent(release, index, name, value);

        Ok(Self {
            contender: ActorTargets {
                capacity: field("contenderCapacity", &step.contender_capacity)?,
                traffic: field("contenderTraffic", &step.contender_traffic)?,
            },
            incumbent: ActorTargets {
                capacity: field("incumbentCapacity", &step.incumbent_capacity)?,
                traffic: field("incumbentTraffic", &step.incumbent_traffic)?,
            },
        })
    }
}

fn parse_percent(
    release: &str,
    step: usize,
    field: &'static str,
    value: &str,
) -> Result<u32, StrategyError> {
    value
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|v| *v <= 100)
        .ok_or_else(|| StrategyError::InvalidStepValue {
            release: release.to_string(),
            step,
            field,
            value: value.to_string(),
        })
}
