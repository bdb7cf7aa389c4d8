//! Strategy executor
//!
//! Given a contender, an optional incumbent and the strategy they follow,
//! decides whether the contender's target step is reached and returns the
//! patches that move the fleet toward it. Gates run in a fixed order and the
//! first unmet gate ends the run:
//!
//! 1. installation of the contender
//! 2. contender capacity, then traffic
//! 3. incumbent traffic, then capacity
//! 4. phase finalization
//!
//! The executor performs no I/O. Running it twice on the same snapshot yields
//! the same patches.

use kube::ResourceExt;
use shipper_common::crd::{CapacityTarget, InstallationTarget, Release, Strategy, TrafficTarget};
use tracing::{debug, info};

use crate::comparison::{check_actor, Achievement, CheckOrder, ComparisonPolicy};
use crate::error::{StrategyError, TargetKind};
use crate::phase;
use crate::result::ExecutorResult;
use crate::step::StepTargets;

/// A release together with its target objects, as read by the driver
#[derive(Clone, Debug)]
pub struct ReleaseInfo {
    pub release: Release,
    pub installation_target: Option<InstallationTarget>,
    pub capacity_target: Option<CapacityTarget>,
    pub traffic_target: Option<TrafficTarget>,
}

impl ReleaseInfo {
    /// Release name
    pub fn name(&self) -> String {
        self.release.name_any()
    }

    fn missing(&self, kind: TargetKind) -> StrategyError {
        StrategyError::MissingTarget {
            release: self.name(),
            kind,
        }
    }

    /// InstallationTarget, or `MissingTarget`
    pub fn installation_target(&self) -> Result<&InstallationTarget, StrategyError> {
        self.installation_target
            .as_ref()
            .ok_or_else(|| self.missing(TargetKind::Installation))
    }

    /// CapacityTarget, or `MissingTarget`
    pub fn capacity_target(&self) -> Result<&CapacityTarget, StrategyError> {
        self.capacity_target
            .as_ref()
            .ok_or_else(|| self.missing(TargetKind::Capacity))
    }

    /// TrafficTarget, or `MissingTarget`
    pub fn traffic_target(&self) -> Result<&TrafficTarget, StrategyError> {
        self.traffic_target
            .as_ref()
            .ok_or_else(|| self.missing(TargetKind::Traffic))
    }
}

/// Runs one strategy step for a contender and its optional incumbent
pub struct Executor<'a> {
    contender: &'a ReleaseInfo,
    incumbent: Option<&'a ReleaseInfo>,
    strategy: &'a Strategy,
}

impl<'a> Executor<'a> {
    pub fn new(
        contender: &'a ReleaseInfo,
        incumbent: Option<&'a ReleaseInfo>,
        strategy: &'a Strategy,
    ) -> Self {
        Self {
            contender,
            incumbent,
            strategy,
        }
    }

    /// Evaluate the contender's target step.
    ///
    /// An empty list means there is nothing to do until some cluster reports
    /// progress. On error no patch is returned.
    pub fn execute(&self) -> Result<Vec<ExecutorResult>, StrategyError> {
        let release = &self.contender.release;
        let key = release_key(release);
        let target_step = release.spec.target_step;

        let step = self
            .strategy
            .step(target_step)
            .ok_or_else(|| StrategyError::OutOfRangeStep {
                release: self.contender.name(),
                strategy: self.strategy.name_any(),
                step: target_step,
                steps: self.strategy.spec.steps.len(),
            })?;
        let index = target_step.unsigned_abs() as usize;
        let targets = StepTargets::parse(&self.contender.name(), index, step)?;

        // Installation
        let installation = self.contender.installation_target()?;
        if installation.status.is_none() {
            return Err(StrategyError::MissingStatus {
                release: self.contender.name(),
                kind: TargetKind::Installation,
            });
        }
        if !installation.is_complete() {
            info!(release = %key, step = index, "installation pending");
            return Ok(Vec::new());
        }
        debug!(release = %key, step = index, "installation finished");

        // Contender
        let contender = check_actor(
            self.contender,
            targets.contender,
            ComparisonPolicy::Ascending,
            CheckOrder::CapacityFirst,
        )?;
        if let Achievement::Pending(patches) = contender {
            info!(release = %key, step = index, patches = patches.len(), "contender not ready");
            return Ok(patches);
        }
        debug!(release = %key, step = index, "contender ready");

        // Incumbent
        match self.incumbent {
            Some(incumbent) => {
                let outcome = check_actor(
                    incumbent,
                    targets.incumbent,
                    ComparisonPolicy::Descending,
                    CheckOrder::TrafficFirst,
                )?;
                if let Achievement::Pending(patches) = outcome {
                    info!(
                        release = %key,
                        incumbent = %incumbent.name(),
                        step = index,
                        patches = patches.len(),
                        "incumbent not ready"
                    );
                    return Ok(patches);
                }
                debug!(release = %key, incumbent = %incumbent.name(), step = index, "incumbent ready");
            }
            None => debug!(release = %key, "no incumbent"),
        }

        // Finalize
        let is_last_step = index == self.strategy.last_step_index();
        let achieved_step = u32::try_from(index).unwrap_or(u32::MAX);
        let patches = phase::finalize(
            release,
            self.incumbent.map(|i| &i.release),
            achieved_step,
            is_last_step,
        );
        info!(
            release = %key,
            step = index,
            last = is_last_step,
            patches = patches.len(),
            "step achieved"
        );
        Ok(patches)
    }
}

/// `namespace/name` of a release
pub fn release_key(release: &Release) -> String {
    match release.namespace() {
        Some(ns) => format!("{}/{}", ns, release.name_any()),
        None => release.name_any(),
    }
}
