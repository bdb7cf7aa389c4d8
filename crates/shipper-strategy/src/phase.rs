//! Release phase finalization
//!
//! Runs once both actors reached the target step. Decides the phase each
//! release should be in and emits a status patch only for releases whose
//! status actually changes.

use kube::ResourceExt;
use shipper_common::crd::{Release, ReleasePhase, ReleaseStatus};
use tracing::warn;

use crate::result::ExecutorResult;

/// Phase of the contender once it reached its target step
pub fn contender_phase(is_last_step: bool) -> ReleasePhase {
    if is_last_step {
        ReleasePhase::Installed
    } else {
        ReleasePhase::WaitingForCommand
    }
}

/// Phase of the incumbent once the contender reached its target step
pub fn incumbent_phase(is_last_step: bool) -> ReleasePhase {
    if is_last_step {
        ReleasePhase::Superseded
    } else {
        ReleasePhase::Installed
    }
}

/// Status patches finalizing `target_step`.
///
/// The contender records the step as achieved, never moving `achieved_step`
/// backwards. The incumbent keeps its own `achieved_step`.
pub fn finalize(
    contender: &Release,
    incumbent: Option<&Release>,
    target_step: u32,
    is_last_step: bool,
) -> Vec<ExecutorResult> {
    let mut patches = Vec::with_capacity(2);

    let current = contender.current_status();
    let desired = ReleaseStatus {
        achieved_step: target_step.max(current.achieved_step),
        phase: contender_phase(is_last_step),
    };
    if let Some(patch) = status_patch(contender, current, desired) {
        patches.push(patch);
    }

    if let Some(incumbent) = incumbent {
        let current = incumbent.current_status();
        let desired = ReleaseStatus {
            achieved_step: current.achieved_step,
            phase: incumbent_phase(is_last_step),
        };
        if let Some(patch) = status_patch(incumbent, current, desired) {
            patches.push(patch);
        }
    }

    patches
}

fn status_patch(
    release: &Release,
    current: ReleaseStatus,
    desired: ReleaseStatus,
) -> Option<ExecutorResult> {
    if current == desired {
        return None;
    }
    if !current.phase.can_transition_to(desired.phase) {
        warn!(
            release = %release.name_any(),
            from = %current.phase,
            to = %desired.phase,
            "unexpected phase transition"
        );
    }
    Some(ExecutorResult::ReleaseStatusUpdate {
        name: release.name_any(),
        status: desired,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipper_common::crd::ReleaseSpec;

    fn release(name: &str, achieved_step: u32, phase: ReleasePhase) -> Release {
        let mut release = Release::new(name, ReleaseSpec::default());
        release.status = Some(ReleaseStatus {
            achieved_step,
            phase,
        });
        release
    }

    #[test]
    fn intermediate_step_waits_for_command() {
        let contender = release("web-2", 0, ReleasePhase::WaitingForStrategy);
        let incumbent = release("web-1", 2, ReleasePhase::Installed);

        let patches = finalize(&contender, Some(&incumbent), 1, false);

        assert_eq!(
            patches,
            vec![ExecutorResult::ReleaseStatusUpdate {
                name: "web-2".to_string(),
                status: ReleaseStatus {
                    achieved_step: 1,
                    phase: ReleasePhase::WaitingForCommand,
                },
            }]
        );
    }

    #[test]
    fn last_step_installs_contender_and_supersedes_incumbent() {
        let contender = release("web-2", 1, ReleasePhase::WaitingForStrategy);
        let incumbent = release("web-1", 2, ReleasePhase::Installed);

        let patches = finalize(&contender, Some(&incumbent), 2, true);

        assert_eq!(
            patches,
            vec![
                ExecutorResult::ReleaseStatusUpdate {
                    name: "web-2".to_string(),
                    status: ReleaseStatus {
                        achieved_step: 2,
                        phase: ReleasePhase::Installed,
                    },
                },
                ExecutorResult::ReleaseStatusUpdate {
                    name: "web-1".to_string(),
                    status: ReleaseStatus {
                        achieved_step: 2,
                        phase: ReleasePhase::Superseded,
                    },
                },
            ]
        );
    }

    #[test]
    fn unchanged_status_is_not_patched() {
        let contender = release("web-2", 2, ReleasePhase::Installed);
        let incumbent = release("web-1", 2, ReleasePhase::Superseded);
        assert!(finalize(&contender, Some(&incumbent), 2, true).is_empty());
    }

    #[test]
    fn achieved_step_never_decreases() {
        // Target step moved back after step 2 was reached
        let contender = release("web-2", 2, ReleasePhase::WaitingForCommand);
        let patches = finalize(&contender, None, 1, false);
        assert!(patches.is_empty());
    }

    #[test]
    fn release_without_status_gets_one() {
        let contender = Release::new("web-1", ReleaseSpec::default());
        let patches = finalize(&contender, None, 0, true);
        assert_eq!(
            patches,
            vec![ExecutorResult::ReleaseStatusUpdate {
                name: "web-1".to_string(),
                status: ReleaseStatus {
                    achieved_step: 0,
                    phase: ReleasePhase::Installed,
                },
            }]
        );
    }
}
