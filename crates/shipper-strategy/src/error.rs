//! Error types for strategy execution and the Release controller

use std::fmt;

/// Kind of per-release target object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    /// InstallationTarget
    Installation,
    /// CapacityTarget
    Capacity,
    /// TrafficTarget
    Traffic,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installation => write!(f, "InstallationTarget"),
            Self::Capacity => write!(f, "CapacityTarget"),
            Self::Traffic => write!(f, "TrafficTarget"),
        }
    }
}

/// How an executor error should be handled by its caller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// The strategy or release spec is wrong; retrying will not help until
    /// someone edits it
    Configuration,
    /// A snapshot lacked an object or a status; it may appear later
    MissingData,
}

/// Errors returned by the strategy executor.
///
/// Every variant names the contender release so the driver can log it.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StrategyError {
    /// The release targets a step the strategy does not have
    #[error("release {release}: target step {step} is out of range for strategy {strategy} with {steps} steps")]
    OutOfRangeStep {
        release: String,
        strategy: String,
        step: i32,
        steps: usize,
    },

    /// A step field is not a percentage
    #[error("release {release}: strategy step {step} has invalid {field} {value:?}, expected an integer between 0 and 100")]
    InvalidStepValue {
        release: String,
        step: usize,
        field: &'static str,
        value: String,
    },

    /// A target object the executor needs was not supplied
    #[error("release {release}: {kind} not found")]
    MissingTarget { release: String, kind: TargetKind },

    /// A target object exists but nothing has reported status on it yet
    #[error("release {release}: {kind} has no status")]
    MissingStatus { release: String, kind: TargetKind },
}

impl StrategyError {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::OutOfRangeStep { .. } | Self::InvalidStepValue { .. } => {
                ErrorClass::Configuration
            }
            Self::MissingTarget { .. } | Self::MissingStatus { .. } => ErrorClass::MissingData,
        }
    }

    /// Release the error is about
    pub fn release(&self) -> &str {
        match self {
            Self::OutOfRangeStep { release, .. }
            | Self::InvalidStepValue { release, .. }
            | Self::MissingTarget { release, .. }
            | Self::MissingStatus { release, .. } => release,
        }
    }
}

/// Errors returned by the Release controller
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("strategy execution failed: {0}")]
    Strategy(#[from] StrategyError),

    #[error("{0}")]
    Common(#[from] shipper_common::Error),

    #[error("missing namespace on Release")]
    MissingNamespace,

    #[error("strategy {name} not found in namespace {namespace}")]
    StrategyNotFound { namespace: String, name: String },
}

impl ControllerError {
    /// True when a patch lost an optimistic concurrency race
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Common(e) if e.is_conflict())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors() {
        let err = StrategyError::InvalidStepValue {
            release: "web-1".to_string(),
            step: 0,
            field: "contenderCapacity",
            value: "abc".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert_eq!(err.release(), "web-1");
        let msg = err.to_string();
        assert!(msg.contains("contenderCapacity"));
        assert!(msg.contains("\"abc\""));

        let err = StrategyError::OutOfRangeStep {
            release: "web-1".to_string(),
            strategy: "vanguard".to_string(),
            step: 5,
            steps: 3,
        };
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(err.to_string().contains("target step 5"));
    }

    #[test]
    fn missing_data_errors() {
        let err = StrategyError::MissingTarget {
            release: "web-1".to_string(),
            kind: TargetKind::Capacity,
        };
        assert_eq!(err.class(), ErrorClass::MissingData);
        assert_eq!(err.to_string(), "release web-1: CapacityTarget not found");

        let err = StrategyError::MissingStatus {
            release: "web-1".to_string(),
            kind: TargetKind::Installation,
        };
        assert_eq!(err.class(), ErrorClass::MissingData);
        assert_eq!(err.to_string(), "release web-1: InstallationTarget has no status");
    }

    #[test]
    fn conflicts_are_detected_through_common_errors() {
        let err = ControllerError::Common(shipper_common::Error::Kube {
            source: kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "the object has been modified".to_string(),
                reason: "Conflict".to_string(),
                code: 409,
            }),
        });
        assert!(err.is_conflict());
        assert!(!ControllerError::MissingNamespace.is_conflict());
    }
}
