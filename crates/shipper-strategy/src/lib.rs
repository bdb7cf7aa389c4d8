//! Strategy execution for Shipper
//!
//! The [`Executor`] decides, for one contender release and its optional
//! incumbent, whether the current strategy step is reached and which patches
//! move the fleet toward it. It is a pure function over a snapshot. The
//! [`controller`] module loads snapshots, runs the executor and applies the
//! patches it returns.

pub mod comparison;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod phase;
pub mod result;
pub mod step;

pub use config::ControllerConfig;
pub use error::{ControllerError, ErrorClass, StrategyError, TargetKind};
pub use executor::{Executor, ReleaseInfo};
pub use result::ExecutorResult;
