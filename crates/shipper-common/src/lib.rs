//! Common types for Shipper: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use error::{Error, ErrorList};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group shared by every Shipper CRD
pub const SHIPPER_GROUP: &str = "shipper.booking.com";

/// Label carrying the application a release belongs to
pub const APP_LABEL: &str = "shipper-app";

/// Annotation listing the clusters a release is scheduled on (comma-separated)
pub const RELEASE_CLUSTERS_ANNOTATION: &str = "shipper.booking.com/release.clusters";

/// Annotation carrying the generation of a release within its application
pub const RELEASE_GENERATION_ANNOTATION: &str = "shipper.booking.com/release.generation";
