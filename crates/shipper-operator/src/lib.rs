//! Shipper operator: installs the Shipper CRDs and runs the Release controller

#![deny(missing_docs)]

/// Command line interface
pub mod cli;
/// Controller construction
pub mod controller_runner;
/// CRD rendering and installation
pub mod crds;
