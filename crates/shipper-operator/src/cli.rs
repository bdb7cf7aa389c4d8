use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use shipper_common::retry::RetryConfig;
use shipper_common::telemetry::LogFormat;
use shipper_strategy::config::{ControllerConfig, DEFAULT_FIELD_MANAGER};

/// Shipper - progressive delivery across many clusters
#[derive(Parser, Debug)]
#[command(name = "shipper", version, about, long_about = None)]
pub struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    pub crd: bool,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormatArg::Json, env = "SHIPPER_LOG_FORMAT", global = true)]
    pub log_format: LogFormatArg,

    /// What to run; defaults to the controller
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the Release controller (default)
    ///
    /// Installs the CRDs, then drives the strategy of every release whose
    /// target objects change.
    Controller(ControllerArgs),
}

/// Log line format
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    /// One JSON object per line
    Json,
    /// Human readable text
    Plain,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Plain => LogFormat::Plain,
        }
    }
}

/// Flags of the `controller` subcommand
#[derive(Parser, Debug, Clone)]
pub struct ControllerArgs {
    /// Path to a kubeconfig; in-cluster config is used when unset
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of the current one
    #[arg(long)]
    pub context: Option<String>,

    /// Only watch releases in this namespace
    #[arg(long, env = "SHIPPER_NAMESPACE")]
    pub namespace: Option<String>,

    /// Do not install CRDs on startup
    #[arg(long)]
    pub skip_crd_install: bool,

    /// Seconds to wait before re-checking a release after applying patches
    #[arg(long, default_value_t = 10, env = "SHIPPER_REQUEUE_AFTER_PROGRESS_SECS")]
    pub requeue_after_progress_secs: u64,

    /// Seconds to wait before retrying a failed reconcile
    #[arg(long, default_value_t = 30, env = "SHIPPER_REQUEUE_AFTER_ERROR_SECS")]
    pub requeue_after_error_secs: u64,

    /// Seconds to wait before retrying after a write conflict
    #[arg(long, default_value_t = 1, env = "SHIPPER_REQUEUE_AFTER_CONFLICT_SECS")]
    pub requeue_after_conflict_secs: u64,

    /// Attempts per read before a reconcile gives up
    #[arg(long, default_value_t = 3, env = "SHIPPER_READ_ATTEMPTS")]
    pub read_attempts: u32,

    /// Field manager recorded on every patch
    #[arg(long, default_value = DEFAULT_FIELD_MANAGER, env = "SHIPPER_FIELD_MANAGER")]
    pub field_manager: String,
}

impl ControllerArgs {
    /// Controller configuration described by these flags
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            requeue_after_progress: Duration::from_secs(self.requeue_after_progress_secs),
            requeue_after_error: Duration::from_secs(self.requeue_after_error_secs),
            requeue_after_conflict: Duration::from_secs(self.requeue_after_conflict_secs),
            field_manager: self.field_manager.clone(),
            retry: RetryConfig::with_max_attempts(self.read_attempts),
        }
    }
}
