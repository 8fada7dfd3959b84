//! Operator configuration
//!
//! Every setting has a command-line flag and an environment variable
//! fallback. [`OperatorConfig::validate`] runs before the controller starts.

use std::path::PathBuf;
use std::time::Duration;

use apploy_common::telemetry::LogFormat;
use apploy_common::{Error, DEFAULT_FIELD_MANAGER};

/// Command-line and environment configuration for the operator
#[derive(Clone, Debug, clap::Args)]
pub struct OperatorConfig {
    /// Maximum number of apployments reconciled at the same time
    #[arg(long, env = "APPLOY_CONCURRENCY", default_value_t = 4)]
    pub concurrency: usize,

    /// Requeue interval for healthy resources, in seconds
    #[arg(long, env = "APPLOY_REQUEUE_SECS", default_value_t = 300)]
    pub requeue_secs: u64,

    /// Requeue interval after a failure, in seconds
    #[arg(long, env = "APPLOY_DEGRADED_REQUEUE_SECS", default_value_t = 30)]
    pub degraded_requeue_secs: u64,

    /// Field manager used for server-side apply
    #[arg(long, env = "APPLOY_FIELD_MANAGER", default_value = DEFAULT_FIELD_MANAGER)]
    pub field_manager: String,

    /// Log output format
    #[arg(long, env = "APPLOY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Path to a kubeconfig file; in-cluster or default config otherwise
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,
}

impl OperatorConfig {
    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.concurrency == 0 {
            return Err(Error::validation_for_field(
                "operator config",
                "concurrency",
                "--concurrency must be at least 1",
            ));
        }
        if self.requeue_secs == 0 {
            return Err(Error::validation_for_field(
                "operator config",
                "requeue-secs",
                "--requeue-secs must be greater than zero",
            ));
        }
        if self.degraded_requeue_secs == 0 {
            return Err(Error::validation_for_field(
                "operator config",
                "degraded-requeue-secs",
                "--degraded-requeue-secs must be greater than zero",
            ));
        }
        if self.field_manager.trim().is_empty() {
            return Err(Error::validation_for_field(
                "operator config",
                "field-manager",
                "--field-manager must not be empty",
            ));
        }
        Ok(())
    }

    /// Settings the reconciler needs at runtime
    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            concurrency: self.concurrency,
            requeue: Duration::from_secs(self.requeue_secs),
            degraded_requeue: Duration::from_secs(self.degraded_requeue_secs),
        }
    }
}

/// Reconciler settings carried in the controller context
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Maximum apployments in flight
    pub concurrency: usize,
    /// Requeue after a fully applied reconciliation
    pub requeue: Duration,
    /// Requeue after a degraded reconciliation or an error
    pub degraded_requeue: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            requeue: Duration::from_secs(300),
            degraded_requeue: Duration::from_secs(30),
        }
    }
}
