//! Error types for manifest compilation and output

use std::path::PathBuf;

use apploy_model::WorkloadType;
use thiserror::Error;

use crate::manifest::ManifestKind;

/// Structural problems found while compiling an App tree
#[derive(Debug, Error)]
pub enum CompileError {
    /// An entity has an empty name
    #[error("{kind} in {scope} has an empty name")]
    EmptyName { kind: &'static str, scope: String },

    /// Component declared without a workload payload
    #[error("component {component} declares {declared} but has no workload")]
    MissingWorkload {
        component: String,
        declared: WorkloadType,
    },

    /// Component payload kind differs from its declared type
    #[error("component {component} declares {declared} but holds a {found} workload")]
    WorkloadMismatch {
        component: String,
        declared: WorkloadType,
        found: WorkloadType,
    },

    /// Workload without any container
    #[error("workload of component {component} has no containers")]
    NoContainers { component: String },

    /// Container without an image
    #[error("container {container} in component {component} has no image")]
    MissingImage { component: String, container: String },

    /// CronJob without a schedule
    #[error("cronjob of component {component} has no schedule")]
    MissingSchedule { component: String },

    /// Two entities render to the same object
    #[error("duplicate {kind} {name} in namespace {namespace}")]
    DuplicateName {
        kind: ManifestKind,
        namespace: String,
        name: String,
    },

    /// Instance name or namespace is empty
    #[error("instance {field} is empty")]
    InvalidInstance { field: &'static str },
}

/// Manifest serialization failures
#[derive(Debug, Error)]
pub enum CodecError {
    /// No codec registered for the kind
    #[error("no codec registered for {kind}")]
    Unregistered { kind: ManifestKind },

    #[error("yaml encoding failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Filesystem output failures
#[derive(Debug, Error)]
pub enum WriteError {
    /// Output directory does not exist
    #[error("output directory {} does not exist", path.display())]
    MissingDir { path: PathBuf },

    /// I/O failure on a specific path
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl WriteError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
