//! Apps CRD types
//!
//! An `Apps` resource declares one or more named apployments, each an
//! instance of an [`App`] tree deployed alongside the resource.

use std::collections::BTreeMap;

use apploy_model::App;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Phase
// =============================================================================

/// Aggregate phase of an `Apps` resource
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum AppsPhase {
    /// Not reconciled yet
    #[default]
    Pending,
    /// Every apployment applied
    Ready,
    /// At least one apployment failed to compile, apply or clean up
    Degraded,
    /// Cleanup in progress
    Deleting,
}

impl std::fmt::Display for AppsPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Deleting => write!(f, "Deleting"),
        }
    }
}

/// Result of reconciling one apployment
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ApploymentOutcome {
    /// Every manifest was applied
    Applied,
    /// The App tree did not compile
    CompileFailed,
    /// At least one manifest failed to apply
    ApplyFailed,
    /// Shutdown interrupted the apployment
    Cancelled,
    /// Removed from the spec, but its objects could not be deleted
    CleanupFailed,
}

impl ApploymentOutcome {
    /// Whether this outcome degrades the aggregate phase
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Applied)
    }
}

impl std::fmt::Display for ApploymentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Applied => write!(f, "Applied"),
            Self::CompileFailed => write!(f, "CompileFailed"),
            Self::ApplyFailed => write!(f, "ApplyFailed"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::CleanupFailed => write!(f, "CleanupFailed"),
        }
    }
}

// =============================================================================
// Spec
// =============================================================================

/// One App instance declared inside an `Apps` resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApploymentSpec {
    /// Instance name; the map key wins over any value set here
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Namespace of the owning resource; filled by the controller
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Application tree to deploy
    pub app: App,
}

/// Set of apployments managed together
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apploy.dev",
    version = "v1alpha1",
    kind = "Apps",
    plural = "apps",
    shortname = "apl",
    namespaced,
    status = "AppsStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AppsSpec {
    /// Apployments keyed by instance name
    #[serde(default)]
    pub apployments: BTreeMap<String, ApploymentSpec>,
}

// =============================================================================
// Status
// =============================================================================

/// Per-apployment status entry
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApploymentStatus {
    /// How the last reconciliation of this apployment ended
    pub outcome: ApploymentOutcome,

    /// Number of manifests applied
    #[serde(default)]
    pub applied: u32,

    /// Failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Status of an `Apps` resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppsStatus {
    /// Aggregate phase
    #[serde(default)]
    pub phase: AppsPhase,

    /// Generation the status was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Human-readable summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Outcome per apployment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub apployments: BTreeMap<String, ApploymentStatus>,
}

impl AppsStatus {
    /// Build a status from per-apployment outcomes; any failure degrades the phase
    pub fn from_outcomes(
        apployments: BTreeMap<String, ApploymentStatus>,
        observed_generation: Option<i64>,
    ) -> Self {
        let failed: Vec<&str> = apployments
            .iter()
            .filter(|(_, s)| s.outcome.is_failure())
            .map(|(name, _)| name.as_str())
            .collect();
        let (phase, message) = if failed.is_empty() {
            (AppsPhase::Ready, None)
        } else {
            (
                AppsPhase::Degraded,
                Some(format!(
                    "{} of {} apployments failed: {}",
                    failed.len(),
                    apployments.len(),
                    failed.join(", ")
                )),
            )
        };
        Self {
            phase,
            observed_generation,
            message,
            apployments,
        }
    }
}

impl Apps {
    /// True once deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// True if `finalizer` is present
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }
}

// =============================================================================
// Tests
// =============================================================================
