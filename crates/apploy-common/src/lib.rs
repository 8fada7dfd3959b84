//! Common types for apploy: the Apps CRD, errors, label selectors and telemetry

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod labels;
pub mod telemetry;

pub use error::Error;
pub use labels::LabelSelector;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Finalizer that gates deletion of an `Apps` resource on cleanup
pub const FINALIZER: &str = "apps.apploy.dev/finalizer";

/// Default field manager for server-side apply
pub const DEFAULT_FIELD_MANAGER: &str = "apploy-controller";

/// Standard Kubernetes label for the managing tool
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] on every manifest apploy emits
pub const LABEL_MANAGED_BY_APPLOY: &str = "apploy";

/// Standard Kubernetes label naming the app instance (the apployment)
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";

/// Namespace of the owning `Apps` resource, disambiguating instances across namespaces
pub const LABEL_INSTANCE_NAMESPACE: &str = "apploy.dev/instance-namespace";

/// Name of the `Apps` resource that owns an instance
pub const LABEL_OWNER: &str = "apploy.dev/owner";

/// Standard Kubernetes label naming the application
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Standard Kubernetes label carrying the application version
pub const LABEL_VERSION: &str = "app.kubernetes.io/version";

/// Standard Kubernetes label naming the component within an application
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
