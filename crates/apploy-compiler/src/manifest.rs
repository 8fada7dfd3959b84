//! Compiled manifest types
//!
//! A [`Manifest`] wraps one typed `k8s-openapi` object. Manifests are grouped
//! the way the App tree is: one App-level [`Manifests`] group plus one
//! [`CompManifests`] per component.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Target of one compilation: an apployment, or the App itself for the CLI
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instance {
    /// Instance name
    pub name: String,
    /// Namespace used when nothing in the tree overrides it
    pub namespace: String,
    /// `Apps` resource the instance belongs to; `None` for standalone builds
    pub owner: Option<String>,
}

impl Instance {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            owner: None,
        }
    }

    /// Instance declared by the `Apps` resource `owner`
    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Manifest name prefix: `<owner>-<name>`, or `<name>` without an owner
    pub fn prefix(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{}-{}", owner, self.name),
            None => self.name.clone(),
        }
    }
}

/// Kubernetes kind of a compiled manifest
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ManifestKind {
    ConfigMap,
    Secret,
    ServiceAccount,
    Role,
    ClusterRole,
    RoleBinding,
    ClusterRoleBinding,
    Service,
    Ingress,
    Deployment,
    DaemonSet,
    StatefulSet,
    ReplicaSet,
    Job,
    CronJob,
}

impl ManifestKind {
    /// Every kind the compiler emits
    pub const ALL: &'static [ManifestKind] = &[
        Self::ConfigMap,
        Self::Secret,
        Self::ServiceAccount,
        Self::Role,
        Self::ClusterRole,
        Self::RoleBinding,
        Self::ClusterRoleBinding,
        Self::Service,
        Self::Ingress,
        Self::Deployment,
        Self::DaemonSet,
        Self::StatefulSet,
        Self::ReplicaSet,
        Self::Job,
        Self::CronJob,
    ];

    /// Kubernetes `kind` string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::ServiceAccount => "ServiceAccount",
            Self::Role => "Role",
            Self::ClusterRole => "ClusterRole",
            Self::RoleBinding => "RoleBinding",
            Self::ClusterRoleBinding => "ClusterRoleBinding",
            Self::Service => "Service",
            Self::Ingress => "Ingress",
            Self::Deployment => "Deployment",
            Self::DaemonSet => "DaemonSet",
            Self::StatefulSet => "StatefulSet",
            Self::ReplicaSet => "ReplicaSet",
            Self::Job => "Job",
            Self::CronJob => "CronJob",
        }
    }

    pub fn is_workload(&self) -> bool {
        matches!(
            self,
            Self::Deployment
                | Self::DaemonSet
                | Self::StatefulSet
                | Self::ReplicaSet
                | Self::Job
                | Self::CronJob
        )
    }

    pub fn is_cluster_scoped(&self) -> bool {
        matches!(self, Self::ClusterRole | Self::ClusterRoleBinding)
    }
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete resource object
#[derive(Clone, Debug, PartialEq)]
pub enum Manifest {
    ConfigMap(ConfigMap),
    Secret(Secret),
    ServiceAccount(ServiceAccount),
    Role(Role),
    ClusterRole(ClusterRole),
    RoleBinding(RoleBinding),
    ClusterRoleBinding(ClusterRoleBinding),
    Service(Service),
    Ingress(Ingress),
    Deployment(Deployment),
    DaemonSet(DaemonSet),
    StatefulSet(StatefulSet),
    ReplicaSet(ReplicaSet),
    Job(Job),
    CronJob(CronJob),
}

macro_rules! each_manifest {
    ($value:expr, $m:ident => $body:expr) => {
        match $value {
            Manifest::ConfigMap($m) => $body,
            Manifest::Secret($m) => $body,
            Manifest::ServiceAccount($m) => $body,
            Manifest::Role($m) => $body,
            Manifest::ClusterRole($m) => $body,
            Manifest::RoleBinding($m) => $body,
            Manifest::ClusterRoleBinding($m) => $body,
            Manifest::Service($m) => $body,
            Manifest::Ingress($m) => $body,
            Manifest::Deployment($m) => $body,
            Manifest::DaemonSet($m) => $body,
            Manifest::StatefulSet($m) => $body,
            Manifest::ReplicaSet($m) => $body,
            Manifest::Job($m) => $body,
            Manifest::CronJob($m) => $body,
        }
    };
}

impl Manifest {
    pub fn kind(&self) -> ManifestKind {
        match self {
            Self::ConfigMap(_) => ManifestKind::ConfigMap,
            Self::Secret(_) => ManifestKind::Secret,
            Self::ServiceAccount(_) => ManifestKind::ServiceAccount,
            Self::Role(_) => ManifestKind::Role,
            Self::ClusterRole(_) => ManifestKind::ClusterRole,
            Self::RoleBinding(_) => ManifestKind::RoleBinding,
            Self::ClusterRoleBinding(_) => ManifestKind::ClusterRoleBinding,
            Self::Service(_) => ManifestKind::Service,
            Self::Ingress(_) => ManifestKind::Ingress,
            Self::Deployment(_) => ManifestKind::Deployment,
            Self::DaemonSet(_) => ManifestKind::DaemonSet,
            Self::StatefulSet(_) => ManifestKind::StatefulSet,
            Self::ReplicaSet(_) => ManifestKind::ReplicaSet,
            Self::Job(_) => ManifestKind::Job,
            Self::CronJob(_) => ManifestKind::CronJob,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        each_manifest!(self, m => &m.metadata)
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        each_manifest!(self, m => &mut m.metadata)
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Namespace, `None` for cluster-scoped kinds
    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.metadata().labels.clone().unwrap_or_default()
    }

    /// JSON form including `apiVersion` and `kind`
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        each_manifest!(self, m => serde_json::to_value(m))
    }

    /// YAML form including `apiVersion` and `kind`
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        each_manifest!(self, m => serde_yaml::to_string(m))
    }

    /// Pretty JSON form including `apiVersion` and `kind`
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        each_manifest!(self, m => serde_json::to_string_pretty(m))
    }
}

/// Rendered `Common` resources of one scope
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Manifests {
    pub items: Vec<Manifest>,
}

impl Manifests {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Manifest> {
        self.items.iter()
    }
}

/// Rendered resources of one component
#[derive(Clone, Debug, PartialEq)]
pub struct CompManifests {
    /// Component name
    pub name: String,
    pub common: Manifests,
    pub workload: Manifest,
}

/// Everything compiled from one App for one instance
#[derive(Clone, Debug, PartialEq)]
pub struct AppManifests {
    /// App name
    pub app: String,
    pub instance: Instance,
    /// App-scope common resources
    pub common: Manifests,
    /// Components in declaration order
    pub components: Vec<CompManifests>,
}

impl AppManifests {
    /// Every manifest: app common, then per component common and workload
    pub fn iter(&self) -> impl Iterator<Item = &Manifest> {
        self.common.iter().chain(
            self.components
                .iter()
                .flat_map(|c| c.common.iter().chain(std::iter::once(&c.workload))),
        )
    }

    pub fn len(&self) -> usize {
        self.common.len()
            + self
                .components
                .iter()
                .map(|c| c.common.len() + 1)
                .sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Auxiliary resources, applied before any workload
    pub fn common_layer(&self) -> Vec<&Manifest> {
        self.common
            .iter()
            .chain(self.components.iter().flat_map(|c| c.common.iter()))
            .collect()
    }

    /// Workloads, applied once the common layer succeeded
    pub fn workload_layer(&self) -> Vec<&Manifest> {
        self.components.iter().map(|c| &c.workload).collect()
    }
}
