//! Codec registry for compiled manifests
//!
//! Maps each [`ManifestKind`] to the `ApiResource` used to address it on the
//! cluster and to its scope. The registry is built once and shared by
//! reference with the filesystem writer and the cluster client.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::discovery::ApiResource;

use crate::error::CodecError;
use crate::manifest::{Manifest, ManifestKind};

/// Output encoding
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Yaml,
    Json,
}

impl Format {
    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format '{}', expected yaml or json", other)),
        }
    }
}

/// Cluster addressing for one kind
#[derive(Clone, Debug)]
pub struct Registration {
    pub api_resource: ApiResource,
    pub namespaced: bool,
}

/// Kinds the writer and cluster client know how to handle
#[derive(Clone, Debug, Default)]
pub struct Registry {
    entries: BTreeMap<ManifestKind, Registration>,
}

impl Registry {
    /// Registry with every kind the compiler emits.
    ///
    /// HorizontalPodAutoscaler is left out: no model entity compiles to one.
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register::<ConfigMap>(ManifestKind::ConfigMap, true);
        registry.register::<Secret>(ManifestKind::Secret, true);
        registry.register::<ServiceAccount>(ManifestKind::ServiceAccount, true);
        registry.register::<Role>(ManifestKind::Role, true);
        registry.register::<ClusterRole>(ManifestKind::ClusterRole, false);
        registry.register::<RoleBinding>(ManifestKind::RoleBinding, true);
        registry.register::<ClusterRoleBinding>(ManifestKind::ClusterRoleBinding, false);
        registry.register::<Service>(ManifestKind::Service, true);
        registry.register::<Ingress>(ManifestKind::Ingress, true);
        registry.register::<Deployment>(ManifestKind::Deployment, true);
        registry.register::<DaemonSet>(ManifestKind::DaemonSet, true);
        registry.register::<StatefulSet>(ManifestKind::StatefulSet, true);
        registry.register::<ReplicaSet>(ManifestKind::ReplicaSet, true);
        registry.register::<Job>(ManifestKind::Job, true);
        registry.register::<CronJob>(ManifestKind::CronJob, true);
        registry
    }

    /// Register `K` under `kind`
    pub fn register<K>(&mut self, kind: ManifestKind, namespaced: bool)
    where
        K: kube::Resource<DynamicType = ()>,
    {
        self.entries.insert(
            kind,
            Registration {
                api_resource: ApiResource::erase::<K>(&()),
                namespaced,
            },
        );
    }

    pub fn get(&self, kind: ManifestKind) -> Option<&Registration> {
        self.entries.get(&kind)
    }

    /// Registered kinds in a stable order
    pub fn iter(&self) -> impl Iterator<Item = (ManifestKind, &Registration)> {
        self.entries.iter().map(|(k, r)| (*k, r))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize `manifest`; fails when its kind is not registered
    pub fn encode(&self, manifest: &Manifest, format: Format) -> Result<String, CodecError> {
        let kind = manifest.kind();
        if !self.entries.contains_key(&kind) {
            return Err(CodecError::Unregistered { kind });
        }
        Ok(match format {
            Format::Yaml => manifest.to_yaml()?,
            Format::Json => manifest.to_json_pretty()?,
        })
    }
}
