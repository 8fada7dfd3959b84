//! App model tree
//!
//! An `App` holds an ordered set of `Component`s, each wrapping exactly one
//! typed workload, plus `Common` auxiliary resources at both App and Component
//! scope. The tree owns no cluster state; it is compiled into manifests by
//! `apploy-compiler`.

mod auxiliary;
mod workload;

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::args::{dsl_enum, fields, Args, Buildable, Namespace, Operation, OperationTable};
use crate::error::DslError;

pub use auxiliary::{
    ClusterRole, ClusterRoleBinding, ConfigMap, Ingress, PathType, Role, RoleBinding, RoleKind,
    Secret, SecretType, Service, ServiceAccount, ServiceType,
};
pub use workload::{
    CompCronJob, CompDaemonSet, CompDeployment, CompJob, CompReplicaSet, CompStatefulSet,
    CompletionMode, ConcurrencyPolicy, Container, DeploymentStrategy, PodManagementPolicy,
    PodTemplate, PullPolicy, SetUpdateStrategy,
};

/// Name and labels embedded in every model entity
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Base {
    /// Entity name, unique within its parent scope
    pub name: String,

    /// Labels merged into the compiled manifest
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Base {
    /// Base with the given name and no labels
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }
}

dsl_enum! {
    /// Workload kind a component runs
    WorkloadType {
        Deployment => "deployment",
        DaemonSet => "daemonset",
        StatefulSet => "statefulset",
        ReplicaSet => "replicaset",
        Job => "job",
        CronJob => "cronjob",
    }
}

/// Typed workload payload of a component
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Workload {
    Deployment(CompDeployment),
    DaemonSet(CompDaemonSet),
    StatefulSet(CompStatefulSet),
    ReplicaSet(CompReplicaSet),
    Job(CompJob),
    CronJob(CompCronJob),
}

impl Workload {
    /// Kind of the populated payload
    pub fn workload_type(&self) -> WorkloadType {
        match self {
            Self::Deployment(_) => WorkloadType::Deployment,
            Self::DaemonSet(_) => WorkloadType::DaemonSet,
            Self::StatefulSet(_) => WorkloadType::StatefulSet,
            Self::ReplicaSet(_) => WorkloadType::ReplicaSet,
            Self::Job(_) => WorkloadType::Job,
            Self::CronJob(_) => WorkloadType::CronJob,
        }
    }

    /// Name and labels of the payload
    pub fn base(&self) -> &Base {
        match self {
            Self::Deployment(w) => &w.base,
            Self::DaemonSet(w) => &w.base,
            Self::StatefulSet(w) => &w.base,
            Self::ReplicaSet(w) => &w.base,
            Self::Job(w) => &w.base,
            Self::CronJob(w) => &w.base,
        }
    }

    /// Namespace override of the payload
    pub fn default_namespace(&self) -> Option<&str> {
        match self {
            Self::Deployment(w) => w.default_namespace.as_deref(),
            Self::DaemonSet(w) => w.default_namespace.as_deref(),
            Self::StatefulSet(w) => w.default_namespace.as_deref(),
            Self::ReplicaSet(w) => w.default_namespace.as_deref(),
            Self::Job(w) => w.default_namespace.as_deref(),
            Self::CronJob(w) => w.default_namespace.as_deref(),
        }
    }

    /// Pod template shared by all workload kinds
    pub fn template(&self) -> &PodTemplate {
        match self {
            Self::Deployment(w) => &w.template,
            Self::DaemonSet(w) => &w.template,
            Self::StatefulSet(w) => &w.template,
            Self::ReplicaSet(w) => &w.template,
            Self::Job(w) => &w.template,
            Self::CronJob(w) => &w.template,
        }
    }

    /// Mutable pod template
    pub fn template_mut(&mut self) -> &mut PodTemplate {
        match self {
            Self::Deployment(w) => &mut w.template,
            Self::DaemonSet(w) => &mut w.template,
            Self::StatefulSet(w) => &mut w.template,
            Self::ReplicaSet(w) => &mut w.template,
            Self::Job(w) => &mut w.template,
            Self::CronJob(w) => &mut w.template,
        }
    }
}

/// Auxiliary resources shared at App or Component scope
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Common {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_maps: Vec<ConfigMap>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<Secret>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<Service>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<ServiceAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_role: Option<ClusterRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_role_binding: Option<ClusterRoleBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_binding: Option<RoleBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<Ingress>,
}

impl Common {
    /// True when no auxiliary resource is declared
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// One workload unit within an App
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    #[serde(flatten)]
    pub base: Base,

    #[serde(default, rename = "namespace", skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,

    /// Declared workload kind; must match the populated payload
    #[serde(rename = "type")]
    pub workload_type: WorkloadType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<Workload>,

    #[serde(default, skip_serializing_if = "Common::is_empty")]
    pub common: Common,
}

impl Component {
    /// Empty component of the given kind
    pub fn new(name: impl Into<String>, workload_type: WorkloadType) -> Self {
        Self {
            base: Base::named(name),
            default_namespace: None,
            workload_type,
            workload: None,
            common: Common::default(),
        }
    }

    /// Component name
    pub fn name(&self) -> &str {
        &self.base.name
    }
}

const SCOPE_ARGS: &[&str] = &[fields::LABELS, fields::NAMESPACE];
const SCOPE_EXAMPLE: &str = "label1:value1;label2:value2 namespace";

fn scope_operations() -> OperationTable {
    OperationTable::from([(Operation::Relabel, vec![fields::LABELS])])
}

fn apply_scope_args(
    args: &Args<'_>,
    base: &mut Base,
    namespace: &mut Option<String>,
) -> Result<(), DslError> {
    args.merge(0, &mut base.labels)?;
    let mut parsed: Option<Namespace> = None;
    args.assign_opt(1, &mut parsed)?;
    if let Some(Namespace(ns)) = parsed {
        *namespace = Some(ns);
    }
    Ok(())
}

impl Buildable for Component {
    fn type_name(&self) -> &'static str {
        "component"
    }

    fn args(&self) -> &'static [&'static str] {
        SCOPE_ARGS
    }

    fn args_example(&self) -> &'static str {
        SCOPE_EXAMPLE
    }

    fn available_operations(&self) -> OperationTable {
        scope_operations()
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        apply_scope_args(args, &mut self.base, &mut self.default_namespace)
    }
}

/// Top-level declarative application definition
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct App {
    #[serde(flatten)]
    pub base: Base,

    /// Opaque version string
    pub version: String,

    #[serde(default, rename = "namespace", skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,

    /// Components in declaration order; names are unique
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Component>,

    #[serde(default, skip_serializing_if = "Common::is_empty")]
    pub common: Common,
}

impl App {
    /// Empty app with a name and version
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            base: Base::named(name),
            version: version.into(),
            ..Default::default()
        }
    }

    /// App name
    pub fn name(&self) -> &str {
        &self.base.name
    }

    /// Look up a component by name
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name() == name)
    }

    /// Position of a component in declaration order
    pub fn component_index(&self, name: &str) -> Option<usize> {
        self.components.iter().position(|c| c.name() == name)
    }
}

impl Buildable for App {
    fn type_name(&self) -> &'static str {
        "app"
    }

    fn args(&self) -> &'static [&'static str] {
        SCOPE_ARGS
    }

    fn args_example(&self) -> &'static str {
        SCOPE_EXAMPLE
    }

    fn available_operations(&self) -> OperationTable {
        scope_operations()
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        apply_scope_args(args, &mut self.base, &mut self.default_namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_args_set_labels_and_namespace() {
        let mut app = App::new("shop", "1.0.0");
        app.parse_args("team:payments shop-prod").unwrap();
        assert_eq!(app.base.labels["team"], "payments");
        assert_eq!(app.default_namespace.as_deref(), Some("shop-prod"));
    }

    #[test]
    fn invalid_namespace_leaves_labels_untouched() {
        let mut app = App::new("shop", "1.0.0");
        let err = app.parse_args("team:payments Shop_Prod").unwrap_err();
        assert!(matches!(err, DslError::InvalidValue { ref field, .. } if field == "namespace"));
        assert!(app.base.labels.is_empty());
    }

    #[test]
    fn workload_type_tokens_round_trip() {
        for token in WorkloadType::ALL {
            let parsed: WorkloadType = token.parse().unwrap();
            assert_eq!(parsed.as_str(), *token);
        }
        assert!("pod".parse::<WorkloadType>().is_err());
    }

    #[test]
    fn component_deserializes_from_manifest_shape() {
        let json = serde_json::json!({
            "name": "db",
            "type": "statefulset",
            "workload": {
                "statefulSet": { "name": "db", "replicas": 3 }
            }
        });
        let component: Component = serde_json::from_value(json).unwrap();
        assert_eq!(component.workload_type, WorkloadType::StatefulSet);
        let workload = component.workload.unwrap();
        assert_eq!(workload.workload_type(), WorkloadType::StatefulSet);
        assert_eq!(workload.base().name, "db");
    }
}
