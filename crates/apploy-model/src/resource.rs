//! Resource kinds a build session can open as a file

use crate::args::{dsl_enum, Args, Buildable, OperationTable};
use crate::error::DslError;
use crate::model::{
    Base, ClusterRole, ClusterRoleBinding, Common, CompCronJob, CompDaemonSet, CompDeployment,
    CompJob, CompReplicaSet, CompStatefulSet, ConfigMap, Container, Ingress, Role, RoleBinding,
    Secret, Service, ServiceAccount, Workload, WorkloadType,
};

dsl_enum! {
    /// Every buildable resource kind below App and Component
    ResourceKind {
        Deployment => "deployment",
        DaemonSet => "daemonset",
        StatefulSet => "statefulset",
        ReplicaSet => "replicaset",
        Job => "job",
        CronJob => "cronjob",
        Container => "container",
        ConfigMap => "configmap",
        Secret => "secret",
        Service => "service",
        ServiceAccount => "serviceaccount",
        ClusterRole => "clusterrole",
        ClusterRoleBinding => "clusterrolebinding",
        Role => "role",
        RoleBinding => "rolebinding",
        Ingress => "ingress",
    }
}

impl ResourceKind {
    /// Workload kind this resource populates, if any
    pub fn workload_type(&self) -> Option<WorkloadType> {
        match self {
            Self::Deployment => Some(WorkloadType::Deployment),
            Self::DaemonSet => Some(WorkloadType::DaemonSet),
            Self::StatefulSet => Some(WorkloadType::StatefulSet),
            Self::ReplicaSet => Some(WorkloadType::ReplicaSet),
            Self::Job => Some(WorkloadType::Job),
            Self::CronJob => Some(WorkloadType::CronJob),
            _ => None,
        }
    }

    pub fn is_workload(&self) -> bool {
        self.workload_type().is_some()
    }

    /// Kinds that only exist inside a component
    pub fn is_component_scoped(&self) -> bool {
        self.is_workload() || *self == Self::Container
    }

    /// Kinds a `Common` group holds at most one of
    pub fn is_singleton(&self) -> bool {
        matches!(
            self,
            Self::ServiceAccount
                | Self::ClusterRole
                | Self::ClusterRoleBinding
                | Self::Role
                | Self::RoleBinding
                | Self::Ingress
        )
    }
}

impl From<WorkloadType> for ResourceKind {
    fn from(t: WorkloadType) -> Self {
        match t {
            WorkloadType::Deployment => Self::Deployment,
            WorkloadType::DaemonSet => Self::DaemonSet,
            WorkloadType::StatefulSet => Self::StatefulSet,
            WorkloadType::ReplicaSet => Self::ReplicaSet,
            WorkloadType::Job => Self::Job,
            WorkloadType::CronJob => Self::CronJob,
        }
    }
}

/// One buildable entity, tagged by kind
#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    Deployment(CompDeployment),
    DaemonSet(CompDaemonSet),
    StatefulSet(CompStatefulSet),
    ReplicaSet(CompReplicaSet),
    Job(CompJob),
    CronJob(CompCronJob),
    Container(Container),
    ConfigMap(ConfigMap),
    Secret(Secret),
    Service(Service),
    ServiceAccount(ServiceAccount),
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
    Role(Role),
    RoleBinding(RoleBinding),
    Ingress(Ingress),
}

/// Expands `$body` once per variant with `$r` bound to the payload
macro_rules! each_resource {
    ($value:expr, $r:ident => $body:expr) => {
        match $value {
            Resource::Deployment($r) => $body,
            Resource::DaemonSet($r) => $body,
            Resource::StatefulSet($r) => $body,
            Resource::ReplicaSet($r) => $body,
            Resource::Job($r) => $body,
            Resource::CronJob($r) => $body,
            Resource::Container($r) => $body,
            Resource::ConfigMap($r) => $body,
            Resource::Secret($r) => $body,
            Resource::Service($r) => $body,
            Resource::ServiceAccount($r) => $body,
            Resource::ClusterRole($r) => $body,
            Resource::ClusterRoleBinding($r) => $body,
            Resource::Role($r) => $body,
            Resource::RoleBinding($r) => $body,
            Resource::Ingress($r) => $body,
        }
    };
}

impl Resource {
    /// Empty entity of `kind` with the given name
    pub fn new(kind: ResourceKind, name: &str) -> Self {
        let base = Base::named(name);
        match kind {
            ResourceKind::Deployment => Self::Deployment(CompDeployment {
                base,
                ..Default::default()
            }),
            ResourceKind::DaemonSet => Self::DaemonSet(CompDaemonSet {
                base,
                ..Default::default()
            }),
            ResourceKind::StatefulSet => Self::StatefulSet(CompStatefulSet {
                base,
                ..Default::default()
            }),
            ResourceKind::ReplicaSet => Self::ReplicaSet(CompReplicaSet {
                base,
                ..Default::default()
            }),
            ResourceKind::Job => Self::Job(CompJob {
                base,
                ..Default::default()
            }),
            ResourceKind::CronJob => Self::CronJob(CompCronJob {
                base,
                ..Default::default()
            }),
            ResourceKind::Container => Self::Container(Container::named(name)),
            ResourceKind::ConfigMap => Self::ConfigMap(ConfigMap {
                base,
                ..Default::default()
            }),
            ResourceKind::Secret => Self::Secret(Secret {
                base,
                ..Default::default()
            }),
            ResourceKind::Service => Self::Service(Service {
                base,
                ..Default::default()
            }),
            ResourceKind::ServiceAccount => Self::ServiceAccount(ServiceAccount {
                base,
                ..Default::default()
            }),
            ResourceKind::ClusterRole => Self::ClusterRole(ClusterRole {
                base,
                ..Default::default()
            }),
            ResourceKind::ClusterRoleBinding => Self::ClusterRoleBinding(ClusterRoleBinding {
                base,
                ..Default::default()
            }),
            ResourceKind::Role => Self::Role(Role {
                base,
                ..Default::default()
            }),
            ResourceKind::RoleBinding => Self::RoleBinding(RoleBinding {
                base,
                ..Default::default()
            }),
            ResourceKind::Ingress => Self::Ingress(Ingress {
                base,
                ..Default::default()
            }),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Deployment(_) => ResourceKind::Deployment,
            Self::DaemonSet(_) => ResourceKind::DaemonSet,
            Self::StatefulSet(_) => ResourceKind::StatefulSet,
            Self::ReplicaSet(_) => ResourceKind::ReplicaSet,
            Self::Job(_) => ResourceKind::Job,
            Self::CronJob(_) => ResourceKind::CronJob,
            Self::Container(_) => ResourceKind::Container,
            Self::ConfigMap(_) => ResourceKind::ConfigMap,
            Self::Secret(_) => ResourceKind::Secret,
            Self::Service(_) => ResourceKind::Service,
            Self::ServiceAccount(_) => ResourceKind::ServiceAccount,
            Self::ClusterRole(_) => ResourceKind::ClusterRole,
            Self::ClusterRoleBinding(_) => ResourceKind::ClusterRoleBinding,
            Self::Role(_) => ResourceKind::Role,
            Self::RoleBinding(_) => ResourceKind::RoleBinding,
            Self::Ingress(_) => ResourceKind::Ingress,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Container(c) => &c.name,
            other => base_of(other).map(|b| b.name.as_str()).unwrap_or_default(),
        }
    }

    /// Wrap a component's workload payload
    pub fn from_workload(workload: Workload) -> Self {
        match workload {
            Workload::Deployment(w) => Self::Deployment(w),
            Workload::DaemonSet(w) => Self::DaemonSet(w),
            Workload::StatefulSet(w) => Self::StatefulSet(w),
            Workload::ReplicaSet(w) => Self::ReplicaSet(w),
            Workload::Job(w) => Self::Job(w),
            Workload::CronJob(w) => Self::CronJob(w),
        }
    }

    /// Unwrap into a workload payload, or give the resource back
    pub fn into_workload(self) -> Result<Workload, Self> {
        match self {
            Self::Deployment(w) => Ok(Workload::Deployment(w)),
            Self::DaemonSet(w) => Ok(Workload::DaemonSet(w)),
            Self::StatefulSet(w) => Ok(Workload::StatefulSet(w)),
            Self::ReplicaSet(w) => Ok(Workload::ReplicaSet(w)),
            Self::Job(w) => Ok(Workload::Job(w)),
            Self::CronJob(w) => Ok(Workload::CronJob(w)),
            other => Err(other),
        }
    }
}

fn base_of(resource: &Resource) -> Option<&Base> {
    match resource {
        Resource::Deployment(r) => Some(&r.base),
        Resource::DaemonSet(r) => Some(&r.base),
        Resource::StatefulSet(r) => Some(&r.base),
        Resource::ReplicaSet(r) => Some(&r.base),
        Resource::Job(r) => Some(&r.base),
        Resource::CronJob(r) => Some(&r.base),
        Resource::Container(_) => None,
        Resource::ConfigMap(r) => Some(&r.base),
        Resource::Secret(r) => Some(&r.base),
        Resource::Service(r) => Some(&r.base),
        Resource::ServiceAccount(r) => Some(&r.base),
        Resource::ClusterRole(r) => Some(&r.base),
        Resource::ClusterRoleBinding(r) => Some(&r.base),
        Resource::Role(r) => Some(&r.base),
        Resource::RoleBinding(r) => Some(&r.base),
        Resource::Ingress(r) => Some(&r.base),
    }
}

impl Buildable for Resource {
    fn type_name(&self) -> &'static str {
        each_resource!(self, r => r.type_name())
    }

    fn args(&self) -> &'static [&'static str] {
        each_resource!(self, r => r.args())
    }

    fn args_example(&self) -> &'static str {
        each_resource!(self, r => r.args_example())
    }

    fn available_operations(&self) -> OperationTable {
        each_resource!(self, r => r.available_operations())
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        each_resource!(self, r => r.apply_args(args))
    }
}

fn upsert<T>(items: &mut Vec<T>, item: T, name: impl Fn(&T) -> &str) {
    let key = name(&item).to_string();
    match items.iter().position(|i| name(i) == key) {
        Some(idx) => items[idx] = item,
        None => items.push(item),
    }
}

impl Common {
    /// Name held by a singleton slot
    pub fn occupant(&self, kind: ResourceKind) -> Option<&str> {
        let base = match kind {
            ResourceKind::ServiceAccount => self.service_account.as_ref().map(|r| &r.base),
            ResourceKind::ClusterRole => self.cluster_role.as_ref().map(|r| &r.base),
            ResourceKind::ClusterRoleBinding => {
                self.cluster_role_binding.as_ref().map(|r| &r.base)
            }
            ResourceKind::Role => self.role.as_ref().map(|r| &r.base),
            ResourceKind::RoleBinding => self.role_binding.as_ref().map(|r| &r.base),
            ResourceKind::Ingress => self.ingress.as_ref().map(|r| &r.base),
            _ => None,
        };
        base.map(|b| b.name.as_str())
    }

    /// Copy of the auxiliary entity `(kind, name)`, if present
    pub fn get(&self, kind: ResourceKind, name: &str) -> Option<Resource> {
        fn named<T: Clone>(items: &[T], name: &str, base: impl Fn(&T) -> &Base) -> Option<T> {
            items.iter().find(|i| base(i).name == name).cloned()
        }
        fn slot<T: Clone>(item: &Option<T>, name: &str, base: impl Fn(&T) -> &Base) -> Option<T> {
            item.as_ref().filter(|i| base(i).name == name).cloned()
        }

        match kind {
            ResourceKind::ConfigMap => {
                named(&self.config_maps, name, |r| &r.base).map(Resource::ConfigMap)
            }
            ResourceKind::Secret => named(&self.secrets, name, |r| &r.base).map(Resource::Secret),
            ResourceKind::Service => {
                named(&self.services, name, |r| &r.base).map(Resource::Service)
            }
            ResourceKind::ServiceAccount => {
                slot(&self.service_account, name, |r| &r.base).map(Resource::ServiceAccount)
            }
            ResourceKind::ClusterRole => {
                slot(&self.cluster_role, name, |r| &r.base).map(Resource::ClusterRole)
            }
            ResourceKind::ClusterRoleBinding => {
                slot(&self.cluster_role_binding, name, |r| &r.base)
                    .map(Resource::ClusterRoleBinding)
            }
            ResourceKind::Role => slot(&self.role, name, |r| &r.base).map(Resource::Role),
            ResourceKind::RoleBinding => {
                slot(&self.role_binding, name, |r| &r.base).map(Resource::RoleBinding)
            }
            ResourceKind::Ingress => slot(&self.ingress, name, |r| &r.base).map(Resource::Ingress),
            _ => None,
        }
    }

    /// Insert or replace an auxiliary entity. Component-scoped kinds are
    /// handed back unchanged.
    pub fn put(&mut self, resource: Resource) -> Result<(), Resource> {
        match resource {
            Resource::ConfigMap(r) => upsert(&mut self.config_maps, r, |i| i.base.name.as_str()),
            Resource::Secret(r) => upsert(&mut self.secrets, r, |i| i.base.name.as_str()),
            Resource::Service(r) => upsert(&mut self.services, r, |i| i.base.name.as_str()),
            Resource::ServiceAccount(r) => self.service_account = Some(r),
            Resource::ClusterRole(r) => self.cluster_role = Some(r),
            Resource::ClusterRoleBinding(r) => self.cluster_role_binding = Some(r),
            Resource::Role(r) => self.role = Some(r),
            Resource::RoleBinding(r) => self.role_binding = Some(r),
            Resource::Ingress(r) => self.ingress = Some(r),
            other => return Err(other),
        }
        Ok(())
    }
}
