//! App tree to manifest compilation
//!
//! Compilation is pure: the same App and [`Instance`] always produce the same
//! [`AppManifests`]. Every object is named `<instance>-<entity>` and carries
//! the instance labels returned by [`selector`], so everything one apployment
//! created can be found again with a single label query.
//!
//! References between entities of the same App (an Ingress backend, a
//! binding's role, a binding subject, a pod's service account) are rewritten
//! to the prefixed name. Names that match no entity are left alone so that
//! pre-existing cluster objects such as the `view` ClusterRole stay usable.

use std::collections::{BTreeMap, BTreeSet};

use apploy_common::{
    LabelSelector, LABEL_COMPONENT, LABEL_INSTANCE, LABEL_INSTANCE_NAMESPACE, LABEL_MANAGED_BY,
    LABEL_MANAGED_BY_APPLOY, LABEL_NAME, LABEL_OWNER, LABEL_VERSION,
};
use apploy_model::model::{
    ClusterRole as ClusterRoleEntity, ClusterRoleBinding as ClusterRoleBindingEntity,
    ConfigMap as ConfigMapEntity, Container as ContainerEntity, Ingress as IngressEntity,
    PodTemplate, Role as RoleEntity, RoleBinding as RoleBindingEntity, RoleKind,
    Secret as SecretEntity, Service as ServiceEntity, ServiceAccount as ServiceAccountEntity,
};
use apploy_model::{App, Base, Common, Component, Workload};
use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, DaemonSetUpdateStrategy, Deployment, DeploymentSpec,
    DeploymentStrategy, ReplicaSet, ReplicaSetSpec, StatefulSet, StatefulSetSpec,
    StatefulSetUpdateStrategy,
};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, Job, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Secret, Service,
    ServiceAccount, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector as PodSelector, ObjectMeta,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::debug;

use crate::error::CompileError;
use crate::manifest::{AppManifests, CompManifests, Instance, Manifest, Manifests};

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";
type Labels = BTreeMap<String, String>;

/// Labels that identify every object created for `instance`
pub fn selector(instance: &Instance) -> LabelSelector {
    let selector = LabelSelector::default()
        .with(LABEL_MANAGED_BY, LABEL_MANAGED_BY_APPLOY)
        .with(LABEL_INSTANCE, instance.name.as_str())
        .with(LABEL_INSTANCE_NAMESPACE, instance.namespace.as_str());
    match &instance.owner {
        Some(owner) => selector.with(LABEL_OWNER, owner.as_str()),
        None => selector,
    }
}

/// Instance labels shared by service and pod selectors
fn instance_labels(instance: &Instance, labels: &mut Labels) {
    labels.insert(LABEL_INSTANCE.to_string(), instance.name.clone());
    if let Some(owner) = &instance.owner {
        labels.insert(LABEL_OWNER.to_string(), owner.clone());
    }
}

/// Compile `app` into manifests for `instance`
pub fn compile(app: &App, instance: &Instance) -> Result<AppManifests, CompileError> {
    if instance.name.is_empty() {
        return Err(CompileError::InvalidInstance { field: "name" });
    }
    if instance.namespace.is_empty() {
        return Err(CompileError::InvalidInstance {
            field: "namespace",
        });
    }
    if instance.owner.as_deref() == Some("") {
        return Err(CompileError::InvalidInstance { field: "owner" });
    }
    if app.name().is_empty() {
        return Err(CompileError::EmptyName {
            kind: "app",
            scope: instance.name.clone(),
        });
    }

    let compiler = Compiler::new(app, instance);
    let app_scope = compiler.app_scope();
    let common = compiler.common(&app_scope, &app.common)?;
    let components = app
        .components
        .iter()
        .map(|c| compiler.component(c))
        .collect::<Result<Vec<_>, _>>()?;

    let manifests = AppManifests {
        app: app.name().to_string(),
        instance: instance.clone(),
        common,
        components,
    };
    check_unique(&manifests)?;
    debug!(
        app = %app.name(),
        instance = %instance.name,
        manifests = manifests.len(),
        "compiled app"
    );
    Ok(manifests)
}

fn check_unique(manifests: &AppManifests) -> Result<(), CompileError> {
    let mut seen = BTreeSet::new();
    for m in manifests.iter() {
        let namespace = m.namespace().unwrap_or_default().to_string();
        if !seen.insert((m.kind(), namespace.clone(), m.name().to_string())) {
            return Err(CompileError::DuplicateName {
                kind: m.kind(),
                namespace,
                name: m.name().to_string(),
            });
        }
    }
    Ok(())
}

// =============================================================================
// Scope
// =============================================================================

/// Labels and namespace inherited from the enclosing App or Component
struct Scope<'a> {
    /// Display name for errors
    name: String,
    component: Option<&'a str>,
    user_labels: Labels,
    namespace: String,
}

/// Names of App entities that other entities may refer to
#[derive(Default)]
struct Entities {
    services: BTreeSet<String>,
    roles: BTreeSet<String>,
    cluster_roles: BTreeSet<String>,
    /// Service account name to its resolved namespace
    service_accounts: BTreeMap<String, String>,
}

struct Compiler<'a> {
    app: &'a App,
    instance: &'a Instance,
    entities: Entities,
}

impl<'a> Compiler<'a> {
    fn new(app: &'a App, instance: &'a Instance) -> Self {
        let mut compiler = Self {
            app,
            instance,
            entities: Entities::default(),
        };
        let mut entities = Entities::default();
        let app_scope = compiler.app_scope();
        collect(&mut entities, &app_scope, &app.common);
        for component in &app.components {
            let scope = compiler.component_scope(component);
            collect(&mut entities, &scope, &component.common);
        }
        compiler.entities = entities;
        compiler
    }

    fn app_scope(&self) -> Scope<'a> {
        Scope {
            name: format!("app {}", self.app.name()),
            component: None,
            user_labels: self.app.base.labels.clone(),
            namespace: self
                .app
                .default_namespace
                .clone()
                .unwrap_or_else(|| self.instance.namespace.clone()),
        }
    }

    fn component_scope(&self, component: &'a Component) -> Scope<'a> {
        let mut user_labels = self.app.base.labels.clone();
        user_labels.extend(component.base.labels.clone());
        Scope {
            name: format!("component {}", component.name()),
            component: Some(component.name()),
            user_labels,
            namespace: component
                .default_namespace
                .clone()
                .or_else(|| self.app.default_namespace.clone())
                .unwrap_or_else(|| self.instance.namespace.clone()),
        }
    }

    fn prefixed(&self, name: &str) -> String {
        format!("{}-{}", self.instance.prefix(), name)
    }

    /// Prefix `name` only if it names an entity of this App
    fn reference(&self, known: &BTreeSet<String>, name: &str) -> String {
        if known.contains(name) {
            self.prefixed(name)
        } else {
            name.to_string()
        }
    }

    fn labels(&self, scope: &Scope<'_>, base: &Base) -> Labels {
        let mut labels = scope.user_labels.clone();
        labels.extend(base.labels.clone());
        labels.insert(LABEL_NAME.to_string(), self.app.name().to_string());
        if !self.app.version.is_empty() {
            labels.insert(LABEL_VERSION.to_string(), self.app.version.clone());
        }
        if let Some(component) = scope.component {
            labels.insert(LABEL_COMPONENT.to_string(), component.to_string());
        }
        labels.extend(selector(self.instance).match_labels().clone());
        labels
    }

    fn metadata(
        &self,
        scope: &Scope<'_>,
        kind: &'static str,
        base: &Base,
        namespace: Option<&Option<String>>,
    ) -> Result<ObjectMeta, CompileError> {
        if base.name.is_empty() {
            return Err(CompileError::EmptyName {
                kind,
                scope: scope.name.clone(),
            });
        }
        Ok(ObjectMeta {
            name: Some(self.prefixed(&base.name)),
            namespace: namespace.map(|ns| resolve(ns, scope)),
            labels: Some(self.labels(scope, base)),
            ..Default::default()
        })
    }

    // =========================================================================
    // Common
    // =========================================================================

    fn common(&self, scope: &Scope<'_>, common: &Common) -> Result<Manifests, CompileError> {
        let mut items = Vec::new();
        for cm in &common.config_maps {
            items.push(Manifest::ConfigMap(self.config_map(scope, cm)?));
        }
        for secret in &common.secrets {
            items.push(Manifest::Secret(self.secret(scope, secret)?));
        }
        if let Some(sa) = &common.service_account {
            items.push(Manifest::ServiceAccount(self.service_account(scope, sa)?));
        }
        if let Some(role) = &common.role {
            items.push(Manifest::Role(self.role(scope, role)?));
        }
        if let Some(role) = &common.cluster_role {
            items.push(Manifest::ClusterRole(self.cluster_role(scope, role)?));
        }
        if let Some(binding) = &common.role_binding {
            items.push(Manifest::RoleBinding(self.role_binding(scope, binding)?));
        }
        if let Some(binding) = &common.cluster_role_binding {
            items.push(Manifest::ClusterRoleBinding(
                self.cluster_role_binding(scope, binding)?,
            ));
        }
        for service in &common.services {
            items.push(Manifest::Service(self.service(scope, service)?));
        }
        if let Some(ingress) = &common.ingress {
            items.push(Manifest::Ingress(self.ingress(scope, ingress)?));
        }
        Ok(Manifests { items })
    }

    fn config_map(&self, scope: &Scope<'_>, cm: &ConfigMapEntity) -> Result<ConfigMap, CompileError> {
        Ok(ConfigMap {
            metadata: self.metadata(scope, "configmap", &cm.base, Some(&cm.default_namespace))?,
            data: non_empty(cm.data.clone()),
            ..Default::default()
        })
    }

    fn secret(&self, scope: &Scope<'_>, secret: &SecretEntity) -> Result<Secret, CompileError> {
        Ok(Secret {
            metadata: self.metadata(
                scope,
                "secret",
                &secret.base,
                Some(&secret.default_namespace),
            )?,
            type_: Some(secret.secret_type.to_string()),
            string_data: non_empty(secret.string_data.clone()),
            ..Default::default()
        })
    }

    fn service_account(
        &self,
        scope: &Scope<'_>,
        sa: &ServiceAccountEntity,
    ) -> Result<ServiceAccount, CompileError> {
        Ok(ServiceAccount {
            metadata: self.metadata(
                scope,
                "serviceaccount",
                &sa.base,
                Some(&sa.default_namespace),
            )?,
            automount_service_account_token: sa.automount_token,
            ..Default::default()
        })
    }

    fn role(&self, scope: &Scope<'_>, role: &RoleEntity) -> Result<Role, CompileError> {
        Ok(Role {
            metadata: self.metadata(scope, "role", &role.base, Some(&role.default_namespace))?,
            rules: Some(policy_rules(&role.rules)),
            ..Default::default()
        })
    }

    fn cluster_role(
        &self,
        scope: &Scope<'_>,
        role: &ClusterRoleEntity,
    ) -> Result<ClusterRole, CompileError> {
        Ok(ClusterRole {
            metadata: self.metadata(scope, "clusterrole", &role.base, None)?,
            rules: Some(policy_rules(&role.rules)),
            ..Default::default()
        })
    }

    fn role_binding(
        &self,
        scope: &Scope<'_>,
        binding: &RoleBindingEntity,
    ) -> Result<RoleBinding, CompileError> {
        let known = match binding.role_kind {
            RoleKind::Role => &self.entities.roles,
            RoleKind::ClusterRole => &self.entities.cluster_roles,
        };
        Ok(RoleBinding {
            metadata: self.metadata(
                scope,
                "rolebinding",
                &binding.base,
                Some(&binding.default_namespace),
            )?,
            role_ref: RoleRef {
                api_group: RBAC_GROUP.to_string(),
                kind: binding.role_kind.to_string(),
                name: self.reference(known, &binding.role_name),
            },
            subjects: Some(self.subjects(&binding.subjects)),
            ..Default::default()
        })
    }

    fn cluster_role_binding(
        &self,
        scope: &Scope<'_>,
        binding: &ClusterRoleBindingEntity,
    ) -> Result<ClusterRoleBinding, CompileError> {
        Ok(ClusterRoleBinding {
            metadata: self.metadata(scope, "clusterrolebinding", &binding.base, None)?,
            role_ref: RoleRef {
                api_group: RBAC_GROUP.to_string(),
                kind: "ClusterRole".to_string(),
                name: self.reference(&self.entities.cluster_roles, &binding.role_name),
            },
            subjects: Some(self.subjects(&binding.subjects)),
            ..Default::default()
        })
    }

    /// Service account subjects; App accounts resolve to their rendered name and namespace
    fn subjects(&self, subjects: &BTreeMap<String, String>) -> Vec<Subject> {
        subjects
            .iter()
            .map(|(account, namespace)| {
                let (name, namespace) = match self.entities.service_accounts.get(account) {
                    Some(resolved) => (self.prefixed(account), resolved.clone()),
                    None => (account.clone(), namespace.clone()),
                };
                Subject {
                    kind: "ServiceAccount".to_string(),
                    name,
                    namespace: Some(namespace),
                    ..Default::default()
                }
            })
            .collect()
    }

    fn service(&self, scope: &Scope<'_>, service: &ServiceEntity) -> Result<Service, CompileError> {
        let mut selector = service.selector.clone();
        instance_labels(self.instance, &mut selector);
        if let Some(component) = scope.component {
            selector.insert(LABEL_COMPONENT.to_string(), component.to_string());
        }
        let ports: Vec<ServicePort> = service
            .ports
            .iter()
            .map(|(name, port)| ServicePort {
                name: Some(name.clone()),
                port: *port,
                target_port: Some(IntOrString::Int(*port)),
                ..Default::default()
            })
            .collect();
        Ok(Service {
            metadata: self.metadata(
                scope,
                "service",
                &service.base,
                Some(&service.default_namespace),
            )?,
            spec: Some(ServiceSpec {
                selector: Some(selector),
                type_: Some(service.service_type.to_string()),
                ports: (!ports.is_empty()).then_some(ports),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn ingress(&self, scope: &Scope<'_>, ingress: &IngressEntity) -> Result<Ingress, CompileError> {
        let paths: Vec<HTTPIngressPath> = ingress
            .paths
            .iter()
            .map(|(path, service)| HTTPIngressPath {
                path: Some(path.clone()),
                path_type: ingress.path_type.to_string(),
                backend: IngressBackend {
                    service: Some(IngressServiceBackend {
                        name: self.reference(&self.entities.services, service),
                        port: Some(ServiceBackendPort {
                            number: Some(ingress.service_port),
                            ..Default::default()
                        }),
                    }),
                    ..Default::default()
                },
            })
            .collect();
        let rules = (!paths.is_empty()).then(|| {
            vec![IngressRule {
                host: ingress.host.clone(),
                http: Some(HTTPIngressRuleValue { paths }),
            }]
        });
        Ok(Ingress {
            metadata: self.metadata(
                scope,
                "ingress",
                &ingress.base,
                Some(&ingress.default_namespace),
            )?,
            spec: Some(IngressSpec {
                ingress_class_name: ingress.class_name.clone(),
                rules,
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    // =========================================================================
    // Components
    // =========================================================================

    fn component(&self, component: &'a Component) -> Result<CompManifests, CompileError> {
        if component.name().is_empty() {
            return Err(CompileError::EmptyName {
                kind: "component",
                scope: format!("app {}", self.app.name()),
            });
        }
        let workload = component
            .workload
            .as_ref()
            .ok_or_else(|| CompileError::MissingWorkload {
                component: component.name().to_string(),
                declared: component.workload_type,
            })?;
        if workload.workload_type() != component.workload_type {
            return Err(CompileError::WorkloadMismatch {
                component: component.name().to_string(),
                declared: component.workload_type,
                found: workload.workload_type(),
            });
        }

        let scope = self.component_scope(component);
        let common = self.common(&scope, &component.common)?;
        let workload = self.workload(&scope, component, workload)?;
        Ok(CompManifests {
            name: component.name().to_string(),
            common,
            workload,
        })
    }

    fn workload(
        &self,
        scope: &Scope<'_>,
        component: &Component,
        workload: &Workload,
    ) -> Result<Manifest, CompileError> {
        let metadata = self.metadata(
            scope,
            workload.workload_type().as_str(),
            workload.base(),
            Some(&workload.default_namespace().map(str::to_string)),
        )?;

        let user_selector = match workload {
            Workload::Deployment(w) => w.selector.clone(),
            Workload::DaemonSet(w) => w.selector.clone(),
            Workload::StatefulSet(w) => w.selector.clone(),
            Workload::ReplicaSet(w) => w.selector.clone(),
            Workload::Job(_) | Workload::CronJob(_) => Labels::new(),
        };
        let mut selector_labels = user_selector;
        instance_labels(self.instance, &mut selector_labels);
        selector_labels.insert(LABEL_COMPONENT.to_string(), component.name().to_string());

        let mut pod_labels = metadata.labels.clone().unwrap_or_default();
        pod_labels.extend(selector_labels.clone());

        let restart_never = matches!(workload, Workload::Job(_) | Workload::CronJob(_));
        let template = self.pod_template(component, workload.template(), pod_labels, restart_never)?;
        let pod_selector = PodSelector {
            match_labels: Some(selector_labels),
            ..Default::default()
        };

        let manifest = match workload {
            Workload::Deployment(w) => Manifest::Deployment(Deployment {
                metadata,
                spec: Some(DeploymentSpec {
                    replicas: Some(w.replicas),
                    selector: pod_selector,
                    template,
                    strategy: Some(DeploymentStrategy {
                        type_: Some(w.strategy.to_string()),
                        ..Default::default()
                    }),
                    min_ready_seconds: Some(w.min_ready_seconds),
                    revision_history_limit: w.revision_history_limit,
                    progress_deadline_seconds: w.progress_deadline_seconds,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            Workload::DaemonSet(w) => Manifest::DaemonSet(DaemonSet {
                metadata,
                spec: Some(DaemonSetSpec {
                    selector: pod_selector,
                    template,
                    update_strategy: Some(DaemonSetUpdateStrategy {
                        type_: Some(w.update_strategy.to_string()),
                        ..Default::default()
                    }),
                    min_ready_seconds: Some(w.min_ready_seconds),
                    revision_history_limit: w.revision_history_limit,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            Workload::StatefulSet(w) => Manifest::StatefulSet(StatefulSet {
                metadata,
                spec: Some(StatefulSetSpec {
                    replicas: Some(w.replicas),
                    selector: pod_selector,
                    template,
                    update_strategy: Some(StatefulSetUpdateStrategy {
                        type_: Some(w.update_strategy.to_string()),
                        ..Default::default()
                    }),
                    pod_management_policy: Some(w.pod_management_policy.to_string()),
                    min_ready_seconds: Some(w.min_ready_seconds),
                    revision_history_limit: w.revision_history_limit,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            Workload::ReplicaSet(w) => Manifest::ReplicaSet(ReplicaSet {
                metadata,
                spec: Some(ReplicaSetSpec {
                    replicas: Some(w.replicas),
                    selector: pod_selector,
                    template: Some(template),
                    min_ready_seconds: Some(w.min_ready_seconds),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            Workload::Job(w) => Manifest::Job(Job {
                metadata,
                spec: Some(JobSpec {
                    template,
                    parallelism: w.parallelism,
                    completions: w.completions,
                    backoff_limit: w.backoff_limit,
                    active_deadline_seconds: w.active_deadline_seconds,
                    completion_mode: Some(w.completion_mode.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            Workload::CronJob(w) => {
                if w.schedule.is_empty() {
                    return Err(CompileError::MissingSchedule {
                        component: component.name().to_string(),
                    });
                }
                Manifest::CronJob(CronJob {
                    metadata: metadata.clone(),
                    spec: Some(CronJobSpec {
                        schedule: w.schedule.clone(),
                        concurrency_policy: Some(w.concurrency_policy.to_string()),
                        suspend: Some(w.suspend),
                        successful_jobs_history_limit: w.successful_jobs_history_limit,
                        failed_jobs_history_limit: w.failed_jobs_history_limit,
                        job_template: JobTemplateSpec {
                            metadata: Some(ObjectMeta {
                                labels: metadata.labels.clone(),
                                ..Default::default()
                            }),
                            spec: Some(JobSpec {
                                template,
                                ..Default::default()
                            }),
                        },
                        ..Default::default()
                    }),
                    ..Default::default()
                })
            }
        };
        Ok(manifest)
    }

    fn pod_template(
        &self,
        component: &Component,
        template: &PodTemplate,
        labels: Labels,
        restart_never: bool,
    ) -> Result<PodTemplateSpec, CompileError> {
        if template.containers.is_empty() {
            return Err(CompileError::NoContainers {
                component: component.name().to_string(),
            });
        }
        let containers = template
            .containers
            .iter()
            .map(|c| container(component, c))
            .collect::<Result<Vec<_>, _>>()?;

        // Component account first, then the App-wide one
        let service_account_name = component
            .common
            .service_account
            .as_ref()
            .or(self.app.common.service_account.as_ref())
            .map(|sa| self.prefixed(&sa.base.name));

        Ok(PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers,
                service_account_name,
                restart_policy: restart_never.then(|| "Never".to_string()),
                ..Default::default()
            }),
        })
    }
}

fn container(component: &Component, c: &ContainerEntity) -> Result<Container, CompileError> {
    if c.name.is_empty() {
        return Err(CompileError::EmptyName {
            kind: "container",
            scope: format!("component {}", component.name()),
        });
    }
    if c.image.is_empty() {
        return Err(CompileError::MissingImage {
            component: component.name().to_string(),
            container: c.name.clone(),
        });
    }
    let ports: Vec<ContainerPort> = c
        .ports
        .iter()
        .map(|(name, port)| ContainerPort {
            name: Some(name.clone()),
            container_port: *port,
            ..Default::default()
        })
        .collect();
    let env: Vec<EnvVar> = c
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();
    Ok(Container {
        name: c.name.clone(),
        image: Some(c.image.clone()),
        image_pull_policy: c.pull_policy.map(|p| p.to_string()),
        ports: (!ports.is_empty()).then_some(ports),
        env: (!env.is_empty()).then_some(env),
        ..Default::default()
    })
}

fn collect(entities: &mut Entities, scope: &Scope<'_>, common: &Common) {
    for service in &common.services {
        entities.services.insert(service.base.name.clone());
    }
    if let Some(role) = &common.role {
        entities.roles.insert(role.base.name.clone());
    }
    if let Some(role) = &common.cluster_role {
        entities.cluster_roles.insert(role.base.name.clone());
    }
    if let Some(sa) = &common.service_account {
        entities
            .service_accounts
            .insert(sa.base.name.clone(), resolve(&sa.default_namespace, scope));
    }
}

fn resolve(namespace: &Option<String>, scope: &Scope<'_>) -> String {
    namespace.clone().unwrap_or_else(|| scope.namespace.clone())
}

fn non_empty(map: Labels) -> Option<Labels> {
    (!map.is_empty()).then_some(map)
}

/// `[group/]resource` keys become one rule each
fn policy_rules(rules: &BTreeMap<String, Vec<String>>) -> Vec<PolicyRule> {
    rules
        .iter()
        .map(|(target, verbs)| {
            let (group, resource) = target.split_once('/').unwrap_or(("", target.as_str()));
            PolicyRule {
                api_groups: Some(vec![group.to_string()]),
                resources: Some(vec![resource.to_string()]),
                verbs: verbs.clone(),
                ..Default::default()
            }
        })
        .collect()
}
