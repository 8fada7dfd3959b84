//! Typed workload payloads and their pod template

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::args::{
    dsl_enum, fields, parse_port, Args, Buildable, Operation, OperationTable,
};
use crate::error::DslError;

use super::Base;

dsl_enum! {
    /// Deployment rollout strategy
    DeploymentStrategy {
        RollingUpdate => "RollingUpdate",
        Recreate => "Recreate",
    }
}

dsl_enum! {
    /// Update strategy for StatefulSets and DaemonSets
    SetUpdateStrategy {
        RollingUpdate => "RollingUpdate",
        OnDelete => "OnDelete",
    }
}

dsl_enum! {
    /// StatefulSet pod management policy
    PodManagementPolicy {
        OrderedReady => "OrderedReady",
        Parallel => "Parallel",
    }
}

dsl_enum! {
    /// Job completion mode
    CompletionMode {
        NonIndexed => "NonIndexed",
        Indexed => "Indexed",
    }
}

dsl_enum! {
    /// CronJob concurrency policy
    ConcurrencyPolicy {
        Allow => "Allow",
        Forbid => "Forbid",
        Replace => "Replace",
    }
}

dsl_enum! {
    /// Container image pull policy
    PullPolicy {
        Always => "Always",
        IfNotPresent => "IfNotPresent",
        Never => "Never",
    }
}

impl Default for DeploymentStrategy {
    fn default() -> Self {
        Self::RollingUpdate
    }
}

impl Default for SetUpdateStrategy {
    fn default() -> Self {
        Self::RollingUpdate
    }
}

impl Default for PodManagementPolicy {
    fn default() -> Self {
        Self::OrderedReady
    }
}

impl Default for CompletionMode {
    fn default() -> Self {
        Self::NonIndexed
    }
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        Self::Allow
    }
}

fn default_replicas() -> i32 {
    1
}

// =============================================================================
// Pod template
// =============================================================================

/// Containers run by a workload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,
}

impl PodTemplate {
    /// Insert or replace a container by name, keeping declaration order
    pub fn upsert(&mut self, container: Container) {
        match self.containers.iter_mut().find(|c| c.name == container.name) {
            Some(existing) => *existing = container,
            None => self.containers.push(container),
        }
    }

    /// Look up a container by name
    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// A single container in a workload's pod template
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<PullPolicy>,
    /// Named container ports
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub ports: BTreeMap<String, i32>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl Container {
    /// Container with a name and no image yet
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

impl Buildable for Container {
    fn type_name(&self) -> &'static str {
        "container"
    }

    fn args(&self) -> &'static [&'static str] {
        &[fields::IMAGE, fields::PULL_POLICY, fields::PORTS, fields::ENV]
    }

    fn args_example(&self) -> &'static str {
        "nginx:1.27 IfNotPresent http:80;metrics:9090 KEY1:value1;KEY2:value2"
    }

    fn available_operations(&self) -> OperationTable {
        OperationTable::from([
            (
                Operation::Configure,
                vec![fields::IMAGE, fields::PULL_POLICY, fields::ENV],
            ),
            (Operation::Expose, vec![fields::PORTS]),
        ])
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        args.assign_string(0, &mut self.image)?;
        args.assign_opt(1, &mut self.pull_policy)?;
        args.merge_with(2, &mut self.ports, parse_port)?;
        args.merge(3, &mut self.env)?;
        Ok(())
    }
}

// =============================================================================
// Deployment
// =============================================================================

/// Deployment payload
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CompDeployment {
    #[serde(flatten)]
    pub base: Base,
    #[serde(rename = "namespace", skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,
    pub replicas: i32,
    pub strategy: DeploymentStrategy,
    pub min_ready_seconds: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_deadline_seconds: Option<i32>,
    pub template: PodTemplate,
}

impl Default for CompDeployment {
    fn default() -> Self {
        Self {
            base: Base::default(),
            default_namespace: None,
            selector: BTreeMap::new(),
            replicas: default_replicas(),
            strategy: DeploymentStrategy::default(),
            min_ready_seconds: 0,
            revision_history_limit: None,
            progress_deadline_seconds: None,
            template: PodTemplate::default(),
        }
    }
}

impl Buildable for CompDeployment {
    fn type_name(&self) -> &'static str {
        "deployment"
    }

    fn args(&self) -> &'static [&'static str] {
        &[
            fields::LABELS,
            fields::SELECTOR,
            fields::REPLICAS,
            fields::STRATEGY,
            fields::MIN_READY_SECONDS,
            fields::REVISION_HISTORY_LIMIT,
            fields::PROGRESS_DEADLINE_SECONDS,
        ]
    }

    fn args_example(&self) -> &'static str {
        "label1:value1;label2:value2 label1:value1 replicas strategy minReadySeconds revisionHistoryLimit progressDeadlineSeconds"
    }

    fn available_operations(&self) -> OperationTable {
        OperationTable::from([
            (Operation::Relabel, vec![fields::LABELS]),
            (Operation::Reselect, vec![fields::SELECTOR]),
            (Operation::Scale, vec![fields::REPLICAS]),
            (
                Operation::Rollout,
                vec![
                    fields::STRATEGY,
                    fields::MIN_READY_SECONDS,
                    fields::REVISION_HISTORY_LIMIT,
                    fields::PROGRESS_DEADLINE_SECONDS,
                ],
            ),
        ])
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        args.merge(0, &mut self.base.labels)?;
        args.merge(1, &mut self.selector)?;
        args.assign_count(2, &mut self.replicas)?;
        args.assign(3, &mut self.strategy)?;
        args.assign_count(4, &mut self.min_ready_seconds)?;
        args.assign_count_opt(5, &mut self.revision_history_limit)?;
        args.assign_count_opt(6, &mut self.progress_deadline_seconds)?;
        Ok(())
    }
}

// =============================================================================
// DaemonSet
// =============================================================================

/// DaemonSet payload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CompDaemonSet {
    #[serde(flatten)]
    pub base: Base,
    #[serde(rename = "namespace", skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,
    pub update_strategy: SetUpdateStrategy,
    pub min_ready_seconds: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,
    pub template: PodTemplate,
}

impl Buildable for CompDaemonSet {
    fn type_name(&self) -> &'static str {
        "daemonset"
    }

    fn args(&self) -> &'static [&'static str] {
        &[
            fields::LABELS,
            fields::SELECTOR,
            fields::UPDATE_STRATEGY,
            fields::MIN_READY_SECONDS,
            fields::REVISION_HISTORY_LIMIT,
        ]
    }

    fn args_example(&self) -> &'static str {
        "label1:value1;label2:value2 label1:value1 updateStrategy minReadySeconds revisionHistoryLimit"
    }

    fn available_operations(&self) -> OperationTable {
        OperationTable::from([
            (Operation::Relabel, vec![fields::LABELS]),
            (Operation::Reselect, vec![fields::SELECTOR]),
            (
                Operation::Rollout,
                vec![
                    fields::UPDATE_STRATEGY,
                    fields::MIN_READY_SECONDS,
                    fields::REVISION_HISTORY_LIMIT,
                ],
            ),
        ])
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        args.merge(0, &mut self.base.labels)?;
        args.merge(1, &mut self.selector)?;
        args.assign(2, &mut self.update_strategy)?;
        args.assign_count(3, &mut self.min_ready_seconds)?;
        args.assign_count_opt(4, &mut self.revision_history_limit)?;
        Ok(())
    }
}

// =============================================================================
// StatefulSet
// =============================================================================

/// StatefulSet payload
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CompStatefulSet {
    #[serde(flatten)]
    pub base: Base,
    #[serde(rename = "namespace", skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,
    pub replicas: i32,
    pub update_strategy: SetUpdateStrategy,
    pub pod_management_policy: PodManagementPolicy,
    pub min_ready_seconds: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,
    pub template: PodTemplate,
}

impl Default for CompStatefulSet {
    fn default() -> Self {
        Self {
            base: Base::default(),
            default_namespace: None,
            selector: BTreeMap::new(),
            replicas: default_replicas(),
            update_strategy: SetUpdateStrategy::default(),
            pod_management_policy: PodManagementPolicy::default(),
            min_ready_seconds: 0,
            revision_history_limit: None,
            template: PodTemplate::default(),
        }
    }
}

impl Buildable for CompStatefulSet {
    fn type_name(&self) -> &'static str {
        "statefulset"
    }

    fn args(&self) -> &'static [&'static str] {
        &[
            fields::LABELS,
            fields::SELECTOR,
            fields::REPLICAS,
            fields::UPDATE_STRATEGY,
            fields::POD_MANAGEMENT_POLICY,
            fields::MIN_READY_SECONDS,
            fields::REVISION_HISTORY_LIMIT,
        ]
    }

    fn args_example(&self) -> &'static str {
        "label1:value1;label2:value2 label1:value1 replicas updateStrategy podManagementPolicy minReadySeconds revisionHistoryLimit"
    }

    fn available_operations(&self) -> OperationTable {
        OperationTable::from([
            (Operation::Relabel, vec![fields::LABELS]),
            (Operation::Reselect, vec![fields::SELECTOR]),
            (Operation::Scale, vec![fields::REPLICAS]),
            (
                Operation::Rollout,
                vec![
                    fields::UPDATE_STRATEGY,
                    fields::POD_MANAGEMENT_POLICY,
                    fields::MIN_READY_SECONDS,
                    fields::REVISION_HISTORY_LIMIT,
                ],
            ),
        ])
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        args.merge(0, &mut self.base.labels)?;
        args.merge(1, &mut self.selector)?;
        args.assign_count(2, &mut self.replicas)?;
        args.assign(3, &mut self.update_strategy)?;
        args.assign(4, &mut self.pod_management_policy)?;
        args.assign_count(5, &mut self.min_ready_seconds)?;
        args.assign_count_opt(6, &mut self.revision_history_limit)?;
        Ok(())
    }
}

// =============================================================================
// ReplicaSet
// =============================================================================

/// ReplicaSet payload
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CompReplicaSet {
    #[serde(flatten)]
    pub base: Base,
    #[serde(rename = "namespace", skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,
    pub replicas: i32,
    pub min_ready_seconds: i32,
    pub template: PodTemplate,
}

impl Default for CompReplicaSet {
    fn default() -> Self {
        Self {
            base: Base::default(),
            default_namespace: None,
            selector: BTreeMap::new(),
            replicas: default_replicas(),
            min_ready_seconds: 0,
            template: PodTemplate::default(),
        }
    }
}

impl Buildable for CompReplicaSet {
    fn type_name(&self) -> &'static str {
        "replicaset"
    }

    fn args(&self) -> &'static [&'static str] {
        &[
            fields::LABELS,
            fields::SELECTOR,
            fields::REPLICAS,
            fields::MIN_READY_SECONDS,
        ]
    }

    fn args_example(&self) -> &'static str {
        "label1:value1;label2:value2 label1:value1 replicas minReadySeconds"
    }

    fn available_operations(&self) -> OperationTable {
        OperationTable::from([
            (Operation::Relabel, vec![fields::LABELS]),
            (Operation::Reselect, vec![fields::SELECTOR]),
            (Operation::Scale, vec![fields::REPLICAS]),
            (Operation::Rollout, vec![fields::MIN_READY_SECONDS]),
        ])
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        args.merge(0, &mut self.base.labels)?;
        args.merge(1, &mut self.selector)?;
        args.assign_count(2, &mut self.replicas)?;
        args.assign_count(3, &mut self.min_ready_seconds)?;
        Ok(())
    }
}

// =============================================================================
// Job
// =============================================================================

/// Job payload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CompJob {
    #[serde(flatten)]
    pub base: Base,
    #[serde(rename = "namespace", skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_limit: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,
    pub completion_mode: CompletionMode,
    pub template: PodTemplate,
}

impl Buildable for CompJob {
    fn type_name(&self) -> &'static str {
        "job"
    }

    fn args(&self) -> &'static [&'static str] {
        &[
            fields::LABELS,
            fields::PARALLELISM,
            fields::COMPLETIONS,
            fields::BACKOFF_LIMIT,
            fields::ACTIVE_DEADLINE_SECONDS,
            fields::COMPLETION_MODE,
        ]
    }

    fn args_example(&self) -> &'static str {
        "label1:value1;label2:value2 parallelism completions backoffLimit activeDeadlineSeconds completionMode"
    }

    fn available_operations(&self) -> OperationTable {
        OperationTable::from([
            (Operation::Relabel, vec![fields::LABELS]),
            (
                Operation::Scale,
                vec![fields::PARALLELISM, fields::COMPLETIONS],
            ),
            (
                Operation::Rollout,
                vec![
                    fields::BACKOFF_LIMIT,
                    fields::ACTIVE_DEADLINE_SECONDS,
                    fields::COMPLETION_MODE,
                ],
            ),
        ])
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        args.merge(0, &mut self.base.labels)?;
        args.assign_count_opt(1, &mut self.parallelism)?;
        args.assign_count_opt(2, &mut self.completions)?;
        args.assign_count_opt(3, &mut self.backoff_limit)?;
        args.assign_count_opt(4, &mut self.active_deadline_seconds)?;
        args.assign(5, &mut self.completion_mode)?;
        Ok(())
    }
}

// =============================================================================
// CronJob
// =============================================================================

const SCHEDULE_MACROS: &[&str] = &[
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

/// Cron schedule as accepted by the DSL.
///
/// DSL tokens cannot contain spaces, so the five cron fields are joined with
/// `|` (`*/5|*|*|*|*`). The stored value uses regular spaces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schedule(pub String);

impl std::str::FromStr for Schedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if SCHEDULE_MACROS.contains(&s) {
            return Ok(Self(s.to_string()));
        }
        let parts: Vec<&str> = s.split('|').collect();
        if parts.len() != 5 {
            return Err(format!(
                "expected five '|'-separated cron fields or one of: {}",
                SCHEDULE_MACROS.join(", ")
            ));
        }
        let valid = |p: &&str| {
            !p.is_empty()
                && p.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | '/' | ',' | '-' | '?'))
        };
        if let Some(bad) = parts.iter().find(|p| !valid(p)) {
            return Err(format!("invalid cron field '{}'", bad));
        }
        Ok(Self(parts.join(" ")))
    }
}

/// CronJob payload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CompCronJob {
    #[serde(flatten)]
    pub base: Base,
    #[serde(rename = "namespace", skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,
    /// Cron expression in standard five-field form
    pub schedule: String,
    pub concurrency_policy: ConcurrencyPolicy,
    pub suspend: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful_jobs_history_limit: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_jobs_history_limit: Option<i32>,
    pub template: PodTemplate,
}

impl Buildable for CompCronJob {
    fn type_name(&self) -> &'static str {
        "cronjob"
    }

    fn args(&self) -> &'static [&'static str] {
        &[
            fields::LABELS,
            fields::SCHEDULE,
            fields::CONCURRENCY_POLICY,
            fields::SUSPEND,
            fields::SUCCESSFUL_JOBS_HISTORY_LIMIT,
            fields::FAILED_JOBS_HISTORY_LIMIT,
        ]
    }

    fn args_example(&self) -> &'static str {
        "label1:value1;label2:value2 */5|*|*|*|* concurrencyPolicy suspend successfulJobsHistoryLimit failedJobsHistoryLimit"
    }

    fn available_operations(&self) -> OperationTable {
        OperationTable::from([
            (Operation::Relabel, vec![fields::LABELS]),
            (
                Operation::Schedule,
                vec![
                    fields::SCHEDULE,
                    fields::CONCURRENCY_POLICY,
                    fields::SUSPEND,
                ],
            ),
            (
                Operation::Rollout,
                vec![
                    fields::SUCCESSFUL_JOBS_HISTORY_LIMIT,
                    fields::FAILED_JOBS_HISTORY_LIMIT,
                ],
            ),
        ])
    }

    fn apply_args(&mut self, args: &Args<'_>) -> Result<(), DslError> {
        args.merge(0, &mut self.base.labels)?;
        let mut schedule: Option<Schedule> = None;
        args.assign_opt(1, &mut schedule)?;
        args.assign(2, &mut self.concurrency_policy)?;
        args.assign(3, &mut self.suspend)?;
        args.assign_count_opt(4, &mut self.successful_jobs_history_limit)?;
        args.assign_count_opt(5, &mut self.failed_jobs_history_limit)?;
        if let Some(Schedule(s)) = schedule {
            self.schedule = s;
        }
        Ok(())
    }
}
