//! Apps controller
//!
//! One reconciliation of an `Apps` resource:
//!
//! 1. Re-fetch the resource; a missing resource is already converged.
//! 2. Stamp each apployment with its map key and the owner's namespace.
//! 3. Finalizer protocol: add it to live resources; on deletion, clean up
//!    every apployment by label selector and only then remove it.
//! 4. Prune apployments that are still recorded in status but no longer
//!    declared. A failed prune keeps the status entry so it is retried.
//! 5. Fan out over apployments, at most `concurrency` at a time. Each
//!    apployment compiles and applies its manifests in two layers (common
//!    resources, then workloads). Failures stay with their apployment.
//! 6. Join every apployment, then write one status patch.
//!
//! Finalizer and status writes happen only in the reconcile task, never in
//! the fan-out, so cancellation cannot leave them half-written.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

use apploy_common::crd::{
    ApploymentOutcome, ApploymentSpec, ApploymentStatus, Apps, AppsPhase, AppsStatus,
};
use apploy_common::{Error, FINALIZER};
use apploy_compiler::{compile, selector, Instance, Manifest};
use futures::future::join_all;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{KubeClient, Owner};
use crate::config::ReconcilerConfig;

/// Shared state for every reconciliation
pub struct Context {
    pub client: Arc<dyn KubeClient>,
    pub config: ReconcilerConfig,
    /// Cancelled on shutdown
    pub cancel: CancellationToken,
    slots: Arc<Semaphore>,
}

impl Context {
    pub fn new(client: Arc<dyn KubeClient>, config: ReconcilerConfig, cancel: CancellationToken) -> Self {
        let slots = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            client,
            config,
            cancel,
            slots,
        }
    }

    /// Run `fut` unless shutdown wins the race
    async fn guarded<T, F>(&self, what: &str, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::cancelled(what)),
            res = fut => res,
        }
    }
}

/// Copy of each apployment with its name and namespace filled in
pub fn normalize(apps: &Apps) -> Vec<ApploymentSpec> {
    let namespace = apps.namespace().unwrap_or_default();
    apps.spec
        .apployments
        .iter()
        .map(|(key, spec)| ApploymentSpec {
            name: key.clone(),
            namespace: namespace.clone(),
            app: spec.app.clone(),
        })
        .collect()
}

/// Controller reference to `apps`, used as the owner of every applied object
pub fn owner_reference(apps: &Apps) -> Result<OwnerReference, Error> {
    let uid = apps
        .uid()
        .ok_or_else(|| Error::validation_for(apps.name_any(), "resource has no uid"))?;
    Ok(OwnerReference {
        api_version: Apps::api_version(&()).to_string(),
        kind: Apps::kind(&()).to_string(),
        name: apps.name_any(),
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Compilation target of apployment `name` declared by the `Apps` resource `owner`
pub fn instance(owner: &str, namespace: &str, name: &str) -> Instance {
    Instance::new(name, namespace).owned_by(owner)
}

/// Apployments recorded in status that `spec.apployments` no longer declares
pub fn removed_apployments(apps: &Apps) -> Vec<String> {
    apps.status
        .as_ref()
        .map(|status| {
            status
                .apployments
                .keys()
                .filter(|name| !apps.spec.apployments.contains_key(*name))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// Reconcile an `Apps` resource
#[instrument(skip(apps, ctx), fields(apps = %apps.name_any(), namespace = ?apps.namespace()))]
pub async fn reconcile(apps: Arc<Apps>, ctx: Arc<Context>) -> Result<Action, Error> {
    if ctx.cancel.is_cancelled() {
        return Err(Error::cancelled("reconcile"));
    }
    let name = apps.name_any();
    let namespace = apps
        .namespace()
        .ok_or_else(|| Error::validation_for(&name, "Apps resource has no namespace"))?;

    let current = match ctx
        .guarded("fetch", ctx.client.get_apps(&name, &namespace))
        .await
    {
        Ok(Some(current)) => current,
        Ok(None) => {
            debug!("resource no longer exists");
            return Ok(Action::await_change());
        }
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            warn!(error = %e, "failed to fetch resource, will retry");
            return Ok(Action::requeue(ctx.config.degraded_requeue));
        }
    };

    let apployments = normalize(&current);

    if current.is_deleting() {
        if current.has_finalizer(FINALIZER) {
            // Declared apployments plus any removed ones whose prune never succeeded
            let targets: BTreeSet<String> = current
                .spec
                .apployments
                .keys()
                .cloned()
                .chain(removed_apployments(&current))
                .collect();
            mark_deleting(&ctx, &current, &name, &namespace, targets.len()).await?;
            cleanup(&ctx, &name, &namespace, &targets).await?;
            ctx.guarded(
                "remove finalizer",
                ctx.client.remove_finalizer(&name, &namespace, FINALIZER),
            )
            .await?;
            info!(apployments = targets.len(), "cleanup complete, finalizer removed");
        }
        return Ok(Action::await_change());
    }

    if !current.has_finalizer(FINALIZER) {
        ctx.guarded(
            "add finalizer",
            ctx.client.add_finalizer(&name, &namespace, FINALIZER),
        )
        .await?;
        debug!("added finalizer");
    }

    let unpruned = prune(&ctx, &name, &namespace, &removed_apployments(&current)).await?;

    let owner = Owner {
        reference: owner_reference(&current)?,
        namespace: namespace.clone(),
    };
    let mut outcomes = fan_out(&ctx, apployments, owner).await?;
    if ctx.cancel.is_cancelled() {
        return Err(Error::cancelled("reconcile"));
    }
    outcomes.extend(unpruned);

    let status = AppsStatus::from_outcomes(outcomes, current.metadata.generation);
    ctx.guarded(
        "patch status",
        ctx.client.patch_status(&name, &namespace, &status),
    )
    .await?;

    match status.phase {
        AppsPhase::Degraded => {
            warn!(message = ?status.message, "apps degraded");
            Ok(Action::requeue(ctx.config.degraded_requeue))
        }
        _ => {
            info!(apployments = status.apployments.len(), "apps ready");
            Ok(Action::requeue(ctx.config.requeue))
        }
    }
}

/// Requeue retryable failures on the degraded interval.
///
/// Non-retryable errors (invalid resources, rejected requests) wait for the
/// resource to change instead.
pub fn error_policy(apps: Arc<Apps>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_cancelled() {
        debug!(apps = %apps.name_any(), "reconciliation cancelled");
        return Action::requeue(ctx.config.degraded_requeue);
    }
    error!(
        ?error,
        apps = %apps.name_any(),
        retryable = error.is_retryable(),
        "apps reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ctx.config.degraded_requeue)
    } else {
        Action::await_change()
    }
}

/// Record the `Deleting` phase, keeping the last per-apployment outcomes
async fn mark_deleting(
    ctx: &Context,
    current: &Apps,
    name: &str,
    namespace: &str,
    apployments: usize,
) -> Result<(), Error> {
    let status = AppsStatus {
        phase: AppsPhase::Deleting,
        observed_generation: current.metadata.generation,
        message: Some(format!("cleaning up {} apployments", apployments)),
        apployments: current
            .status
            .as_ref()
            .map(|s| s.apployments.clone())
            .unwrap_or_default(),
    };
    ctx.guarded(
        "patch status",
        ctx.client.patch_status(name, namespace, &status),
    )
    .await
}

/// Delete every listed apployment's objects; stops at the first failure
async fn cleanup(
    ctx: &Context,
    owner: &str,
    namespace: &str,
    apployments: &BTreeSet<String>,
) -> Result<(), Error> {
    for apployment in apployments {
        let selector = selector(&instance(owner, namespace, apployment));
        ctx.guarded("cleanup", ctx.client.delete_by_selector(&selector))
            .await
            .map_err(|e| {
                warn!(apployment = %apployment, error = %e, "cleanup failed, keeping finalizer");
                e
            })?;
        debug!(apployment = %apployment, selector = %selector, "cleaned up apployment");
    }
    Ok(())
}

/// Delete the objects of removed apployments.
///
/// Returns a `CleanupFailed` entry for each one that could not be cleaned,
/// so it stays in status and is pruned again next time. Only cancellation
/// is returned as an error.
async fn prune(
    ctx: &Context,
    owner: &str,
    namespace: &str,
    removed: &[String],
) -> Result<BTreeMap<String, ApploymentStatus>, Error> {
    let mut unpruned = BTreeMap::new();
    for apployment in removed {
        let selector = selector(&instance(owner, namespace, apployment));
        match ctx
            .guarded("prune", ctx.client.delete_by_selector(&selector))
            .await
        {
            Ok(()) => info!(apployment = %apployment, "pruned removed apployment"),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(apployment = %apployment, error = %e, "prune failed, will retry");
                unpruned.insert(
                    apployment.clone(),
                    status(
                        ApploymentOutcome::CleanupFailed,
                        0,
                        Some(format!("removed from spec, cleanup failed: {}", e)),
                    ),
                );
            }
        }
    }
    Ok(unpruned)
}

// =============================================================================
// Fan-out
// =============================================================================

async fn fan_out(
    ctx: &Arc<Context>,
    apployments: Vec<ApploymentSpec>,
    owner: Owner,
) -> Result<BTreeMap<String, ApploymentStatus>, Error> {
    let mut tasks = JoinSet::new();
    for apployment in apployments {
        let ctx = Arc::clone(ctx);
        let owner = owner.clone();
        tasks.spawn(async move {
            let name = apployment.name.clone();
            let status = reconcile_apployment(&ctx, apployment, &owner).await;
            (name, status)
        });
    }

    // Join everything before reporting, even if a task panicked
    let mut outcomes = BTreeMap::new();
    let mut panicked = 0usize;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, status)) => {
                outcomes.insert(name, status);
            }
            Err(e) => {
                error!(error = %e, "apployment task failed");
                panicked += 1;
            }
        }
    }
    if panicked > 0 {
        return Err(Error::internal_with_context(
            "fan-out",
            format!("{} apployment tasks did not complete", panicked),
        ));
    }
    Ok(outcomes)
}

/// Compile and apply one apployment while holding a concurrency slot
async fn reconcile_apployment(
    ctx: &Context,
    apployment: ApploymentSpec,
    owner: &Owner,
) -> ApploymentStatus {
    let permit = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        permit = Arc::clone(&ctx.slots).acquire_owned() => permit.ok(),
    };
    let Some(_permit) = permit else {
        return status(ApploymentOutcome::Cancelled, 0, Some("shutdown before start".to_string()));
    };

    let instance = instance(&owner.reference.name, &apployment.namespace, &apployment.name);
    let manifests = match compile(&apployment.app, &instance) {
        Ok(manifests) => manifests,
        Err(e) => {
            warn!(apployment = %apployment.name, error = %e, "compile failed");
            return status(ApploymentOutcome::CompileFailed, 0, Some(e.to_string()));
        }
    };

    let mut applied = 0u32;
    for (layer, items) in [
        ("common", manifests.common_layer()),
        ("workload", manifests.workload_layer()),
    ] {
        let (ok, failure) = apply_layer(ctx, &items, owner).await;
        applied += ok;
        if let Some(e) = failure {
            let outcome = if e.is_cancelled() {
                ApploymentOutcome::Cancelled
            } else {
                ApploymentOutcome::ApplyFailed
            };
            warn!(
                apployment = %apployment.name,
                layer,
                applied,
                error = %e,
                "apply failed"
            );
            return status(outcome, applied, Some(format!("{} layer: {}", layer, e)));
        }
    }

    info!(apployment = %apployment.name, applied, "apployment applied");
    status(ApploymentOutcome::Applied, applied, None)
}

/// Apply one layer concurrently; returns the success count and the first error
async fn apply_layer(ctx: &Context, items: &[&Manifest], owner: &Owner) -> (u32, Option<Error>) {
    let results = join_all(
        items
            .iter()
            .map(|m| ctx.guarded("apply", ctx.client.apply(m, owner))),
    )
    .await;

    let mut ok = 0;
    let mut first = None;
    for (manifest, result) in items.iter().zip(results) {
        match result {
            Ok(()) => ok += 1,
            Err(e) => {
                debug!(kind = %manifest.kind(), name = %manifest.name(), error = %e, "apply failed");
                first.get_or_insert(e);
            }
        }
    }
    (ok, first)
}

fn status(outcome: ApploymentOutcome, applied: u32, message: Option<String>) -> ApploymentStatus {
    ApploymentStatus {
        outcome,
        applied,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use apploy_common::crd::AppsSpec;
    use apploy_common::LabelSelector;
    use apploy_compiler::ManifestKind;
    use apploy_model::model::{CompDeployment, Container, PodTemplate};
    use apploy_model::{App, Base, Component, Workload, WorkloadType};
    use async_trait::async_trait;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::core::ObjectMeta;

    use crate::client::MockKubeClient;

    // =========================================================================
    // Fixtures
    // =========================================================================

    fn app(image: &str) -> App {
        let mut template = PodTemplate::default();
        let mut container = Container::named("main");
        container.image = image.to_string();
        template.upsert(container);

        let mut component = Component::new("api", WorkloadType::Deployment);
        component.workload = Some(Workload::Deployment(CompDeployment {
            base: Base::named("api"),
            template,
            ..Default::default()
        }));
        component.common.config_maps.push(apploy_model::model::ConfigMap {
            base: Base::named("settings"),
            ..Default::default()
        });

        let mut app = App::new("shop", "1.0.0");
        app.components.push(component);
        app
    }

    fn broken_app() -> App {
        let mut app = app("nginx");
        app.components[0].workload = None;
        app
    }

    fn apps(entries: &[(&str, App)]) -> Apps {
        let mut apps = Apps::new(
            "store",
            AppsSpec {
                apployments: entries
                    .iter()
                    .map(|(name, app)| {
                        (
                            name.to_string(),
                            ApploymentSpec {
                                app: app.clone(),
                                ..Default::default()
                            },
                        )
                    })
                    .collect(),
            },
        );
        apps.metadata = ObjectMeta {
            name: Some("store".to_string()),
            namespace: Some("shop".to_string()),
            uid: Some("uid-1234".to_string()),
            generation: Some(3),
            finalizers: Some(vec![FINALIZER.to_string()]),
            ..Default::default()
        };
        apps
    }

    /// `apps` as last reconciled with every named apployment applied
    fn recorded(mut apps: Apps, names: &[&str]) -> Apps {
        apps.status = Some(AppsStatus::from_outcomes(
            names
                .iter()
                .map(|n| (n.to_string(), status(ApploymentOutcome::Applied, 2, None)))
                .collect(),
            Some(2),
        ));
        apps
    }

    fn owned(owner: &str, name: &str) -> LabelSelector {
        selector(&instance(owner, "shop", name))
    }

    fn deleting(mut apps: Apps) -> Apps {
        apps.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        apps
    }

    fn context(client: impl KubeClient + 'static, concurrency: usize) -> Arc<Context> {
        Arc::new(Context::new(
            Arc::new(client),
            ReconcilerConfig {
                concurrency,
                ..Default::default()
            },
            CancellationToken::new(),
        ))
    }

    // =========================================================================
    // Recording fake
    // =========================================================================

    #[derive(Clone, Debug, PartialEq)]
    enum Call {
        Apply {
            owner: String,
            instance: String,
            name: String,
            kind: ManifestKind,
            start: Instant,
            end: Instant,
        },
        Delete(LabelSelector),
        Status(AppsStatus),
        AddFinalizer,
    }

    /// Records calls and tracks how many apployments have applies in flight.
    ///
    /// When `slots` is set, every apply also samples how many concurrency
    /// permits are held at that moment.
    struct RecordingClient {
        apps: Apps,
        delay: Duration,
        fail_kind: Option<ManifestKind>,
        fail_delete: Option<String>,
        calls: Mutex<Vec<Call>>,
        in_flight: Mutex<BTreeMap<String, usize>>,
        max_apployments: AtomicUsize,
        slots: Mutex<Option<(Arc<Semaphore>, usize)>>,
        max_held: AtomicUsize,
        unpermitted: AtomicUsize,
    }

    impl RecordingClient {
        fn new(apps: Apps) -> Self {
            Self {
                apps,
                delay: Duration::from_millis(20),
                fail_kind: None,
                fail_delete: None,
                calls: Mutex::new(Vec::new()),
                in_flight: Mutex::new(BTreeMap::new()),
                max_apployments: AtomicUsize::new(0),
                slots: Mutex::new(None),
                max_held: AtomicUsize::new(0),
                unpermitted: AtomicUsize::new(0),
            }
        }

        fn watch_slots(&self, ctx: &Context) {
            *self.slots.lock().unwrap() = Some((ctx.slots.clone(), ctx.config.concurrency));
        }

        fn deletes(&self) -> Vec<LabelSelector> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Delete(s) => Some(s),
                    _ => None,
                })
                .collect()
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn statuses(&self) -> Vec<AppsStatus> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Status(s) => Some(s),
                    _ => None,
                })
                .collect()
        }

        fn applies(&self) -> Vec<(String, ManifestKind, Instant, Instant)> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Apply {
                        instance,
                        kind,
                        start,
                        end,
                        ..
                    } => Some((instance, kind, start, end)),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl KubeClient for RecordingClient {
        async fn get_apps(&self, _: &str, _: &str) -> Result<Option<Apps>, Error> {
            Ok(Some(self.apps.clone()))
        }

        async fn add_finalizer(&self, _: &str, _: &str, _: &str) -> Result<(), Error> {
            self.calls.lock().unwrap().push(Call::AddFinalizer);
            Ok(())
        }

        async fn remove_finalizer(&self, _: &str, _: &str, _: &str) -> Result<(), Error> {
            Ok(())
        }

        async fn apply(&self, manifest: &Manifest, _: &Owner) -> Result<(), Error> {
            let labels = manifest.labels();
            let instance = labels[apploy_common::LABEL_INSTANCE].clone();
            let owner = labels
                .get(apploy_common::LABEL_OWNER)
                .cloned()
                .unwrap_or_default();
            {
                let mut in_flight = self.in_flight.lock().unwrap();
                *in_flight.entry(instance.clone()).or_default() += 1;
                self.max_apployments
                    .fetch_max(in_flight.len(), Ordering::SeqCst);
                if let Some((slots, limit)) = self.slots.lock().unwrap().as_ref() {
                    let held = limit - slots.available_permits();
                    self.max_held.fetch_max(held, Ordering::SeqCst);
                    if in_flight.len() > held {
                        self.unpermitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
            let start = Instant::now();
            tokio::time::sleep(self.delay).await;
            let end = Instant::now();
            {
                let mut in_flight = self.in_flight.lock().unwrap();
                if let Some(count) = in_flight.get_mut(&instance) {
                    *count -= 1;
                    if *count == 0 {
                        in_flight.remove(&instance);
                    }
                }
            }
            self.calls.lock().unwrap().push(Call::Apply {
                owner,
                instance,
                name: manifest.name().to_string(),
                kind: manifest.kind(),
                start,
                end,
            });
            if self.fail_kind == Some(manifest.kind()) {
                return Err(Error::internal_with_context("apply", "rejected"));
            }
            Ok(())
        }

        async fn delete_by_selector(&self, selector: &LabelSelector) -> Result<(), Error> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Delete(selector.clone()));
            match &self.fail_delete {
                Some(name) if selector.match_labels()[apploy_common::LABEL_INSTANCE] == *name => {
                    Err(Error::internal_with_context("delete", "forbidden"))
                }
                _ => Ok(()),
            }
        }

        async fn patch_status(&self, _: &str, _: &str, status: &AppsStatus) -> Result<(), Error> {
            self.calls.lock().unwrap().push(Call::Status(status.clone()));
            Ok(())
        }
    }

    // =========================================================================
    // Normalization and owner references
    // =========================================================================

    mod identity {
        use super::*;

        #[test]
        fn normalize_uses_map_key_and_owner_namespace() {
            let mut apps = apps(&[("a", app("nginx")), ("b", app("nginx"))]);
            if let Some(spec) = apps.spec.apployments.get_mut("a") {
                spec.name = "spoofed".to_string();
                spec.namespace = "elsewhere".to_string();
            }
            let normalized = normalize(&apps);
            let pairs: Vec<(&str, &str)> = normalized
                .iter()
                .map(|a| (a.name.as_str(), a.namespace.as_str()))
                .collect();
            assert_eq!(pairs, vec![("a", "shop"), ("b", "shop")]);
        }

        #[test]
        fn owner_reference_is_a_blocking_controller_ref() {
            let owner = owner_reference(&apps(&[])).unwrap();
            assert_eq!(owner.api_version, "apploy.dev/v1alpha1");
            assert_eq!(owner.kind, "Apps");
            assert_eq!(owner.name, "store");
            assert_eq!(owner.uid, "uid-1234");
            assert_eq!(owner.controller, Some(true));
            assert_eq!(owner.block_owner_deletion, Some(true));
        }

        #[test]
        fn owner_reference_needs_uid() {
            let mut apps = apps(&[]);
            apps.metadata.uid = None;
            assert!(owner_reference(&apps).is_err());
        }

        #[test]
        fn selectors_are_scoped_to_the_owning_apps() {
            let store = owned("store", "web");
            let outlet = owned("outlet", "web");
            assert_ne!(store, outlet);
            assert_eq!(store.match_labels()[apploy_common::LABEL_OWNER], "store");
            assert_eq!(store.match_labels()[apploy_common::LABEL_INSTANCE], "web");
        }

        #[tokio::test]
        async fn same_apployment_name_under_two_owners_never_collides() {
            let store = apps(&[("web", app("nginx"))]);
            let mut outlet = store.clone();
            outlet.metadata.name = Some("outlet".to_string());
            outlet.metadata.uid = Some("uid-5678".to_string());

            let mut applied = Vec::new();
            for live in [store, outlet] {
                let client = Arc::new(RecordingClient::new(live.clone()));
                let ctx = Arc::new(Context::new(
                    client.clone(),
                    ReconcilerConfig::default(),
                    CancellationToken::new(),
                ));
                reconcile(Arc::new(live), ctx).await.unwrap();
                applied.push(
                    client
                        .calls()
                        .into_iter()
                        .filter_map(|c| match c {
                            Call::Apply { owner, name, .. } => Some((owner, name)),
                            _ => None,
                        })
                        .collect::<Vec<_>>(),
                );
            }

            let (store, outlet) = (&applied[0], &applied[1]);
            assert!(!store.is_empty());
            assert!(store.iter().all(|(owner, _)| owner == "store"));
            assert!(outlet.iter().all(|(owner, _)| owner == "outlet"));
            assert!(store
                .iter()
                .all(|(_, name)| outlet.iter().all(|(_, other)| other != name)));
        }
    }

    // =========================================================================
    // Finalizer protocol
    // =========================================================================

    mod finalizer {
        use super::*;

        #[tokio::test]
        async fn missing_resource_is_a_no_op() {
            let mut mock = MockKubeClient::new();
            mock.expect_get_apps().times(1).returning(|_, _| Ok(None));
            let ctx = context(mock, 2);

            let action = reconcile(Arc::new(apps(&[("a", app("nginx"))])), ctx)
                .await
                .unwrap();
            assert_eq!(action, Action::await_change());
        }

        #[tokio::test]
        async fn fetch_failure_requeues_without_side_effects() {
            let mut mock = MockKubeClient::new();
            mock.expect_get_apps()
                .returning(|_, _| Err(Error::internal("api unavailable")));
            let ctx = context(mock, 2);

            let action = reconcile(Arc::new(apps(&[])), ctx.clone()).await.unwrap();
            assert_eq!(action, Action::requeue(ctx.config.degraded_requeue));
        }

        #[tokio::test]
        async fn finalizer_added_before_apply() {
            let mut live = apps(&[("a", app("nginx"))]);
            live.metadata.finalizers = None;
            let client = Arc::new(RecordingClient::new(live.clone()));
            let ctx = Arc::new(Context::new(
                client.clone(),
                ReconcilerConfig::default(),
                CancellationToken::new(),
            ));

            reconcile(Arc::new(live), ctx).await.unwrap();
            let calls = client.calls();
            assert_eq!(calls.first(), Some(&Call::AddFinalizer));
            assert!(matches!(calls.last(), Some(Call::Status(_))));
        }

        #[tokio::test]
        async fn finalizer_add_failure_fails_reconcile() {
            let mut live = apps(&[("a", app("nginx"))]);
            live.metadata.finalizers = None;
            let fetched = live.clone();
            let mut mock = MockKubeClient::new();
            mock.expect_get_apps()
                .returning(move |_, _| Ok(Some(fetched.clone())));
            mock.expect_add_finalizer()
                .returning(|_, _, _| Err(Error::internal("conflict")));
            mock.expect_apply().times(0);
            mock.expect_patch_status().times(0);

            let result = reconcile(Arc::new(live), context(mock, 2)).await;
            assert!(result.is_err());
        }

        #[tokio::test]
        async fn deletion_cleans_every_apployment_then_removes_finalizer() {
            let live = deleting(apps(&[("a", app("nginx")), ("b", app("nginx"))]));
            let fetched = live.clone();
            let mut mock = MockKubeClient::new();
            mock.expect_get_apps()
                .returning(move |_, _| Ok(Some(fetched.clone())));
            let events = Arc::new(Mutex::new(Vec::new()));
            let record = events.clone();
            mock.expect_patch_status()
                .times(1)
                .returning(move |_, _, status| {
                    record.lock().unwrap().push(format!("status {}", status.phase));
                    Ok(())
                });
            let cleaned = Arc::new(Mutex::new(Vec::new()));
            let (record, record_selector) = (events.clone(), cleaned.clone());
            mock.expect_delete_by_selector()
                .times(2)
                .returning(move |s| {
                    record_selector.lock().unwrap().push(s.clone());
                    record.lock().unwrap().push("delete".to_string());
                    Ok(())
                });
            let record = events.clone();
            mock.expect_remove_finalizer()
                .times(1)
                .returning(move |_, _, _| {
                    record.lock().unwrap().push("remove finalizer".to_string());
                    Ok(())
                });
            mock.expect_apply().times(0);

            let action = reconcile(Arc::new(live), context(mock, 2)).await.unwrap();
            assert_eq!(action, Action::await_change());

            assert_eq!(
                *events.lock().unwrap(),
                ["status Deleting", "delete", "delete", "remove finalizer"]
            );
            assert_eq!(
                *cleaned.lock().unwrap(),
                vec![owned("store", "a"), owned("store", "b")]
            );
        }

        #[tokio::test]
        async fn deletion_also_cleans_apployments_left_in_status() {
            let live = deleting(recorded(apps(&[("a", app("nginx"))]), &["a", "old"]));
            let fetched = live.clone();
            let mut mock = MockKubeClient::new();
            mock.expect_get_apps()
                .returning(move |_, _| Ok(Some(fetched.clone())));
            mock.expect_patch_status().returning(|_, _, _| Ok(()));
            let cleaned = Arc::new(Mutex::new(Vec::new()));
            let record = cleaned.clone();
            mock.expect_delete_by_selector().returning(move |s| {
                record.lock().unwrap().push(s.clone());
                Ok(())
            });
            mock.expect_remove_finalizer()
                .times(1)
                .returning(|_, _, _| Ok(()));

            reconcile(Arc::new(live), context(mock, 2)).await.unwrap();
            assert_eq!(
                *cleaned.lock().unwrap(),
                vec![owned("store", "a"), owned("store", "old")]
            );
        }

        #[tokio::test]
        async fn any_cleanup_failure_keeps_the_finalizer() {
            let live = deleting(apps(&[
                ("a", app("nginx")),
                ("b", app("nginx")),
                ("c", app("nginx")),
            ]));
            let fetched = live.clone();
            let mut mock = MockKubeClient::new();
            mock.expect_get_apps()
                .returning(move |_, _| Ok(Some(fetched.clone())));
            mock.expect_patch_status().returning(|_, _, _| Ok(()));
            mock.expect_delete_by_selector().returning(|s| {
                if s.match_labels()[apploy_common::LABEL_INSTANCE] == "b" {
                    Err(Error::internal("api unavailable"))
                } else {
                    Ok(())
                }
            });
            mock.expect_remove_finalizer().times(0);

            let result = reconcile(Arc::new(live), context(mock, 2)).await;
            assert!(result.is_err());
        }

        #[tokio::test]
        async fn deletion_without_finalizer_does_nothing() {
            let mut live = deleting(apps(&[("a", app("nginx"))]));
            live.metadata.finalizers = None;
            let fetched = live.clone();
            let mut mock = MockKubeClient::new();
            mock.expect_get_apps()
                .returning(move |_, _| Ok(Some(fetched.clone())));

            let action = reconcile(Arc::new(live), context(mock, 2)).await.unwrap();
            assert_eq!(action, Action::await_change());
        }
    }

    // =========================================================================
    // Removed apployments
    // =========================================================================

    mod prune {
        use super::*;

        fn reconciled(client: RecordingClient) -> (Arc<RecordingClient>, Arc<Context>) {
            let client = Arc::new(client);
            let ctx = Arc::new(Context::new(
                client.clone(),
                ReconcilerConfig::default(),
                CancellationToken::new(),
            ));
            (client, ctx)
        }

        #[test]
        fn removed_apployments_come_from_status() {
            let live = recorded(apps(&[("a", app("nginx"))]), &["a", "b", "c"]);
            assert_eq!(removed_apployments(&live), vec!["b", "c"]);
            assert!(removed_apployments(&apps(&[("a", app("nginx"))])).is_empty());
        }

        #[tokio::test]
        async fn removed_apployment_is_pruned() {
            let live = recorded(apps(&[("a", app("nginx"))]), &["a", "b"]);
            let (client, ctx) = reconciled(RecordingClient::new(live.clone()));

            let action = reconcile(Arc::new(live), ctx.clone()).await.unwrap();
            assert_eq!(action, Action::requeue(ctx.config.requeue));
            assert_eq!(client.deletes(), vec![owned("store", "b")]);

            let status = &client.statuses()[0];
            assert_eq!(status.phase, AppsPhase::Ready);
            assert!(status.apployments.contains_key("a"));
            assert!(!status.apployments.contains_key("b"));
        }

        #[tokio::test]
        async fn prune_runs_before_apply() {
            let live = recorded(apps(&[("a", app("nginx"))]), &["b"]);
            let (client, ctx) = reconciled(RecordingClient::new(live.clone()));
            reconcile(Arc::new(live), ctx).await.unwrap();

            let calls = client.calls();
            let delete = calls.iter().position(|c| matches!(c, Call::Delete(_)));
            let apply = calls.iter().position(|c| matches!(c, Call::Apply { .. }));
            assert!(delete.unwrap() < apply.unwrap());
        }

        #[tokio::test]
        async fn failed_prune_keeps_the_entry() {
            let live = recorded(apps(&[("a", app("nginx"))]), &["a", "b"]);
            let mut client = RecordingClient::new(live.clone());
            client.fail_delete = Some("b".to_string());
            let (client, ctx) = reconciled(client);

            let action = reconcile(Arc::new(live), ctx.clone()).await.unwrap();
            assert_eq!(action, Action::requeue(ctx.config.degraded_requeue));

            let status = &client.statuses()[0];
            assert_eq!(status.phase, AppsPhase::Degraded);
            assert_eq!(status.apployments["a"].outcome, ApploymentOutcome::Applied);
            let b = &status.apployments["b"];
            assert_eq!(b.outcome, ApploymentOutcome::CleanupFailed);
            assert!(b.message.as_deref().unwrap_or_default().contains("forbidden"));
        }

        #[tokio::test]
        async fn kept_entry_is_pruned_on_the_next_pass() {
            let live = recorded(apps(&[("a", app("nginx"))]), &["a", "b"]);
            let mut client = RecordingClient::new(live.clone());
            client.fail_delete = Some("b".to_string());
            let (client, ctx) = reconciled(client);
            reconcile(Arc::new(live.clone()), ctx).await.unwrap();

            let mut next = live;
            next.status = client.statuses().pop();
            let (client, ctx) = reconciled(RecordingClient::new(next.clone()));
            reconcile(Arc::new(next), ctx).await.unwrap();

            assert_eq!(client.deletes(), vec![owned("store", "b")]);
            assert_eq!(client.statuses()[0].phase, AppsPhase::Ready);
        }
    }

    // =========================================================================
    // Apply and status
    // =========================================================================

    mod apply {
        use super::*;

        #[tokio::test]
        async fn healthy_apployments_report_ready() {
            let live = apps(&[("a", app("nginx")), ("b", app("redis"))]);
            let client = Arc::new(RecordingClient::new(live.clone()));
            let ctx = Arc::new(Context::new(
                client.clone(),
                ReconcilerConfig::default(),
                CancellationToken::new(),
            ));

            let action = reconcile(Arc::new(live), ctx.clone()).await.unwrap();
            assert_eq!(action, Action::requeue(ctx.config.requeue));

            let statuses = client.statuses();
            assert_eq!(statuses.len(), 1);
            let status = &statuses[0];
            assert_eq!(status.phase, AppsPhase::Ready);
            assert_eq!(status.observed_generation, Some(3));
            assert_eq!(status.apployments["a"].outcome, ApploymentOutcome::Applied);
            assert_eq!(status.apployments["a"].applied, 2);
        }

        #[tokio::test]
        async fn common_layer_lands_before_workloads() {
            let live = apps(&[("a", app("nginx"))]);
            let client = Arc::new(RecordingClient::new(live.clone()));
            let ctx = Arc::new(Context::new(
                client.clone(),
                ReconcilerConfig::default(),
                CancellationToken::new(),
            ));
            reconcile(Arc::new(live), ctx).await.unwrap();

            let applies = client.applies();
            let config_map = applies
                .iter()
                .find(|(_, k, _, _)| *k == ManifestKind::ConfigMap)
                .unwrap();
            let deployment = applies
                .iter()
                .find(|(_, k, _, _)| *k == ManifestKind::Deployment)
                .unwrap();
            assert!(config_map.3 <= deployment.2);
        }

        #[tokio::test]
        async fn compile_failure_is_isolated() {
            let live = apps(&[("good", app("nginx")), ("bad", broken_app())]);
            let client = Arc::new(RecordingClient::new(live.clone()));
            let ctx = Arc::new(Context::new(
                client.clone(),
                ReconcilerConfig::default(),
                CancellationToken::new(),
            ));

            let action = reconcile(Arc::new(live), ctx.clone()).await.unwrap();
            assert_eq!(action, Action::requeue(ctx.config.degraded_requeue));

            let status = &client.statuses()[0];
            assert_eq!(status.phase, AppsPhase::Degraded);
            assert_eq!(status.apployments["good"].outcome, ApploymentOutcome::Applied);
            let bad = &status.apployments["bad"];
            assert_eq!(bad.outcome, ApploymentOutcome::CompileFailed);
            assert!(bad.message.as_deref().unwrap_or_default().contains("no workload"));
            assert!(client.applies().iter().all(|(i, _, _, _)| i == "good"));
        }

        #[tokio::test]
        async fn failed_common_layer_skips_workloads() {
            let live = apps(&[("a", app("nginx"))]);
            let mut client = RecordingClient::new(live.clone());
            client.fail_kind = Some(ManifestKind::ConfigMap);
            let client = Arc::new(client);
            let ctx = Arc::new(Context::new(
                client.clone(),
                ReconcilerConfig::default(),
                CancellationToken::new(),
            ));

            reconcile(Arc::new(live), ctx).await.unwrap();
            assert!(client
                .applies()
                .iter()
                .all(|(_, k, _, _)| *k != ManifestKind::Deployment));
            let status = &client.statuses()[0];
            assert_eq!(status.apployments["a"].outcome, ApploymentOutcome::ApplyFailed);
            assert_eq!(status.apployments["a"].applied, 0);
        }
    }

    // =========================================================================
    // Concurrency and cancellation
    // =========================================================================

    mod concurrency {
        use super::*;

        #[tokio::test]
        async fn limit_bounds_permits_held() {
            // Broken entries hold a permit while compiling but never apply
            let entries: Vec<(String, App)> = (0..8)
                .map(|i| {
                    let app = if i % 3 == 0 { broken_app() } else { app("nginx") };
                    (format!("app{}", i), app)
                })
                .collect();
            let refs: Vec<(&str, App)> = entries
                .iter()
                .map(|(n, a)| (n.as_str(), a.clone()))
                .collect();
            let live = apps(&refs);
            let client = Arc::new(RecordingClient::new(live.clone()));
            let ctx = Arc::new(Context::new(
                client.clone(),
                ReconcilerConfig {
                    concurrency: 2,
                    ..Default::default()
                },
                CancellationToken::new(),
            ));

            client.watch_slots(&ctx);

            reconcile(Arc::new(live), ctx).await.unwrap();
            let held = client.max_held.load(Ordering::SeqCst);
            assert_eq!(held, 2, "{} permits held at most", held);
            assert_eq!(client.unpermitted.load(Ordering::SeqCst), 0);
            let max = client.max_apployments.load(Ordering::SeqCst);
            assert!(max <= held, "{} apployments in flight", max);
            assert_eq!(client.statuses()[0].apployments.len(), 8);
        }

        #[tokio::test]
        async fn limit_one_serializes_apployments() {
            let live = apps(&[("a", app("nginx")), ("b", app("redis"))]);
            let client = Arc::new(RecordingClient::new(live.clone()));
            let ctx = Arc::new(Context::new(
                client.clone(),
                ReconcilerConfig {
                    concurrency: 1,
                    ..Default::default()
                },
                CancellationToken::new(),
            ));

            reconcile(Arc::new(live), ctx).await.unwrap();

            let applies = client.applies();
            let span = |instance: &str| {
                let mine: Vec<_> = applies.iter().filter(|(i, _, _, _)| i == instance).collect();
                let start = mine.iter().map(|(_, _, s, _)| *s).min().unwrap();
                let end = mine.iter().map(|(_, _, _, e)| *e).max().unwrap();
                (start, end)
            };
            let (a_start, a_end) = span("a");
            let (b_start, b_end) = span("b");
            assert!(a_end <= b_start || b_end <= a_start);
        }

        #[tokio::test]
        async fn cancelled_reconcile_touches_nothing() {
            let mut mock = MockKubeClient::new();
            mock.expect_get_apps().times(0);
            mock.expect_add_finalizer().times(0);
            mock.expect_remove_finalizer().times(0);
            mock.expect_patch_status().times(0);
            let ctx = context(mock, 1);
            ctx.cancel.cancel();

            let err = reconcile(Arc::new(apps(&[("a", app("nginx"))])), ctx.clone())
                .await
                .unwrap_err();
            assert!(err.is_cancelled());
            assert_eq!(
                error_policy(Arc::new(apps(&[])), &err, ctx.clone()),
                Action::requeue(ctx.config.degraded_requeue)
            );
        }

        #[tokio::test]
        async fn cancellation_during_fan_out_skips_status() {
            let live = apps(&[("a", app("nginx")), ("b", app("redis"))]);
            let mut client = RecordingClient::new(live.clone());
            client.delay = Duration::from_secs(30);
            let client = Arc::new(client);
            let ctx = Arc::new(Context::new(
                client.clone(),
                ReconcilerConfig {
                    concurrency: 1,
                    ..Default::default()
                },
                CancellationToken::new(),
            ));

            let cancel = ctx.cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            });

            let err = reconcile(Arc::new(live), ctx).await.unwrap_err();
            assert!(err.is_cancelled());
            assert!(client.statuses().is_empty());
        }
    }

    #[test]
    fn error_policy_requeues_on_degraded_interval() {
        let ctx = context(MockKubeClient::new(), 1);
        let action = error_policy(Arc::new(apps(&[])), &Error::internal("boom"), ctx.clone());
        assert_eq!(action, Action::requeue(ctx.config.degraded_requeue));
    }

    #[test]
    fn error_policy_waits_for_a_change_on_invalid_resources() {
        let ctx = context(MockKubeClient::new(), 1);
        let err = Error::validation_for("store", "Apps resource has no namespace");
        assert_eq!(
            error_policy(Arc::new(apps(&[])), &err, ctx),
            Action::await_change()
        );
    }

    #[tokio::test]
    async fn missing_namespace_is_not_retried() {
        let mut live = apps(&[("a", app("nginx"))]);
        live.metadata.namespace = None;
        let ctx = context(MockKubeClient::new(), 1);

        let err = reconcile(Arc::new(live.clone()), ctx.clone())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(error_policy(Arc::new(live), &err, ctx), Action::await_change());
    }
}
