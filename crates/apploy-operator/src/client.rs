//! Cluster client used by the reconciler
//!
//! [`KubeClient`] is the seam between reconciliation logic and the API
//! server. [`KubeClientImpl`] talks to a real cluster through kube-rs; tests
//! use the generated `MockKubeClient` or a recording fake.

use std::sync::Arc;

use apploy_common::crd::{Apps, AppsStatus};
use apploy_common::kube_utils::{is_not_found, patch_resource_status};
use apploy_common::{Error, LabelSelector};
use apploy_compiler::{Manifest, Registry};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

/// Owning `Apps` resource of every applied object
#[derive(Clone, Debug, PartialEq)]
pub struct Owner {
    pub reference: OwnerReference,
    /// Namespace of the owner; references are only valid within it
    pub namespace: String,
}

/// Cluster operations the reconciler depends on
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch an `Apps` resource; `None` when it no longer exists
    async fn get_apps(&self, name: &str, namespace: &str) -> Result<Option<Apps>, Error>;

    /// Add `finalizer` to an `Apps` resource if missing
    async fn add_finalizer(&self, name: &str, namespace: &str, finalizer: &str)
        -> Result<(), Error>;

    /// Remove `finalizer` from an `Apps` resource
    async fn remove_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Server-side apply one manifest owned by `owner`
    async fn apply(&self, manifest: &Manifest, owner: &Owner) -> Result<(), Error>;

    /// Delete every object of a known kind matching `selector`, in any namespace
    async fn delete_by_selector(&self, selector: &LabelSelector) -> Result<(), Error>;

    /// Replace the status of an `Apps` resource
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &AppsStatus,
    ) -> Result<(), Error>;
}

/// kube-rs backed [`KubeClient`]
pub struct KubeClientImpl {
    client: Client,
    registry: Arc<Registry>,
    field_manager: String,
}

impl KubeClientImpl {
    pub fn new(client: Client, registry: Arc<Registry>, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            registry,
            field_manager: field_manager.into(),
        }
    }

    fn apps_api(&self, namespace: &str) -> Api<Apps> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(
        &self,
        name: &str,
        namespace: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        self.apps_api(namespace)
            .patch(
                name,
                &PatchParams::apply(&self.field_manager),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_apps(&self, name: &str, namespace: &str) -> Result<Option<Apps>, Error> {
        match self.apps_api(namespace).get(name).await {
            Ok(apps) => Ok(Some(apps)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn add_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let apps = self.apps_api(namespace).get(name).await?;
        let mut finalizers = apps.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());
        self.patch_finalizers(name, namespace, finalizers).await?;
        debug!(apps = %name, namespace = %namespace, "added finalizer");
        Ok(())
    }

    async fn remove_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let apps = self.apps_api(namespace).get(name).await?;
        let finalizers: Vec<String> = apps
            .metadata
            .finalizers
            .as_ref()
            .map(|f| f.iter().filter(|s| *s != finalizer).cloned().collect())
            .unwrap_or_default();
        self.patch_finalizers(name, namespace, finalizers).await?;
        debug!(apps = %name, namespace = %namespace, "removed finalizer");
        Ok(())
    }

    async fn apply(&self, manifest: &Manifest, owner: &Owner) -> Result<(), Error> {
        let kind = manifest.kind();
        let registration = self.registry.get(kind).ok_or_else(|| {
            Error::validation_for(manifest.name(), format!("no api resource registered for {}", kind))
        })?;

        let mut manifest = manifest.clone();
        let namespace = manifest.namespace().map(str::to_string);
        // Owner references cannot cross namespaces or point from cluster-scoped objects
        if registration.namespaced && namespace.as_deref() == Some(owner.namespace.as_str()) {
            manifest.metadata_mut().owner_references = Some(vec![owner.reference.clone()]);
        }

        let name = manifest.name().to_string();
        let object: DynamicObject = serde_json::from_value(manifest.to_json()?)?;
        let ar = &registration.api_resource;
        let api: Api<DynamicObject> = match namespace.as_deref() {
            Some(ns) if registration.namespaced => Api::namespaced_with(self.client.clone(), ns, ar),
            _ => Api::all_with(self.client.clone(), ar),
        };
        api.patch(
            &name,
            &PatchParams::apply(&self.field_manager).force(),
            &Patch::Apply(&object),
        )
        .await?;
        debug!(kind = %kind, name = %name, namespace = ?namespace, "applied manifest");
        Ok(())
    }

    async fn delete_by_selector(&self, selector: &LabelSelector) -> Result<(), Error> {
        if selector.is_empty() {
            return Err(Error::validation(
                "refusing to delete with an empty label selector",
            ));
        }
        let params = ListParams::default().labels(&selector.to_query());
        let mut deleted = 0usize;

        for (kind, registration) in self.registry.iter() {
            let ar = &registration.api_resource;
            let listed = Api::<DynamicObject>::all_with(self.client.clone(), ar)
                .list(&params)
                .await?;
            for object in listed.items {
                let name = object.name_any();
                let api: Api<DynamicObject> = match object.namespace() {
                    Some(ns) if registration.namespaced => {
                        Api::namespaced_with(self.client.clone(), &ns, ar)
                    }
                    _ => Api::all_with(self.client.clone(), ar),
                };
                match api.delete(&name, &DeleteParams::background()).await {
                    Ok(_) => deleted += 1,
                    Err(e) if is_not_found(&e) => {}
                    Err(e) => return Err(e.into()),
                }
                debug!(kind = %kind, name = %name, "deleted object");
            }
        }

        info!(selector = %selector, deleted, "deleted objects by selector");
        Ok(())
    }

    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &AppsStatus,
    ) -> Result<(), Error> {
        patch_resource_status::<Apps>(&self.client, name, namespace, status, &self.field_manager)
            .await?;
        Ok(())
    }
}
