//! Resource store backed by the Kubernetes API

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::api::core::v1::{Pod, Secret};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::storage::v1::{CSIDriver, StorageClass};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::DynamicObject;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::{ObjectKind, ResourceStore, Workload};
use crate::crd::{
    setting_api_resource, ManagedResource, ResourceKind, LABEL_BACKUP_TARGET, LABEL_BACKUP_VOLUME,
    LONGHORN_FINALIZER,
};
use crate::error::{Error, Result};

/// Store reading and writing the live cluster
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    namespace: String,
}

impl KubeStore {
    /// Create a store scoped to the Longhorn namespace
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn managed(&self, kind: ResourceKind) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &kind.api_resource())
    }

    fn namespaced<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn cluster<K>(&self) -> Api<K>
    where
        K: Resource,
        K::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }
}

async fn delete_named<K>(api: Api<K>, name: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.delete(name, &DeleteParams::default()).await?;
    Ok(())
}

async fn list_names<K>(api: Api<K>) -> Result<Vec<String>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let list = api.list(&ListParams::default()).await?;
    Ok(list.items.iter().map(|obj| obj.name_any()).collect())
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn list(&self, kind: ResourceKind) -> Result<BTreeMap<String, ManagedResource>> {
        let list = self.managed(kind).list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .map(|obj| (obj.name_any(), ManagedResource::new(kind, obj)))
            .collect())
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<()> {
        delete_named(self.managed(kind), name).await
    }

    async fn update(&self, resource: &ManagedResource) -> Result<ManagedResource> {
        let kind = resource.kind();
        let updated = self
            .managed(kind)
            .replace(&resource.name(), &PostParams::default(), resource.object())
            .await?;
        Ok(ManagedResource::new(kind, updated))
    }

    async fn remove_finalizer(&self, resource: &ManagedResource) -> Result<()> {
        let remaining: Vec<&String> = resource
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != LONGHORN_FINALIZER)
            .collect();
        let patch = json!({
            "metadata": {
                "finalizers": remaining,
                "resourceVersion": resource.object().resource_version(),
            }
        });
        self.managed(resource.kind())
            .patch(&resource.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_backup_volume(&self, backup_target: &str, volume: &str) -> Result<ManagedResource> {
        let selector = format!(
            "{}={},{}={}",
            LABEL_BACKUP_TARGET, backup_target, LABEL_BACKUP_VOLUME, volume
        );
        let list = self
            .managed(ResourceKind::BackupVolume)
            .list(&ListParams::default().labels(&selector))
            .await?;
        debug!(selector = %selector, matches = list.items.len(), "Looked up backup volume");
        list.items
            .into_iter()
            .next()
            .map(|obj| ManagedResource::new(ResourceKind::BackupVolume, obj))
            .ok_or_else(|| {
                Error::not_found(format!(
                    "backup volume {} on backup target {}",
                    volume, backup_target
                ))
            })
    }

    async fn get_setting(&self, name: &str) -> Result<String> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &self.namespace, &setting_api_resource());
        let setting = api.get(name).await?;
        setting
            .data
            .get("value")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::config(format!("setting {} has no string value", name)))
    }

    async fn get_workload(&self, kind: ObjectKind, name: &str) -> Result<Workload> {
        match kind {
            ObjectKind::DaemonSet => {
                let ds = self.namespaced::<DaemonSet>().get(name).await?;
                let status = ds.status.clone().unwrap_or_default();
                Ok(Workload {
                    name: ds.name_any(),
                    deletion_timestamp: ds.metadata.deletion_timestamp.as_ref().map(|t| t.0),
                    ready: status.number_ready,
                    desired: status.desired_number_scheduled,
                })
            }
            ObjectKind::Deployment => {
                let deploy = self.namespaced::<Deployment>().get(name).await?;
                Ok(Workload {
                    name: deploy.name_any(),
                    deletion_timestamp: deploy.metadata.deletion_timestamp.as_ref().map(|t| t.0),
                    ready: deploy
                        .status
                        .as_ref()
                        .and_then(|s| s.ready_replicas)
                        .unwrap_or(0),
                    desired: deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
                })
            }
            other => Err(Error::config(format!("{} is not a workload kind", other))),
        }
    }

    async fn list_objects(&self, kind: ObjectKind) -> Result<Vec<String>> {
        match kind {
            ObjectKind::DaemonSet => list_names(self.namespaced::<DaemonSet>()).await,
            ObjectKind::Deployment => list_names(self.namespaced::<Deployment>()).await,
            ObjectKind::Pod => list_names(self.namespaced::<Pod>()).await,
            ObjectKind::Secret => list_names(self.namespaced::<Secret>()).await,
            ObjectKind::Lease => list_names(self.namespaced::<Lease>()).await,
            ObjectKind::PodDisruptionBudget => {
                list_names(self.namespaced::<PodDisruptionBudget>()).await
            }
            ObjectKind::StorageClass => list_names(self.cluster::<StorageClass>()).await,
            ObjectKind::CsiDriver => list_names(self.cluster::<CSIDriver>()).await,
            ObjectKind::ValidatingWebhookConfiguration => {
                list_names(self.cluster::<ValidatingWebhookConfiguration>()).await
            }
            ObjectKind::MutatingWebhookConfiguration => {
                list_names(self.cluster::<MutatingWebhookConfiguration>()).await
            }
        }
    }

    async fn delete_object(&self, kind: ObjectKind, name: &str) -> Result<()> {
        match kind {
            ObjectKind::DaemonSet => delete_named(self.namespaced::<DaemonSet>(), name).await,
            ObjectKind::Deployment => delete_named(self.namespaced::<Deployment>(), name).await,
            ObjectKind::Pod => delete_named(self.namespaced::<Pod>(), name).await,
            ObjectKind::Secret => delete_named(self.namespaced::<Secret>(), name).await,
            ObjectKind::Lease => delete_named(self.namespaced::<Lease>(), name).await,
            ObjectKind::PodDisruptionBudget => {
                delete_named(self.namespaced::<PodDisruptionBudget>(), name).await
            }
            ObjectKind::StorageClass => delete_named(self.cluster::<StorageClass>(), name).await,
            ObjectKind::CsiDriver => delete_named(self.cluster::<CSIDriver>(), name).await,
            ObjectKind::ValidatingWebhookConfiguration => {
                delete_named(self.cluster::<ValidatingWebhookConfiguration>(), name).await
            }
            ObjectKind::MutatingWebhookConfiguration => {
                delete_named(self.cluster::<MutatingWebhookConfiguration>(), name).await
            }
        }
    }
}
