//! Resource store abstraction
//!
//! The orchestrator only talks to the cluster through [`ResourceStore`].
//! [`KubeStore`] is the production implementation; tests substitute an
//! in-memory store.

mod kube_store;

pub use kube_store::KubeStore;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::crd::{ManagedResource, ResourceKind};
use crate::error::Result;

/// Kubernetes built-in object kinds the uninstaller touches
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    DaemonSet,
    Deployment,
    Pod,
    Secret,
    Lease,
    PodDisruptionBudget,
    StorageClass,
    CsiDriver,
    ValidatingWebhookConfiguration,
    MutatingWebhookConfiguration,
}

impl ObjectKind {
    /// Whether objects of this kind live outside any namespace
    pub fn is_cluster_scoped(&self) -> bool {
        matches!(
            self,
            ObjectKind::StorageClass
                | ObjectKind::CsiDriver
                | ObjectKind::ValidatingWebhookConfiguration
                | ObjectKind::MutatingWebhookConfiguration
        )
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::DaemonSet => "DaemonSet",
            ObjectKind::Deployment => "Deployment",
            ObjectKind::Pod => "Pod",
            ObjectKind::Secret => "Secret",
            ObjectKind::Lease => "Lease",
            ObjectKind::PodDisruptionBudget => "PodDisruptionBudget",
            ObjectKind::StorageClass => "StorageClass",
            ObjectKind::CsiDriver => "CSIDriver",
            ObjectKind::ValidatingWebhookConfiguration => "ValidatingWebhookConfiguration",
            ObjectKind::MutatingWebhookConfiguration => "MutatingWebhookConfiguration",
        };
        f.write_str(name)
    }
}

/// Observed state of a DaemonSet or Deployment
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Workload {
    pub name: String,
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Pods (DaemonSet) or replicas (Deployment) that are ready
    pub ready: i32,
    /// Pods (DaemonSet) or replicas (Deployment) that should exist
    pub desired: i32,
}

/// Access to the cluster state the uninstaller drives to zero
///
/// Deletes are idempotent and report an already-absent object as a
/// not-found error; updates use optimistic concurrency and report a lost
/// race as a conflict error.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// List every instance of a managed kind in the Longhorn namespace, keyed by name
    async fn list(&self, kind: ResourceKind) -> Result<BTreeMap<String, ManagedResource>>;

    /// Request deletion of a managed resource
    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<()>;

    /// Persist a modified managed resource
    async fn update(&self, resource: &ManagedResource) -> Result<ManagedResource>;

    /// Strip the Longhorn finalizer so the store can remove the object
    async fn remove_finalizer(&self, resource: &ManagedResource) -> Result<()>;

    /// Backup volume of `volume` on `backup_target`
    async fn get_backup_volume(&self, backup_target: &str, volume: &str) -> Result<ManagedResource>;

    /// Raw value of a Longhorn setting
    async fn get_setting(&self, name: &str) -> Result<String>;

    /// Observed state of a DaemonSet or Deployment
    async fn get_workload(&self, kind: ObjectKind, name: &str) -> Result<Workload>;

    /// Names of all objects of a built-in kind
    async fn list_objects(&self, kind: ObjectKind) -> Result<Vec<String>>;

    /// Delete a built-in object
    async fn delete_object(&self, kind: ObjectKind, name: &str) -> Result<()>;
}
